//! End-to-end behaviour of the memory core.

mod common;

use common::{PageMap, buddy, sim_ram};
use kernel_alloc::buddy::{MAX_ORDER, ORDER_COUNT};
use kernel_alloc::{AllocError, BinAllocator, GuardPlacement, ResourceTree, VmAllocator, VmZone};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalRange, VirtualAddress};

fn conserved(pages: &kernel_alloc::BuddyAllocator) -> bool {
    let sum: usize = (0..ORDER_COUNT)
        .map(|k| (pages.free_count(k) + pages.inuse_count(k)) << k)
        .sum();
    sum == pages.total_pages()
}

#[test]
fn three_pages_from_sixteen_mebibytes() {
    let ram = PhysicalRange::from_start_size(PhysicalAddress::new(0x4000_0000), 16 << 20);
    let pages = buddy(&[ram], &[]);
    assert_eq!(pages.free_count(MAX_ORDER), 8);

    let block = pages.allocate(3).unwrap();
    assert_eq!(block.pages(), 4);
    assert_eq!(block.start().as_u64() % (4 * PAGE_SIZE), 0);
    assert_eq!(pages.inuse_count(2), 1);
    assert!(conserved(pages));

    pages.free(block);
    assert_eq!(pages.inuse_count(2), 0);
    assert_eq!(pages.free_pages(), 4096);
    // Everything merged back up.
    assert_eq!(pages.free_count(MAX_ORDER), 8);
    assert!(conserved(pages));
}

#[test]
fn guard_page_before_an_eight_kib_area() {
    let ram = PhysicalRange::from_start_size(PhysicalAddress::new(0x4000_0000), 4 << 20);
    let vm = VmAllocator::new(VmZone::kernel(), buddy(&[ram], &[]), PageMap::default());

    let area = vm.reserve(8 << 10, PAGE_SIZE, GuardPlacement::Before).unwrap();
    vm.map_physical(area).unwrap();
    let slice = vm.usable_slice(area, 8 << 10).unwrap();

    let usable = VirtualAddress::from_nonnull(slice);
    assert_eq!(usable, area.start() + PAGE_SIZE);
    assert_eq!(slice.len(), 8 << 10);
    assert!(vm.translate(usable).is_some());
    assert!(vm.translate(usable + ((8 << 10) - 1)).is_some());
    // A write just below the slice hits the unmapped guard page.
    assert_eq!(vm.translate(VirtualAddress::new(usable.as_u64() - 1)), None);
}

#[test]
fn kernel_image_inside_system_ram() {
    let mut tree = ResourceTree::new();
    let ram = tree.request("System RAM", PhysicalAddress::new(0), 0x4000_0000).unwrap();
    tree.append_child(ram, "Kernel Image", PhysicalAddress::new(0x40_0000), 0x40_0000)
        .unwrap();
    assert_eq!(
        tree.append_child(ram, "Overlap", PhysicalAddress::new(0x60_0000), 0x40_0000),
        Err(AllocError::NotAvailable)
    );
    assert_eq!(tree.get(ram).unwrap().children().len(), 1);
}

#[test]
fn concurrent_page_traffic_conserves_pages() {
    let ram = PhysicalRange::from_start_size(PhysicalAddress::new(0x4000_0000), 16 << 20);
    let pages = buddy(&[ram], &[]);

    std::thread::scope(|s| {
        for t in 0..4_usize {
            s.spawn(move || {
                let mut live = Vec::new();
                for i in 0..200_usize {
                    if i % 4 == 3 {
                        if let Some(block) = live.pop() {
                            pages.free(block);
                        }
                    } else {
                        live.push(pages.allocate(1 + (i + t) % 5).unwrap());
                    }
                }
                for block in live {
                    pages.free(block);
                }
            });
        }
    });

    assert!(conserved(pages));
    assert_eq!(pages.free_pages(), pages.total_pages());
    assert_eq!(pages.free_count(MAX_ORDER), 8);
}

#[test]
fn concurrent_heap_traffic_hands_out_disjoint_chunks() {
    let (ram, linear) = sim_ram(8 << 20);
    let heap = BinAllocator::new(buddy(&[ram], &[]), linear);

    std::thread::scope(|s| {
        for t in 0..4_u8 {
            let heap = &heap;
            s.spawn(move || {
                let chunks: Vec<_> = (0..300)
                    .map(|_| {
                        let p = heap.allocate(48, 16).unwrap();
                        unsafe { p.as_ptr().write_bytes(t, 48) };
                        p
                    })
                    .collect();
                for p in chunks {
                    let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 48) };
                    assert!(bytes.iter().all(|&b| b == t));
                    unsafe { heap.free(p, 48, 16) };
                }
            });
        }
    });

    // One thread alone keeps 300 chunks of 64 bytes live; all are back on the list.
    let carved = heap.pages_carved(1);
    assert!(carved >= 5);
    assert_eq!(heap.free_chunks(1), carved * 64);
}
