//! # Physical resource tree
//!
//! A descriptive registry of what occupies physical address space: DRAM
//! banks, the kernel image, device register windows. It answers "who owns
//! this address" for diagnostics and never influences allocation.
//!
//! ```text
//! System RAM      [0x0000_0000 .. 0x4000_0000)
//! ├─ Kernel Image [0x0040_0000 .. 0x0080_0000)
//! └─ Boot Memory  [0x0080_0000 .. 0x0082_0000)
//! uart            [0x0900_0000 .. 0x0900_1000)
//! ```
//!
//! Nodes live in one arena and refer to each other by [`ResourceId`].
//! Every level keeps its members sorted by start address, and members of a
//! level never overlap.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::{AllocError, ResourceTree};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let mut tree = ResourceTree::new();
//! let ram = tree.request("System RAM", PhysicalAddress::new(0), 0x4000_0000).unwrap();
//! let kernel = tree
//!     .append_child(ram, "Kernel Image", PhysicalAddress::new(0x40_0000), 0x40_0000)
//!     .unwrap();
//! assert_eq!(
//!     tree.append_child(ram, "clash", PhysicalAddress::new(0x60_0000), 0x1000),
//!     Err(AllocError::NotAvailable)
//! );
//! assert_eq!(tree.find(PhysicalAddress::new(0x50_0000)), Some(kernel));
//! ```

use crate::AllocError;
use alloc::vec::Vec;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalRange};
use log::info;

/// Handle to a node of a [`ResourceTree`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ResourceId(usize);

/// A named physical range.
#[derive(Debug, Clone)]
pub struct Resource {
    name: &'static str,
    range: PhysicalRange,
    parent: Option<ResourceId>,
    children: Vec<ResourceId>,
}

impl Resource {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn range(&self) -> PhysicalRange {
        self.range
    }

    #[must_use]
    pub const fn parent(&self) -> Option<ResourceId> {
        self.parent
    }

    /// Children sorted by start address.
    #[must_use]
    pub fn children(&self) -> &[ResourceId] {
        &self.children
    }
}

/// Named physical ranges, nested by containment.
///
/// Siblings never overlap; a child always lies inside its parent.
#[derive(Debug, Default)]
pub struct ResourceTree {
    nodes: Vec<Resource>,
    roots: Vec<ResourceId>,
}

impl ResourceTree {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Register a top-level range.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] if `start` or `size` is not a
    ///   multiple of 4 KiB, or `size` is zero.
    /// - [`AllocError::NotAvailable`] if the range overlaps another
    ///   top-level range.
    pub fn request(
        &mut self,
        name: &'static str,
        start: PhysicalAddress,
        size: u64,
    ) -> Result<ResourceId, AllocError> {
        let range = validate(start, size)?;
        let pos = insertion_point(&self.nodes, &self.roots, range)?;
        let id = self.push(name, range, None);
        self.roots.insert(pos, id);
        info!("resource: {name} {range:?}");
        Ok(id)
    }

    /// Register a range nested inside `parent`.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] for misaligned or empty ranges,
    ///   unknown parents, or ranges reaching outside the parent.
    /// - [`AllocError::NotAvailable`] if the range overlaps a sibling.
    pub fn append_child(
        &mut self,
        parent: ResourceId,
        name: &'static str,
        start: PhysicalAddress,
        size: u64,
    ) -> Result<ResourceId, AllocError> {
        let range = validate(start, size)?;
        let outer = self.get(parent).ok_or(AllocError::InvalidArgument)?;
        if !outer.range.contains_range(&range) {
            return Err(AllocError::InvalidArgument);
        }
        let pos = insertion_point(&self.nodes, &outer.children, range)?;

        let id = self.push(name, range, Some(parent));
        self.nodes[parent.0].children.insert(pos, id);
        info!("resource: {name} {range:?} in {}", self.nodes[parent.0].name);
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.nodes.get(id.0)
    }

    /// Top-level resources sorted by start address.
    #[must_use]
    pub fn roots(&self) -> &[ResourceId] {
        &self.roots
    }

    /// The deepest resource containing `addr`.
    #[must_use]
    pub fn find(&self, addr: PhysicalAddress) -> Option<ResourceId> {
        let mut level = self.roots.as_slice();
        let mut found = None;
        while let Some(&id) = level.iter().find(|id| self.nodes[id.0].range.contains(addr)) {
            found = Some(id);
            level = &self.nodes[id.0].children;
        }
        found
    }

    /// Dump the tree at `info` level.
    pub fn log_tree(&self) {
        for &root in &self.roots {
            self.log_node(root, 0);
        }
    }

    fn log_node(&self, id: ResourceId, depth: usize) {
        let node = &self.nodes[id.0];
        info!("{:indent$}{} {:?}", "", node.name, node.range, indent = depth * 2);
        for &child in &node.children {
            self.log_node(child, depth + 1);
        }
    }

    fn push(&mut self, name: &'static str, range: PhysicalRange, parent: Option<ResourceId>) -> ResourceId {
        let id = ResourceId(self.nodes.len());
        self.nodes.push(Resource {
            name,
            range,
            parent,
            children: Vec::new(),
        });
        id
    }
}

fn validate(start: PhysicalAddress, size: u64) -> Result<PhysicalRange, AllocError> {
    if size == 0 || !start.is_aligned_to(PAGE_SIZE) || !size.is_multiple_of(PAGE_SIZE) {
        return Err(AllocError::InvalidArgument);
    }
    let end = start.checked_add(size).ok_or(AllocError::InvalidArgument)?;
    Ok(PhysicalRange::new(start, end))
}

/// Where `range` goes in the sorted `level`, or `NotAvailable` if it would
/// overlap one of its future neighbours.
fn insertion_point(nodes: &[Resource], level: &[ResourceId], range: PhysicalRange) -> Result<usize, AllocError> {
    let pos = level.partition_point(|id| nodes[id.0].range.start() < range.start());
    let before = pos.checked_sub(1).map(|i| level[i]);
    let after = level.get(pos).copied();
    if [before, after]
        .into_iter()
        .flatten()
        .any(|id| nodes[id.0].range.overlaps(&range))
    {
        return Err(AllocError::NotAvailable);
    }
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    fn starts(tree: &ResourceTree, level: &[ResourceId]) -> Vec<u64> {
        level
            .iter()
            .map(|&id| tree.get(id).unwrap().range().start().as_u64())
            .collect()
    }

    #[test]
    fn ram_with_kernel_image_and_a_clash() {
        let mut tree = ResourceTree::new();
        let ram = tree.request("System RAM", pa(0), 0x4000_0000).unwrap();
        let kernel = tree.append_child(ram, "Kernel Image", pa(0x40_0000), 0x40_0000).unwrap();
        assert_eq!(
            tree.append_child(ram, "overlap", pa(0x7f_f000), 0x2000),
            Err(AllocError::NotAvailable)
        );
        assert_eq!(tree.get(kernel).unwrap().parent(), Some(ram));
        assert_eq!(tree.get(ram).unwrap().children(), [kernel]);
    }

    #[test]
    fn roots_are_sorted_and_disjoint() {
        let mut tree = ResourceTree::new();
        tree.request("c", pa(0x3000_0000), 0x1000).unwrap();
        tree.request("a", pa(0x1000_0000), 0x1000).unwrap();
        tree.request("b", pa(0x2000_0000), 0x1000).unwrap();
        assert_eq!(starts(&tree, tree.roots()), [0x1000_0000, 0x2000_0000, 0x3000_0000]);
        assert_eq!(tree.request("d", pa(0x0fff_f000), 0x2000), Err(AllocError::NotAvailable));
        // Touching is fine.
        tree.request("e", pa(0x1000_1000), 0x1000).unwrap();
    }

    #[test]
    fn alignment_and_containment_are_checked() {
        let mut tree = ResourceTree::new();
        assert_eq!(tree.request("x", pa(0x800), 0x1000), Err(AllocError::InvalidArgument));
        assert_eq!(tree.request("x", pa(0x1000), 0x800), Err(AllocError::InvalidArgument));
        assert_eq!(tree.request("x", pa(0x1000), 0), Err(AllocError::InvalidArgument));

        let dev = tree.request("dev", pa(0x900_0000), 0x1000).unwrap();
        assert_eq!(
            tree.append_child(dev, "too big", pa(0x900_0000), 0x2000),
            Err(AllocError::InvalidArgument)
        );
        assert_eq!(
            tree.append_child(ResourceId(99), "orphan", pa(0), 0x1000),
            Err(AllocError::InvalidArgument)
        );
    }

    #[test]
    fn find_returns_the_deepest_owner() {
        let mut tree = ResourceTree::new();
        let ram = tree.request("ram", pa(0x4000_0000), 0x100_0000).unwrap();
        let image = tree.append_child(ram, "image", pa(0x4010_0000), 0x10_0000).unwrap();
        let text = tree.append_child(image, ".text", pa(0x4010_0000), 0x8000).unwrap();

        assert_eq!(tree.find(pa(0x4010_1234)), Some(text));
        assert_eq!(tree.find(pa(0x4011_0000)), Some(image));
        assert_eq!(tree.find(pa(0x4000_0000)), Some(ram));
        assert_eq!(tree.find(pa(0x3fff_ffff)), None);
    }
}
