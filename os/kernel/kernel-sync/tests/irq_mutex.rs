use kernel_sync::{IrqGuard, SpinMutex};
use std::sync::Arc;
use std::thread;

#[test]
fn lock_irq_gives_mutable_access() {
    let m = SpinMutex::new(vec![1_u32]);
    {
        let mut g = m.lock_irq();
        g.push(2);
        assert_eq!(g.len(), 2);
    }
    assert_eq!(*m.lock(), vec![1, 2]);
}

#[test]
fn lock_irq_releases_on_drop() {
    let m = SpinMutex::new(0_u8);
    let g = m.lock_irq();
    assert!(m.try_lock().is_none());
    drop(g);
    assert!(m.try_lock().is_some());
}

#[test]
fn nested_guards_restore_outer_state_only() {
    // On the host IRQs are never masked, so the outer guard restores and
    // the inner one observes the same snapshot.
    let outer = IrqGuard::new();
    let inner = IrqGuard::new();
    assert_eq!(outer.restores(), inner.restores());
}

#[test]
fn contended_lock_irq_is_exclusive() {
    let threads = 4;
    let iters = 2_000;
    let m = Arc::new(SpinMutex::new(0_usize));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                for _ in 0..iters {
                    *m.lock_irq() += 1;
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*m.lock(), threads * iters);
}
