/*!
 * Dispatch Tests
 * Bounds and selection properties of the grate dispatch entry point
 */

use lind_grates::grate::{handlers, ArgumentVector, DispatchEntry, Dispatcher, HandlerTable};
use lind_grates::{CageId, GrateId, HandlerIndex, DISPATCH_ERROR};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Table of `n` handlers; handler `i` returns `1000 + i` and bumps its counter
fn marked_table(n: usize, hits: Arc<Vec<AtomicUsize>>) -> Arc<HandlerTable> {
    let mut builder = HandlerTable::builder();
    for i in 0..n {
        let hits = Arc::clone(&hits);
        builder = builder.handler("marked", move |_, _| {
            hits[i].fetch_add(1, Ordering::SeqCst);
            1000 + i as i64
        });
    }
    builder.build()
}

proptest! {
    #[test]
    fn prop_dispatch_selects_exactly_one_or_none(n in 1usize..8, index in 0u64..16) {
        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect());
        let dispatcher = Dispatcher::new(GrateId::new(1), marked_table(n, Arc::clone(&hits)));

        let result = dispatcher.dispatch(HandlerIndex::new(index), CageId::new(2), &ArgumentVector::default());
        let total: usize = hits.iter().map(|h| h.load(Ordering::SeqCst)).sum();

        if (index as usize) < n {
            prop_assert_eq!(result, 1000 + index as i64);
            prop_assert_eq!(total, 1);
            prop_assert_eq!(hits[index as usize].load(Ordering::SeqCst), 1);
        } else {
            prop_assert_eq!(result, DISPATCH_ERROR);
            prop_assert_eq!(total, 0);
        }
    }

    #[test]
    fn prop_add_handler_matches_wrapping_sum(a in any::<u64>(), b in any::<u64>()) {
        let table = HandlerTable::builder().handler_fn("add", handlers::add()).build();
        let dispatcher = Dispatcher::new(GrateId::new(1), table);
        let args = ArgumentVector::from_values(CageId::new(3), &[a, b]).unwrap();
        prop_assert_eq!(
            dispatcher.dispatch(HandlerIndex::new(0), CageId::new(3), &args),
            (a as i64).wrapping_add(b as i64)
        );
    }
}

#[test]
fn test_out_of_range_open_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("testfile.txt");
    let table = HandlerTable::builder()
        .handler_fn("open", handlers::open_file(&target))
        .handler_fn("add", handlers::add())
        .build();
    let dispatcher = Dispatcher::new(GrateId::new(7), table);

    assert_eq!(
        dispatcher.dispatch(HandlerIndex::new(5), CageId::new(8), &ArgumentVector::default()),
        DISPATCH_ERROR
    );
    assert!(!target.exists());

    let fd = dispatcher.dispatch(HandlerIndex::new(0), CageId::new(8), &ArgumentVector::default());
    assert!(fd >= 0);
    assert!(target.exists());
    nix::unistd::close(fd as i32).unwrap();
}

#[test]
fn test_dispatcher_is_shareable_across_threads() {
    let table = HandlerTable::builder()
        .handler_fn("getuid", handlers::identity("getuid", 10))
        .build();
    let dispatcher = Arc::new(Dispatcher::new(GrateId::new(1), table));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let dispatcher = Arc::clone(&dispatcher);
            std::thread::spawn(move || {
                (0..100)
                    .map(|_| dispatcher.dispatch(HandlerIndex::new(0), CageId::new(t + 10), &ArgumentVector::default()))
                    .all(|r| r == 10)
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(dispatcher.stats().dispatched, 400);
}
