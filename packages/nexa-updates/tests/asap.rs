mod common;

use common::{mount, scheduler};
use nexa_updates::SchedulerError;
use std::rc::Rc;

#[test]
fn test_asap_outside_window_is_rejected() {
    let updates = scheduler();

    let err = updates.request_asap(|_: ()| Ok(()), ()).unwrap_err();

    assert!(matches!(err, SchedulerError::NotBatching));
    assert_eq!(updates.stats().asap_drains, 0);
}

#[test]
fn test_asap_runs_even_without_dirty_nodes() {
    let updates = scheduler();
    let log = updates.reconciler().log();

    updates
        .batched_updates(|u| {
            let log = log.clone();
            u.request_asap(
                move |who: &'static str| {
                    log.borrow_mut().push(format!("asap {who}"));
                    Ok(())
                },
                "window",
            )
        })
        .unwrap();

    assert_eq!(updates.reconciler().entries(), vec!["asap window"]);
    assert_eq!(updates.stats().asap_drains, 1);
    assert_eq!(updates.stats().flush_passes, 0);
}

#[test]
fn test_asap_runs_after_all_dirty_nodes() {
    let updates = scheduler();
    let a = mount(&updates, "A");
    let b = mount(&updates, "B");
    let log = updates.reconciler().log();

    // A's render queues B, so the flush takes two passes.
    updates.reconciler().on_update(a, move |u| u.request_update(b));

    updates
        .batched_updates(|u| {
            let log = log.clone();
            u.request_asap(
                move |()| {
                    log.borrow_mut().push("asap".to_string());
                    Ok(())
                },
                (),
            )?;
            u.request_update(a)
        })
        .unwrap();

    assert_eq!(
        updates.reconciler().entries(),
        vec!["update A", "update B", "asap"]
    );
}

#[test]
fn test_asap_inside_a_render_runs_in_the_same_flush() {
    let updates = scheduler();
    let a = mount(&updates, "A");
    let log = updates.reconciler().log();

    {
        let log = log.clone();
        updates.reconciler().on_update(a, move |u| {
            let log = log.clone();
            u.request_asap(
                move |()| {
                    log.borrow_mut().push("asap".to_string());
                    Ok(())
                },
                (),
            )
        });
    }

    updates.request_update(a).unwrap();

    assert_eq!(updates.reconciler().entries(), vec!["update A", "asap"]);
    assert!(!updates.is_batching_updates());
}

#[test]
fn test_asap_work_keeps_the_flush_loop_alive() {
    let updates = Rc::new(scheduler());
    let a = mount(&updates, "A");
    let log = updates.reconciler().log();

    updates
        .batched_updates(|u| {
            let updates_handle = updates.clone();
            let log = log.clone();
            u.request_asap(
                move |node| {
                    updates_handle.request_update(node)?;
                    let log = log.clone();
                    updates_handle.request_asap(
                        move |()| {
                            log.borrow_mut().push("second asap".to_string());
                            Ok(())
                        },
                        (),
                    )
                },
                a,
            )
        })
        .unwrap();

    assert_eq!(
        updates.reconciler().entries(),
        vec!["update A", "second asap"]
    );
    assert_eq!(updates.stats().asap_drains, 2);
    assert_eq!(updates.dirty_len(), 0);
}

#[test]
fn test_asap_queues_are_recycled() {
    let updates = scheduler();

    for _ in 0..3 {
        updates
            .batched_updates(|u| u.request_asap(|()| Ok(()), ()))
            .unwrap();
    }

    let pool = updates.callback_queue_pool_stats();
    assert_eq!(pool.allocated, 1);
    assert_eq!(pool.reused, 2);
}
