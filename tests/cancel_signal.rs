use std::thread;
use storewatch::cancel::{CancellationSignal, OperationGuard};

#[test]
fn clones_share_one_flag() {
    let signal = CancellationSignal::new();
    let seen_by_worker = signal.clone();
    assert!(!seen_by_worker.is_set());

    thread::spawn(move || signal.set()).join().unwrap();
    assert!(seen_by_worker.is_set());

    seen_by_worker.clear();
    assert!(!seen_by_worker.is_set());
}

#[test]
fn guard_admits_one_operation() {
    let guard = OperationGuard::new();
    let running = guard.try_begin().expect("first operation");
    assert!(guard.is_running());
    assert!(guard.try_begin().is_none());

    drop(running);
    assert!(!guard.is_running());
    assert!(guard.try_begin().is_some());
}

#[test]
fn guard_is_released_when_the_operation_panics() {
    let guard = OperationGuard::new();
    let shared = guard.clone();
    let joined = thread::spawn(move || {
        let _running = shared.try_begin().expect("begin");
        panic!("operation failed");
    })
    .join();
    assert!(joined.is_err());
    assert!(!guard.is_running());
}
