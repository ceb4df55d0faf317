//! Integration tests for the primary allocator's failure-handler protocol

#![allow(unsafe_code)]

mod common;

use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{ControlledHeap, HeapControl};
use segalloc::{FailureHandler, PoolAllocator, PoolConfig, PrimaryAllocator, PrimaryConfig};

/// Set in the child process spawned by the termination tests
const CHILD_ENV: &str = "SEGALLOC_TERMINATION_CHILD";

fn free_nothing() {}

#[test]
fn test_handler_runs_until_heap_recovers() {
    static CONTROL: HeapControl = HeapControl::new();
    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn release_on_third_call() {
        if CALLS.fetch_add(1, Ordering::SeqCst) == 2 {
            CONTROL.set_refuse(false);
        }
    }

    let primary = PrimaryAllocator::with_heap(ControlledHeap(&CONTROL));
    primary.set_failure_handler(Some(release_on_third_call));
    CONTROL.set_refuse(true);

    let ptr = primary.allocate(1024);
    assert_eq!(CALLS.load(Ordering::SeqCst), 3);
    // First attempt plus one retry per handler call
    assert_eq!(CONTROL.attempts(), 4);

    unsafe { primary.deallocate(ptr, 1024) };
}

#[test]
fn test_reallocate_retries_through_handler() {
    static CONTROL: HeapControl = HeapControl::new();

    fn release() {
        CONTROL.set_refuse(false);
    }

    let primary = PrimaryAllocator::with_heap(ControlledHeap(&CONTROL));
    let ptr = primary.allocate(256);
    unsafe { ptr.as_ptr().write_bytes(0x42, 256) };

    CONTROL.set_refuse(true);
    primary.set_failure_handler(Some(release));
    let grown = unsafe { primary.reallocate(ptr, 256, 8192) };

    let bytes = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 256) };
    assert!(bytes.iter().all(|&b| b == 0x42));
    unsafe { primary.deallocate(grown, 8192) };
}

#[test]
fn test_failure_without_handler() {
    static CONTROL: HeapControl = HeapControl::new();
    CONTROL.set_refuse(true);

    let primary = PrimaryAllocator::with_heap(ControlledHeap(&CONTROL));
    let err = primary.try_allocate(100).unwrap_err();
    assert!(err.is_allocation_failure());
    assert!(err.is_retryable());
    assert_eq!(CONTROL.attempts(), 1);
}

#[test]
fn test_bounded_retries_give_up() {
    static CONTROL: HeapControl = HeapControl::new();
    CONTROL.set_refuse(true);

    let primary = PrimaryAllocator::with_config(
        ControlledHeap(&CONTROL),
        PrimaryConfig::default().with_max_handler_retries(5),
    )
    .unwrap();
    primary.set_failure_handler(Some(free_nothing));

    assert!(primary.try_allocate(100).is_err());
    assert_eq!(CONTROL.attempts(), 6);
}

#[test]
fn test_self_unregistering_handler_ends_unbounded_retry() {
    static CONTROL: HeapControl = HeapControl::new();
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    static PRIMARY: OnceLock<PrimaryAllocator<ControlledHeap>> = OnceLock::new();

    fn give_up() {
        CALLS.fetch_add(1, Ordering::SeqCst);
        if let Some(primary) = PRIMARY.get() {
            primary.set_failure_handler(None);
        }
    }

    let primary = PRIMARY.get_or_init(|| {
        PrimaryAllocator::with_config(ControlledHeap(&CONTROL), PrimaryConfig::unbounded())
            .unwrap()
    });
    primary.set_failure_handler(Some(give_up));
    CONTROL.set_refuse(true);

    let err = primary.try_allocate(512).unwrap_err();
    assert!(err.is_allocation_failure());
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    // First attempt plus the single retry after the handler ran
    assert_eq!(CONTROL.attempts(), 2);
    assert_eq!(primary.failure_handler(), None);
}

#[test]
fn test_handler_chaining() {
    fn first() {}
    fn second() {}

    let primary = PrimaryAllocator::new();
    assert_eq!(primary.set_failure_handler(Some(first)), None);

    let previous = primary.set_failure_handler(Some(second));
    assert_eq!(previous, Some(first as FailureHandler));
    assert_eq!(primary.failure_handler(), Some(second as FailureHandler));

    assert_eq!(primary.set_failure_handler(previous), Some(second as FailureHandler));
    assert_eq!(primary.set_failure_handler(None), Some(first as FailureHandler));
    assert_eq!(primary.failure_handler(), None);
}

#[test]
fn test_zero_retry_budget_rejected() {
    let err = PrimaryAllocator::with_config(
        std::alloc::System,
        PrimaryConfig::default().with_max_handler_retries(0),
    )
    .unwrap_err();
    assert_eq!(err.code(), "MEM:CONFIG:INVALID");
}

/// Runs `test_name` again in a child process and reports whether it exited
/// successfully
fn run_child(test_name: &str, scenario: &str) -> bool {
    let exe = std::env::current_exe().unwrap();
    Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, scenario)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap()
        .success()
}

fn child_scenario() -> Option<String> {
    std::env::var(CHILD_ENV).ok()
}

#[test]
fn test_useless_handler_terminates_process() {
    if child_scenario().as_deref() == Some("primary") {
        static CONTROL: HeapControl = HeapControl::new();
        CONTROL.set_refuse(true);

        let primary = PrimaryAllocator::with_heap(ControlledHeap(&CONTROL));
        primary.set_failure_handler(Some(free_nothing));
        let _ = primary.allocate(64);
        // Only reached if the allocator silently gave up; exit cleanly so
        // the parent sees success and fails the assertion below
        std::process::exit(0);
    }

    assert!(!run_child("test_useless_handler_terminates_process", "primary"));
}

#[test]
fn test_pool_exhaustion_terminates_process() {
    if child_scenario().as_deref() == Some("pool") {
        static CONTROL: HeapControl = HeapControl::new();
        CONTROL.set_refuse(true);

        let mut pool = PoolAllocator::with_primary(
            PrimaryAllocator::with_heap(ControlledHeap(&CONTROL)),
            PoolConfig::production(),
        )
        .unwrap();
        pool.set_failure_handler(Some(free_nothing));
        let _ = pool.allocate(48);
        std::process::exit(0);
    }

    assert!(!run_child("test_pool_exhaustion_terminates_process", "pool"));
}
