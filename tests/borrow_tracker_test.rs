//! Same-thread borrow discipline: conflicts fail fast, never block.

mod common;

use hostbuf::{AccessError, BorrowState, HostHeap};

#[test]
fn test_exclusive_refuses_all_other_acquisitions() {
    common::init_logging();
    let heap = HostHeap::new();
    let id = heap.alloc(16);

    let exclusive = heap.acquire_exclusive(id).unwrap();

    assert_eq!(heap.acquire_shared(id).unwrap_err(), AccessError::Busy);
    assert_eq!(heap.acquire_exclusive(id).unwrap_err(), AccessError::Busy);
    assert_eq!(heap.borrow_state(id), Ok(BorrowState::Exclusive));

    exclusive.release();
    assert_eq!(heap.borrow_state(id), Ok(BorrowState::Free));
}

#[test]
fn test_shared_tickets_coexist() {
    common::init_logging();
    let heap = HostHeap::new();
    let id = heap.alloc(16);

    let a = heap.acquire_shared(id).unwrap();
    let b = heap.acquire_shared(id).unwrap();
    let c = heap.acquire_shared(id).unwrap();

    assert_eq!(heap.borrow_state(id), Ok(BorrowState::Shared(3)));

    // Exclusive stays refused until every shared holder releases.
    assert_eq!(heap.acquire_exclusive(id).unwrap_err(), AccessError::Busy);
    drop(a);
    assert_eq!(heap.acquire_exclusive(id).unwrap_err(), AccessError::Busy);
    drop(b);
    assert_eq!(heap.acquire_exclusive(id).unwrap_err(), AccessError::Busy);
    drop(c);

    let exclusive = heap.acquire_exclusive(id).unwrap();
    drop(exclusive);
    assert_eq!(heap.borrow_state(id), Ok(BorrowState::Free));
}

#[test]
fn test_tickets_on_distinct_backings_are_independent() {
    common::init_logging();
    let heap = HostHeap::new();
    let a = heap.alloc(8);
    let b = heap.alloc(8);

    let _excl_a = heap.acquire_exclusive(a).unwrap();

    // A conflict is per backing allocation, not per heap.
    let _excl_b = heap.acquire_exclusive(b).unwrap();
    assert_eq!(heap.acquire_shared(a).unwrap_err(), AccessError::Busy);
}

#[test]
fn test_acquire_on_detached_backing_fails() {
    common::init_logging();
    let heap = HostHeap::new();
    let id = heap.alloc(8);
    heap.detach(id).unwrap();

    assert_eq!(heap.acquire_shared(id).unwrap_err(), AccessError::Detached);
    assert_eq!(
        heap.acquire_exclusive(id).unwrap_err(),
        AccessError::Detached
    );
}

#[test]
fn test_detach_with_open_ticket_keeps_storage_alive() {
    common::init_logging();
    let heap = HostHeap::new();
    let id = heap.alloc(8);

    let ticket = heap.acquire_shared(id).unwrap();
    heap.detach(id).unwrap();

    // The ticket still refers to live state and releases cleanly; only
    // new acquisitions see the detach.
    assert_eq!(ticket.backing(), id);
    ticket.release();
    assert_eq!(heap.acquire_shared(id).unwrap_err(), AccessError::Detached);
}
