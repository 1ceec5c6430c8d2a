//! Tests for thread tracking, suspension, and single stepping

mod common;

use common::{collect_until_cleanup, launch, INITIAL_TID};
use tether_core::{wait_for_events, ErrorCategory, EventKind, RunState, TetherError};

const SPAWNED_TID: u64 = 0x2000;

#[test]
fn test_thread_create_and_death_are_tracked()
{
    let (process, _root) = launch(&["threads", "1"]);
    assert!(process.is_multithread_capable());

    process.continue_process().unwrap();
    let events = wait_for_events(&[process.clone()]).unwrap();
    assert_eq!(*events[0].data(), EventKind::ThreadCreate { tid: SPAWNED_TID });
    // The creating thread reports the event, not the new one.
    assert_eq!(events[0].thread().map(|t| t.tid()), Some(INITIAL_TID));

    let threads = process.threads().unwrap();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].tid(), INITIAL_TID);
    assert_eq!(threads[1].tid(), SPAWNED_TID);
    assert_eq!(threads[1].state().unwrap(), RunState::Running);

    // Creation order is walkable through next_thread.
    let second = threads[0].next_thread().unwrap().expect("a second thread");
    assert_eq!(second.tid(), SPAWNED_TID);
    assert!(second.next_thread().unwrap().is_none());

    process.continue_process().unwrap();
    let events = wait_for_events(&[process.clone()]).unwrap();
    assert_eq!(*events[0].data(), EventKind::ThreadDeath);
    assert_eq!(events[0].thread().map(|t| t.tid()), Some(SPAWNED_TID));

    // Dead threads stay in the list but refuse operations.
    assert_eq!(process.threads().unwrap().len(), 2);
    let err = second.suspend().unwrap_err();
    match err {
        TetherError::Request(msg) => assert!(msg.contains("terminated")),
        other => panic!("expected a request error, got {other:?}"),
    }
    let err = second.set_single_step(true).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Request);

    process.continue_process().unwrap();
    collect_until_cleanup(&process);
}

#[test]
fn test_worker_threads_announce_before_any_death()
{
    let (process, _root) = launch(&["threads", "3"]);

    process.continue_process().unwrap();

    // Poll readiness decides how many frames one wait call drains, so
    // collect until all three announcements have arrived.
    let mut created = Vec::new();
    while created.len() < 3 {
        for event in wait_for_events(&[process.clone()]).unwrap() {
            match event.data() {
                EventKind::ThreadCreate { tid } => created.push(*tid),
                EventKind::ThreadDeath => {
                    panic!("a thread died before every worker was announced")
                }
                other => panic!("unexpected event: {other}"),
            }
        }
    }
    let mut distinct = created.clone();
    distinct.sort_unstable();
    distinct.dedup();
    assert_eq!(distinct.len(), 3, "each announcement names its own thread");

    assert_eq!(process.threads().unwrap().len(), 4);

    // The youngest worker dies first.
    process.continue_process().unwrap();
    let events = wait_for_events(&[process.clone()]).unwrap();
    assert_eq!(*events[0].data(), EventKind::ThreadDeath);
    assert_eq!(events[0].thread().map(|t| t.tid()), created.last().copied());

    process.continue_process().unwrap();
    collect_until_cleanup(&process);
}

#[test]
fn test_suspend_resume_updates_cached_state()
{
    let (process, _root) = launch(&["threads", "1"]);

    process.continue_process().unwrap();
    wait_for_events(&[process.clone()]).unwrap();

    let threads = process.threads().unwrap();
    let spawned = &threads[1];

    spawned.suspend().unwrap();
    assert_eq!(spawned.state().unwrap(), RunState::Suspended);

    // The agent agrees with the cached state.
    process.refresh_state().unwrap();
    assert_eq!(spawned.state().unwrap(), RunState::Suspended);
    assert_eq!(threads[0].state().unwrap(), RunState::Running);

    // Suspending a suspended thread is accepted.
    spawned.suspend().unwrap();

    spawned.resume().unwrap();
    assert_eq!(spawned.state().unwrap(), RunState::Running);

    process.release().unwrap();
}

#[test]
fn test_last_running_thread_cannot_be_suspended()
{
    let (process, _root) = launch(&["threads", "1"]);

    process.continue_process().unwrap();
    wait_for_events(&[process.clone()]).unwrap();

    let threads = process.threads().unwrap();
    threads[1].suspend().unwrap();

    // The initial thread is now the only one running; the refusal is local.
    let err = threads[0].suspend().unwrap_err();
    match err {
        TetherError::Request(msg) => assert!(msg.contains("no running threads")),
        other => panic!("expected a request error, got {other:?}"),
    }
    assert_eq!(threads[0].state().unwrap(), RunState::Running);

    threads[1].resume().unwrap();
    threads[0].suspend().unwrap();
    assert_eq!(threads[0].state().unwrap(), RunState::Suspended);

    process.release().unwrap();
}

#[test]
fn test_single_thread_cannot_be_suspended()
{
    let (process, _root) = launch(&["serve"]);

    let initial = process.initial_thread().unwrap();
    let err = initial.suspend().unwrap_err();
    match err {
        TetherError::Request(msg) => assert!(msg.contains("no running threads")),
        other => panic!("expected a request error, got {other:?}"),
    }

    process.release().unwrap();
}

#[test]
fn test_single_step_events_flow_while_enabled()
{
    let (process, _root) = launch(&["step"]);
    let thread = process.initial_thread().unwrap();

    assert!(!thread.single_step().unwrap());
    thread.set_single_step(true).unwrap();
    assert!(thread.single_step().unwrap());

    process.continue_process().unwrap();
    let events = wait_for_events(&[process.clone()]).unwrap();
    assert_eq!(*events[0].data(), EventKind::SingleStep);
    assert_eq!(events[0].thread().map(|t| t.tid()), Some(INITIAL_TID));

    process.continue_process().unwrap();
    let events = wait_for_events(&[process.clone()]).unwrap();
    assert_eq!(*events[0].data(), EventKind::SingleStep);

    thread.set_single_step(false).unwrap();
    assert!(!thread.single_step().unwrap());

    process.continue_process().unwrap();
    collect_until_cleanup(&process);
}

#[test]
fn test_continue_marks_every_live_thread_running()
{
    let (process, _root) = launch(&["threads", "1"]);

    process.continue_process().unwrap();
    wait_for_events(&[process.clone()]).unwrap();

    let threads = process.threads().unwrap();
    threads[1].suspend().unwrap();
    assert_eq!(threads[1].state().unwrap(), RunState::Suspended);

    process.continue_process().unwrap();
    assert_eq!(threads[1].state().unwrap(), RunState::Running);

    wait_for_events(&[process.clone()]).unwrap();
    process.continue_process().unwrap();
    collect_until_cleanup(&process);
}

#[test]
fn test_thread_user_data_round_trips()
{
    let (process, _root) = launch(&["serve"]);
    let thread = process.initial_thread().unwrap();

    assert!(thread.with_user_data(|data| data.is_none()).unwrap());
    thread.set_user_data(Box::new("frame cache".to_owned())).unwrap();
    let stored = thread
        .with_user_data(|data| data.and_then(|any| any.downcast_ref::<String>().cloned()))
        .unwrap();
    assert_eq!(stored.as_deref(), Some("frame cache"));

    process.release().unwrap();
}
