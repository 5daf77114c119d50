//! End-to-end dispatch behavior against a stub peer.

mod common;

use cb_core::{Dispatcher, SessionBroker};
use cb_local_db::{Database, JobId, JobStatus, JobStore};
use cb_peer::PeerSession;
use common::StubPeer;
use serde_json::{json, Map};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn stack(addr: SocketAddr, recv_timeout: Option<Duration>) -> (JobStore, Dispatcher) {
    let jobs = JobStore::new(Database::open_in_memory().unwrap());
    let mut session = PeerSession::new(addr.ip().to_string(), addr.port());
    if let Some(timeout) = recv_timeout {
        session = session.with_recv_timeout(timeout);
    }
    let broker = Arc::new(SessionBroker::new(session));
    let dispatcher = Dispatcher::new(jobs.clone(), broker);
    (jobs, dispatcher)
}

#[tokio::test]
async fn ping_job_round_trip() {
    let peer = StubPeer::spawn().await;
    let (jobs, dispatcher) = stack(peer.addr, None);

    let id = jobs.add_job("ping", Map::new(), None).unwrap();
    dispatcher.dispatch(&id).await;

    let job = jobs.get_job(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.unwrap()["pong"], json!(true));
    assert!(job.error.is_none());
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn scene_info_scenario() {
    let peer = StubPeer::spawn().await;
    let (jobs, dispatcher) = stack(peer.addr, None);

    let id = jobs.add_job("get_scene_info", Map::new(), None).unwrap();
    dispatcher.dispatch(&id).await;

    let job = jobs.get_job(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result["name"], json!("Scene"));
    assert_eq!(result["object_count"], json!(3));
    assert!(job.error.is_none());
}

#[tokio::test]
async fn peer_reported_error_fails_the_job() {
    let peer = StubPeer::spawn().await;
    let (jobs, dispatcher) = stack(peer.addr, None);

    let id = jobs.add_job("unknown_command", Map::new(), None).unwrap();
    dispatcher.dispatch(&id).await;

    let job = jobs.get_job(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("unknown command"));
    assert!(job.result.is_none());
}

#[tokio::test]
async fn failure_in_one_job_does_not_poison_the_next() {
    let peer = StubPeer::spawn().await;
    let (jobs, dispatcher) = stack(peer.addr, None);

    // Job A: the peer hangs up mid-response.
    let a = jobs.add_job("drop_connection", Map::new(), None).unwrap();
    dispatcher.dispatch(&a).await;

    let job_a = jobs.get_job(&a).unwrap().unwrap();
    assert_eq!(job_a.status, JobStatus::Failed);
    assert!(!job_a.error.unwrap().is_empty());

    // Job B, created and dispatched afterwards, completes against a fresh
    // connection.
    let b = jobs.add_job("ping", Map::new(), None).unwrap();
    dispatcher.dispatch(&b).await;

    let job_b = jobs.get_job(&b).unwrap().unwrap();
    assert_eq!(job_b.status, JobStatus::Completed);
    assert_eq!(job_b.result.unwrap()["pong"], json!(true));
}

#[tokio::test]
async fn timeout_fails_the_job_and_reconnects_for_the_next() {
    let peer = StubPeer::spawn().await;
    let (jobs, dispatcher) = stack(peer.addr, Some(Duration::from_millis(200)));

    let hung = jobs.add_job("hang", Map::new(), None).unwrap();
    dispatcher.dispatch(&hung).await;

    // Never left processing: the deadline produced a terminal failure.
    let job = jobs.get_job(&hung).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("Timeout"));

    let next = jobs.add_job("ping", Map::new(), None).unwrap();
    dispatcher.dispatch(&next).await;
    let job = jobs.get_job(&next).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn unreachable_peer_fails_the_job() {
    // A port nothing listens on.
    let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let (jobs, dispatcher) = stack(addr, None);

    let id = jobs.add_job("ping", Map::new(), None).unwrap();
    dispatcher.dispatch(&id).await;

    let job = jobs.get_job(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("Connection"));
}

#[tokio::test]
async fn dispatching_a_missing_job_is_quiet() {
    let peer = StubPeer::spawn().await;
    let (jobs, dispatcher) = stack(peer.addr, None);

    // Simulates the race with cleanup: the id no longer exists.
    dispatcher.dispatch(&JobId::new()).await;
    assert!(jobs.list_pending_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_dispatches_serialize_on_the_wire() {
    let peer = StubPeer::spawn().await;
    let (jobs, dispatcher) = stack(peer.addr, None);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let id = jobs.add_job("slow", Map::new(), None).unwrap();
        handles.push(dispatcher.spawn(id));
    }

    for handle in handles {
        let id = handle.job_id().clone();
        handle.join().await;
        let job = jobs.get_job(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    // The broker's gate admits at most one command onto the wire at a time.
    assert_eq!(peer.max_in_flight(), 1);
}

#[tokio::test]
async fn dispatch_next_drains_in_creation_order() {
    let peer = StubPeer::spawn().await;
    let (jobs, dispatcher) = stack(peer.addr, None);

    let first = jobs.add_job("ping", Map::new(), None).unwrap();
    let second = jobs.add_job("ping", Map::new(), None).unwrap();

    assert_eq!(dispatcher.dispatch_next().await.unwrap(), Some(first));
    assert_eq!(dispatcher.dispatch_next().await.unwrap(), Some(second));
    assert_eq!(dispatcher.dispatch_next().await.unwrap(), None);
}

#[tokio::test]
async fn dispatched_job_is_no_longer_pending_while_processing() {
    let peer = StubPeer::spawn().await;
    let (jobs, dispatcher) = stack(peer.addr, None);

    let id = jobs.add_job("slow", Map::new(), None).unwrap();
    let handle = dispatcher.spawn(id.clone());

    // Wait until the dispatcher has claimed the job, then check the queue.
    let mut status = jobs.get_job(&id).unwrap().unwrap().status;
    while status == JobStatus::Pending {
        tokio::time::sleep(Duration::from_millis(5)).await;
        status = jobs.get_job(&id).unwrap().unwrap().status;
    }
    assert!(jobs.list_pending_jobs().unwrap().is_empty());

    handle.join().await;
    assert_eq!(
        jobs.get_job(&id).unwrap().unwrap().status,
        JobStatus::Completed
    );
}
