//! Session-level tests running a sender and a receiver side by side over
//! the in-memory broker.
//!
//! Run with: cargo test --test transfer_session --features test-utils

use std::path::PathBuf;
use std::time::Duration;

use courier::broker::MockBroker;
use courier::config::TransferConfig;
use courier::session::{run_until_interrupted, Outcome, Overrides, Role, Session};
use courier::transfer::{channel_name, TransferError};
use tempfile::TempDir;

fn session(prefix: &str, dest: Option<PathBuf>) -> Session {
    Session::resolve_with_env(
        &TransferConfig::default(),
        Overrides {
            redis_url: Some("redis://mock".to_string()),
            channel_prefix: Some(prefix.to_string()),
            dest_dir: dest,
        },
        None,
    )
}

/// Wait until the receiver's subscription is live.
async fn wait_for_subscriber(broker: &MockBroker, channel: &str) {
    for _ in 0..100 {
        if broker.inject(channel, b"ping") > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("receiver never subscribed");
}

#[tokio::test]
async fn test_receive_then_send() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let file = src.path().join("report.csv");
    std::fs::write(&file, b"a,b\n1,2\n").unwrap();

    let receiving = session("REDIS:", Some(dest.path().to_path_buf()));
    let sending = session("REDIS:", None);

    let receiver_broker = broker.clone();
    let receiver = tokio::spawn(async move {
        run_until_interrupted(
            &receiving,
            &receiver_broker,
            &Role::Receive,
            std::future::pending(),
        )
        .await
    });

    wait_for_subscriber(&broker, &channel_name("REDIS:", "report.csv")).await;

    let sent = run_until_interrupted(
        &sending,
        &broker,
        &Role::Send { file },
        std::future::pending(),
    )
    .await
    .unwrap();
    assert!(matches!(sent, Outcome::Sent(ref s) if s.receivers == 1));

    let outcome = tokio::time::timeout(Duration::from_secs(5), receiver)
        .await
        .expect("receiver did not finish")
        .unwrap()
        .unwrap();

    match outcome {
        Outcome::Received(received) => {
            assert_eq!(received.filename, "report.csv");
            assert_eq!(received.bytes, 8);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(
        std::fs::read(dest.path().join("report.csv")).unwrap(),
        b"a,b\n1,2\n"
    );
    assert!(broker.value(&channel_name("REDIS:", "report.csv")).is_none());
}

#[tokio::test]
async fn test_mismatched_prefixes_do_not_meet() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let file = src.path().join("lost.txt");
    std::fs::write(&file, b"lost").unwrap();

    let receiving = session("TEAM_A:", Some(dest.path().to_path_buf()));
    let sending = session("TEAM_B:", None);

    let receiver_broker = broker.clone();
    let receiver = tokio::spawn(async move {
        run_until_interrupted(
            &receiving,
            &receiver_broker,
            &Role::Receive,
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await
    });

    wait_for_subscriber(&broker, "TEAM_A:probe").await;

    let sent = run_until_interrupted(
        &sending,
        &broker,
        &Role::Send { file },
        std::future::pending(),
    )
    .await
    .unwrap();
    assert!(matches!(sent, Outcome::Sent(ref s) if s.receivers == 0));

    let outcome = receiver.await.unwrap().unwrap();
    assert_eq!(outcome, Outcome::Interrupted);
    assert!(!dest.path().join("lost.txt").exists());
    assert_eq!(
        broker.value(&channel_name("TEAM_B:", "lost.txt")).as_deref(),
        Some(b"lost".as_slice())
    );
}

#[tokio::test]
async fn test_unreachable_broker_fails_receive() {
    let broker = MockBroker::new();
    broker.set_unreachable(true);
    let dest = TempDir::new().unwrap();

    let result = run_until_interrupted(
        &session("REDIS:", Some(dest.path().to_path_buf())),
        &broker,
        &Role::Receive,
        std::future::pending(),
    )
    .await;

    assert!(matches!(result, Err(TransferError::Broker(_))));
}
