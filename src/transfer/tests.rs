use super::*;
use crate::broker::{Broker, MockBroker};
use std::time::Duration;
use tempfile::TempDir;

const PREFIX: &str = "REDIS:";

fn write_source(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_channel_name() {
    assert_eq!(channel_name(PREFIX, "hello.txt"), "REDIS:aGVsbG8udHh0");
}

#[test]
fn test_filename_from_channel() {
    let channel = channel_name("files/", "report.pdf");
    assert_eq!(filename_from_channel("files/", &channel).unwrap(), "report.pdf");
}

#[test]
fn test_filename_from_foreign_channel() {
    let err = filename_from_channel(PREFIX, "OTHER:aGVsbG8udHh0").unwrap_err();
    assert!(matches!(err, TransferError::ForeignChannel(_)));
    assert!(err.is_skippable());
}

#[test]
fn test_filename_from_malformed_channel() {
    let err = filename_from_channel(PREFIX, "REDIS:not*base64").unwrap_err();
    assert!(matches!(err, TransferError::Decode { .. }));
    assert!(err.is_skippable());
}

#[test]
fn test_subscription_pattern_escapes_glob_characters() {
    assert_eq!(subscription_pattern("REDIS:"), "REDIS:*");
    assert_eq!(subscription_pattern("a*b?[c]"), "a\\*b\\?\\[c\\]*");
}

#[test]
fn test_fatal_errors_are_not_skippable() {
    assert!(!TransferError::FileNotFound(PathBuf::from("x")).is_skippable());
    assert!(!TransferError::Broker(BrokerError::SubscriptionEnded).is_skippable());
}

#[tokio::test]
async fn test_sender_orders_clear_store_publish() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    let path = write_source(&src, "hello.txt", b"hello world");

    let sent = send_file(&broker, PREFIX, &path).await.unwrap();

    let key = "REDIS:aGVsbG8udHh0";
    assert_eq!(sent.channel, key);
    assert_eq!(sent.filename, "hello.txt");
    assert_eq!(sent.bytes, 11);
    assert_eq!(sent.receivers, 0);
    assert_eq!(
        broker.commands(),
        vec![
            format!("DEL {}", key),
            format!("SET {}", key),
            format!("PUBLISH {}", key)
        ]
    );
    // Nobody listened, so the content is orphaned.
    assert_eq!(broker.value(key).unwrap(), b"hello world");
}

#[tokio::test]
async fn test_sender_strips_directories() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    std::fs::create_dir(src.path().join("nested")).unwrap();
    let path = write_source(&src, "nested/data.bin", &[0, 1, 2, 255]);

    let sent = send_file(&broker, PREFIX, &path).await.unwrap();

    assert_eq!(sent.filename, "data.bin");
    assert_eq!(filename_from_channel(PREFIX, &sent.channel).unwrap(), "data.bin");
}

#[tokio::test]
async fn test_sender_missing_file() {
    let broker = MockBroker::new();
    let err = send_file(&broker, PREFIX, Path::new("/definitely/not/here.txt"))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::FileNotFound(_)));
    // Nothing touched the broker.
    assert!(broker.commands().is_empty());
}

#[tokio::test]
async fn test_sender_unreachable_broker() {
    let broker = MockBroker::new();
    broker.set_unreachable(true);
    let src = TempDir::new().unwrap();
    let path = write_source(&src, "a.txt", b"a");

    let err = send_file(&broker, PREFIX, &path).await.unwrap_err();
    assert!(matches!(
        err,
        TransferError::Broker(BrokerError::Connection(_))
    ));
}

#[tokio::test]
async fn test_second_send_replaces_first() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();

    let first = write_source(&src, "same.txt", b"first version, longer");
    send_file(&broker, PREFIX, &first).await.unwrap();
    let second = write_source(&src, "same.txt", b"second");
    let sent = send_file(&broker, PREFIX, &second).await.unwrap();

    assert_eq!(broker.value(&sent.channel).unwrap(), b"second");
}

#[tokio::test]
async fn test_end_to_end_transfer() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let path = write_source(&src, "hello.txt", b"hello world");

    let mut receiver = Receiver::subscribe(&broker, PREFIX, dest.path()).await.unwrap();
    assert_eq!(receiver.state(), ReceiverState::Subscribed);

    let sent = send_file(&broker, PREFIX, &path).await.unwrap();
    assert_eq!(sent.receivers, 1);

    let received = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receiver.state(), ReceiverState::Terminated);
    receiver.close().await;

    assert_eq!(received.filename, "hello.txt");
    assert_eq!(received.path, dest.path().join("hello.txt"));
    assert_eq!(received.bytes, 11);
    assert_eq!(std::fs::read(dest.path().join("hello.txt")).unwrap(), b"hello world");
    assert!(broker.value(&sent.channel).is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_transfer_of_name_with_backslash() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let path = write_source(&src, "report\\2024.txt", b"q4");

    let mut receiver = Receiver::subscribe(&broker, PREFIX, dest.path()).await.unwrap();
    let sent = send_file(&broker, PREFIX, &path).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received.filename, "report\\2024.txt");
    assert_eq!(std::fs::read(dest.path().join("report\\2024.txt")).unwrap(), b"q4");
    assert!(broker.value(&sent.channel).is_none());
}

#[tokio::test]
async fn test_receiver_overwrites_existing_file() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    std::fs::write(dest.path().join("f.txt"), b"stale contents here").unwrap();
    let path = write_source(&src, "f.txt", b"fresh");

    let receiving = {
        let broker = broker.clone();
        let dest = dest.path().to_path_buf();
        let mut receiver = Receiver::subscribe(&broker, PREFIX, dest).await.unwrap();
        tokio::spawn(async move { receiver.receive().await })
    };

    send_file(&broker, PREFIX, &path).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), receiving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(std::fs::read(dest.path().join("f.txt")).unwrap(), b"fresh");
}

#[tokio::test]
async fn test_receiver_ignores_other_payloads() {
    let broker = MockBroker::new();
    let dest = TempDir::new().unwrap();
    let channel = channel_name(PREFIX, "x.txt");
    broker.insert(&channel, b"payload");

    let mut receiver = Receiver::subscribe(&broker, PREFIX, dest.path()).await.unwrap();
    broker.inject(&channel, b"somethingElse");
    broker.inject(&channel, NEW_FILE_MARKER.as_bytes());

    let received = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received.filename, "x.txt");
    // Exactly one fetch happened, for the marker notification.
    let gets = broker.commands().iter().filter(|c| c.starts_with("GET")).count();
    assert_eq!(gets, 1);
}

#[tokio::test]
async fn test_receiver_skips_malformed_channel() {
    let broker = MockBroker::new();
    let dest = TempDir::new().unwrap();
    let good = channel_name(PREFIX, "good.txt");
    broker.insert(&good, b"ok");

    let mut receiver = Receiver::subscribe(&broker, PREFIX, dest.path()).await.unwrap();
    broker.inject("REDIS:%%%", NEW_FILE_MARKER.as_bytes());
    broker.inject(&channel_name(PREFIX, "../escape"), NEW_FILE_MARKER.as_bytes());
    broker.inject(&good, NEW_FILE_MARKER.as_bytes());

    let received = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received.filename, "good.txt");
    assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_receiver_skips_vanished_content() {
    let broker = MockBroker::new();
    let dest = TempDir::new().unwrap();
    let good = channel_name(PREFIX, "later.txt");

    let mut receiver = Receiver::subscribe(&broker, PREFIX, dest.path()).await.unwrap();
    broker.inject(&channel_name(PREFIX, "gone.txt"), NEW_FILE_MARKER.as_bytes());
    broker.insert(&good, b"here");
    broker.inject(&good, NEW_FILE_MARKER.as_bytes());

    let received = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received.filename, "later.txt");
    assert!(!dest.path().join("gone.txt").exists());
}

#[tokio::test]
async fn test_receiver_unwritable_destination_is_fatal() {
    let broker = MockBroker::new();
    let dest = TempDir::new().unwrap();
    let missing_dir = dest.path().join("does-not-exist");
    let channel = channel_name(PREFIX, "a.txt");
    broker.insert(&channel, b"a");

    let mut receiver = Receiver::subscribe(&broker, PREFIX, &missing_dir).await.unwrap();
    broker.inject(&channel, NEW_FILE_MARKER.as_bytes());

    let err = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, TransferError::Io { .. }));
    assert!(!err.is_skippable());
    assert_eq!(receiver.state(), ReceiverState::Writing);
    // Content was not deleted since it never reached disk.
    assert!(broker.value(&channel).is_some());
}

#[tokio::test]
async fn test_late_receiver_never_writes() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let path = write_source(&src, "hello.txt", b"hello world");

    send_file(&broker, PREFIX, &path).await.unwrap();

    let result = tokio::time::timeout(
        Duration::from_millis(100),
        receive_file(&broker, PREFIX, dest.path()),
    )
    .await;

    assert!(result.is_err(), "late receiver should still be waiting");
    assert!(!dest.path().join("hello.txt").exists());
}

#[tokio::test]
async fn test_receiver_serves_only_one_transfer() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let a = write_source(&src, "a.txt", b"a");
    let b = write_source(&src, "b.txt", b"b");

    let receiving = {
        let broker = broker.clone();
        let dest = dest.path().to_path_buf();
        let mut receiver = Receiver::subscribe(&broker, PREFIX, dest).await.unwrap();
        tokio::spawn(async move {
            let result = receiver.receive().await;
            receiver.close().await;
            result
        })
    };

    send_file(&broker, PREFIX, &a).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), receiving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received.filename, "a.txt");

    let sent_b = send_file(&broker, PREFIX, &b).await.unwrap();
    assert_eq!(sent_b.receivers, 0);
    assert!(!dest.path().join("b.txt").exists());
    assert!(broker.value(&sent_b.channel).is_some());
}

#[tokio::test]
async fn test_receiver_with_custom_prefix_ignores_default_prefix() {
    let broker = MockBroker::new();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let path = write_source(&src, "x.txt", b"x");

    let mut receiver = Receiver::subscribe(&broker, "team-a:", dest.path()).await.unwrap();
    send_file(&broker, PREFIX, &path).await.unwrap();
    send_file(&broker, "team-a:", &path).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.channel, channel_name("team-a:", "x.txt"));
}

#[tokio::test]
async fn test_receiver_unreachable_broker() {
    let broker = MockBroker::new();
    broker.set_unreachable(true);

    let err = Receiver::subscribe(&broker, PREFIX, ".").await.err().unwrap();
    assert!(matches!(
        err,
        TransferError::Broker(BrokerError::Connection(_))
    ));
}

#[tokio::test]
async fn test_broker_trait_object_is_usable() {
    let broker: Box<dyn Broker> = Box::new(MockBroker::new());
    let mut conn = broker.connect().await.unwrap();
    conn.set("k", b"v").await.unwrap();
    assert_eq!(conn.get("k").await.unwrap(), Some(b"v".to_vec()));
}
