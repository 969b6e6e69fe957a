//! In-memory broker for testing.
//!
//! Keys live in a shared map and published messages go through a tokio
//! broadcast channel, so every `MockBroker` clone sees the same state.
//! Like Redis pub/sub, a message only reaches subscriptions that exist at
//! the moment it is published.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;

use super::{Broker, BrokerError, CommandConnection, Notification, NotificationStream, Result};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
struct Published {
    channel: String,
    payload: Vec<u8>,
}

struct MockState {
    values: Mutex<HashMap<String, Vec<u8>>>,
    commands: Mutex<Vec<String>>,
    sender: broadcast::Sender<Published>,
    patterns: Mutex<HashMap<u64, String>>,
    next_subscription: AtomicU64,
    unreachable: AtomicBool,
}

/// Keeps a pattern registered while its notification stream is alive.
struct Subscription {
    id: u64,
    state: Arc<MockState>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        lock(&self.state.patterns).remove(&self.id);
    }
}

/// Mock broker for testing.
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<MockState>,
}

impl Default for MockBroker {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Arc::new(MockState {
                values: Mutex::new(HashMap::new()),
                commands: Mutex::new(Vec::new()),
                sender,
                patterns: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(0),
                unreachable: AtomicBool::new(false),
            }),
        }
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent connect/psubscribe fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Current value stored under `key`.
    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.state.values).get(key).cloned()
    }

    /// Store a value directly, bypassing the command log.
    pub fn insert(&self, key: &str, value: &[u8]) {
        lock(&self.state.values).insert(key.to_string(), value.to_vec());
    }

    /// Publish directly, bypassing the command log.
    ///
    /// Returns the number of live subscriptions whose pattern matches
    /// `channel`, like the reply to PUBLISH.
    pub fn inject(&self, channel: &str, payload: &[u8]) -> usize {
        let receivers = lock(&self.state.patterns)
            .values()
            .filter(|pattern| glob_matches(pattern, channel))
            .count();

        // No receivers at all is not an error for pub/sub.
        let _ = self.state.sender.send(Published {
            channel: channel.to_string(),
            payload: payload.to_vec(),
        });
        receivers
    }

    /// Commands issued through connections, in order (e.g. `"SET key"`).
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state.commands).clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection(
                "Mock broker unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Redis-style glob match supporting `*`, `?` and backslash escapes.
pub(crate) fn glob_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_matches_at(&pattern, &text)
}

fn glob_matches_at(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|skip| glob_matches_at(rest, &text[skip..])),
        Some(('?', rest)) => !text.is_empty() && glob_matches_at(rest, &text[1..]),
        Some(('\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_matches_at(&rest[1..], &text[1..])
        }
        Some((c, rest)) => text.first() == Some(c) && glob_matches_at(rest, &text[1..]),
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(&self) -> Result<Box<dyn CommandConnection>> {
        self.check_reachable()?;
        Ok(Box::new(MockConnection {
            broker: self.clone(),
            closed: false,
        }))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<NotificationStream> {
        self.check_reachable()?;

        let receiver = self.state.sender.subscribe();
        let pattern = pattern.to_string();

        let id = self.state.next_subscription.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.patterns).insert(id, pattern.clone());
        let subscription = Subscription {
            id,
            state: Arc::clone(&self.state),
        };

        let stream = futures::stream::unfold(
            (receiver, subscription),
            |(mut receiver, subscription)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(published) => return Some((published, (receiver, subscription))),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        )
        .filter_map(move |published| {
            let matched = glob_matches(&pattern, &published.channel).then(|| Notification {
                pattern: pattern.clone(),
                channel: published.channel,
                payload: published.payload,
            });
            async move { matched }
        });

        Ok(stream.boxed())
    }
}

/// Connection handle onto a [`MockBroker`].
pub struct MockConnection {
    broker: MockBroker,
    closed: bool,
}

impl MockConnection {
    fn record(&self, command: &str, key: &str) -> Result<()> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        self.broker.check_reachable()?;
        lock(&self.broker.state.commands).push(format!("{} {}", command, key));
        Ok(())
    }
}

#[async_trait]
impl CommandConnection for MockConnection {
    async fn del(&mut self, key: &str) -> Result<()> {
        self.record("DEL", key)?;
        lock(&self.broker.state.values).remove(key);
        Ok(())
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.record("SET", key)?;
        self.broker.insert(key, value);
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.record("GET", key)?;
        Ok(self.broker.value(key))
    }

    async fn publish(&mut self, channel: &str, message: &str) -> Result<usize> {
        self.record("PUBLISH", channel)?;
        Ok(self.broker.inject(channel, message.as_bytes()))
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
