// Test dependencies - mock implementations for testing
//
// Provides a recording notifier and a settable clock that can be injected
// into EngineDeps alongside the in-memory store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::traits::{BaseClock, BaseNotifier, EditNotification};
use crate::common::UserId;

// =============================================================================
// Mock Notifier
// =============================================================================

/// A notification as the notifier received it
#[derive(Debug, Clone)]
pub struct NotificationCall {
    pub recipients: Vec<UserId>,
    pub notification: EditNotification,
}

#[derive(Clone, Default)]
pub struct MockNotifier {
    calls: Arc<Mutex<Vec<NotificationCall>>>,
    failing: Arc<AtomicBool>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delivery fail (after recording it).
    pub fn fail_deliveries(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<NotificationCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<EditNotification> {
        self.calls()
            .into_iter()
            .map(|call| call.notification)
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl BaseNotifier for MockNotifier {
    async fn notify(&self, recipients: &[UserId], notification: &EditNotification) -> Result<()> {
        self.calls.lock().unwrap().push(NotificationCall {
            recipients: recipients.to_vec(),
            notification: notification.clone(),
        });
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("notification delivery unavailable");
        }
        Ok(())
    }
}

// =============================================================================
// Mock Clock
// =============================================================================

#[derive(Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        *now += by;
        *now
    }
}

impl BaseClock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
