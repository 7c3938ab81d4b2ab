//! The conversation entity and its access lock.

use chrono::{DateTime, Utc};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Exclusive access to a conversation, released when dropped.
///
/// The guard is not `Send`: it must be dropped on the request thread that
/// acquired it.
pub type ConversationGuard = ArcMutexGuard<RawMutex, ()>;

/// A unit of application state that may span several requests.
///
/// A conversation starts out transient. [`Conversation::begin`] marks it
/// long-running, which registers it with the session when the request ends.
/// [`Conversation::end`] turns it transient again so the next clean-up sweep
/// drops it.
#[derive(Debug)]
pub struct Conversation {
    id: String,
    timeout_ms: AtomicU64,
    last_used_ms: AtomicI64,
    transient: AtomicBool,
    lock: Arc<Mutex<()>>,
}

impl Conversation {
    /// A transient conversation, last used now.
    #[must_use]
    pub fn new(id: String, timeout: Duration) -> Self {
        Self {
            id,
            timeout_ms: AtomicU64::new(duration_millis(timeout)),
            last_used_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            transient: AtomicBool::new(true),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Id, unique within the session.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Inactivity period after which the conversation expires.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(duration_millis(timeout), Ordering::Relaxed);
    }

    /// When a request last finished with this conversation.
    #[must_use]
    pub fn last_used(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_used_ms.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Record use at the current time.
    pub fn touch(&self) {
        self.last_used_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Whether the conversation ends with the current request.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.transient.load(Ordering::Acquire)
    }

    /// Mark the conversation long-running. Returns `false` if it already was.
    pub fn begin(&self) -> bool {
        self.transient.swap(false, Ordering::AcqRel)
    }

    /// Mark the conversation ended. Returns `false` if it was already transient.
    pub fn end(&self) -> bool {
        !self.transient.swap(true, Ordering::AcqRel)
    }

    /// Unused for longer than its timeout.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let timeout = i64::try_from(self.timeout_ms.load(Ordering::Relaxed)).unwrap_or(i64::MAX);
        let deadline = self
            .last_used_ms
            .load(Ordering::Relaxed)
            .saturating_add(timeout);
        Utc::now().timestamp_millis() > deadline
    }

    /// Wait up to `timeout` for exclusive access. A zero timeout never blocks.
    #[must_use]
    pub fn lock(&self, timeout: Duration) -> Option<ConversationGuard> {
        if timeout.is_zero() {
            self.lock.try_lock_arc()
        } else {
            self.lock.try_lock_arc_for(timeout)
        }
    }

    /// Whether some request currently holds the conversation.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl PartialEq for Conversation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Conversation {}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
