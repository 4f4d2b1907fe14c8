use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc;
use trip_logger_lib::fix::PositioningFix;

/// Why the location provider could not produce a fix. Timeouts are
/// synthesized by the session service, which bounds every request.
#[derive(Debug, Clone, Error)]
pub enum PositioningFailure {
    #[error("positioning unavailable: {0}")]
    Unavailable(String),

    #[error("positioning permission denied: {0}")]
    PermissionDenied(String),
}

/// Abstraction over the device location provider.
#[async_trait::async_trait]
pub trait PositioningSource: Send + Sync + 'static {
    fn is_available(&self) -> bool;

    /// One fresh fix, or why none could be obtained. The caller bounds
    /// the wait.
    async fn current_fix(&self) -> Result<PositioningFix, PositioningFailure>;

    /// Continuous updates. The returned handle owns the subscription;
    /// dropping it releases the watch.
    fn watch(&self) -> FixSubscription;
}

/// Owned handle to a continuous fix subscription.
pub struct FixSubscription {
    rx: mpsc::Receiver<PositioningFix>,
}

impl FixSubscription {
    pub fn new(rx: mpsc::Receiver<PositioningFix>) -> Self {
        Self { rx }
    }

    /// Next fix in arrival order, or `None` once the source is gone.
    pub async fn next_fix(&mut self) -> Option<PositioningFix> {
        self.rx.recv().await
    }

    /// Explicit release. Dropping the handle does the same.
    pub fn stop(self) {}
}

pub const SUBSCRIPTION_BUFFER: usize = 256;

/// In-process source that plays back whatever is pushed into it. Stands
/// in for a real receiver during development and drives the lifecycle
/// tests.
pub struct SimulatedSource {
    available: bool,
    current: Mutex<Option<PositioningFix>>,
    pending: Mutex<VecDeque<PositioningFix>>,
    watchers: Mutex<Vec<mpsc::Sender<PositioningFix>>>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            available: true,
            current: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// A source whose provider reports unavailable (e.g. permissions
    /// denied at the platform level).
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Queue a fix for the next one-shot request without broadcasting it.
    pub fn queue_fix(&self, fix: PositioningFix) {
        self.pending.lock().unwrap().push_back(fix);
    }

    /// Publish a fix: it becomes the current reading and is delivered to
    /// every live watcher in arrival order.
    pub fn push_fix(&self, fix: PositioningFix) {
        *self.current.lock().unwrap() = Some(fix);

        let mut watchers = self.watchers.lock().unwrap();
        watchers.retain(|tx| match tx.try_send(fix) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("fix watcher backlog full, dropping fix");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().unwrap().iter().filter(|tx| !tx.is_closed()).count()
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PositioningSource for SimulatedSource {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn current_fix(&self) -> Result<PositioningFix, PositioningFailure> {
        if !self.available {
            return Err(PositioningFailure::Unavailable("provider reports unavailable".into()));
        }

        if let Some(fix) = self.pending.lock().unwrap().pop_front() {
            return Ok(fix);
        }

        self.current
            .lock()
            .unwrap()
            .ok_or_else(|| PositioningFailure::Unavailable("no fix received yet".into()))
    }

    fn watch(&self) -> FixSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.watchers.lock().unwrap().push(tx);
        FixSubscription::new(rx)
    }
}
