use crate::error::DiscoveryError;
use crate::models::{RawRecord, ServiceUpdate};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Callback handed to a listener. Listener threads call [`on_update`]
/// synchronously; it only enqueues, so it never blocks the caller.
///
/// [`on_update`]: UpdateHandler::on_update
#[derive(Clone, Debug)]
pub struct UpdateHandler {
    tx: mpsc::UnboundedSender<ServiceUpdate>,
}

impl UpdateHandler {
    pub fn new(tx: mpsc::UnboundedSender<ServiceUpdate>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServiceUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Hands `update` to the dispatcher. Updates arriving after the
    /// dispatcher stopped are dropped.
    pub fn on_update(&self, update: ServiceUpdate) {
        if self.tx.send(update).is_err() {
            trace!("Dispatcher gone, dropping update");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A source of mDNS service announcements.
///
/// One listener may serve several browse sessions over its lifetime but the
/// dispatcher only ever holds one subscription at a time.
#[async_trait]
pub trait ServiceListener: Send + Sync + 'static {
    /// Starts browsing `service_types`, reporting changes to `handler`.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::ListenerUnavailable` if browsing cannot start.
    fn browse(
        &self,
        service_types: &[String],
        handler: UpdateHandler,
    ) -> Result<(), DiscoveryError>;

    /// Cancels the current browse session. After it returns the handler
    /// receives no further updates.
    fn cancel(&self) -> Result<(), DiscoveryError>;

    /// Requests the full record of one instance, waiting at most `timeout`.
    ///
    /// Never fails: on timeout the record comes back without addresses.
    async fn resolve(&self, service_type: &str, name: &str, timeout: Duration) -> RawRecord;
}
