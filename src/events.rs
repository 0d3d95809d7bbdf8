use crate::models::DiscoveryFlow;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// A trait for receiving discovery flows.
///
/// Implement this trait to react to devices matched on the network. Flows
/// are fire-and-forget: the dispatcher spawns each call and never looks at
/// its outcome, so implementations must tolerate duplicates and must not
/// assume any ordering between flows of different records.
#[async_trait]
pub trait DiscoveryFlowHandler: Send + Sync {
    /// Called once per matched consumer domain.
    async fn create_flow(&self, flow: DiscoveryFlow);
}

/// Forwards every flow into an unbounded channel.
///
/// Flows sent after the receiver is dropped are discarded, which makes late
/// notifications harmless once the consumer side is torn down.
#[derive(Clone, Debug)]
pub struct ChannelFlowHandler {
    tx: mpsc::UnboundedSender<DiscoveryFlow>,
}

impl ChannelFlowHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiscoveryFlow>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DiscoveryFlowHandler for ChannelFlowHandler {
    async fn create_flow(&self, flow: DiscoveryFlow) {
        if let Err(e) = self.tx.send(flow) {
            debug!("Flow for {} dropped, no receiver", e.0.domain);
        }
    }
}
