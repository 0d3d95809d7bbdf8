//! In-memory listener shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use zeromatch::{
    DiscoveryError, DiscoveryFlow, RawRecord, ServiceListener, ServiceUpdate, StateChange,
    UpdateHandler,
};

pub const HAP_TCP: &str = "_hap._tcp.local.";
pub const HAP_UDP: &str = "_hap._udp.local.";
pub const PRINTER: &str = "_printer._tcp.local.";

/// Records published here are resolvable; announcements are delivered from
/// a separate thread, like a real network listener.
#[derive(Default)]
pub struct MockListener {
    records: Mutex<HashMap<String, RawRecord>>,
    handler: Mutex<Option<UpdateHandler>>,
    browsed: Mutex<Vec<String>>,
    resolve_delay: Duration,
    unavailable: bool,
    cancels: AtomicUsize,
    resolves: AtomicUsize,
}

impl MockListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_resolve_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            resolve_delay: delay,
            ..Default::default()
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            unavailable: true,
            ..Default::default()
        })
    }

    /// Makes `record` resolvable and announces it as added.
    pub fn publish(&self, record: RawRecord) {
        let (service_type, name) = (record.service_type.clone(), record.name.clone());
        self.records.lock().unwrap().insert(name.clone(), record);
        self.announce(&service_type, &name, StateChange::Added);
    }

    pub fn announce(&self, service_type: &str, name: &str, change: StateChange) {
        let handler = self.handler.lock().unwrap().clone();
        let Some(handler) = handler else { return };
        let update = ServiceUpdate {
            service_type: service_type.to_string(),
            name: name.to_string(),
            change,
        };
        std::thread::spawn(move || handler.on_update(update))
            .join()
            .unwrap();
    }

    pub fn browsed_types(&self) -> Vec<String> {
        self.browsed.lock().unwrap().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceListener for MockListener {
    fn browse(
        &self,
        service_types: &[String],
        handler: UpdateHandler,
    ) -> Result<(), DiscoveryError> {
        if self.unavailable {
            return Err(DiscoveryError::ListenerUnavailable("no multicast socket".to_string()));
        }
        *self.browsed.lock().unwrap() = service_types.to_vec();
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn cancel(&self) -> Result<(), DiscoveryError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.handler.lock().unwrap().take();
        Ok(())
    }

    async fn resolve(&self, service_type: &str, name: &str, _timeout: Duration) -> RawRecord {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if !self.resolve_delay.is_zero() {
            tokio::time::sleep(self.resolve_delay).await;
        }
        self.records
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| RawRecord::unresolved(service_type, name))
    }
}

pub fn record(
    service_type: &str,
    instance: &str,
    addresses: &[&str],
    properties: &[(&str, &str)],
) -> RawRecord {
    RawRecord {
        service_type: service_type.to_string(),
        name: format!("{instance}.{service_type}"),
        server: format!("{}.local.", instance.to_lowercase()),
        port: Some(80),
        addresses: addresses
            .iter()
            .map(|a| a.parse::<IpAddr>().unwrap())
            .collect(),
        properties: properties
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), Some(v.as_bytes().to_vec())))
            .collect(),
    }
}

pub async fn next_flow(rx: &mut mpsc::UnboundedReceiver<DiscoveryFlow>) -> DiscoveryFlow {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a flow")
        .expect("flow channel closed")
}

/// Waits a little and asserts nothing else arrived.
pub async fn assert_no_more_flows(rx: &mut mpsc::UnboundedReceiver<DiscoveryFlow>) {
    tokio::time::sleep(Duration::from_millis(200)).await;
    if let Ok(flow) = rx.try_recv() {
        panic!("unexpected flow: {flow:?}");
    }
}
