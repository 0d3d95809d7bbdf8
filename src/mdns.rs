//! Production listener over the `mdns-sd` daemon.
//!
//! `mdns-sd` runs its own thread and resolves instances by itself. A pump
//! thread drains the browse channels, caches resolved records and reports
//! every change to the dispatcher's [`UpdateHandler`].

use crate::config::ListenerConfig;
use crate::error::DiscoveryError;
use crate::listener::{ServiceListener, UpdateHandler};
use crate::models::{RawRecord, ServiceUpdate, StateChange};
use async_trait::async_trait;
use futures::channel::oneshot;
use futures::stream::{self, Stream, StreamExt};
use futures::{FutureExt, future};
use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

impl From<&mdns_sd::ServiceInfo> for RawRecord {
    fn from(info: &mdns_sd::ServiceInfo) -> Self {
        // The daemon keeps addresses in a set; sort for a stable order.
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        addresses.sort();

        RawRecord {
            service_type: info.get_type().to_string(),
            name: info.get_fullname().to_string(),
            server: info.get_hostname().to_string(),
            port: Some(info.get_port()),
            addresses,
            properties: info
                .get_properties()
                .iter()
                .map(|prop| (prop.key().as_bytes().to_vec(), prop.val().map(<[u8]>::to_vec)))
                .collect(),
        }
    }
}

/// Records resolved by the daemon, keyed by instance full name.
#[derive(Default)]
struct ResolvedCache {
    records: Mutex<HashMap<String, RawRecord>>,
    notify: Notify,
}

impl ResolvedCache {
    fn insert(&self, record: RawRecord) -> bool {
        let existed = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.name.clone(), record)
            .is_some();
        self.notify.notify_waiters();
        existed
    }

    fn remove(&self, name: &str) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    fn get(&self, name: &str) -> Option<RawRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// The live browse session.
struct Session {
    service_types: Vec<String>,
    active: Arc<AtomicBool>,
    /// Ends the pump without waiting for `SearchStopped`.
    halt: oneshot::Sender<()>,
}

#[derive(Debug)]
enum PumpEvent {
    Daemon(ServiceEvent),
    Halt,
}

/// Merges daemon events with the halt signal. A dropped sender is not a
/// halt; only an explicit send is.
fn pump_events(
    daemon: impl Stream<Item = ServiceEvent> + Unpin,
    halted: oneshot::Receiver<()>,
) -> impl Stream<Item = PumpEvent> + Unpin {
    let halt = halted
        .into_stream()
        .filter_map(|sent| future::ready(sent.ok().map(|()| PumpEvent::Halt)));
    stream::select(daemon.map(PumpEvent::Daemon), halt)
}

/// mDNS listener backed by one `mdns-sd` daemon.
pub struct MdnsListener {
    daemon: ServiceDaemon,
    resolved: Arc<ResolvedCache>,
    session: Mutex<Option<Session>>,
}

impl MdnsListener {
    /// Starts an mDNS daemon bound according to `config`.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::ListenerUnavailable` if the daemon cannot be
    /// started or an interface cannot be selected.
    pub fn new(config: &ListenerConfig) -> Result<Self, DiscoveryError> {
        let unavailable = |what: &str, e: mdns_sd::Error| {
            DiscoveryError::ListenerUnavailable(format!("{what}: {e}"))
        };

        let daemon = ServiceDaemon::new().map_err(|e| unavailable("create mDNS daemon", e))?;

        if !config.interfaces.is_empty() {
            daemon
                .disable_interface(IfKind::All)
                .map_err(|e| unavailable("disable default interfaces", e))?;
            for interface in &config.interfaces {
                daemon
                    .enable_interface(interface.as_str())
                    .map_err(|e| unavailable(&format!("enable interface {interface}"), e))?;
            }
        }
        if !config.ipv6 {
            daemon
                .disable_interface(IfKind::IPv6)
                .map_err(|e| unavailable("disable IPv6", e))?;
        }

        Ok(Self {
            daemon,
            resolved: Arc::new(ResolvedCache::default()),
            session: Mutex::new(None),
        })
    }

    /// Cancels browsing and stops the daemon.
    pub fn shutdown(&self) -> Result<(), DiscoveryError> {
        self.cancel()?;
        self.daemon
            .shutdown()
            .map_err(|e| DiscoveryError::ListenerUnavailable(format!("shutdown: {e}")))?;
        Ok(())
    }

    /// Returns false if any type could not be stopped.
    fn stop_types(&self, service_types: &[String]) -> bool {
        let mut all_stopped = true;
        for service_type in service_types {
            if let Err(e) = self.daemon.stop_browse(service_type) {
                warn!("Failed to stop browsing {}: {}", service_type, e);
                all_stopped = false;
            }
        }
        all_stopped
    }
}

#[async_trait]
impl ServiceListener for MdnsListener {
    fn browse(
        &self,
        service_types: &[String],
        handler: UpdateHandler,
    ) -> Result<(), DiscoveryError> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_some() {
            return Err(DiscoveryError::AlreadyStarted);
        }

        let mut receivers = Vec::with_capacity(service_types.len());
        for (started, service_type) in service_types.iter().enumerate() {
            match self.daemon.browse(service_type) {
                Ok(receiver) => receivers.push(receiver),
                Err(e) => {
                    self.stop_types(&service_types[..started]);
                    return Err(DiscoveryError::ListenerUnavailable(format!(
                        "browse {service_type}: {e}"
                    )));
                }
            }
        }

        let active = Arc::new(AtomicBool::new(true));
        let pump_active = active.clone();
        let resolved = self.resolved.clone();
        let expected_stops = receivers.len();
        let (halt, halted) = oneshot::channel::<()>();

        std::thread::Builder::new()
            .name("zeromatch-mdns".to_string())
            .spawn(move || {
                let daemon_events =
                    stream::select_all(receivers.into_iter().map(|rx| rx.into_stream()));
                let mut events = pump_events(daemon_events, halted);
                let mut stopped = 0;

                while let Some(event) = futures::executor::block_on(events.next()) {
                    let event = match event {
                        PumpEvent::Daemon(event) => event,
                        PumpEvent::Halt => {
                            debug!("mDNS pump halted before all searches stopped");
                            break;
                        }
                    };
                    match event {
                        ServiceEvent::ServiceResolved(info) => {
                            let record = RawRecord::from(&info);
                            let update = ServiceUpdate {
                                service_type: record.service_type.clone(),
                                name: record.name.clone(),
                                change: if resolved.insert(record) {
                                    StateChange::Updated
                                } else {
                                    StateChange::Added
                                },
                            };
                            if pump_active.load(Ordering::Acquire) {
                                handler.on_update(update);
                            }
                        }
                        ServiceEvent::ServiceRemoved(service_type, fullname) => {
                            resolved.remove(&fullname);
                            if pump_active.load(Ordering::Acquire) {
                                handler.on_update(ServiceUpdate {
                                    service_type,
                                    name: fullname,
                                    change: StateChange::Removed,
                                });
                            }
                        }
                        ServiceEvent::ServiceFound(service_type, fullname) => {
                            trace!("Found {} ({})", fullname, service_type);
                        }
                        ServiceEvent::SearchStopped(service_type) => {
                            trace!("Search stopped for {}", service_type);
                            stopped += 1;
                            if stopped == expected_stops {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                debug!("mDNS pump exiting");
            })
            .map_err(|e| {
                self.stop_types(service_types);
                DiscoveryError::ListenerUnavailable(format!("spawn pump thread: {e}"))
            })?;

        info!("Browsing for {:?}", service_types);
        *session = Some(Session {
            service_types: service_types.to_vec(),
            active,
            halt,
        });
        Ok(())
    }

    fn cancel(&self) -> Result<(), DiscoveryError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.active.store(false, Ordering::Release);
            if !self.stop_types(&session.service_types) {
                // Some SearchStopped will never arrive; don't wait for them.
                let _ = session.halt.send(());
            }
            info!("Stopped browsing for {:?}", session.service_types);
        }
        Ok(())
    }

    async fn resolve(&self, service_type: &str, name: &str, timeout: Duration) -> RawRecord {
        let wait = async {
            loop {
                let notified = self.resolved.notify.notified();
                tokio::pin!(notified);
                // Register before checking so an insert in between is not missed.
                notified.as_mut().enable();
                if let Some(record) = self.resolved.get(name) {
                    return record;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(record) => record,
            Err(_) => {
                debug!("Timed out resolving {}", name);
                RawRecord::unresolved(service_type, name)
            }
        }
    }
}

static SHARED: Mutex<Option<Arc<MdnsListener>>> = Mutex::new(None);

/// The process-wide listener, created on first use with `config`.
///
/// Later calls return the same instance and ignore `config`.
pub fn shared_listener(config: &ListenerConfig) -> Result<Arc<MdnsListener>, DiscoveryError> {
    let mut shared = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(listener) = shared.as_ref() {
        return Ok(listener.clone());
    }
    let listener = Arc::new(MdnsListener::new(config)?);
    *shared = Some(listener.clone());
    Ok(listener)
}

/// Tears down the process-wide listener. A later [`shared_listener`] call
/// starts a fresh one.
pub fn shutdown_shared_listener() -> Result<(), DiscoveryError> {
    let listener = SHARED.lock().unwrap_or_else(PoisonError::into_inner).take();
    match listener {
        Some(listener) => listener.shutdown(),
        None => Ok(()),
    }
}
