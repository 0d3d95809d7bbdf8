use crate::config::ZeroConfig;
use crate::error::DiscoveryError;
use crate::events::DiscoveryFlowHandler;
use crate::homekit::{self, HOMEKIT_TYPES, HomeKitModels};
use crate::listener::{ServiceListener, UpdateHandler};
use crate::matcher::MatchTable;
use crate::mdns;
use crate::models::{DiscoveryFlow, FlowSource, ServiceUpdate, StateChange};
use crate::normalize::info_from_record;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Browsed so that other instances announcing themselves are seen early,
/// even when no rule asks for it.
pub const HOST_ANNOUNCE_TYPE: &str = "_home-assistant._tcp.local.";

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Lifecycle of a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Listening,
    Stopped,
}

/// Everything a pipeline task needs, shared read-only between tasks.
#[derive(Clone)]
struct Pipeline {
    listener: Arc<dyn ServiceListener>,
    match_table: MatchTable,
    homekit_models: HomeKitModels,
    handler: Arc<dyn DiscoveryFlowHandler>,
    resolve_timeout: Duration,
    suppress_unpaired_generic: bool,
}

/// Owns the listener subscription and routes every announced service to
/// the consumers whose rules match it.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    state: DispatcherState,
    cancel: CancellationToken,
    run_loop: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Creates an idle dispatcher.
    pub fn new(
        listener: Arc<dyn ServiceListener>,
        match_table: MatchTable,
        homekit_models: HomeKitModels,
        handler: Arc<dyn DiscoveryFlowHandler>,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                listener,
                match_table,
                homekit_models,
                handler,
                resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
                suppress_unpaired_generic: false,
            }),
            state: DispatcherState::Idle,
            cancel: CancellationToken::new(),
            run_loop: None,
        }
    }

    /// Creates an idle dispatcher from a loaded configuration.
    pub fn from_config(
        config: &ZeroConfig,
        listener: Arc<dyn ServiceListener>,
        handler: Arc<dyn DiscoveryFlowHandler>,
    ) -> Result<Self, DiscoveryError> {
        Ok(Self::new(
            listener,
            config.match_table()?,
            config.homekit_models()?,
            handler,
        )
        .with_resolve_timeout(config.listener.resolve_timeout())
        .with_suppress_unpaired_generic(config.homekit.suppress_unpaired_generic))
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline_mut().resolve_timeout = timeout;
        self
    }

    /// Skip generic matching for not-yet-paired HomeKit accessories that
    /// already received a HomeKit flow.
    pub fn with_suppress_unpaired_generic(mut self, suppress: bool) -> Self {
        self.pipeline_mut().suppress_unpaired_generic = suppress;
        self
    }

    fn pipeline_mut(&mut self) -> &mut Pipeline {
        Arc::make_mut(&mut self.pipeline)
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// The types browsed on start: configured types first, then the host
    /// announcement type and the HomeKit types, without duplicates.
    pub fn browse_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .pipeline
            .match_table
            .service_types()
            .map(str::to_string)
            .collect();
        for extra in std::iter::once(HOST_ANNOUNCE_TYPE).chain(HOMEKIT_TYPES) {
            if !types.iter().any(|t| t == extra) {
                types.push(extra.to_string());
            }
        }
        types
    }

    /// Subscribes to the listener and starts processing updates.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` unless idle, `Stopped` once stopped, and
    /// `ListenerUnavailable` if the listener refuses to browse; the
    /// dispatcher stays idle in that case.
    pub fn start(&mut self) -> Result<(), DiscoveryError> {
        match self.state {
            DispatcherState::Idle => {}
            DispatcherState::Listening => return Err(DiscoveryError::AlreadyStarted),
            DispatcherState::Stopped => return Err(DiscoveryError::Stopped),
        }

        let types = self.browse_types();
        debug!("Starting zeroconf browser for: {:?}", types);

        let (handler, updates) = UpdateHandler::channel();
        self.pipeline.listener.browse(&types, handler)?;

        self.run_loop = Some(tokio::spawn(run(
            self.pipeline.clone(),
            updates,
            self.cancel.clone(),
        )));
        self.state = DispatcherState::Listening;
        info!("Zeroconf discovery started");
        Ok(())
    }

    /// Cancels the listener subscription and stops processing.
    ///
    /// Pipelines still resolving are aborted, so no new flow is emitted once
    /// this returns; flows already handed to the handler may still finish.
    /// Calling it again, or on an idle dispatcher, only moves it to
    /// `Stopped`.
    pub async fn stop(&mut self) -> Result<(), DiscoveryError> {
        let was_listening = self.state == DispatcherState::Listening;
        self.state = DispatcherState::Stopped;
        if !was_listening {
            return Ok(());
        }

        let cancelled = self.pipeline.listener.cancel();
        self.cancel.cancel();
        if let Some(run_loop) = self.run_loop.take() {
            if let Err(e) = run_loop.await {
                warn!("Discovery loop ended abnormally: {}", e);
            }
        }
        info!("Zeroconf discovery stopped");
        cancelled
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Best-effort stop on drop
        if self.state == DispatcherState::Listening {
            let _ = self.pipeline.listener.cancel();
            self.cancel.cancel();
        }
    }
}

/// Receives updates until cancelled, one pipeline task per update.
async fn run(
    pipeline: Arc<Pipeline>,
    mut updates: mpsc::UnboundedReceiver<ServiceUpdate>,
    cancel: CancellationToken,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            update = updates.recv() => {
                let Some(update) = update else { break };
                debug!(
                    "service_update: type={} name={} state_change={:?}",
                    update.service_type, update.name, update.change
                );
                if update.change == StateChange::Removed {
                    continue;
                }
                in_flight.spawn(process_update(pipeline.clone(), update));
            }
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = done {
                    warn!("Discovery pipeline failed: {}", e);
                }
            }
        }
    }

    if !in_flight.is_empty() {
        debug!("Aborting {} in-flight pipelines", in_flight.len());
    }
    in_flight.shutdown().await;
}

/// Resolve, normalize, classify and match one record.
async fn process_update(pipeline: Arc<Pipeline>, update: ServiceUpdate) {
    let record = pipeline
        .listener
        .resolve(&update.service_type, &update.name, pipeline.resolve_timeout)
        .await;

    let info = match info_from_record(&record) {
        Ok(info) => info,
        Err(e) => {
            debug!("Failed to get addresses for device {}: {}", update.name, e);
            return;
        }
    };
    debug!("Discovered new device {} {:?}", update.name, info);

    let mut skip_generic = false;
    if homekit::is_homekit_type(&update.service_type) {
        if let Some(found) = homekit::classify(&pipeline.homekit_models, &info) {
            skip_generic = pipeline.suppress_unpaired_generic && !found.pairing.is_paired();
            notify(
                &pipeline,
                DiscoveryFlow {
                    domain: found.domain,
                    source: FlowSource::HomeKit,
                    info: info.clone(),
                    pairing: Some(found.pairing),
                },
            );
        }
    }
    if skip_generic {
        return;
    }

    for domain in pipeline.match_table.matching_domains(&info) {
        notify(
            &pipeline,
            DiscoveryFlow {
                domain,
                source: FlowSource::Zeroconf,
                info: info.clone(),
                pairing: None,
            },
        );
    }
}

/// Fire and forget: the flow runs on its own task.
fn notify(pipeline: &Pipeline, flow: DiscoveryFlow) {
    debug!("Creating {:?} flow for {}", flow.source, flow.domain);
    let handler = pipeline.handler.clone();
    tokio::spawn(async move { handler.create_flow(flow).await });
}

/// Starts discovery on the process-wide mDNS listener.
///
/// The returned dispatcher is already listening; call
/// [`Dispatcher::stop`] and then [`mdns::shutdown_shared_listener`] on
/// shutdown.
pub fn start(
    config: &ZeroConfig,
    handler: Arc<dyn DiscoveryFlowHandler>,
) -> Result<Dispatcher, DiscoveryError> {
    let listener = mdns::shared_listener(&config.listener)?;
    let mut dispatcher = Dispatcher::from_config(config, listener, handler)?;
    dispatcher.start()?;
    Ok(dispatcher)
}
