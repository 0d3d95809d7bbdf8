//! End-to-end tests for the discovery dispatcher over an in-memory listener.

mod common;

use common::{
    HAP_TCP, HAP_UDP, MockListener, PRINTER, assert_no_more_flows, next_flow, record,
};
use std::sync::Arc;
use std::time::Duration;
use zeromatch::{
    ChannelFlowHandler, DiscoveryError, Dispatcher, DispatcherState, FlowSource, HomeKitModel,
    HomeKitModels, MatchRule, MatchTable, PairingStatus, RuleFilters, StateChange, ZeroConfig,
};

fn homekit_models() -> HomeKitModels {
    HomeKitModels::new(vec![
        HomeKitModel::new("SmartLock", "lockvendor").unwrap(),
        HomeKitModel::new("Hub", "hubvendor").unwrap(),
    ])
}

/// Every `_hap._tcp` record goes to "generic_hap".
fn generic_hap_table() -> MatchTable {
    [MatchRule::new(HAP_TCP, "generic_hap", RuleFilters::default()).unwrap()]
        .into_iter()
        .collect()
}

fn dispatcher(
    listener: &Arc<MockListener>,
    table: MatchTable,
) -> (
    Dispatcher,
    tokio::sync::mpsc::UnboundedReceiver<zeromatch::DiscoveryFlow>,
) {
    let (handler, rx) = ChannelFlowHandler::new();
    let dispatcher = Dispatcher::new(listener.clone(), table, homekit_models(), Arc::new(handler));
    (dispatcher, rx)
}

#[tokio::test]
async fn test_homekit_lock_yields_single_homekit_flow() {
    let listener = MockListener::new();
    let (mut dispatcher, mut flows) = dispatcher(&listener, MatchTable::new());
    dispatcher.start().unwrap();

    listener.publish(record(
        HAP_TCP,
        "Lock",
        &["10.0.0.5"],
        &[("md", "SmartLock"), ("sf", "1")],
    ));

    let flow = next_flow(&mut flows).await;
    assert_eq!(flow.domain, "lockvendor");
    assert_eq!(flow.source, FlowSource::HomeKit);
    assert_eq!(flow.pairing, Some(PairingStatus::Unpaired));
    assert_eq!(flow.info.host, "10.0.0.5");
    assert_eq!(flow.info.port, Some(80));
    assert_eq!(flow.info.name, "Lock._hap._tcp.local.");
    assert_no_more_flows(&mut flows).await;

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_pairing_status_is_forwarded() {
    let listener = MockListener::new();
    let (mut dispatcher, mut flows) = dispatcher(&listener, MatchTable::new());
    dispatcher.start().unwrap();

    for (instance, flag, expected) in [
        ("Paired", "0", PairingStatus::Paired),
        ("Fresh", "1", PairingStatus::Unpaired),
        ("Garbled", "yes", PairingStatus::Unpaired),
    ] {
        listener.publish(record(
            HAP_TCP,
            instance,
            &["10.0.0.7"],
            &[("md", "Hub 2000"), ("sf", flag)],
        ));
        let flow = next_flow(&mut flows).await;
        assert_eq!(flow.domain, "hubvendor");
        assert_eq!(flow.pairing, Some(expected), "sf={flag}");
    }
    assert_no_more_flows(&mut flows).await;

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_homekit_and_generic_paths_are_independent() {
    let listener = MockListener::new();
    let (mut dispatcher, mut flows) = dispatcher(&listener, generic_hap_table());
    dispatcher.start().unwrap();

    listener.publish(record(
        HAP_TCP,
        "Lock",
        &["10.0.0.5"],
        &[("md", "SmartLock"), ("sf", "1")],
    ));

    let mut sources = vec![next_flow(&mut flows).await, next_flow(&mut flows).await]
        .into_iter()
        .map(|f| (f.source, f.domain))
        .collect::<Vec<_>>();
    sources.sort_by_key(|(source, _)| *source == FlowSource::Zeroconf);
    assert_eq!(
        sources,
        vec![
            (FlowSource::HomeKit, "lockvendor".to_string()),
            (FlowSource::Zeroconf, "generic_hap".to_string()),
        ]
    );
    assert_no_more_flows(&mut flows).await;

    // An unknown model still reaches the generic rules.
    listener.publish(record(HAP_TCP, "Other", &["10.0.0.6"], &[("md", "Toaster")]));
    let flow = next_flow(&mut flows).await;
    assert_eq!(flow.source, FlowSource::Zeroconf);
    assert_eq!(flow.pairing, None);
    assert_no_more_flows(&mut flows).await;

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_suppress_unpaired_generic() {
    let listener = MockListener::new();
    let (dispatcher, mut flows) = dispatcher(&listener, generic_hap_table());
    let mut dispatcher = dispatcher.with_suppress_unpaired_generic(true);
    dispatcher.start().unwrap();

    listener.publish(record(
        HAP_TCP,
        "Fresh",
        &["10.0.0.5"],
        &[("md", "SmartLock"), ("sf", "1")],
    ));
    assert_eq!(next_flow(&mut flows).await.source, FlowSource::HomeKit);
    assert_no_more_flows(&mut flows).await;

    listener.publish(record(
        HAP_TCP,
        "Paired",
        &["10.0.0.6"],
        &[("md", "SmartLock"), ("sf", "0")],
    ));
    let mut sources = vec![
        next_flow(&mut flows).await.source,
        next_flow(&mut flows).await.source,
    ];
    sources.sort_by_key(|source| *source == FlowSource::Zeroconf);
    assert_eq!(sources, vec![FlowSource::HomeKit, FlowSource::Zeroconf]);

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_model_table_only_applies_to_homekit_types() {
    let listener = MockListener::new();
    let table: MatchTable = [MatchRule::new(PRINTER, "ipp", RuleFilters::default()).unwrap()]
        .into_iter()
        .collect();
    let (mut dispatcher, mut flows) = dispatcher(&listener, table);
    dispatcher.start().unwrap();

    listener.publish(record(
        PRINTER,
        "Impostor",
        &["192.168.1.40"],
        &[("md", "SmartLock"), ("sf", "1")],
    ));
    let flow = next_flow(&mut flows).await;
    assert_eq!(flow.source, FlowSource::Zeroconf);
    assert_eq!(flow.domain, "ipp");
    assert_eq!(flow.pairing, None);
    assert_no_more_flows(&mut flows).await;

    listener.publish(record(
        HAP_UDP,
        "ThreadLock",
        &["fd00::5"],
        &[("md", "SmartLock"), ("sf", "1")],
    ));
    let flow = next_flow(&mut flows).await;
    assert_eq!(flow.source, FlowSource::HomeKit);
    assert_eq!(flow.domain, "lockvendor");
    assert_eq!(flow.pairing, Some(PairingStatus::Unpaired));
    assert_eq!(flow.info.service_type, HAP_UDP);
    assert_eq!(flow.info.host, "fd00::5");
    assert_no_more_flows(&mut flows).await;

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_generic_rules_fan_out() {
    let listener = MockListener::new();
    let printer = PRINTER;
    let table: MatchTable = [
        MatchRule::new(
            printer,
            "acme",
            RuleFilters {
                manufacturer: Some("Acme*".to_string()),
                ..Default::default()
            },
        )
        .unwrap(),
        MatchRule::new(printer, "ipp", RuleFilters::default()).unwrap(),
    ]
    .into_iter()
    .collect();
    let (mut dispatcher, mut flows) = dispatcher(&listener, table);
    dispatcher.start().unwrap();

    listener.publish(record(
        printer,
        "Office",
        &["192.168.1.40"],
        &[("manufacturer", "Acme Corp")],
    ));
    let mut domains = vec![next_flow(&mut flows).await.domain, next_flow(&mut flows).await.domain];
    domains.sort();
    assert_eq!(domains, vec!["acme", "ipp"]);
    assert_no_more_flows(&mut flows).await;

    listener.publish(record(
        printer,
        "Lobby",
        &["192.168.1.41"],
        &[("manufacturer", "Best Co")],
    ));
    let flow = next_flow(&mut flows).await;
    assert_eq!(flow.domain, "ipp");
    assert_eq!(flow.source, FlowSource::Zeroconf);
    assert_no_more_flows(&mut flows).await;

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_removals_never_notify() {
    let listener = MockListener::new();
    let (mut dispatcher, mut flows) = dispatcher(&listener, generic_hap_table());
    dispatcher.start().unwrap();

    listener.publish(record(HAP_TCP, "Lock", &["10.0.0.5"], &[("md", "SmartLock")]));
    next_flow(&mut flows).await;
    next_flow(&mut flows).await;
    let resolves = listener.resolve_count();

    listener.announce(HAP_TCP, "Lock._hap._tcp.local.", StateChange::Removed);
    listener.announce(HAP_TCP, "Ghost._hap._tcp.local.", StateChange::Removed);
    assert_no_more_flows(&mut flows).await;
    assert_eq!(listener.resolve_count(), resolves);

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_updates_are_processed_again() {
    let listener = MockListener::new();
    let (mut dispatcher, mut flows) = dispatcher(&listener, generic_hap_table());
    dispatcher.start().unwrap();

    listener.publish(record(HAP_TCP, "Plug", &["10.0.0.8"], &[]));
    assert_eq!(next_flow(&mut flows).await.domain, "generic_hap");
    listener.announce(HAP_TCP, "Plug._hap._tcp.local.", StateChange::Updated);
    assert_eq!(next_flow(&mut flows).await.domain, "generic_hap");

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_unresolvable_records_are_dropped() {
    let listener = MockListener::new();
    let (mut dispatcher, mut flows) = dispatcher(&listener, generic_hap_table());
    dispatcher.start().unwrap();

    listener.publish(record(HAP_TCP, "LinkLocal", &["169.254.10.10"], &[("md", "SmartLock")]));
    // Never published, resolution comes back empty.
    listener.announce(HAP_TCP, "Missing._hap._tcp.local.", StateChange::Added);
    assert_no_more_flows(&mut flows).await;

    // The dispatcher keeps going.
    listener.publish(record(HAP_TCP, "Good", &["169.254.1.1", "10.0.0.9"], &[]));
    let flow = next_flow(&mut flows).await;
    assert_eq!(flow.info.host, "10.0.0.9");

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_browse_types_always_include_host_and_homekit() {
    let listener = MockListener::new();
    let table: MatchTable = [
        MatchRule::new("_printer._tcp.local.", "ipp", RuleFilters::default()).unwrap(),
        MatchRule::new(HAP_TCP, "generic_hap", RuleFilters::default()).unwrap(),
    ]
    .into_iter()
    .collect();
    let (mut dispatcher, _flows) = dispatcher(&listener, table);
    dispatcher.start().unwrap();

    assert_eq!(
        listener.browsed_types(),
        vec![
            "_printer._tcp.local.",
            "_hap._tcp.local.",
            "_home-assistant._tcp.local.",
            "_hap._udp.local.",
        ]
    );
    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_state_machine() {
    let listener = MockListener::new();
    let (mut dispatcher, _flows) = dispatcher(&listener, MatchTable::new());
    assert_eq!(dispatcher.state(), DispatcherState::Idle);

    dispatcher.start().unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Listening);
    assert!(matches!(dispatcher.start(), Err(DiscoveryError::AlreadyStarted)));

    dispatcher.stop().await.unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert_eq!(listener.cancel_count(), 1);

    dispatcher.stop().await.unwrap();
    assert_eq!(listener.cancel_count(), 1);
    assert!(matches!(dispatcher.start(), Err(DiscoveryError::Stopped)));
}

#[tokio::test]
async fn test_listener_unavailable_keeps_dispatcher_idle() {
    let listener = MockListener::unavailable();
    let (mut dispatcher, _flows) = dispatcher(&listener, MatchTable::new());

    let err = dispatcher.start().unwrap_err();
    assert!(matches!(err, DiscoveryError::ListenerUnavailable(_)));
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
}

#[tokio::test]
async fn test_stop_aborts_in_flight_pipelines() {
    let listener = MockListener::with_resolve_delay(Duration::from_millis(300));
    let (mut dispatcher, mut flows) = dispatcher(&listener, MatchTable::new());
    dispatcher.start().unwrap();

    listener.publish(record(HAP_TCP, "Slow", &["10.0.0.5"], &[("md", "SmartLock")]));
    // Let the dispatcher pick the update up before stopping.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(listener.resolve_count(), 1);
    dispatcher.stop().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(flows.try_recv().is_err());

    // Announcements after stop are not picked up.
    listener.announce(HAP_TCP, "Slow._hap._tcp.local.", StateChange::Updated);
    assert_no_more_flows(&mut flows).await;
}

#[tokio::test]
async fn test_dispatcher_from_config() {
    let config: ZeroConfig = r#"
[listener]
resolve_timeout_ms = 500

[[match_rule]]
service_type = "_printer._tcp.local."
domain = "brother"
manufacturer = "brother*"

[[homekit_model]]
model = "SmartLock"
domain = "lockvendor"
"#
    .parse()
    .unwrap();

    let listener = MockListener::new();
    let (handler, mut flows) = ChannelFlowHandler::new();
    let mut dispatcher =
        Dispatcher::from_config(&config, listener.clone(), Arc::new(handler)).unwrap();
    dispatcher.start().unwrap();
    assert_eq!(listener.browsed_types()[0], "_printer._tcp.local.");

    listener.publish(record(
        "_printer._tcp.local.",
        "HL-L2350DW",
        &["192.168.1.50"],
        &[("manufacturer", "Brother")],
    ));
    assert_eq!(next_flow(&mut flows).await.domain, "brother");

    listener.publish(record(HAP_TCP, "Lock", &["10.0.0.5"], &[("md", "SmartLock")]));
    let flow = next_flow(&mut flows).await;
    assert_eq!(flow.domain, "lockvendor");
    assert_eq!(flow.pairing, Some(PairingStatus::Unknown));
    assert_no_more_flows(&mut flows).await;

    dispatcher.stop().await.unwrap();
}
