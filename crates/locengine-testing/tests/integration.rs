use locengine_kernel::arbiter::RsrcState;
use locengine_kernel::config::{AgpsConfig, EngineConfig};
use locengine_kernel::sync_req::SyncRequestError;
use locengine_kernel::transport::{DataCallError, RequestKind, TransportError};
use locengine_kernel::types::{
    AgpsStatus, AgpsType, ClientHandle, ConnHandle, EngineStatus, EventMask, Location, NiClass,
    NiNotification, NiPayload, NiResponse, NiType, ResourceType,
};
use locengine_testing::{
    AdapterEvent, FrameworkEvent, Harness, RecordingAdapter, TransportCall,
};
use std::time::{Duration, Instant};

fn no_agps() -> EngineConfig {
    EngineConfig::default().with_agps(AgpsConfig {
        supports_agps_requests: false,
        ..AgpsConfig::default()
    })
}

fn opens(h: &Harness) -> Vec<EventMask> {
    h.transport
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            TransportCall::Open(mask) => Some(mask),
            _ => None,
        })
        .collect()
}

/// Lets NI wait tasks observe a signal, then drains the queue.
async fn settle_ni(h: &Harness) {
    tokio::time::sleep(Duration::from_millis(1)).await;
    h.settle().unwrap();
}

// ----------------------------------------------------------------------------
// Registry and event mask
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_aggregate_mask_follows_registrations() {
    let h = Harness::start(EngineConfig::default(), EventMask::NONE).unwrap();
    let a = RecordingAdapter::new("a", EventMask(0x3)).into_arc();
    let b = RecordingAdapter::new("b", EventMask(0x5)).into_arc();

    h.engine.add_adapter(a.clone()).unwrap();
    h.engine.add_adapter(b.clone()).unwrap();
    h.settle().unwrap();
    assert_eq!(h.engine.evt_mask().unwrap(), EventMask(0x7));

    h.transport.clear_history();
    h.engine.remove_adapter(a).unwrap();
    h.settle().unwrap();
    assert_eq!(h.engine.evt_mask().unwrap(), EventMask(0x5));
    assert_eq!(opens(&h), vec![EventMask(0x5)]);
    assert_eq!(h.transport.count(|c| *c == TransportCall::Close), 0);
}

#[tokio::test]
async fn test_last_removal_closes_transport_once() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let a = RecordingAdapter::new("a", EventMask::NMEA).into_arc();
    h.engine.add_adapter(a.clone()).unwrap();
    h.engine.remove_adapter(a).unwrap();
    h.settle().unwrap();
    assert_eq!(h.transport.count(|c| *c == TransportCall::Close), 0);

    let transport = h.transport.clone();
    h.engine.shutdown().unwrap();
    assert_eq!(transport.count(|c| *c == TransportCall::Close), 1);
}

#[tokio::test]
async fn test_registry_capacity_is_enforced() {
    let h = Harness::start(EngineConfig::default().with_max_adapters(2), EventMask::NONE).unwrap();
    let a = RecordingAdapter::new("a", EventMask(0x1)).into_arc();
    let b = RecordingAdapter::new("b", EventMask(0x2)).into_arc();
    h.engine.add_adapter(a.clone()).unwrap();
    h.engine.add_adapter(a).unwrap();
    h.engine.add_adapter(b).unwrap();
    h.settle().unwrap();
    // engine + a; the duplicate and the overflow are refused
    assert_eq!(h.engine.adapter_count().unwrap(), 2);
    assert_eq!(h.engine.evt_mask().unwrap(), EventMask(0x1));
}

// ----------------------------------------------------------------------------
// Dispatch
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_broadcast_reaches_every_adapter() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let a = RecordingAdapter::new("a", EventMask::POSITION).into_arc();
    h.engine.add_adapter(a.clone()).unwrap();

    let fix = Location {
        latitude: 48.1,
        longitude: 11.6,
        ..Location::default()
    };
    h.engine.report_position(fix.clone()).unwrap();
    h.engine.report_nmea(0, "$GPGGA".to_string()).unwrap();
    h.settle().unwrap();

    assert_eq!(a.count(|e| *e == AdapterEvent::Position(fix.clone())), 1);
    assert_eq!(a.count(|e| matches!(e, AdapterEvent::Nmea(_))), 1);
    assert_eq!(h.callbacks.count(|e| *e == FrameworkEvent::Fix(fix.clone())), 1);
}

#[tokio::test]
async fn test_engine_handles_requests_before_other_adapters() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let a = RecordingAdapter::new("a", EventMask::NONE)
        .handling(RequestKind::Time)
        .into_arc();
    h.engine.add_adapter(a.clone()).unwrap();
    h.engine.request_time().unwrap();
    h.settle().unwrap();

    assert_eq!(h.callbacks.count(|e| *e == FrameworkEvent::TimeRequest), 1);
    assert_eq!(a.count(|e| matches!(e, AdapterEvent::Offered(_))), 0);
}

#[tokio::test]
async fn test_xtra_servers_are_forwarded() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let servers = vec!["http://xtra1.example".to_string(), "http://xtra2.example".to_string()];
    h.engine.report_xtra_server(servers.clone()).unwrap();
    h.settle().unwrap();
    assert_eq!(
        h.callbacks.count(|e| *e == FrameworkEvent::XtraServers(servers.clone())),
        1
    );
}

#[tokio::test]
async fn test_unhandled_request_is_reported_to_modem() {
    let h = Harness::start(no_agps(), EventMask::POSITION).unwrap();
    let a = RecordingAdapter::new("a", EventMask::NONE)
        .handling(RequestKind::Time)
        .into_arc();
    h.engine.add_adapter(a.clone()).unwrap();

    h.engine.request_time().unwrap();
    h.engine.request_xtra_data().unwrap();
    h.settle().unwrap();

    assert_eq!(
        h.transport.count(|c| *c == TransportCall::NotHandled(RequestKind::Time)),
        0
    );
    assert_eq!(
        h.transport.count(|c| *c == TransportCall::NotHandled(RequestKind::XtraData)),
        1
    );
    assert_eq!(a.count(|e| *e == AdapterEvent::Offered(RequestKind::XtraData)), 1);
}

#[tokio::test]
async fn test_engine_restart_reaches_adapters() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let a = RecordingAdapter::new("a", EventMask::SATELLITE).into_arc();
    h.engine.add_adapter(a.clone()).unwrap();
    h.settle().unwrap();
    h.transport.clear_history();

    h.engine.engine_down().unwrap();
    h.engine.engine_up().unwrap();
    h.settle().unwrap();

    assert_eq!(a.events(), vec![AdapterEvent::EngineDown, AdapterEvent::EngineUp]);
    assert_eq!(
        h.transport.calls()[..2],
        [
            TransportCall::Close,
            TransportCall::Open(EventMask::POSITION | EventMask::SATELLITE)
        ]
    );
    assert_eq!(
        h.callbacks
            .count(|e| *e == FrameworkEvent::Status(EngineStatus::EngineOff)),
        1
    );
}

// ----------------------------------------------------------------------------
// AGPS arbitration
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_granted_resource_serves_new_subscriber_immediately() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let request = FrameworkEvent::Agps(AgpsStatus::RequestConnection(AgpsType::Supl));

    h.engine.request_atl(ConnHandle(1), AgpsType::Supl).unwrap();
    h.settle().unwrap();
    assert_eq!(h.callbacks.count(|e| *e == request), 1);
    assert_eq!(
        h.engine.resource_state(ResourceType::Cellular).unwrap(),
        Some(RsrcState::Pending)
    );

    h.engine
        .agps_data_conn_open(AgpsType::Supl, "supl.apn", None)
        .unwrap();
    h.settle().unwrap();
    assert_eq!(
        h.engine.resource_state(ResourceType::Cellular).unwrap(),
        Some(RsrcState::Granted)
    );

    h.engine.request_atl(ConnHandle(2), AgpsType::Supl).unwrap();
    h.settle().unwrap();
    assert_eq!(h.callbacks.count(|e| *e == request), 1);
    assert_eq!(
        h.transport.count(|c| *c
            == TransportCall::AtlOpenStatus {
                handle: ConnHandle(2),
                success: true,
                apn: "supl.apn".to_string(),
                agps_type: AgpsType::Supl,
            }),
        1
    );
}

#[tokio::test]
async fn test_released_resource_reopens_for_next_subscriber() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let request = FrameworkEvent::Agps(AgpsStatus::RequestConnection(AgpsType::Supl));

    h.engine.request_atl(ConnHandle(1), AgpsType::Supl).unwrap();
    h.settle().unwrap();
    h.engine.agps_data_conn_open(AgpsType::Supl, "apn", None).unwrap();
    h.settle().unwrap();

    h.engine.agps_data_conn_closed(AgpsType::Supl).unwrap();
    h.settle().unwrap();
    assert_eq!(
        h.engine.resource_state(ResourceType::Cellular).unwrap(),
        Some(RsrcState::Idle)
    );

    h.engine.request_atl(ConnHandle(3), AgpsType::Supl).unwrap();
    h.settle().unwrap();
    assert_eq!(
        h.engine.resource_state(ResourceType::Cellular).unwrap(),
        Some(RsrcState::Pending)
    );
    assert_eq!(h.callbacks.count(|e| *e == request), 2);
}

#[tokio::test]
async fn test_failed_connection_denies_subscriber() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    h.engine.request_atl(ConnHandle(4), AgpsType::WwanAny).unwrap();
    h.settle().unwrap();
    h.engine.agps_data_conn_failed(AgpsType::WwanAny).unwrap();
    h.settle().unwrap();

    assert_eq!(
        h.transport.count(|c| matches!(
            c,
            TransportCall::AtlOpenStatus { handle: ConnHandle(4), success: false, .. }
        )),
        1
    );
    assert_eq!(
        h.engine.resource_state(ResourceType::LowBandwidth).unwrap(),
        Some(RsrcState::Idle)
    );
}

#[tokio::test(start_paused = true)]
async fn test_busy_data_call_retries_then_falls_back_to_cellular() {
    let config = EngineConfig::default().with_agps(AgpsConfig {
        data_call_retry_delay_ms: 5,
        ..AgpsConfig::default()
    });
    let h = Harness::start(config, EventMask::POSITION).unwrap();
    h.transport
        .script_data_call(std::iter::repeat_n(Err(DataCallError::Busy), 5));

    h.engine.request_supl_es(ConnHandle(9)).unwrap();

    let request = FrameworkEvent::Agps(AgpsStatus::RequestConnection(AgpsType::Supl));
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.callbacks.count(|e| *e == request) == 0 {
        assert!(Instant::now() < deadline, "emergency fallback never requested");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.settle().unwrap();

    assert_eq!(h.transport.count(|c| *c == TransportCall::OpenDataCall), 5);
    assert_eq!(
        h.engine.resource_state(ResourceType::DataCall).unwrap(),
        Some(RsrcState::Idle)
    );
    assert_eq!(
        h.engine.resource_state(ResourceType::Cellular).unwrap(),
        Some(RsrcState::Pending)
    );

    h.engine.agps_data_conn_open(AgpsType::Supl, "sos", None).unwrap();
    h.settle().unwrap();
    assert_eq!(
        h.transport.count(|c| matches!(
            c,
            TransportCall::AtlOpenStatus { handle: ConnHandle(9), success: true, .. }
        )),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_from_denied_request_does_not_reopen_data_call() {
    let config = EngineConfig::default().with_agps(AgpsConfig {
        data_call_retry_delay_ms: 50,
        ..AgpsConfig::default()
    });
    let h = Harness::start(config, EventMask::POSITION).unwrap();
    h.transport.script_data_call([Err(DataCallError::Busy)]);

    h.engine.request_supl_es(ConnHandle(1)).unwrap();
    h.engine.agps_data_conn_failed(AgpsType::SuplEs).unwrap();
    h.engine.request_supl_es(ConnHandle(2)).unwrap();
    h.settle().unwrap();
    assert_eq!(h.transport.count(|c| *c == TransportCall::OpenDataCall), 2);
    assert_eq!(
        h.engine.resource_state(ResourceType::DataCall).unwrap(),
        Some(RsrcState::Pending)
    );

    // The retry scheduled for the first request fires into the second one.
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.settle().unwrap();
    assert_eq!(h.transport.count(|c| *c == TransportCall::OpenDataCall), 2);
}

// ----------------------------------------------------------------------------
// Network-initiated sessions
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_duplicate_ni_request_is_dropped_and_first_times_out() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let notification = NiNotification::new(NiType::UmtsSuplInit);

    h.engine
        .request_ni_notify(notification.clone(), NiPayload::new(vec![1u8, 1]))
        .unwrap();
    h.settle().unwrap();
    h.engine
        .request_ni_notify(notification.clone(), NiPayload::new(vec![2u8, 2]))
        .unwrap();
    h.settle().unwrap();
    assert_eq!(h.callbacks.ni_ids().len(), 1);

    // default 20 s window + 5 s grace
    tokio::time::sleep(Duration::from_secs(26)).await;
    h.settle().unwrap();

    let answers: Vec<_> = h
        .transport
        .calls()
        .into_iter()
        .filter(|c| matches!(c, TransportCall::NiResponse(..)))
        .collect();
    assert_eq!(
        answers,
        vec![TransportCall::NiResponse(NiResponse::NoResponse, vec![1, 1])]
    );
    assert_eq!(h.engine.ni_sessions().outstanding(NiClass::Normal), None);

    h.engine
        .request_ni_notify(notification, NiPayload::new(vec![3u8]))
        .unwrap();
    h.settle().unwrap();
    assert_eq!(h.callbacks.ni_ids().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_user_answer_is_forwarded_with_payload() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    h.engine
        .request_ni_notify(
            NiNotification::new(NiType::Voice).with_text("operator", "locate?"),
            NiPayload::new(vec![7u8]),
        )
        .unwrap();
    h.settle().unwrap();
    let id = h.callbacks.ni_ids()[0];

    assert!(h.engine.ni_respond(id, NiResponse::Accept));
    settle_ni(&h).await;
    assert_eq!(
        h.transport
            .count(|c| *c == TransportCall::NiResponse(NiResponse::Accept, vec![7])),
        1
    );
    assert!(!h.engine.ni_respond(id, NiResponse::Deny));
}

#[tokio::test(start_paused = true)]
async fn test_emergency_accept_silences_ordinary_session() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    h.engine
        .request_ni_notify(NiNotification::new(NiType::UmtsSuplInit), NiPayload::new(vec![1u8]))
        .unwrap();
    h.engine
        .request_ni_notify(NiNotification::new(NiType::EmergencySupl), NiPayload::new(vec![9u8]))
        .unwrap();
    h.settle().unwrap();
    let ids = h.callbacks.ni_ids();
    assert_eq!(ids.len(), 2);

    assert!(h.engine.ni_respond(ids[1], NiResponse::Accept));
    settle_ni(&h).await;

    let answers: Vec<_> = h
        .transport
        .calls()
        .into_iter()
        .filter(|c| matches!(c, TransportCall::NiResponse(..)))
        .collect();
    assert_eq!(
        answers,
        vec![TransportCall::NiResponse(NiResponse::Accept, vec![9])]
    );
    assert_eq!(h.engine.ni_sessions().outstanding(NiClass::Normal), None);
}

#[tokio::test(start_paused = true)]
async fn test_engine_down_resets_ni_sessions() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    h.engine
        .request_ni_notify(NiNotification::new(NiType::Voice), NiPayload::new(vec![5u8]))
        .unwrap();
    h.settle().unwrap();
    assert!(h.engine.ni_sessions().outstanding(NiClass::Normal).is_some());

    h.engine.engine_down().unwrap();
    h.settle().unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    h.settle().unwrap();

    assert_eq!(h.engine.ni_sessions().outstanding(NiClass::Normal), None);
    assert_eq!(
        h.transport.count(|c| matches!(c, TransportCall::NiResponse(..))),
        0
    );
}

#[tokio::test]
async fn test_ni_request_goes_to_adapter_when_engine_declines() {
    let h = Harness::start(no_agps(), EventMask::POSITION).unwrap();
    let a = RecordingAdapter::new("ni", EventMask::NI_REQUEST)
        .handling(RequestKind::Ni)
        .into_arc();
    h.engine.add_adapter(a.clone()).unwrap();
    h.engine
        .request_ni_notify(NiNotification::new(NiType::Voice), NiPayload::new(vec![4u8]))
        .unwrap();
    h.settle().unwrap();

    assert_eq!(a.count(|e| *e == AdapterEvent::NiTaken(0, vec![4])), 1);
    assert!(h.callbacks.ni_ids().is_empty());
}

// ----------------------------------------------------------------------------
// Sync requests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_sync_request_answered_before_wait_returns_at_once() {
    const CLIENT: ClientHandle = ClientHandle(3);
    const IND: u32 = 0x51;

    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let bridge = h.engine.sync_requests();
    h.transport.on_send(move |client, _, payload| {
        let reply: Vec<u8> = payload.iter().rev().copied().collect();
        bridge.on_indication_arrived(client, IND, &reply);
    });

    let reply = h
        .engine
        .send_sync_request(CLIENT, 0x50, b"abc", Duration::ZERO, IND)
        .unwrap();
    assert_eq!(reply, b"cba");
    assert_eq!(h.engine.sync_requests().in_use(), 0);
}

#[tokio::test]
async fn test_sync_request_send_failure_frees_slot() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    h.transport.fail_sends_with(TransportError::Disconnected);

    let err = h
        .engine
        .send_sync_request(ClientHandle(1), 1, b"", Duration::from_secs(30), 2)
        .unwrap_err();
    assert_eq!(err, SyncRequestError::SendFailed(TransportError::Disconnected));
    assert_eq!(h.engine.sync_requests().in_use(), 0);
}

#[tokio::test]
async fn test_sync_request_woken_from_indication_thread() {
    let h = Harness::start(EngineConfig::default(), EventMask::POSITION).unwrap();
    let bridge = h.engine.sync_requests();
    let deliverer = std::thread::spawn(move || {
        // Retry until the caller has armed its slot.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !bridge.on_indication_arrived(ClientHandle(1), 0x20, b"late") {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
    });

    let reply = h
        .engine
        .send_sync_request(ClientHandle(1), 0x10, b"", Duration::from_secs(5), 0x20)
        .unwrap();
    assert_eq!(reply, b"late");
    deliverer.join().unwrap();
}

#[tokio::test]
async fn test_engine_status_reaches_framework() {
    let h = Harness::start(EngineConfig::default(), EventMask::STATUS).unwrap();
    h.engine.report_status(EngineStatus::SessionBegin).unwrap();
    h.settle().unwrap();
    assert_eq!(
        h.callbacks
            .count(|e| *e == FrameworkEvent::Status(EngineStatus::SessionBegin)),
        1
    );
}
