use super::*;
use crate::config::AgpsConfig;
use crate::test_support::{Call, Recorder};
use crate::types::{AgpsStatus, PositionModeKind, Recurrence};

fn engine_with(config: EngineConfig, mask: EventMask) -> (LocEngine, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let engine = LocEngine::spawn(
        config,
        mask,
        recorder.clone(),
        recorder.clone(),
        tokio::runtime::Handle::current(),
    )
    .unwrap();
    (engine, recorder)
}

/// Mask updates and fallbacks are follow-up commands; flush past each level.
fn settle(engine: &LocEngine) {
    for _ in 0..3 {
        engine.flush().unwrap();
    }
}

#[tokio::test]
async fn spawn_opens_transport_and_shutdown_closes_it() {
    let (engine, recorder) = engine_with(EngineConfig::default(), EventMask::POSITION);
    settle(&engine);
    assert_eq!(recorder.calls(), vec![Call::Open(EventMask::POSITION)]);
    assert_eq!(engine.adapter_count().unwrap(), 1);

    engine.shutdown().unwrap();
    assert_eq!(recorder.calls().last(), Some(&Call::Close));
}

#[tokio::test]
async fn invalid_config_is_refused() {
    let recorder = Arc::new(Recorder::default());
    let err = LocEngine::spawn(
        EngineConfig::default().with_max_adapters(0),
        EventMask::POSITION,
        recorder.clone(),
        recorder,
        tokio::runtime::Handle::current(),
    )
    .err()
    .unwrap();
    assert!(matches!(err.current_context(), KernelError::Config(_)));
}

#[tokio::test]
async fn declined_request_reports_not_handled() {
    let config = EngineConfig::default().with_agps(AgpsConfig {
        supports_agps_requests: false,
        ..AgpsConfig::default()
    });
    let (engine, recorder) = engine_with(config, EventMask::POSITION);
    engine.request_time().unwrap();
    settle(&engine);
    assert_eq!(recorder.count(|c| *c == Call::NotHandled(RequestKind::Time)), 1);
}

#[tokio::test]
async fn second_atl_subscriber_is_granted_without_new_request() {
    let (engine, recorder) = engine_with(EngineConfig::default(), EventMask::POSITION);
    engine.request_atl(ConnHandle(1), AgpsType::Supl).unwrap();
    settle(&engine);
    assert_eq!(
        engine.resource_state(ResourceType::Cellular).unwrap(),
        Some(RsrcState::Pending)
    );

    engine
        .agps_data_conn_open(AgpsType::Supl, "internet", None)
        .unwrap();
    engine.request_atl(ConnHandle(2), AgpsType::Supl).unwrap();
    settle(&engine);

    let requests =
        recorder.count(|c| *c == Call::Agps(AgpsStatus::RequestConnection(AgpsType::Supl)));
    assert_eq!(requests, 1);
    for handle in [ConnHandle(1), ConnHandle(2)] {
        assert_eq!(
            recorder.count(|c| *c
                == Call::AtlOpenStatus {
                    handle,
                    success: true,
                    agps_type: AgpsType::Supl,
                }),
            1
        );
    }
}

#[tokio::test]
async fn aiding_deletion_waits_for_engine_off() {
    let (engine, recorder) = engine_with(EngineConfig::default(), EventMask::STATUS);
    engine.report_status(EngineStatus::EngineOn).unwrap();
    engine.delete_aiding_data(AidingData::EPHEMERIS).unwrap();
    settle(&engine);
    assert_eq!(recorder.count(|c| matches!(c, Call::DeleteAidingData(_))), 0);

    engine.report_status(EngineStatus::EngineOff).unwrap();
    settle(&engine);
    assert_eq!(
        recorder.count(|c| *c == Call::DeleteAidingData(AidingData::EPHEMERIS)),
        1
    );
}

#[tokio::test]
async fn engine_restart_resumes_running_session() {
    let (engine, recorder) = engine_with(EngineConfig::default(), EventMask::POSITION);
    let mode = PositionMode::new(PositionModeKind::MsBased, Recurrence::Periodic);
    engine.set_position_mode(mode).unwrap();
    engine.start().unwrap();
    settle(&engine);
    recorder.clear();

    engine.engine_down().unwrap();
    engine.engine_up().unwrap();
    settle(&engine);

    let calls = recorder.calls();
    let position = |call: &Call| calls.iter().position(|c| c == call).unwrap();
    assert!(position(&Call::Close) < position(&Call::Open(EventMask::POSITION)));
    assert!(position(&Call::SetPositionMode(mode)) < position(&Call::StartFix));
    assert!(engine.fix_session().unwrap().in_session);
}

#[tokio::test]
async fn host_command_after_indication_sees_its_effect() {
    let (engine, recorder) = engine_with(EngineConfig::default(), EventMask::POSITION);
    // No flush in between: the grant must find the subscriber already there.
    engine.request_atl(ConnHandle(7), AgpsType::Supl).unwrap();
    engine
        .agps_data_conn_open(AgpsType::Supl, "internet", None)
        .unwrap();
    engine.flush().unwrap();

    assert_eq!(
        engine.resource_state(ResourceType::Cellular).unwrap(),
        Some(RsrcState::Granted)
    );
    assert_eq!(
        recorder.count(|c| *c
            == Call::AtlOpenStatus {
                handle: ConnHandle(7),
                success: true,
                agps_type: AgpsType::Supl,
            }),
        1
    );
}

#[tokio::test]
async fn engine_down_status_precedes_later_commands() {
    let (engine, recorder) = engine_with(EngineConfig::default(), EventMask::STATUS);
    engine.report_status(EngineStatus::EngineOn).unwrap();
    engine.engine_down().unwrap();
    engine.delete_aiding_data(AidingData::ALMANAC).unwrap();
    engine.flush().unwrap();
    assert_eq!(
        recorder.count(|c| *c == Call::DeleteAidingData(AidingData::ALMANAC)),
        1
    );
}
