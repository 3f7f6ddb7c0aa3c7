use super::*;
use crate::behavior::{BehaviorParams, FIND_SUM, NO_BEHAVIOR};
use crate::config::FocusLockConfig;
use crate::error::FocusLockError;
use crate::events::{EventBus, EventFilter, EventReceiver, FocusLockEvent};
use crate::frame::Frame;
use crate::mode::{AlwaysOnLockMode, AutoLockMode, CalibrationLockMode, NoLockMode};
use crate::parameters::{LockParameters, ParameterOverrides, ParameterValue};
use crate::quality::GradientQuality;
use crate::sensor::{QpdState, SimulatedSensor};
use crate::stage::{SimulatedStage, StageActuator, StageCommand};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn session() -> (LockSession, Arc<SimulatedStage>, EventReceiver) {
    let stage = Arc::new(SimulatedStage::new(0.0, 100.0, 50.0));
    let events = EventBus::new(4096);
    let receiver = EventReceiver::new(events.subscribe(), EventFilter::All, "test".to_string());
    let session = LockSession::new(stage.clone(), events, Arc::new(GradientQuality)).unwrap();
    (session, stage, receiver)
}

fn hold_focus(session: &mut LockSession, updates: usize) {
    for _ in 0..updates {
        session.handle_qpd_update(&QpdState::new(100.0, 0.0));
    }
}

#[test]
fn test_standard_modes_registered() {
    let (session, _stage, _receiver) = session();
    assert_eq!(
        session.mode_names(),
        vec![
            NoLockMode::NAME,
            AutoLockMode::NAME,
            AlwaysOnLockMode::NAME,
            crate::mode::OptimalLockMode::NAME,
            CalibrationLockMode::NAME,
        ]
    );
    assert_eq!(session.active_mode().name(), NoLockMode::NAME);
    for section in ["find_sum", "locked", "optimal_mode", "calibrate"] {
        assert!(session.parameters().has_section(section));
    }
}

#[test]
fn test_mode_switch_tears_down_active_lock_first() {
    let (mut session, stage, mut receiver) = session();
    session.select_mode(AlwaysOnLockMode::NAME).unwrap();
    hold_focus(&mut session, 1);
    assert!(session.start_lock(None));
    hold_focus(&mut session, 10);
    assert!(session.is_good_lock());
    receiver.drain();
    stage.clear_commands();

    session.select_mode(NoLockMode::NAME).unwrap();

    assert_eq!(stage.commands(), vec![StageCommand::Recenter]);
    let events = receiver.drain();
    assert_eq!(
        events,
        vec![
            FocusLockEvent::GoodLockChanged { good_lock: false },
            FocusLockEvent::ModeChanged {
                name: NoLockMode::NAME.to_string()
            },
        ]
    );
    assert!(!session.is_good_lock());
}

#[test]
fn test_mode_switch_from_idle_mode_leaves_stage() {
    let (mut session, stage, _receiver) = session();
    session.select_mode(AutoLockMode::NAME).unwrap();
    session.select_mode(CalibrationLockMode::NAME).unwrap();
    assert!(stage.commands().is_empty());
}

#[test]
fn test_unknown_mode_is_rejected() {
    let (mut session, _stage, _receiver) = session();
    let err = session.select_mode("Spiral").unwrap_err();
    assert!(matches!(err, FocusLockError::UnknownMode { .. }));
    assert_eq!(session.active_mode().name(), NoLockMode::NAME);
}

#[test]
fn test_lock_button_gate() {
    let (mut session, _stage, _receiver) = session();
    session.select_mode(AutoLockMode::NAME).unwrap();
    assert!(!session.should_enable_lock_button());
    assert!(!session.start_lock(Some(0.0)));
    assert!(!session.active_mode().am_locked());

    session.select_mode(AlwaysOnLockMode::NAME).unwrap();
    assert!(session.start_lock(Some(0.0)));
    assert!(session.active_mode().am_locked());
}

#[test]
fn test_parameter_reload_reaches_inactive_modes() {
    let (mut session, stage, _receiver) = session();
    let mut overrides = ParameterOverrides::new();
    overrides
        .entry("calibrate".to_string())
        .or_default()
        .insert("deadtime".to_string(), ParameterValue::Int(5));
    session.apply_overrides(&overrides).unwrap();

    session.select_mode(CalibrationLockMode::NAME).unwrap();
    session.start_film();
    for number in 0..400 {
        session.handle_new_frame(&Frame::blank(number, "camera1"));
    }
    assert_eq!(stage.commands().len(), 250);
}

#[test]
fn test_calibration_sweep_does_not_resume_after_mode_switch() {
    let (mut session, stage, _receiver) = session();
    session.select_mode(CalibrationLockMode::NAME).unwrap();
    session.start_film();
    for number in 0..30 {
        session.handle_new_frame(&Frame::blank(number, "camera1"));
    }
    assert_eq!(stage.commands().len(), 30);

    session.select_mode(NoLockMode::NAME).unwrap();
    session.stop_film();
    session.select_mode(CalibrationLockMode::NAME).unwrap();
    stage.clear_commands();

    for number in 30..400 {
        session.handle_new_frame(&Frame::blank(number, "camera1"));
    }
    assert!(stage.commands().is_empty());
}

#[test]
fn test_parameter_reload_rejects_incomplete_tree() {
    let (mut session, _stage, _receiver) = session();
    let before = session.parameters().clone();
    let err = session
        .new_parameters(LockParameters::new())
        .unwrap_err();
    assert!(matches!(err, FocusLockError::Parameter { .. }));
    assert_eq!(session.parameters(), &before);
}

#[test]
fn test_failed_reload_leaves_every_mode_on_old_parameters() {
    let (mut session, _stage, _receiver) = session();
    session.select_mode(AlwaysOnLockMode::NAME).unwrap();

    // Shorter buffer for the locked behavior, but the calibrate section is
    // missing one of its parameters.
    let mut snapshot = LockParameters::new();
    for section in session.parameters().sections() {
        let copy = snapshot.add_subsection(section.name()).unwrap();
        for parameter in section.iter() {
            if section.name() == "calibrate" && parameter.name == "range" {
                continue;
            }
            copy.add(parameter.clone()).unwrap();
        }
    }
    snapshot
        .set("locked", "buffer_length", ParameterValue::Int(1))
        .unwrap();

    assert!(session.new_parameters(snapshot).is_err());
    assert_eq!(
        session
            .parameters()
            .section("locked")
            .unwrap()
            .get_usize("buffer_length")
            .unwrap(),
        5
    );

    hold_focus(&mut session, 1);
    assert!(session.start_lock(None));
    hold_focus(&mut session, 1);
    assert!(!session.is_good_lock());
    hold_focus(&mut session, 4);
    assert!(session.is_good_lock());
}

#[test]
fn test_invalid_override_keeps_parameters() {
    let (mut session, _stage, _receiver) = session();
    let mut overrides = ParameterOverrides::new();
    overrides
        .entry("optimal_mode".to_string())
        .or_default()
        .insert("scan_hold".to_string(), ParameterValue::Int(0));
    assert!(session.apply_overrides(&overrides).is_err());
    assert_eq!(
        session
            .parameters()
            .section("optimal_mode")
            .unwrap()
            .get_i64("scan_hold")
            .unwrap(),
        10
    );
}

#[test]
fn test_film_events_carry_film_id() {
    let (mut session, _stage, mut receiver) = session();
    let film_id = session.start_film();
    assert_eq!(session.status().film_id, Some(film_id));
    session.stop_film();
    assert_eq!(session.film_id(), None);

    let events = receiver.drain();
    assert!(events.contains(&FocusLockEvent::FilmStarted { film_id }));
    assert!(events.contains(&FocusLockEvent::FilmStopped { film_id }));
}

#[test]
fn test_find_sum_through_session() {
    let (mut session, stage, _receiver) = session();
    session.select_mode(AlwaysOnLockMode::NAME).unwrap();
    session
        .start_lock_behavior(
            FIND_SUM,
            &BehaviorParams {
                requested_sum: Some(100.0),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(stage.current_position(), 0.0);
    assert_eq!(session.status().behavior, FIND_SUM);

    for _ in 0..200 {
        let z = stage.current_position();
        let sum = 1000.0 * (-0.5 * ((z - 42.0) / 2.0).powi(2)).exp();
        session.handle_qpd_update(&QpdState::new(sum, 0.0));
        if session.status().behavior == NO_BEHAVIOR {
            break;
        }
    }
    assert_eq!(stage.current_position(), 42.0);
}

#[test]
fn test_status_serializes_to_json() {
    let (session, _stage, _receiver) = session();
    let json = serde_json::to_value(session.status()).unwrap();
    assert_eq!(json["mode"], "No lock");
    assert_eq!(json["behavior"], "none");
    assert_eq!(json["good_lock"], false);
    assert_eq!(json["stage_position"], 50.0);
}

#[tokio::test(start_paused = true)]
async fn test_worker_relocks_after_jump() {
    let (session, stage, _receiver) = session();
    let (handle, task) = SessionWorker::spawn(session, 64);

    handle.select_mode(AlwaysOnLockMode::NAME).await.unwrap();
    handle.qpd_update(QpdState::new(100.0, 0.0)).await.unwrap();
    assert!(handle.start_lock(None).await.unwrap());

    handle.jump(1.0).await.unwrap();
    assert_eq!(handle.status().await.unwrap().behavior, NO_BEHAVIOR);

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.jump(1.0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    // The second jump restarted the window.
    assert!(!handle.status().await.unwrap().locked);

    handle.qpd_update(QpdState::new(100.0, -2.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = handle.status().await.unwrap();
    assert!(status.locked);
    assert_eq!(status.lock_target, -2.0);
    assert_eq!(stage.current_position(), 52.0);

    handle.shutdown().await.unwrap();
    let session = task.await.unwrap();
    assert!(session.active_mode().am_locked());
}

#[tokio::test(start_paused = true)]
async fn test_worker_stop_lock_cancels_relock() {
    let (session, _stage, _receiver) = session();
    let (handle, task) = SessionWorker::spawn(session, 64);

    handle.select_mode(AlwaysOnLockMode::NAME).await.unwrap();
    handle.start_lock(Some(0.0)).await.unwrap();
    handle.jump(0.5).await.unwrap();
    handle.stop_lock().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!handle.status().await.unwrap().locked);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_worker_reports_errors() {
    let (session, _stage, _receiver) = session();
    let (handle, task) = SessionWorker::spawn(session, 8);

    assert!(matches!(
        handle.select_mode("Spiral").await,
        Err(FocusLockError::UnknownMode { .. })
    ));
    assert!(matches!(
        handle
            .start_lock_behavior("spiral", BehaviorParams::default())
            .await,
        Err(FocusLockError::UnknownBehavior { .. })
    ));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(handle.status().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_sensor_feed_drives_auto_lock() {
    let stage = Arc::new(SimulatedStage::new(0.0, 100.0, 50.0));
    let events = EventBus::new(4096);
    let session = LockSession::new(stage.clone(), events, Arc::new(GradientQuality)).unwrap();
    let (handle, task) = SessionWorker::spawn(session, 64);
    handle.select_mode(AutoLockMode::NAME).await.unwrap();

    let sensor = SimulatedSensor::new(FocusLockConfig::default().sensor, stage.clone());
    let cancel = CancellationToken::new();
    let feed = tokio::spawn(pump_readings(Box::new(sensor), handle.clone(), cancel.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.start_film().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = handle.status().await.unwrap();
    assert!(status.locked);
    assert!(status.good_lock);
    assert!((status.lock_target - 2.0).abs() < 1e-6);

    handle.stop_film().await.unwrap();
    cancel.cancel();
    assert!(feed.await.unwrap() > 0);

    let status = handle.status().await.unwrap();
    assert!(!status.locked);
    assert_eq!(status.stage_position, 50.0);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
