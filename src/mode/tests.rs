use super::*;
use crate::behavior::{BehaviorParams, LOCKED, NO_BEHAVIOR};
use crate::error::FocusLockError;
use crate::events::{EventBus, EventFilter, EventReceiver, FocusLockEvent};
use crate::frame::Frame;
use crate::parameters::{LockParameters, ParameterValue};
use crate::quality::FocusQuality;
use crate::sensor::QpdState;
use crate::stage::{SimulatedStage, StageActuator, StageCommand};
use std::sync::Arc;

const CENTER: f64 = 50.0;

struct Fixture {
    stage: Arc<SimulatedStage>,
    events: EventBus,
    receiver: EventReceiver,
    parameters: LockParameters,
}

fn fixture() -> Fixture {
    let stage = Arc::new(SimulatedStage::new(0.0, 100.0, CENTER));
    let events = EventBus::new(4096);
    let receiver = EventReceiver::new(events.subscribe(), EventFilter::All, "test".to_string());
    let mut parameters = LockParameters::new();
    crate::behavior::add_parameters(&mut parameters).unwrap();
    add_parameters(&mut parameters).unwrap();
    Fixture {
        stage,
        events,
        receiver,
        parameters,
    }
}

/// QPD reading whose offset falls as the stage rises above center
fn reading(stage: &SimulatedStage, base_offset: f64) -> QpdState {
    QpdState::new(100.0, base_offset - (stage.current_position() - CENTER))
}

#[test]
fn test_calibration_trajectory_shape() {
    let trajectory = calibration_trajectory(0.0, 20, 600.0, 10.0, 2);

    assert_eq!(trajectory.len(), 280);
    let net: f64 = trajectory.iter().sum();
    assert!(net.abs() < 1e-9, "net displacement {}", net);

    assert!(trajectory[..19].iter().all(|&z| z == 0.0));
    assert!((trajectory[19] + 0.6).abs() < 1e-12);
    assert_eq!(trajectory[20], 0.0);
    assert!((trajectory[21] - 0.01).abs() < 1e-12);
    assert!((trajectory[260] + 0.6).abs() < 1e-12);
    assert!(trajectory[261..].iter().all(|&z| z == 0.0));
}

#[test]
fn test_calibration_trajectory_single_frame_pause() {
    let trajectory = calibration_trajectory(0.0, 1, 100.0, 50.0, 1);
    assert_eq!(trajectory.len(), 6);
    assert!(trajectory.iter().sum::<f64>().abs() < 1e-12);
}

#[test]
fn test_calibration_replays_one_step_per_frame() {
    let fx = fixture();
    let mut mode = CalibrationLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.new_parameters(&fx.parameters).unwrap();

    // Frames outside a film leave the stage alone.
    mode.handle_new_frame(&Frame::blank(0, "camera1"));
    assert!(fx.stage.commands().is_empty());

    mode.start_film();
    let total = mode.trajectory().len();
    for number in 0..total + 10 {
        mode.handle_new_frame(&Frame::blank(number as u64, "camera1"));
    }

    assert_eq!(fx.stage.commands().len(), total);
    assert!((fx.stage.current_position() - CENTER).abs() < 1e-9);
    assert_eq!(mode.remaining(), 0);
    assert!(!mode.should_enable_lock_button());

    // A new film starts the sweep over.
    mode.start_film();
    mode.handle_new_frame(&Frame::blank(0, "camera1"));
    assert_eq!(fx.stage.commands().len(), total + 1);
}

#[test]
fn test_calibration_follows_new_parameters() {
    let mut fx = fixture();
    let mut mode = CalibrationLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.new_parameters(&fx.parameters).unwrap();
    assert_eq!(mode.trajectory().len(), 280);

    fx.parameters
        .set(CALIBRATE, "deadtime", ParameterValue::Int(5))
        .unwrap();
    mode.new_parameters(&fx.parameters).unwrap();
    assert_eq!(mode.trajectory().len(), 250);
}

#[test]
fn test_no_lock_moves_immediately_and_never_locks() {
    let fx = fixture();
    let mut mode = NoLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.new_parameters(&fx.parameters).unwrap();

    mode.handle_qpd_update(&QpdState::new(100.0, 3.0));
    mode.start_lock(None);
    assert!(!mode.am_locked());

    mode.handle_jump(1.5);
    assert_eq!(fx.stage.current_position(), 51.5);
    assert!(mode.relock_deadline().is_none());
    assert_eq!(mode.lock_target(), 0.0);

    let err = mode
        .start_lock_behavior(LOCKED, &BehaviorParams::default())
        .unwrap_err();
    assert!(matches!(err, FocusLockError::UnknownBehavior { .. }));
    assert_eq!(mode.core().behavior_names(), vec![NO_BEHAVIOR]);
}

#[test]
fn test_auto_lock_follows_film() {
    let mut fx = fixture();
    let mut mode = AutoLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.new_parameters(&fx.parameters).unwrap();
    assert!(!mode.should_enable_lock_button());

    mode.handle_qpd_update(&QpdState::new(100.0, 0.4));
    mode.start_film();
    assert!(mode.am_locked());
    assert_eq!(mode.lock_target(), 0.4);

    mode.stop_film();
    assert!(!mode.am_locked());
    assert_eq!(fx.stage.commands().last(), Some(&StageCommand::Recenter));

    let events = fx.receiver.drain();
    assert!(events.contains(&FocusLockEvent::LockTargetChanged { target: 0.4 }));
}

#[test]
fn test_lock_converges_on_target() {
    let fx = fixture();
    let mut mode = AutoLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.new_parameters(&fx.parameters).unwrap();

    mode.handle_qpd_update(&reading(&fx.stage, 0.0));
    mode.start_lock(Some(2.0));
    for _ in 0..50 {
        mode.handle_qpd_update(&reading(&fx.stage, 0.0));
    }

    // offset = center - position, so holding 2.0 means position 48.
    assert!((fx.stage.current_position() - 48.0).abs() < 1e-3);
    assert!(mode.is_good_lock());
}

#[test]
fn test_always_on_film_only_releases_its_own_lock() {
    let fx = fixture();
    let mut mode = AlwaysOnLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.new_parameters(&fx.parameters).unwrap();
    assert!(mode.should_enable_lock_button());
    mode.handle_qpd_update(&QpdState::new(100.0, 0.0));

    mode.start_film();
    assert!(mode.am_locked());
    assert!(mode.film_on());
    mode.stop_film();
    assert!(!mode.am_locked());
    assert!(!mode.film_on());

    mode.start_lock(None);
    mode.start_film();
    assert!(!mode.film_on());
    mode.stop_film();
    assert!(mode.am_locked());
}

#[test]
fn test_jump_pauses_and_rearms_relock() {
    let fx = fixture();
    let mut mode = AlwaysOnLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.new_parameters(&fx.parameters).unwrap();
    mode.handle_qpd_update(&QpdState::new(100.0, 0.0));
    mode.start_lock(None);

    mode.handle_jump(0.5);
    assert_eq!(mode.behavior(), NO_BEHAVIOR);
    let first = mode.relock_deadline().unwrap();
    assert_eq!(fx.stage.current_position(), 50.5);

    mode.handle_jump(0.25);
    let second = mode.relock_deadline().unwrap();
    assert!(second >= first);
    assert_eq!(fx.stage.current_position(), 50.75);

    mode.handle_qpd_update(&QpdState::new(100.0, 0.75));
    mode.handle_relock_timer();
    assert!(mode.am_locked());
    assert_eq!(mode.lock_target(), 0.75);
    assert!(mode.relock_deadline().is_none());
}

#[test]
fn test_stop_lock_cancels_relock() {
    let fx = fixture();
    let mut mode = AlwaysOnLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.new_parameters(&fx.parameters).unwrap();
    mode.start_lock(Some(0.0));
    mode.handle_jump(1.0);
    assert!(mode.is_engaged());

    mode.stop_lock();
    assert!(mode.relock_deadline().is_none());
    mode.handle_relock_timer();
    assert!(!mode.am_locked());
}

#[test]
fn test_jump_while_unlocked_does_not_arm_relock() {
    let fx = fixture();
    let mut mode = AlwaysOnLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.handle_jump(1.0);
    assert!(mode.relock_deadline().is_none());
    assert_eq!(fx.stage.current_position(), 51.0);
}

#[test]
fn test_unknown_behavior_leaves_lock_untouched() {
    let fx = fixture();
    let mut mode = AutoLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.new_parameters(&fx.parameters).unwrap();
    mode.start_lock(Some(0.0));

    let err = mode
        .start_lock_behavior("spiral", &BehaviorParams::default())
        .unwrap_err();
    assert!(matches!(err, FocusLockError::UnknownBehavior { .. }));
    assert!(mode.am_locked());
}

#[test]
fn test_start_none_behavior_idles() {
    let fx = fixture();
    let mut mode = AutoLockMode::new(fx.stage.clone(), fx.events.clone());
    mode.start_lock(Some(0.0));
    mode.start_lock_behavior(NO_BEHAVIOR, &BehaviorParams::default())
        .unwrap();
    assert_eq!(mode.behavior(), NO_BEHAVIOR);
}

fn quality_peaked_at(peak: f64, stage: Arc<SimulatedStage>) -> Arc<dyn FocusQuality> {
    Arc::new(move |_frame: &Frame| {
        let offset = reading(&stage, 50.0).offset;
        10.0 + 100.0 * (-(offset - peak).powi(2) * 4.0).exp()
    })
}

/// Run a full optimal scan and return the frames it took
fn run_optimal_scan(mode: &mut OptimalLockMode, stage: &SimulatedStage) -> usize {
    let mut frames = 0;
    while mode.is_optimizing() && frames < 5000 {
        mode.handle_qpd_update(&reading(stage, 50.0));
        mode.handle_new_frame(&Frame::blank(frames as u64, "camera1"));
        frames += 1;
    }
    frames
}

fn optimal_fixture(peak: f64) -> (Fixture, OptimalLockMode) {
    let fx = fixture();
    let mut mode = OptimalLockMode::new(
        fx.stage.clone(),
        fx.events.clone(),
        quality_peaked_at(peak, fx.stage.clone()),
    );
    mode.new_parameters(&fx.parameters).unwrap();
    (fx, mode)
}

#[test]
fn test_optimal_scan_recovers_peak() {
    let (mut fx, mut mode) = optimal_fixture(50.0);
    assert!(mode.should_enable_lock_button());

    mode.handle_qpd_update(&reading(&fx.stage, 50.0));
    mode.start_lock(None);
    mode.start_film();
    assert!(mode.is_optimizing());
    assert_eq!(mode.scan_phase(), Some(ScanPhase::ScanUp));
    assert_eq!(mode.behavior(), NO_BEHAVIOR);

    let frames = run_optimal_scan(&mut mode, &fx.stage);
    assert!(frames < 5000);
    assert!(!mode.is_optimizing());
    assert!(mode.am_locked());
    assert!(
        (mode.lock_target() - 50.0).abs() < 0.005,
        "target {}",
        mode.lock_target()
    );
    assert!((fx.stage.current_position() - CENTER).abs() < 1e-9);

    let found = fx
        .receiver
        .drain()
        .into_iter()
        .find_map(|event| match event {
            FocusLockEvent::OptimalTargetFound { fitted, .. } => Some(fitted),
            _ => None,
        });
    assert_eq!(found, Some(true));
}

#[test]
fn test_optimal_scan_recovers_off_grid_peak() {
    let (fx, mut mode) = optimal_fixture(50.05);
    mode.handle_qpd_update(&reading(&fx.stage, 50.0));
    mode.start_lock(None);
    mode.start_film();

    run_optimal_scan(&mut mode, &fx.stage);
    assert!(
        (mode.lock_target() - 50.05).abs() < 0.005,
        "target {}",
        mode.lock_target()
    );
}

#[test]
fn test_optimal_scan_triangle_wave() {
    let (mut fx, mut mode) = optimal_fixture(50.0);
    fx.parameters
        .set(OPTIMAL_MODE, "bracket_step", ParameterValue::Float(300.0))
        .unwrap();
    fx.parameters
        .set(OPTIMAL_MODE, "scan_hold", ParameterValue::Int(1))
        .unwrap();
    mode.new_parameters(&fx.parameters).unwrap();

    mode.handle_qpd_update(&reading(&fx.stage, 50.0));
    mode.start_lock(None);
    fx.stage.clear_commands();
    mode.start_film();
    run_optimal_scan(&mut mode, &fx.stage);

    let moves: Vec<f64> = fx
        .stage
        .commands()
        .into_iter()
        .filter_map(|command| match command {
            StageCommand::GoRelative(delta) => Some((delta * 10.0).round() / 10.0),
            _ => None,
        })
        .collect();

    let mut expected = vec![0.1; 3];
    expected.extend(vec![-0.1; 6]);
    expected.extend(vec![0.1; 3]);
    assert_eq!(&moves[..12], expected.as_slice());
}

#[test]
fn test_optimal_film_while_unlocked_does_not_scan() {
    let (_fx, mut mode) = optimal_fixture(50.0);
    mode.start_film();
    assert!(!mode.is_optimizing());
    assert!(!mode.am_locked());
}

#[test]
fn test_optimal_quality_threshold_filters_frames() {
    let (mut fx, mut mode) = optimal_fixture(50.0);
    fx.parameters
        .set(OPTIMAL_MODE, "quality_threshold", ParameterValue::Float(500.0))
        .unwrap();
    mode.new_parameters(&fx.parameters).unwrap();

    mode.handle_qpd_update(&reading(&fx.stage, 50.0));
    mode.start_lock(None);
    mode.start_film();
    for number in 0..50 {
        mode.handle_new_frame(&Frame::blank(number, "camera1"));
    }
    assert_eq!(mode.sample_count(), 0);
    assert!(mode.is_optimizing());
}

#[test]
fn test_stop_lock_abandons_scan() {
    let (fx, mut mode) = optimal_fixture(50.0);
    mode.handle_qpd_update(&reading(&fx.stage, 50.0));
    mode.start_lock(None);
    mode.start_film();
    for number in 0..25 {
        mode.handle_new_frame(&Frame::blank(number, "camera1"));
    }
    assert!(mode.is_engaged());

    mode.stop_lock();
    assert!(!mode.is_optimizing());
    assert!(!mode.is_engaged());
    assert_eq!(fx.stage.commands().last(), Some(&StageCommand::Recenter));
}

#[test]
fn test_direct_lock_during_scan_ends_scan() {
    let (fx, mut mode) = optimal_fixture(50.0);
    mode.handle_qpd_update(&reading(&fx.stage, 50.0));
    mode.start_lock(None);
    mode.start_film();
    for number in 0..25 {
        mode.handle_qpd_update(&reading(&fx.stage, 50.0));
        mode.handle_new_frame(&Frame::blank(number, "camera1"));
    }
    assert!(mode.is_optimizing());

    mode.start_lock(Some(50.0));
    assert!(!mode.is_optimizing());
    assert!(mode.am_locked());
    assert_eq!(mode.behavior(), LOCKED);

    // Frames no longer step the stage, only the lock moves it
    fx.stage.clear_commands();
    for number in 25..100 {
        mode.handle_new_frame(&Frame::blank(number, "camera1"));
    }
    assert!(fx.stage.commands().is_empty());

    for _ in 0..50 {
        mode.handle_qpd_update(&reading(&fx.stage, 50.0));
    }
    assert!((fx.stage.current_position() - CENTER).abs() < 1e-3);
    assert!(mode.is_good_lock());
}
