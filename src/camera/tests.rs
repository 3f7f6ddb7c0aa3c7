use super::*;
use crate::error::CameraError;
use crate::events::{EventBus, FocusLockEvent};
use crate::quality::image_gradient;
use crate::stage::{SimulatedStage, StageActuator};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn settings() -> CameraSettings {
    CameraSettings {
        source: "camera1".to_string(),
        x_pixels: 32,
        y_pixels: 32,
        x_bin: 1,
        y_bin: 1,
        fps: 1000,
    }
}

#[test]
fn test_settings_validation() {
    assert!(settings().validate().is_ok());

    let unequal = CameraSettings {
        x_bin: 2,
        y_bin: 1,
        ..settings()
    };
    assert_eq!(
        unequal.validate(),
        Err(CameraError::UnequalBinning { x_bin: 2, y_bin: 1 })
    );

    let unsupported = CameraSettings {
        x_bin: 3,
        y_bin: 3,
        ..settings()
    };
    assert_eq!(
        unsupported.validate(),
        Err(CameraError::UnsupportedBinning { bin: 3 })
    );

    let empty = CameraSettings {
        x_pixels: 0,
        ..settings()
    };
    assert!(matches!(
        empty.validate(),
        Err(CameraError::Configuration { .. })
    ));
}

#[test]
fn test_binned_dimensions() {
    let binned = CameraSettings {
        x_bin: 4,
        y_bin: 4,
        ..settings()
    };
    assert_eq!(binned.frame_dimensions(), (8, 8));
    assert_eq!(binned.frame_bytes(), 128);
}

#[tokio::test]
async fn test_frames_are_numbered_and_tagged() {
    let stage = Arc::new(SimulatedStage::new(0.0, 100.0, 50.0));
    let mut camera = SimulatedCamera::new(settings(), stage, 50.0);
    assert!(camera.is_ready());

    let first = camera.next_frame().await.unwrap();
    let second = camera.next_frame().await.unwrap();
    assert_eq!(first.number, 0);
    assert_eq!(second.number, 1);
    assert_eq!(second.source, "camera1");
    assert_eq!((second.width(), second.height()), (32, 32));
}

#[tokio::test]
async fn test_invalid_settings_leave_camera_not_ready() {
    let stage = Arc::new(SimulatedStage::new(0.0, 100.0, 50.0));
    let bad = CameraSettings {
        x_bin: 2,
        y_bin: 4,
        ..settings()
    };
    let mut camera = SimulatedCamera::new(bad, stage, 50.0);
    assert!(!camera.is_ready());

    let pending = tokio::time::timeout(Duration::from_millis(20), camera.next_frame()).await;
    assert!(pending.is_err(), "a camera that is not ready must not deliver frames");

    camera.apply_settings(settings()).unwrap();
    assert!(camera.is_ready());
    assert!(camera.next_frame().await.is_some());
}

#[tokio::test]
async fn test_sharpness_peaks_at_focus() {
    let stage = Arc::new(SimulatedStage::new(0.0, 100.0, 50.0));
    let camera = SimulatedCamera::new(settings(), stage.clone(), 50.0);

    let in_focus = crate::frame::Frame::new(0, "camera1", camera.render());
    stage.go_absolute(51.0);
    let defocused = crate::frame::Frame::new(1, "camera1", camera.render());

    assert!(image_gradient(&in_focus) > image_gradient(&defocused));
}

#[tokio::test]
async fn test_film_start_restarts_numbering() {
    let stage = Arc::new(SimulatedStage::new(0.0, 100.0, 50.0));
    let events = EventBus::new(16);
    let mut camera = SimulatedCamera::new(settings(), stage, 50.0).with_event_bus(&events);

    camera.next_frame().await.unwrap();
    camera.next_frame().await.unwrap();
    events
        .publish(FocusLockEvent::FilmStarted {
            film_id: Uuid::new_v4(),
        })
        .unwrap();

    assert_eq!(camera.next_frame().await.unwrap().number, 0);
    assert_eq!(camera.frames_captured(), 1);
}
