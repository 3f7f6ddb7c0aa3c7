//! Tasks that pump the asynchronous input sources into the session.

use super::SessionHandle;
use crate::camera::CameraSource;
use crate::sensor::SensorSource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Forward QPD readings until the source ends, the session goes away or
/// `cancel` fires. Returns the number of readings forwarded.
pub async fn pump_readings(
    mut source: Box<dyn SensorSource>,
    session: SessionHandle,
    cancel: CancellationToken,
) -> u64 {
    let name = source.source_name().to_string();
    info!("Forwarding QPD readings from '{}'", name);
    let mut forwarded = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("QPD feed '{}' cancelled", name);
                break;
            }
            reading = source.next_reading() => match reading {
                Some(qpd_state) => {
                    if session.qpd_update(qpd_state).await.is_err() {
                        warn!("Session gone, stopping QPD feed '{}'", name);
                        break;
                    }
                    forwarded += 1;
                }
                None => {
                    info!("QPD source '{}' ended", name);
                    break;
                }
            }
        }
    }

    forwarded
}

/// Forward camera frames until the source ends, the session goes away or
/// `cancel` fires. Returns the number of frames forwarded.
pub async fn pump_frames(
    mut source: Box<dyn CameraSource>,
    session: SessionHandle,
    cancel: CancellationToken,
) -> u64 {
    let name = source.source_name().to_string();
    if !source.is_ready() {
        warn!("Camera '{}' is not ready, frames will not arrive until it is", name);
    }
    info!("Forwarding frames from '{}'", name);
    let mut forwarded = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Frame feed '{}' cancelled", name);
                break;
            }
            frame = source.next_frame() => match frame {
                Some(frame) => {
                    if session.new_frame(frame).await.is_err() {
                        warn!("Session gone, stopping frame feed '{}'", name);
                        break;
                    }
                    forwarded += 1;
                }
                None => {
                    info!("Camera '{}' ended", name);
                    break;
                }
            }
        }
    }

    forwarded
}
