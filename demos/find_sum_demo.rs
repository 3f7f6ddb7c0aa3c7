use focuslock::{
    behavior::{BehaviorParams, FIND_SUM},
    session::pump_readings,
    AlwaysOnLockMode, EventBus, FocusLockConfig, FocusLockEvent, GradientQuality, LockSession,
    SessionWorker, SimulatedSensor, SimulatedStage, StageActuator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting sum search demo");

    let mut config = FocusLockConfig::default();
    config.sensor.focus_z = 37.5;
    config.sensor.noise = 0.05;

    let stage = Arc::new(SimulatedStage::from_config(&config.stage));
    let event_bus = EventBus::new(256);
    let mut event_receiver = event_bus.subscribe();

    let session = LockSession::new(stage.clone(), event_bus.clone(), Arc::new(GradientQuality))?;
    let (handle, worker) = SessionWorker::spawn(session, 64);
    handle.select_mode(AlwaysOnLockMode::NAME).await?;

    let cancel = CancellationToken::new();
    let sensor = SimulatedSensor::new(config.sensor.clone(), stage.clone());
    let feed = tokio::spawn(pump_readings(Box::new(sensor), handle.clone(), cancel.clone()));

    // Sweep up from the bottom of travel until the sum signal is found
    handle
        .start_lock_behavior(
            FIND_SUM,
            BehaviorParams {
                requested_sum: Some(0.8 * config.sensor.peak_sum),
                step_size: Some(0.5),
                ..Default::default()
            },
        )
        .await?;

    let found = timeout(Duration::from_secs(5), async {
        while let Ok(event) = event_receiver.recv().await {
            if let FocusLockEvent::LockFinished { success } = event {
                return success;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    info!(
        "Sum search {} at z = {:.2}",
        if found { "succeeded" } else { "failed" },
        stage.current_position()
    );

    if found {
        handle.start_lock(None).await?;
        let good = timeout(Duration::from_secs(2), async {
            while let Ok(event) = event_receiver.recv().await {
                if event == (FocusLockEvent::GoodLockChanged { good_lock: true }) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        info!("Good lock reached: {}", good);
    }

    let status = handle.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    cancel.cancel();
    feed.await?;
    handle.shutdown().await?;
    worker.await?;

    info!("Sum search demo completed");
    Ok(())
}
