use embassy_time::{Duration, Timer};

use super::DISPLAY_FRAMES;
use crate::status;

const REFRESH: Duration = Duration::from_millis(250);

/// Logs the newest display frame a few times per second.
#[embassy_executor::task]
pub async fn run() -> ! {
    loop {
        let mut frame = DISPLAY_FRAMES.receive().await;
        while let Ok(newer) = DISPLAY_FRAMES.try_receive() {
            frame = newer;
        }
        let engine = status::snapshot();
        defmt::info!(
            "dash: {} events={} refused={} epoch={}",
            defmt::Display2Format(&frame),
            engine.events,
            engine.refusals,
            engine.calibration_epoch
        );
        Timer::after(REFRESH).await;
    }
}
