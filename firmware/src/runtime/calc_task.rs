use ecu_core::display::{DisplayFrame, DisplaySink};
use ecu_core::scheduler::SchedulerPort;

use super::{Controller, DISPLAY_FRAMES, POSITIONS, SCHEDULER, SENSORS, output_enables};
use crate::hw::CompareTimers;
use crate::status;
use crate::telemetry::TelemetryLog;

/// Hands frames to the display task, dropping them while it is behind.
struct FrameQueue;

impl DisplaySink for FrameQueue {
    fn publish(&mut self, frame: &DisplayFrame) {
        // The display only needs the latest frame.
        let _ = DISPLAY_FRAMES.try_send(*frame);
    }
}

/// Runs fuel and ignition once per decoded engine position.
#[embassy_executor::task]
pub async fn run(controller: &'static mut Controller, mut telemetry: TelemetryLog) -> ! {
    let mut timers = CompareTimers;
    let mut display = FrameQueue;

    loop {
        let position = POSITIONS.wait().await;
        let sensors = SENSORS.lock(core::cell::Cell::get);
        let mut port = SchedulerPort::new(&SCHEDULER, &mut timers);
        let report =
            controller.on_position(&position, &sensors, output_enables(), &mut port, &mut display);
        status::record_cycle(&report);
        telemetry.drain(controller.telemetry());
    }
}
