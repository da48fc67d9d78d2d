use embassy_stm32::gpio::Input;
use embassy_time::{Duration, Ticker};
use portable_atomic::Ordering;

use ecu_core::scheduler::CompareHardware;
use ecu_core::sensors::WidebandSensor;

use super::{KILL_SWITCH, SENSORS};
use crate::hw::{AnalogInputs, CompareTimers, SlcWideband};
use crate::sensors::SensorConditioner;

const SAMPLE_PERIOD: Duration = Duration::from_millis(10);

/// Samples the analog inputs and the wideband controller at a fixed rate.
#[embassy_executor::task]
pub async fn run(
    mut analog: AnalogInputs<'static>,
    mut wideband: SlcWideband<'static>,
    kill: Input<'static>,
    mut conditioner: SensorConditioner,
) -> ! {
    let mut ticker = Ticker::every(SAMPLE_PERIOD);
    loop {
        let raw = analog.sample();
        let afr = wideband.read_afr();
        let snapshot = conditioner.condition(raw, afr, CompareTimers.now());
        SENSORS.lock(|cell| cell.set(snapshot));
        KILL_SWITCH.store(kill.is_low(), Ordering::Relaxed);
        ticker.next().await;
    }
}
