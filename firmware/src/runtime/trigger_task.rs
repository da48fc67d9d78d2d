use embassy_time::{Duration, with_timeout};

use super::{CAPTURE, SCHEDULER, TEETH};
use crate::hw::{CompareTimers, OutputPins};
use crate::status;
use crate::trigger::STALL_TIMEOUT_US;

/// Drops sync and releases every output when crank edges stop arriving.
#[embassy_executor::task]
pub async fn run() -> ! {
    let timeout = Duration::from_micros(u64::from(STALL_TIMEOUT_US));

    loop {
        if with_timeout(timeout, TEETH.wait()).await.is_ok() {
            continue;
        }
        let was_synced = CAPTURE.lock(|capture| capture.borrow_mut().stall());
        if was_synced {
            defmt::warn!("trigger: no crank edge for {} us, outputs off", STALL_TIMEOUT_US);
        }
        SCHEDULER.shutdown(&mut CompareTimers, &mut OutputPins);
        status::record_stall();
    }
}
