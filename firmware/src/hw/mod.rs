//! STM32F407 adapters for the scheduler's hardware seams.
//!
//! Injector compares run on TIM2 channels 1-4 and coil compares on TIM5
//! channels 1-4. Both are 32-bit timers clocked at 1 MHz and zeroed together at
//! start-up, so TIM2's counter is the time base for every channel. Outputs are
//! driven through the GPIOE set/reset register so the compare interrupts never
//! need to own a pin driver.

use embassy_stm32::pac;
use embassy_stm32::pac::timer::TimGp32;
use portable_atomic::{AtomicU8, Ordering};

use ecu_core::engine::{CHANNEL_COUNT, ChannelId, MAX_INJECTOR_CHANNELS, Ticks};
use ecu_core::scheduler::{CompareHardware, OutputAction, OutputDriver};

mod analog;
mod capture;
mod wideband;

pub use analog::AnalogInputs;
pub use capture::{CAM_LINE, CRANK_LINE, clear_pending, init_trigger_lines};
pub use wideband::SlcWideband;

/// Timer kernel clock with the default (HSI, no PLL) clock tree.
const TIMER_CLOCK_HZ: u32 = 16_000_000;
const TICK_HZ: u32 = 1_000_000;
/// First GPIOE pin; injectors use PE8..PE11, coils PE12..PE15.
pub const OUTPUT_PIN_BASE: usize = 8;

/// Channels with a compare currently programmed.
static ARMED: AtomicU8 = AtomicU8::new(0);
/// Channels whose compare interrupt is held off by the calculation path.
static MASKED: AtomicU8 = AtomicU8::new(0);

const fn bit(channel: ChannelId) -> u8 {
    1 << channel.slot()
}

fn timer_for(channel: ChannelId) -> (TimGp32, usize) {
    match channel {
        ChannelId::Injector(index) => (pac::TIM2, usize::from(index)),
        ChannelId::Coil(index) => (pac::TIM5, usize::from(index)),
    }
}

fn clear_flag(timer: TimGp32, index: usize) {
    // Status flags are write-zero-to-clear; ones leave the others untouched.
    timer.sr().write(|w| {
        w.0 = !0;
        w.set_ccif(index, false);
    });
}

/// DIER is shared by the four channels of a timer, so the read-modify-write
/// must not interleave with the compare interrupt touching a sibling channel.
fn set_interrupt(timer: TimGp32, index: usize, enabled: bool) {
    critical_section::with(|_| timer.dier().modify(|w| w.set_ccie(index, enabled)));
}

/// Starts TIM2 and TIM5 as free-running microsecond counters.
pub fn init_compare_timers() {
    pac::RCC.apb1enr().modify(|w| {
        w.set_tim2en(true);
        w.set_tim5en(true);
    });
    for timer in [pac::TIM2, pac::TIM5] {
        timer.cr1().modify(|w| w.set_cen(false));
        timer.psc().write_value(u16::try_from(TIMER_CLOCK_HZ / TICK_HZ - 1).unwrap_or(0));
        timer.arr().write_value(u32::MAX);
        timer.egr().write(|w| w.set_ug(true));
        timer.sr().write(|w| w.0 = 0);
    }
    pac::TIM2.cnt().write_value(0);
    pac::TIM5.cnt().write_value(0);
    pac::TIM2.cr1().modify(|w| w.set_cen(true));
    pac::TIM5.cr1().modify(|w| w.set_cen(true));
}

/// Channels of TIM2 (injectors) or TIM5 (coils) with a pending enabled
/// compare; each flag is cleared as its channel is yielded.
pub fn pending_channels(injectors: bool) -> impl Iterator<Item = ChannelId> {
    let timer = if injectors { pac::TIM2 } else { pac::TIM5 };
    let status = timer.sr().read();
    let enabled = timer.dier().read();
    (0..MAX_INJECTOR_CHANNELS).filter_map(move |index| {
        if !(status.ccif(index) && enabled.ccie(index)) {
            return None;
        }
        clear_flag(timer, index);
        let index = u8::try_from(index).ok()?;
        Some(if injectors {
            ChannelId::Injector(index)
        } else {
            ChannelId::Coil(index)
        })
    })
}

/// Compare-unit access shared by the calculation task and the interrupts.
#[derive(Copy, Clone, Debug, Default)]
pub struct CompareTimers;

impl CompareHardware for CompareTimers {
    fn now(&self) -> Ticks {
        Ticks(pac::TIM2.cnt().read())
    }

    fn mask(&mut self, channel: ChannelId) {
        MASKED.fetch_or(bit(channel), Ordering::AcqRel);
        let (timer, index) = timer_for(channel);
        set_interrupt(timer, index, false);
    }

    fn unmask(&mut self, channel: ChannelId) {
        MASKED.fetch_and(!bit(channel), Ordering::AcqRel);
        let armed = ARMED.load(Ordering::Acquire) & bit(channel) != 0;
        let (timer, index) = timer_for(channel);
        set_interrupt(timer, index, armed);
    }

    fn set_compare(&mut self, channel: ChannelId, at: Ticks) {
        ARMED.fetch_or(bit(channel), Ordering::AcqRel);
        let (timer, index) = timer_for(channel);
        timer.ccr(index).write_value(at.0);
        clear_flag(timer, index);
        if MASKED.load(Ordering::Acquire) & bit(channel) == 0 {
            set_interrupt(timer, index, true);
        }
    }

    fn clear_compare(&mut self, channel: ChannelId) {
        ARMED.fetch_and(!bit(channel), Ordering::AcqRel);
        let (timer, index) = timer_for(channel);
        set_interrupt(timer, index, false);
        clear_flag(timer, index);
    }
}

/// Injector and coil drivers on GPIOE.
#[derive(Copy, Clone, Debug, Default)]
pub struct OutputPins;

impl OutputDriver for OutputPins {
    fn apply(&mut self, channel: ChannelId, action: OutputAction) {
        let pin = OUTPUT_PIN_BASE + channel.slot();
        pac::GPIOE.bsrr().write(|w| match action {
            OutputAction::Energize => w.set_bs(pin, true),
            OutputAction::Release => w.set_br(pin, true),
        });
    }

    fn release_all(&mut self) {
        pac::GPIOE.bsrr().write(|w| {
            for slot in 0..CHANNEL_COUNT {
                w.set_br(OUTPUT_PIN_BASE + slot, true);
            }
        });
    }
}
