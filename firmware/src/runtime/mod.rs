use core::cell::{Cell, RefCell};

use cortex_m::interrupt as cm_interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicBool, Ordering};
use static_cell::StaticCell;

use ecu_core::calibration::stock::stock_calibration;
use ecu_core::controller::{EcuConfig, EcuController};
use ecu_core::display::DisplayFrame;
use ecu_core::engine::{EnginePosition, OutputEnables, SensorSnapshot};
use ecu_core::fuel::StandardFuelCorrections;
use ecu_core::ignition::StandardIgnitionCorrections;
use ecu_core::scheduler::{CompareHardware, EventScheduler, SchedulerConfig};

use crate::hw::{self, AnalogInputs, CompareTimers, OutputPins, SlcWideband};
use crate::sensors::SensorConditioner;
use crate::status;
use crate::telemetry::TelemetryLog;
use crate::trigger::TriggerCapture;

mod calc_task;
mod display_task;
mod sensor_task;
mod trigger_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        cm_interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                cm_interrupt::enable();
            }
        }
    }
}

pub type Controller = EcuController<StandardFuelCorrections, StandardIgnitionCorrections>;

/// Crank wheel fitted to the bench engine.
const TEETH_PER_REVOLUTION: u16 = 12;
const DISPLAY_QUEUE_DEPTH: usize = 4;

pub(super) static SCHEDULER: EventScheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
pub(super) static POSITIONS: Signal<CriticalSectionRawMutex, EnginePosition> = Signal::new();
/// Raised on every crank edge; the trigger task uses it as a stall watchdog.
pub(super) static TEETH: Signal<CriticalSectionRawMutex, ()> = Signal::new();
pub(super) static CAPTURE: Mutex<CriticalSectionRawMutex, RefCell<TriggerCapture>> =
    Mutex::new(RefCell::new(TriggerCapture::new(TEETH_PER_REVOLUTION)));
pub(super) static SENSORS: Mutex<CriticalSectionRawMutex, Cell<SensorSnapshot>> =
    Mutex::new(Cell::new(SensorSnapshot::DEFAULT));
pub(super) static DISPLAY_FRAMES: Channel<CriticalSectionRawMutex, DisplayFrame, DISPLAY_QUEUE_DEPTH> =
    Channel::new();
/// Set while the kill switch input is pulled low.
pub(super) static KILL_SWITCH: AtomicBool = AtomicBool::new(false);

static CONTROLLER: StaticCell<Controller> = StaticCell::new();

pub(super) fn output_enables() -> OutputEnables {
    let run = !KILL_SWITCH.load(Ordering::Relaxed);
    OutputEnables {
        fuel: run,
        ignition: run,
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA2,
        PA3,
        PA4,
        PB1,
        PB6,
        PB7,
        PC0,
        PE8,
        PE9,
        PE10,
        PE11,
        PE12,
        PE13,
        PE14,
        PE15,
        ADC1,
        I2C1,
        ..
    } = hal::init(config);

    // Outputs stay configured for the life of the firmware; the compare
    // interrupts drive them through the port's set/reset register.
    static OUTPUT_PINS: StaticCell<[Output<'static>; 8]> = StaticCell::new();
    OUTPUT_PINS.init(
        [
            Output::new(PE8, Level::Low, Speed::VeryHigh),
            Output::new(PE9, Level::Low, Speed::VeryHigh),
            Output::new(PE10, Level::Low, Speed::VeryHigh),
            Output::new(PE11, Level::Low, Speed::VeryHigh),
            Output::new(PE12, Level::Low, Speed::VeryHigh),
            Output::new(PE13, Level::Low, Speed::VeryHigh),
            Output::new(PE14, Level::Low, Speed::VeryHigh),
            Output::new(PE15, Level::Low, Speed::VeryHigh),
        ],
    );

    hw::init_compare_timers();
    for irq in [interrupt::TIM2, interrupt::TIM5] {
        irq.set_priority(Priority::P1);
        unsafe { irq.enable() };
    }

    let controller = CONTROLLER.init(Controller::new(
        EcuConfig::DEFAULT,
        StandardFuelCorrections::stock().expect("stock fuel corrections"),
        StandardIgnitionCorrections::stock().expect("stock ignition corrections"),
    ));
    let mut telemetry = TelemetryLog::new();
    match stock_calibration() {
        Ok(set) => {
            if let Ok(epoch) = controller.load_calibration(set, false, CompareTimers.now()) {
                status::record_calibration_epoch(epoch);
            }
        }
        Err(error) => defmt::error!("calibration: stock tables invalid: {}", defmt::Display2Format(&error)),
    }
    telemetry.drain(controller.telemetry());
    defmt::info!("ecu: started, calibration epoch {}", controller.calibration().epoch());

    // Inputs stay configured for as long as the EXTI lines are routed to them.
    static TRIGGER_PINS: StaticCell<[Input<'static>; 2]> = StaticCell::new();
    TRIGGER_PINS.init([Input::new(PA0, Pull::None), Input::new(PB1, Pull::None)]);
    hw::init_trigger_lines();
    for irq in [interrupt::EXTI0, interrupt::EXTI1] {
        irq.set_priority(Priority::P1);
        unsafe { irq.enable() };
    }

    let analog = AnalogInputs::new(
        Adc::new(ADC1),
        PA1.degrade_adc(),
        PA2.degrade_adc(),
        PA3.degrade_adc(),
        PA4.degrade_adc(),
    );
    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz(100_000);
    let wideband = SlcWideband::new(I2c::new_blocking(I2C1, PB6, PB7, i2c_config));
    let kill = Input::new(PC0, Pull::Up);
    let conditioner = SensorConditioner::new().expect("coolant curve");

    spawner
        .spawn(trigger_task::run())
        .expect("failed to spawn trigger task");
    spawner
        .spawn(calc_task::run(controller, telemetry))
        .expect("failed to spawn calculation task");
    spawner
        .spawn(sensor_task::run(analog, wideband, kill, conditioner))
        .expect("failed to spawn sensor task");
    spawner
        .spawn(display_task::run())
        .expect("failed to spawn display task");

    core::future::pending::<()>().await;
}

#[interrupt]
fn TIM2() {
    service_compares(true);
}

#[interrupt]
fn TIM5() {
    service_compares(false);
}

#[interrupt]
fn EXTI0() {
    let at = CompareTimers.now();
    hw::clear_pending(hw::CRANK_LINE);
    let position = CAPTURE.lock(|capture| capture.borrow_mut().on_crank_edge(at));
    TEETH.signal(());
    if let Some(position) = position {
        POSITIONS.signal(position);
    }
}

#[interrupt]
fn EXTI1() {
    hw::clear_pending(hw::CAM_LINE);
    CAPTURE.lock(|capture| capture.borrow_mut().on_cam_edge());
}

fn service_compares(injectors: bool) {
    let mut timers = CompareTimers;
    let mut outputs = OutputPins;
    for channel in hw::pending_channels(injectors) {
        SCHEDULER.on_compare_match(&mut timers, &mut outputs, channel);
    }
}
