//! Blocking ADC1 scan of the engine's analog inputs.

use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::peripherals::ADC1;

use crate::sensors::RawAnalog;

/// MAP on PA1, TPS on PA2, coolant on PA3, battery divider on PA4.
pub struct AnalogInputs<'d> {
    adc: Adc<'d, ADC1>,
    map: AnyAdcChannel<ADC1>,
    tps: AnyAdcChannel<ADC1>,
    coolant: AnyAdcChannel<ADC1>,
    battery: AnyAdcChannel<ADC1>,
}

impl<'d> AnalogInputs<'d> {
    pub fn new(
        mut adc: Adc<'d, ADC1>,
        map: AnyAdcChannel<ADC1>,
        tps: AnyAdcChannel<ADC1>,
        coolant: AnyAdcChannel<ADC1>,
        battery: AnyAdcChannel<ADC1>,
    ) -> Self {
        adc.set_sample_time(SampleTime::CYCLES84);
        Self {
            adc,
            map,
            tps,
            coolant,
            battery,
        }
    }

    pub fn sample(&mut self) -> RawAnalog {
        RawAnalog {
            map: self.adc.blocking_read(&mut self.map),
            tps: self.adc.blocking_read(&mut self.tps),
            coolant: self.adc.blocking_read(&mut self.coolant),
            battery: self.adc.blocking_read(&mut self.battery),
        }
    }
}
