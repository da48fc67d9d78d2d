//! 14Point7 SLC OEM wideband controller on I2C1.
//!
//! Each read checks the element temperature through the Ri register pair and
//! only then fetches the lambda register.

use embassy_stm32::i2c::I2c;
use embassy_stm32::mode::Blocking;

use ecu_core::sensors::{
    AfrReading, WidebandSensor, decode_slc_lambda, slc_element_ready, slc_ri_delta,
};

/// Bus address of the controller.
pub const SLC_ADDRESS: u8 = 0x02;
/// `Ri_max` followed by `Ri_min`, two big-endian words.
const RI_REGISTER: u8 = 0x0B;
/// Lambda as a big-endian `f32`.
const LAMBDA_REGISTER: u8 = 0x03;

pub struct SlcWideband<'d> {
    i2c: I2c<'d, Blocking>,
}

impl<'d> SlcWideband<'d> {
    pub fn new(i2c: I2c<'d, Blocking>) -> Self {
        Self { i2c }
    }

    fn read_register(&mut self, register: u8) -> Option<[u8; 4]> {
        let mut frame = [0u8; 4];
        self.i2c
            .blocking_write_read(SLC_ADDRESS, &[register], &mut frame)
            .ok()
            .map(|()| frame)
    }
}

impl WidebandSensor for SlcWideband<'_> {
    fn read_afr(&mut self) -> AfrReading {
        let Some(ri) = self.read_register(RI_REGISTER) else {
            return AfrReading::Unavailable;
        };
        let ri_delta = slc_ri_delta(ri);
        if !slc_element_ready(ri_delta) {
            return AfrReading::Unavailable;
        }
        match self.read_register(LAMBDA_REGISTER) {
            Some(lambda) => decode_slc_lambda(lambda, ri_delta),
            None => AfrReading::Unavailable,
        }
    }
}
