//! Wideband oxygen sensor readings.
//!
//! The bus driver lives with the hardware; this module only defines the decoded
//! value handed to the fuel engine and the conversions the supported controllers
//! need. Every read yields either a plausible AFR or an explicit sentinel.

use core::fmt;

/// Lowest AFR reported, in tenths.
pub const AFR_MIN_TENTHS: u16 = 100;
/// Highest AFR reported, in tenths.
pub const AFR_MAX_TENTHS: u16 = 200;
/// Raw byte the SLC controller reports while it cannot measure.
pub const SLC_ERROR_SENTINEL: u8 = 0xFF;
/// Sensor element resistance window (exclusive) inside which lambda is trusted.
pub const RI_DELTA_WINDOW: (u16, u16) = (65, 105);
/// Stoichiometric AFR of petrol, in tenths.
const STOICH_TENTHS: f32 = 147.0;

/// Air/fuel ratio in tenths (147 == 14.7:1).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Afr(u16);

impl Afr {
    #[must_use]
    pub const fn from_tenths(tenths: u16) -> Self {
        Self(tenths)
    }

    #[must_use]
    pub const fn tenths(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn ratio(self) -> f32 {
        f32::from(self.0) / 10.0
    }
}

impl fmt::Display for Afr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

/// One wideband read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AfrReading {
    Valid(Afr),
    /// The sensor is absent, heating, or reported an error.
    Unavailable,
    /// The measurement fell outside the plausible range and was discarded.
    OutOfRange,
}

impl AfrReading {
    /// Returns the AFR when the reading can be trusted.
    #[must_use]
    pub const fn valid(self) -> Option<Afr> {
        match self {
            AfrReading::Valid(afr) => Some(afr),
            AfrReading::Unavailable | AfrReading::OutOfRange => None,
        }
    }
}

/// Source of wideband readings implemented by hardware drivers.
pub trait WidebandSensor {
    /// Performs one read; never blocks longer than a bus transaction.
    fn read_afr(&mut self) -> AfrReading;
}

/// Stand-in used when no wideband is fitted.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoWideband;

impl WidebandSensor for NoWideband {
    fn read_afr(&mut self) -> AfrReading {
        AfrReading::Unavailable
    }
}

/// Decodes the single-byte AFR×10 format reported by SLC controllers.
#[must_use]
pub fn decode_slc_afr(raw: u8) -> AfrReading {
    if raw == SLC_ERROR_SENTINEL {
        return AfrReading::Unavailable;
    }
    let tenths = u16::from(raw);
    if (AFR_MIN_TENTHS..=AFR_MAX_TENTHS).contains(&tenths) {
        AfrReading::Valid(Afr(tenths))
    } else {
        AfrReading::OutOfRange
    }
}

/// Element resistance spread from the SLC `Ri_max`/`Ri_min` register pair,
/// both big-endian.
#[must_use]
pub fn slc_ri_delta(frame: [u8; 4]) -> u16 {
    let ri_max = u16::from_be_bytes([frame[0], frame[1]]);
    let ri_min = u16::from_be_bytes([frame[2], frame[3]]);
    ri_max.saturating_sub(ri_min)
}

/// True once the element is inside its operating temperature window.
#[must_use]
pub const fn slc_element_ready(ri_delta: u16) -> bool {
    ri_delta > RI_DELTA_WINDOW.0 && ri_delta < RI_DELTA_WINDOW.1
}

/// Decodes the SLC lambda register (big-endian IEEE-754) taken at `ri_delta`.
#[must_use]
pub fn decode_slc_lambda(frame: [u8; 4], ri_delta: u16) -> AfrReading {
    afr_from_lambda(f32::from_be_bytes(frame), ri_delta)
}

/// Converts a lambda measurement into AFR once the element is at temperature.
///
/// `ri_delta` is the controller's element-resistance figure; readings taken
/// outside the operating window are reported as unavailable.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn afr_from_lambda(lambda: f32, ri_delta: u16) -> AfrReading {
    if !slc_element_ready(ri_delta) {
        return AfrReading::Unavailable;
    }
    if !lambda.is_finite() {
        return AfrReading::Unavailable;
    }

    let tenths = lambda * STOICH_TENTHS;
    let min = f32::from(AFR_MIN_TENTHS);
    let max = f32::from(AFR_MAX_TENTHS);
    if tenths < min || tenths > max {
        return AfrReading::OutOfRange;
    }
    AfrReading::Valid(Afr(tenths as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slc_sentinel_and_range() {
        assert_eq!(decode_slc_afr(0xFF), AfrReading::Unavailable);
        assert_eq!(decode_slc_afr(147), AfrReading::Valid(Afr::from_tenths(147)));
        assert_eq!(decode_slc_afr(99), AfrReading::OutOfRange);
        assert_eq!(decode_slc_afr(201), AfrReading::OutOfRange);
    }

    #[test]
    fn lambda_needs_a_hot_element() {
        assert_eq!(afr_from_lambda(1.0, 65), AfrReading::Unavailable);
        assert_eq!(afr_from_lambda(1.0, 105), AfrReading::Unavailable);
        assert_eq!(afr_from_lambda(1.0, 80), AfrReading::Valid(Afr::from_tenths(147)));
    }

    #[test]
    fn lambda_outside_plausible_range() {
        assert_eq!(afr_from_lambda(0.5, 80), AfrReading::OutOfRange);
        assert_eq!(afr_from_lambda(1.5, 80), AfrReading::OutOfRange);
        assert_eq!(afr_from_lambda(f32::NAN, 80), AfrReading::Unavailable);
    }

    #[test]
    fn ri_registers_are_big_endian_and_never_underflow() {
        assert_eq!(slc_ri_delta([0x01, 0x40, 0x00, 0xF0]), 80);
        assert!(slc_element_ready(slc_ri_delta([0x01, 0x40, 0x00, 0xF0])));
        assert_eq!(slc_ri_delta([0x00, 0x10, 0x00, 0x20]), 0);
        assert!(!slc_element_ready(0));
    }

    #[test]
    fn lambda_register_converts_to_afr() {
        let stoich = 1.0f32.to_be_bytes();
        assert_eq!(decode_slc_lambda(stoich, 80), AfrReading::Valid(Afr::from_tenths(147)));
        assert_eq!(decode_slc_lambda(stoich, 40), AfrReading::Unavailable);
        assert_eq!(decode_slc_lambda(0.8f32.to_be_bytes(), 80).valid().map(Afr::tenths), Some(117));
        assert_eq!(decode_slc_lambda([0xFF; 4], 80), AfrReading::Unavailable);
    }

    #[test]
    fn afr_formats_with_one_decimal() {
        let mut text: heapless::String<8> = heapless::String::new();
        core::fmt::write(&mut text, format_args!("{}", Afr::from_tenths(132))).expect("fits");
        assert_eq!(text.as_str(), "13.2");
    }
}
