//! Hardware seams used by the event scheduler.

use core::ops::{Deref, DerefMut};

use crate::engine::{ChannelId, Ticks};

/// Per-channel output compare unit backed by a free-running microsecond timer.
pub trait CompareHardware {
    /// Current timer value.
    fn now(&self) -> Ticks;

    /// Masks the compare interrupt of `channel` only.
    fn mask(&mut self, channel: ChannelId);

    /// Re-enables the compare interrupt of `channel`.
    fn unmask(&mut self, channel: ChannelId);

    /// Programs the compare register of `channel` and enables its match.
    fn set_compare(&mut self, channel: ChannelId, at: Ticks);

    /// Disables the compare of `channel` and clears any pending match flag.
    fn clear_compare(&mut self, channel: ChannelId);
}

/// Level change requested on an injector or coil output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputAction {
    /// Open the injector or start charging the coil.
    Energize,
    /// Close the injector or fire the spark.
    Release,
}

/// Drives the physical outputs.
pub trait OutputDriver {
    fn apply(&mut self, channel: ChannelId, action: OutputAction);

    /// Returns every output to its released state.
    fn release_all(&mut self);
}

/// Output driver that ignores every request.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopOutputDriver;

impl OutputDriver for NoopOutputDriver {
    fn apply(&mut self, _channel: ChannelId, _action: OutputAction) {}

    fn release_all(&mut self) {}
}

/// Keeps one channel's compare interrupt masked while alive.
pub(crate) struct MaskedChannel<'a, H>
where
    H: CompareHardware,
{
    hw: &'a mut H,
    channel: ChannelId,
}

impl<'a, H> MaskedChannel<'a, H>
where
    H: CompareHardware,
{
    pub(crate) fn new(hw: &'a mut H, channel: ChannelId) -> Self {
        hw.mask(channel);
        Self { hw, channel }
    }
}

impl<H> Deref for MaskedChannel<'_, H>
where
    H: CompareHardware,
{
    type Target = H;

    fn deref(&self) -> &Self::Target {
        self.hw
    }
}

impl<H> DerefMut for MaskedChannel<'_, H>
where
    H: CompareHardware,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.hw
    }
}

impl<H> Drop for MaskedChannel<'_, H>
where
    H: CompareHardware,
{
    fn drop(&mut self) {
        self.hw.unmask(self.channel);
    }
}
