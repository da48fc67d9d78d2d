//! Cylinder count, output strategies and the channel map derived from them.

use core::fmt;

use super::{CYCLE_DEGREES, CrankAngle, EngineCycle};

/// Injector outputs available on the board.
pub const MAX_INJECTOR_CHANNELS: usize = 4;
/// Ignition outputs available on the board.
pub const MAX_COIL_CHANNELS: usize = 4;
/// Total scheduler channels (injectors first, then coils).
pub const CHANNEL_COUNT: usize = MAX_INJECTOR_CHANNELS + MAX_COIL_CHANNELS;
/// Largest supported cylinder count.
pub const MAX_CYLINDERS: u8 = 8;

/// How injectors are grouped and phased.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InjectionStrategy {
    /// One injector channel per cylinder, once per 720°.
    Sequential,
    /// Paired cylinders share a channel, fired every revolution.
    SemiSequential,
    /// Every injector on one channel, fired every revolution.
    Batch,
}

/// How coils are driven.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SparkStrategy {
    /// Coil-on-plug, one coil per cylinder, once per 720°.
    Sequential,
    /// Paired cylinders share a coil, fired every revolution.
    WastedSpark,
}

/// Reasons an [`EngineLayout`] is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LayoutError {
    /// Cylinder count is zero or above [`MAX_CYLINDERS`].
    CylinderCount(u8),
    /// Paired strategies need an even cylinder count.
    OddCylindersPaired(u8),
    /// The strategy needs more outputs than the board has.
    ChannelBudget { required: u8, available: u8 },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::CylinderCount(count) => write!(f, "unsupported cylinder count {count}"),
            LayoutError::OddCylindersPaired(count) => {
                write!(f, "{count} cylinders cannot be paired")
            }
            LayoutError::ChannelBudget {
                required,
                available,
            } => write!(f, "layout needs {required} outputs, board has {available}"),
        }
    }
}

/// Scheduler channel identifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ChannelId {
    Injector(u8),
    Coil(u8),
}

impl ChannelId {
    /// Flat slot index used by the scheduler.
    #[must_use]
    pub const fn slot(self) -> usize {
        match self {
            ChannelId::Injector(index) => index as usize,
            ChannelId::Coil(index) => MAX_INJECTOR_CHANNELS + index as usize,
        }
    }

    /// Inverse of [`ChannelId::slot`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_slot(slot: usize) -> Option<Self> {
        if slot < MAX_INJECTOR_CHANNELS {
            Some(ChannelId::Injector(slot as u8))
        } else if slot < CHANNEL_COUNT {
            Some(ChannelId::Coil((slot - MAX_INJECTOR_CHANNELS) as u8))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn is_injector(self) -> bool {
        matches!(self, ChannelId::Injector(_))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Injector(index) => write!(f, "inj{}", index + 1),
            ChannelId::Coil(index) => write!(f, "ign{}", index + 1),
        }
    }
}

/// Set of scheduler channels, one bit per slot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ChannelMask(u8);

impl ChannelMask {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// The first `count` injector channels.
    #[must_use]
    pub const fn injectors(count: u8) -> Self {
        let count = if count as usize > MAX_INJECTOR_CHANNELS {
            MAX_INJECTOR_CHANNELS as u8
        } else {
            count
        };
        Self(((1u16 << count) - 1) as u8)
    }

    /// The first `count` coil channels.
    #[must_use]
    pub const fn coils(count: u8) -> Self {
        let count = if count as usize > MAX_COIL_CHANNELS {
            MAX_COIL_CHANNELS as u8
        } else {
            count
        };
        Self((((1u16 << count) - 1) as u8) << MAX_INJECTOR_CHANNELS)
    }

    #[must_use]
    pub const fn with(self, channel: ChannelId) -> Self {
        Self(self.0 | (1 << channel.slot()))
    }

    #[must_use]
    pub const fn contains(self, channel: ChannelId) -> bool {
        self.0 & (1 << channel.slot()) != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Channels in slot order.
    pub fn iter(self) -> impl Iterator<Item = ChannelId> {
        (0..CHANNEL_COUNT)
            .filter(move |slot| self.0 & (1 << slot) != 0)
            .filter_map(ChannelId::from_slot)
    }
}

/// Validated description of the engine and its output wiring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineLayout {
    cylinders: u8,
    injection: InjectionStrategy,
    spark: SparkStrategy,
}

impl EngineLayout {
    /// Four cylinders, sequential injection, coil-on-plug.
    pub const FOUR_CYLINDER_SEQUENTIAL: Self = Self {
        cylinders: 4,
        injection: InjectionStrategy::Sequential,
        spark: SparkStrategy::Sequential,
    };

    /// Validates the cylinder count against the strategies and the board.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(
        cylinders: u8,
        injection: InjectionStrategy,
        spark: SparkStrategy,
    ) -> Result<Self, LayoutError> {
        if cylinders == 0 || cylinders > MAX_CYLINDERS {
            return Err(LayoutError::CylinderCount(cylinders));
        }
        let paired = matches!(injection, InjectionStrategy::SemiSequential)
            || matches!(spark, SparkStrategy::WastedSpark);
        if paired && cylinders > 1 && cylinders % 2 != 0 {
            return Err(LayoutError::OddCylindersPaired(cylinders));
        }

        let layout = Self {
            cylinders,
            injection,
            spark,
        };
        let injectors = layout.injector_channels();
        if injectors as usize > MAX_INJECTOR_CHANNELS {
            return Err(LayoutError::ChannelBudget {
                required: injectors,
                available: MAX_INJECTOR_CHANNELS as u8,
            });
        }
        let coils = layout.coil_channels();
        if coils as usize > MAX_COIL_CHANNELS {
            return Err(LayoutError::ChannelBudget {
                required: coils,
                available: MAX_COIL_CHANNELS as u8,
            });
        }
        Ok(layout)
    }

    #[must_use]
    pub const fn cylinders(&self) -> u8 {
        self.cylinders
    }

    #[must_use]
    pub const fn injection(&self) -> InjectionStrategy {
        self.injection
    }

    #[must_use]
    pub const fn spark(&self) -> SparkStrategy {
        self.spark
    }

    /// Degrees between consecutive cylinder TDCs.
    #[must_use]
    pub const fn firing_interval(&self) -> u16 {
        CYCLE_DEGREES / self.cylinders as u16
    }

    #[must_use]
    pub const fn injector_channels(&self) -> u8 {
        match self.injection {
            InjectionStrategy::Sequential => self.cylinders,
            InjectionStrategy::SemiSequential => paired_count(self.cylinders),
            InjectionStrategy::Batch => 1,
        }
    }

    #[must_use]
    pub const fn coil_channels(&self) -> u8 {
        match self.spark {
            SparkStrategy::Sequential => self.cylinders,
            SparkStrategy::WastedSpark => paired_count(self.cylinders),
        }
    }

    #[must_use]
    pub const fn injector_mask(&self) -> ChannelMask {
        ChannelMask::injectors(self.injector_channels())
    }

    #[must_use]
    pub const fn coil_mask(&self) -> ChannelMask {
        ChannelMask::coils(self.coil_channels())
    }

    #[must_use]
    pub const fn injection_cycle(&self) -> EngineCycle {
        match self.injection {
            InjectionStrategy::Sequential => EngineCycle::FourStroke,
            InjectionStrategy::SemiSequential | InjectionStrategy::Batch => EngineCycle::Revolution,
        }
    }

    #[must_use]
    pub const fn spark_cycle(&self) -> EngineCycle {
        match self.spark {
            SparkStrategy::Sequential => EngineCycle::FourStroke,
            SparkStrategy::WastedSpark => EngineCycle::Revolution,
        }
    }

    /// Injection events per cylinder per four-stroke cycle.
    #[must_use]
    pub const fn squirts_per_cycle(&self) -> u8 {
        match self.injection_cycle() {
            EngineCycle::FourStroke => 1,
            EngineCycle::Revolution => 2,
        }
    }

    /// TDC of the cylinder served by injector `index`.
    #[must_use]
    pub const fn injector_tdc(&self, index: u8) -> CrankAngle {
        match self.injection {
            InjectionStrategy::Batch => CrankAngle::new(0),
            InjectionStrategy::Sequential | InjectionStrategy::SemiSequential => {
                CrankAngle::new(index as u16 * self.firing_interval())
            }
        }
    }

    /// TDC of the cylinder served by coil `index`.
    #[must_use]
    pub const fn coil_tdc(&self, index: u8) -> CrankAngle {
        CrankAngle::new(index as u16 * self.firing_interval())
    }
}

impl Default for EngineLayout {
    fn default() -> Self {
        Self::FOUR_CYLINDER_SEQUENTIAL
    }
}

const fn paired_count(cylinders: u8) -> u8 {
    if cylinders == 1 { 1 } else { cylinders / 2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_four_cylinder_phases() {
        let layout = EngineLayout::FOUR_CYLINDER_SEQUENTIAL;
        assert_eq!(layout.injector_channels(), 4);
        assert_eq!(layout.firing_interval(), 180);
        assert_eq!(layout.injector_tdc(3).degrees(), 540);
        assert_eq!(layout.injection_cycle(), EngineCycle::FourStroke);
        assert_eq!(layout.squirts_per_cycle(), 1);
    }

    #[test]
    fn paired_strategies_use_half_the_channels() {
        let layout = EngineLayout::new(
            8,
            InjectionStrategy::SemiSequential,
            SparkStrategy::WastedSpark,
        )
        .expect("eight cylinder paired layout");
        assert_eq!(layout.injector_channels(), 4);
        assert_eq!(layout.coil_channels(), 4);
        assert_eq!(layout.coil_tdc(1).degrees(), 90);
        assert_eq!(layout.spark_cycle(), EngineCycle::Revolution);
        assert_eq!(layout.squirts_per_cycle(), 2);
    }

    #[test]
    fn rejects_layouts_the_board_cannot_drive() {
        assert_eq!(
            EngineLayout::new(6, InjectionStrategy::Sequential, SparkStrategy::WastedSpark),
            Err(LayoutError::ChannelBudget {
                required: 6,
                available: 4
            })
        );
        assert_eq!(
            EngineLayout::new(3, InjectionStrategy::Batch, SparkStrategy::WastedSpark),
            Err(LayoutError::OddCylindersPaired(3))
        );
        assert_eq!(
            EngineLayout::new(0, InjectionStrategy::Batch, SparkStrategy::Sequential),
            Err(LayoutError::CylinderCount(0))
        );
    }

    #[test]
    fn masks_list_channels_in_slot_order() {
        let mask = ChannelMask::injectors(2).with(ChannelId::Coil(1));
        let mut channels = mask.iter();
        assert_eq!(channels.next(), Some(ChannelId::Injector(0)));
        assert_eq!(channels.next(), Some(ChannelId::Injector(1)));
        assert_eq!(channels.next(), Some(ChannelId::Coil(1)));
        assert_eq!(channels.next(), None);
        assert_eq!(ChannelMask::coils(4).bits(), 0xF0);
    }
}
