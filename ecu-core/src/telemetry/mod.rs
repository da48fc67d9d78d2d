//! Telemetry event catalog and ring buffer shared by firmware and host targets.
//!
//! The calculation paths never log directly. Noteworthy transitions (cuts,
//! refused schedules, clamped table queries, wideband fallbacks, calibration
//! loads) are recorded here as typed events that serialize to compact numeric
//! codes, and each target decides how to surface them.

use core::{fmt, time::Duration};

use heapless::HistoryBuf;

use crate::calibration::{CalibrationError, TableKind};
use crate::engine::{ChannelId, Ticks};
use crate::fuel::FuelCut;
use crate::ignition::SparkCut;
use crate::scheduler::RefusalReason;

/// Identifier used when tracking emitted telemetry events.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    ScheduleRefused(ChannelId),
    FuelCut(FuelCut),
    FuelRestored,
    SparkCut(SparkCut),
    SparkRestored,
    QueryClamped(TableKind),
    WidebandFallback,
    WidebandRestored,
    CalibrationLoaded,
    CalibrationRejected,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::ScheduleRefused(channel) => write!(f, "schedule-refused {channel}"),
            TelemetryEventKind::FuelCut(reason) => write!(f, "fuel-cut {reason:?}"),
            TelemetryEventKind::FuelRestored => f.write_str("fuel-restored"),
            TelemetryEventKind::SparkCut(reason) => write!(f, "spark-cut {reason:?}"),
            TelemetryEventKind::SparkRestored => f.write_str("spark-restored"),
            TelemetryEventKind::QueryClamped(table) => write!(f, "query-clamped {table}"),
            TelemetryEventKind::WidebandFallback => f.write_str("wideband-fallback"),
            TelemetryEventKind::WidebandRestored => f.write_str("wideband-restored"),
            TelemetryEventKind::CalibrationLoaded => f.write_str("calibration-loaded"),
            TelemetryEventKind::CalibrationRejected => f.write_str("calibration-rejected"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const SCHEDULE_REFUSED_BASE: u16 = 0x0000;
    const FUEL_CUT_BASE: u16 = 0x0010;
    const FUEL_RESTORED_CODE: u16 = 0x0018;
    const SPARK_CUT_BASE: u16 = 0x0020;
    const SPARK_RESTORED_CODE: u16 = 0x0028;
    const QUERY_CLAMPED_BASE: u16 = 0x0030;
    const WIDEBAND_FALLBACK_CODE: u16 = 0x0040;
    const WIDEBAND_RESTORED_CODE: u16 = 0x0041;
    const CALIBRATION_LOADED_CODE: u16 = 0x0050;
    const CALIBRATION_REJECTED_CODE: u16 = 0x0051;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::ScheduleRefused(channel) => {
                Self::SCHEDULE_REFUSED_BASE + channel.slot() as u16
            }
            TelemetryEventKind::FuelCut(reason) => Self::FUEL_CUT_BASE + reason.to_raw() as u16,
            TelemetryEventKind::FuelRestored => Self::FUEL_RESTORED_CODE,
            TelemetryEventKind::SparkCut(reason) => Self::SPARK_CUT_BASE + reason.to_raw() as u16,
            TelemetryEventKind::SparkRestored => Self::SPARK_RESTORED_CODE,
            TelemetryEventKind::QueryClamped(table) => Self::QUERY_CLAMPED_BASE + table.as_index(),
            TelemetryEventKind::WidebandFallback => Self::WIDEBAND_FALLBACK_CODE,
            TelemetryEventKind::WidebandRestored => Self::WIDEBAND_RESTORED_CODE,
            TelemetryEventKind::CalibrationLoaded => Self::CALIBRATION_LOADED_CODE,
            TelemetryEventKind::CalibrationRejected => Self::CALIBRATION_REJECTED_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_raw(code: u16) -> Self {
        let decoded = match code {
            Self::FUEL_RESTORED_CODE => Some(TelemetryEventKind::FuelRestored),
            Self::SPARK_RESTORED_CODE => Some(TelemetryEventKind::SparkRestored),
            Self::WIDEBAND_FALLBACK_CODE => Some(TelemetryEventKind::WidebandFallback),
            Self::WIDEBAND_RESTORED_CODE => Some(TelemetryEventKind::WidebandRestored),
            Self::CALIBRATION_LOADED_CODE => Some(TelemetryEventKind::CalibrationLoaded),
            Self::CALIBRATION_REJECTED_CODE => Some(TelemetryEventKind::CalibrationRejected),
            value if (Self::SCHEDULE_REFUSED_BASE..Self::FUEL_CUT_BASE).contains(&value) => {
                ChannelId::from_slot(usize::from(value - Self::SCHEDULE_REFUSED_BASE))
                    .map(TelemetryEventKind::ScheduleRefused)
            }
            value if (Self::FUEL_CUT_BASE..Self::FUEL_RESTORED_CODE).contains(&value) => {
                FuelCut::from_raw((value - Self::FUEL_CUT_BASE) as u8)
                    .map(TelemetryEventKind::FuelCut)
            }
            value if (Self::SPARK_CUT_BASE..Self::SPARK_RESTORED_CODE).contains(&value) => {
                SparkCut::from_raw((value - Self::SPARK_CUT_BASE) as u8)
                    .map(TelemetryEventKind::SparkCut)
            }
            value if (Self::QUERY_CLAMPED_BASE..Self::WIDEBAND_FALLBACK_CODE).contains(&value) => {
                TableKind::from_index(value - Self::QUERY_CLAMPED_BASE)
                    .map(TelemetryEventKind::QueryClamped)
            }
            _ => None,
        };
        decoded.unwrap_or(TelemetryEventKind::Custom(code))
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    Schedule(ScheduleTelemetry),
    /// Engine speed when a cut started or ended.
    Cut { rpm: u16 },
    /// Operating point of a clamped table query.
    Query { rpm: u16, load: u16 },
    Calibration(CalibrationTelemetry),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Refused schedule payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScheduleTelemetry {
    pub reason: RefusalReason,
    pub rpm: u16,
}

/// Calibration load payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CalibrationTelemetry {
    pub version: u8,
    pub epoch: u32,
    pub error: Option<CalibrationError>,
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

impl TelemetryInstant for Ticks {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.wrapping_since(earlier)
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant = Ticks, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord<TInstant>> + '_ {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Time covered by the retained records.
    #[must_use]
    pub fn window(&self) -> Option<Duration> {
        let oldest = self.ring.oldest_ordered().next()?;
        let latest = self.ring.recent()?;
        Some(latest.timestamp.saturating_duration_since(oldest.timestamp))
    }

    /// Identifier the next record will receive.
    #[must_use]
    pub const fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records a refused schedule on `channel`.
    pub fn record_schedule_refused(
        &mut self,
        channel: ChannelId,
        reason: RefusalReason,
        rpm: u16,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            TelemetryEventKind::ScheduleRefused(channel),
            TelemetryPayload::Schedule(ScheduleTelemetry { reason, rpm }),
            timestamp,
        )
    }

    /// Records the start (`Some`) or end (`None`) of a fuel cut.
    pub fn record_fuel_cut(&mut self, cut: Option<FuelCut>, rpm: u16, timestamp: TInstant) -> EventId {
        let event = cut.map_or(TelemetryEventKind::FuelRestored, TelemetryEventKind::FuelCut);
        self.record(event, TelemetryPayload::Cut { rpm }, timestamp)
    }

    /// Records the start (`Some`) or end (`None`) of a spark cut.
    pub fn record_spark_cut(
        &mut self,
        cut: Option<SparkCut>,
        rpm: u16,
        timestamp: TInstant,
    ) -> EventId {
        let event = cut.map_or(TelemetryEventKind::SparkRestored, TelemetryEventKind::SparkCut);
        self.record(event, TelemetryPayload::Cut { rpm }, timestamp)
    }

    /// Records a table query that fell outside the table bins.
    pub fn record_query_clamped(
        &mut self,
        table: TableKind,
        rpm: u16,
        load: u16,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            TelemetryEventKind::QueryClamped(table),
            TelemetryPayload::Query { rpm, load },
            timestamp,
        )
    }

    /// Records the wideband dropping out (`true`) or returning (`false`).
    pub fn record_wideband(&mut self, fallback: bool, timestamp: TInstant) -> EventId {
        let event = if fallback {
            TelemetryEventKind::WidebandFallback
        } else {
            TelemetryEventKind::WidebandRestored
        };
        self.record(event, TelemetryPayload::none(), timestamp)
    }

    /// Records the outcome of a calibration load.
    pub fn record_calibration(
        &mut self,
        version: u8,
        result: Result<u32, CalibrationError>,
        timestamp: TInstant,
    ) -> EventId {
        let (event, details) = match result {
            Ok(epoch) => (
                TelemetryEventKind::CalibrationLoaded,
                CalibrationTelemetry {
                    version,
                    epoch,
                    error: None,
                },
            ),
            Err(error) => (
                TelemetryEventKind::CalibrationRejected,
                CalibrationTelemetry {
                    version,
                    epoch: 0,
                    error: Some(error),
                },
            ),
        };
        self.record(event, TelemetryPayload::Calibration(details), timestamp)
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}
