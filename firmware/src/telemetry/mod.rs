#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Forwards the controller's telemetry ring to defmt / the host console.
//!
//! The ring itself lives in `ecu-core`; this module only remembers how far it
//! has been read and picks a log level per event kind.

use ecu_core::engine::Ticks;
use ecu_core::telemetry::{
    EventId, TelemetryEventKind, TelemetryPayload, TelemetryRecord, TelemetryRecorder,
};

/// Log level chosen for an event kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[must_use]
pub const fn severity(event: TelemetryEventKind) -> Severity {
    match event {
        TelemetryEventKind::CalibrationRejected => Severity::Error,
        TelemetryEventKind::ScheduleRefused(_)
        | TelemetryEventKind::WidebandFallback
        | TelemetryEventKind::QueryClamped(_)
        | TelemetryEventKind::FuelCut(_)
        | TelemetryEventKind::SparkCut(_) => Severity::Warn,
        TelemetryEventKind::FuelRestored
        | TelemetryEventKind::SparkRestored
        | TelemetryEventKind::WidebandRestored
        | TelemetryEventKind::CalibrationLoaded
        | TelemetryEventKind::Custom(_) => Severity::Info,
    }
}

/// Read cursor over a [`TelemetryRecorder`].
pub struct TelemetryLog {
    next: EventId,
}

impl TelemetryLog {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Emits every record added since the previous call and returns how many
    /// were written. Records overwritten before they were read are skipped.
    pub fn drain(&mut self, recorder: &TelemetryRecorder<Ticks>) -> usize {
        let mut emitted = 0;
        for record in recorder
            .oldest_first()
            .filter(|record| is_unread(record.id, self.next))
        {
            emit(record);
            emitted += 1;
        }
        self.next = recorder.next_event_id();
        emitted
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_possible_wrap)]
fn is_unread(id: EventId, next: EventId) -> bool {
    id.wrapping_sub(next) as i32 >= 0
}

fn emit(record: &TelemetryRecord<Ticks>) {
    let (value, rpm) = match record.details {
        TelemetryPayload::Schedule(details) => (u32::from(details.reason.to_raw()), details.rpm),
        TelemetryPayload::Cut { rpm } => (0, rpm),
        TelemetryPayload::Query { rpm, load } => (u32::from(load), rpm),
        TelemetryPayload::Calibration(details) => (details.epoch, u16::from(details.version)),
        TelemetryPayload::None => (0, 0),
    };
    emit_detail(
        severity(record.event),
        record.event,
        record.event.to_raw(),
        record.timestamp.as_micros(),
        value,
        rpm,
    );
}

#[cfg(target_os = "none")]
fn emit_detail(
    level: Severity,
    event: TelemetryEventKind,
    code: u16,
    timestamp_us: u32,
    value: u32,
    rpm: u16,
) {
    let event = defmt::Display2Format(&event);
    match level {
        Severity::Info => defmt::info!(
            "telemetry:{=u16:#x} {} t={}us v={} rpm={}",
            code,
            event,
            timestamp_us,
            value,
            rpm
        ),
        Severity::Warn => defmt::warn!(
            "telemetry:{=u16:#x} {} t={}us v={} rpm={}",
            code,
            event,
            timestamp_us,
            value,
            rpm
        ),
        Severity::Error => defmt::error!(
            "telemetry:{=u16:#x} {} t={}us v={} rpm={}",
            code,
            event,
            timestamp_us,
            value,
            rpm
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_detail(
    level: Severity,
    event: TelemetryEventKind,
    code: u16,
    timestamp_us: u32,
    value: u32,
    rpm: u16,
) {
    println!("{level:?} telemetry:{code:#06x} {event} t={timestamp_us}us v={value} rpm={rpm}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecu_core::fuel::FuelCut;

    #[test]
    fn drain_only_emits_new_records() {
        let mut recorder: TelemetryRecorder<Ticks> = TelemetryRecorder::new();
        let mut log = TelemetryLog::new();

        recorder.record_fuel_cut(Some(FuelCut::OverRev), 7100, Ticks(10));
        recorder.record_fuel_cut(None, 6800, Ticks(20));
        assert_eq!(log.drain(&recorder), 2);
        assert_eq!(log.drain(&recorder), 0);

        recorder.record_wideband(true, Ticks(30));
        assert_eq!(log.drain(&recorder), 1);
    }

    #[test]
    fn rejections_log_as_errors() {
        assert_eq!(severity(TelemetryEventKind::CalibrationRejected), Severity::Error);
        assert_eq!(
            severity(TelemetryEventKind::FuelCut(FuelCut::OverRev)),
            Severity::Warn
        );
        assert_eq!(severity(TelemetryEventKind::FuelRestored), Severity::Info);
    }
}
