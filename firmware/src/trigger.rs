#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Minimal even-tooth crank decoder with a once-per-cycle cam sync.
//!
//! Produces one [`EnginePosition`] per crank tooth once the cam edge has been
//! seen. Missing-tooth wheels and cranking strategies are not handled here.

use ecu_core::engine::{CrankAngle, EnginePosition, Ticks, TimePerDegree};

/// Gap after which the decoder drops sync and reports the engine stopped.
pub const STALL_TIMEOUT_US: u32 = 500_000;

/// Tracks tooth position and period.
#[derive(Copy, Clone, Debug)]
pub struct ToothDecoder {
    teeth_per_cycle: u16,
    tooth_angle: u16,
    tooth: Option<u16>,
    last_edge: Option<Ticks>,
}

impl ToothDecoder {
    /// Decoder for a crank wheel with `teeth_per_revolution` even teeth.
    #[must_use]
    pub const fn new(teeth_per_revolution: u16) -> Self {
        let teeth = if teeth_per_revolution == 0 {
            1
        } else {
            teeth_per_revolution
        };
        Self {
            teeth_per_cycle: teeth * 2,
            tooth_angle: 360 / teeth,
            tooth: None,
            last_edge: None,
        }
    }

    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.tooth.is_some()
    }

    /// Handles one crank edge; `cam_sync` marks the tooth at 0°.
    pub fn on_crank_edge(&mut self, now: Ticks, cam_sync: bool) -> Option<EnginePosition> {
        let previous = self.last_edge.replace(now);
        let period_us = previous.map(|at| now.as_micros().wrapping_sub(at.as_micros()));

        if period_us.is_some_and(|period| period > STALL_TIMEOUT_US) {
            self.tooth = None;
        }
        self.tooth = if cam_sync {
            Some(0)
        } else {
            self.tooth.map(|tooth| (tooth + 1) % self.teeth_per_cycle)
        };

        let tooth = self.tooth?;
        let period_us = period_us?;
        let nanos = period_us.saturating_mul(1_000) / u32::from(self.tooth_angle);
        Some(EnginePosition::new(
            CrankAngle::new(tooth * self.tooth_angle),
            TimePerDegree::from_nanos(nanos),
            self.tooth_angle,
            now,
        ))
    }

    /// Called when no edge arrived within [`STALL_TIMEOUT_US`].
    pub fn stall(&mut self) {
        self.tooth = None;
        self.last_edge = None;
    }
}

/// Decoder state driven from the trigger interrupts.
///
/// Edges are stamped by the caller at interrupt entry, so positions carry the
/// tick the tooth arrived rather than the tick the calculation task ran.
#[derive(Copy, Clone, Debug)]
pub struct TriggerCapture {
    decoder: ToothDecoder,
    cam_seen: bool,
}

impl TriggerCapture {
    #[must_use]
    pub const fn new(teeth_per_revolution: u16) -> Self {
        Self {
            decoder: ToothDecoder::new(teeth_per_revolution),
            cam_seen: false,
        }
    }

    pub fn on_cam_edge(&mut self) {
        self.cam_seen = true;
    }

    /// Handles a crank edge captured at `at`; a pending cam edge syncs it.
    pub fn on_crank_edge(&mut self, at: Ticks) -> Option<EnginePosition> {
        let cam_sync = core::mem::take(&mut self.cam_seen);
        self.decoder.on_crank_edge(at, cam_sync)
    }

    /// Drops sync; returns whether the decoder had been synced.
    pub fn stall(&mut self) -> bool {
        let was_synced = self.decoder.is_synced();
        self.decoder.stall();
        self.cam_seen = false;
        was_synced
    }
}
