#![no_std]

// Engine control core shared by the firmware and host tooling.
//
// Everything here is allocation-free and avoids the Rust standard library so the
// same calculation and scheduling code runs inside interrupt-driven firmware and
// inside the emulator's simulated crank.

pub mod calibration;
pub mod controller;
pub mod display;
pub mod engine;
pub mod fuel;
pub mod ignition;
pub mod scheduler;
pub mod sensors;
pub mod telemetry;
