#![no_std]

// Shared real-time logic for the ViaEMS engine controller.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Hardware access is reached only through the
// `platform::Platform` trait and the `critical-section` implementation the final
// binary installs.

pub mod config;
pub mod decoder;
pub mod engine;
pub mod platform;
pub mod scheduler;
pub mod telemetry;
pub mod time;
