//! Remote telemetry provider: transport and payload normalization.

pub mod client;
pub mod normalize;

pub use client::{Latest, RetryPolicy, ThingSpeakClient, HEATER_FIELD, PUMP_FIELD};
