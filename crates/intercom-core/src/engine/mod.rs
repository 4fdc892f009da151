//! Audio engine: mix configuration, mixer, level metering
//!
//! This module contains the real-time core of the backend:
//! - MixConfig: routing matrices, mutes, headroom, tick snapshots
//! - MixerEngine: the per-tick uplink/downlink DSP
//! - VuMeter: RMS accumulation and dBFS conversion

pub mod config;
pub mod mixer;
pub mod vu;

pub use config::{MatrixUpdate, MixConfig};
pub use mixer::MixerEngine;
pub use vu::{dbfs, VuLevels, VuMeter};
