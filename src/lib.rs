//! Reframe - MP4 demux, transcode and remux tool
//!
//! This library crate exposes the command implementations for integration testing.

pub mod config;
pub mod probe;
pub mod remux;
