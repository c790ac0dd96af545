//! vidbridge - hardware H.264 capture bridged to a NAL unit consumer
//!
//! This library crate exposes the bridge for the binary and for
//! integration testing.

pub mod bridge;
pub mod cache;
pub mod config;
pub mod fixture;
pub mod replay;
