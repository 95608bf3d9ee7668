//! Streamvault - live-stream timeshift buffering and ABR transcode sessions
//!
//! This library crate exposes the session managers for integration testing.

pub mod abr;
pub mod config;
pub mod error;
pub mod manifest;
pub mod process;
pub mod segment;
pub mod session;
pub mod sweep;
pub mod timeshift;
