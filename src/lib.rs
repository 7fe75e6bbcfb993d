//! encoded - media encoding server
//!
//! This library crate exposes the configuration loader and HTTP surface for
//! integration testing.

pub mod config;
pub mod server;
