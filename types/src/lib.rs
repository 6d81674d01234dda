//! Core settings types for the bridge client.
//!
//! This crate contains resolved configuration types with no IO, no async, and
//! minimal dependencies. The config loader and the protocol core both depend
//! on it; neither owns the other's concerns.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

pub mod settings;

pub use settings::{LaunchSpec, SessionSettings, SettingsError, SocketEndpoint, TransportTarget};
