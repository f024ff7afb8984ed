//! Test helper modules for djrelay integration tests
//!
//! - MockContentProvider: scripted contributor results and a background item
//! - RecordingNotifier: captures every chat notice
//! - FakeDecoder / FakeEncoder: launchers backed by in-memory duplex pipes
//! - Harness: a running pump, listener manager and player wired together

#![allow(dead_code)]

pub mod content;
pub mod harness;
pub mod launchers;

pub use content::{item, MockContentProvider, RecordingNotifier, Said};
pub use harness::{pump_settings, wait_for, wait_for_state, Harness, HarnessOptions, WAIT};
pub use launchers::{FakeDecoder, FakeEncoder};
