//! # qrgate-cli — console front end
//!
//! Wires `qrgate-core` to a terminal: static tuning from `qrgate.toml`,
//! user choices and the account token in `settings.toml`, events printed
//! to stdout and SMS codes read from stdin.

pub mod app;
pub mod config;
pub mod console;
pub mod settings;
