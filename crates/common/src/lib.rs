//! Common utilities for hidlink
//!
//! This crate provides the pieces shared between the transaction library and
//! the command-line tool: error handling, logging setup, and the hex packet
//! trace formatter.

pub mod error;
pub mod hexdump;
pub mod logging;

pub use error::{Error, Result};
pub use hexdump::{hex_lines, trace_packet};
pub use logging::setup_logging;
