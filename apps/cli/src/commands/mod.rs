//! Command implementations for the Kiln CLI.

pub mod exports;
pub mod history;
pub mod train;
pub mod types;
