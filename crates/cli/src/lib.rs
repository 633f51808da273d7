//! Command-line front end: argument parsing, signal handling and reports.
pub mod args;
pub mod report;
pub mod signals;
