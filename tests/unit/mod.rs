//! Unit test harness for lookahead-motion.
//!
//! Configuration parsing and validation, exercised through the public API.

mod config_parsing;
mod config_validation;
