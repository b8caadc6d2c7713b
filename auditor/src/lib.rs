//! sandbox-audit library.
//!
//! Compares every running process's sandboxing posture against a
//! declarative baseline and reports the processes that fall short.

pub mod audit;
pub mod config;
pub mod error;
pub mod process;
pub mod report;
pub mod rules;

pub use error::{Error, Result};
