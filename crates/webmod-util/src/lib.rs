#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for webmod.
//!
//! Pure helper functions with no logging/tracing dependencies. Logging is
//! left to the crates that own a concern so this one stays lightweight.

pub mod fs;
pub mod hash;
