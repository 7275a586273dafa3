//! Common types shared across Crosswire components.

#![warn(clippy::pedantic)]

/// Module for identifier and identity types
pub mod types;
