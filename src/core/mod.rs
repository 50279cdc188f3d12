//! Core types shared by every layer: protocol constants and errors.

pub mod constants;
mod error;

pub use error::*;
