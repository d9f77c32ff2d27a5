//! Shared types

mod error;

pub use error::{GateError, Result, INVALID_OR_EXPIRED};
