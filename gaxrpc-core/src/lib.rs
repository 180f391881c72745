//! Core protocol types for gaxrpc.
//!
//! This crate provides the data shared between the call runtime
//! (`gaxrpc-client`) and the transports that plug into it.
//!
//! ## Modules
//!
//! - [`error`]: Status codes, [`Status`] and structured error details
//! - [`operation`]: Wire shapes for long-running operations

mod error;
mod operation;

pub use error::*;
pub use operation::*;
