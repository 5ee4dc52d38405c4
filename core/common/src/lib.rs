//! Common utilities and types shared across attrsync crates.
//!
//! This module provides the error type, validated key newtypes and the
//! limits that form part of the observable synchronization contract.

pub mod error;
pub mod limits;
pub mod types;

pub use error::{Error, Result};
pub use types::{AttributeKey, TagCollection};
