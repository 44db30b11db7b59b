//! Centralized validation system for BitBox
//!
//! Path-safety checks shared by the file-tree model (§4.A `unsafe-pathname`)
//! and the protocol codec (pathnames arriving over the wire are untrusted).

use std::error::Error;
use std::fmt;

pub mod path;

pub use path::*;

/// Generic validation error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
	/// Invalid path
	PathError(String),
	/// Other validation error
	Other(String),
}

impl fmt::Display for ValidationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ValidationError::PathError(msg) => write!(f, "Path validation error: {}", msg),
			ValidationError::Other(msg) => write!(f, "Validation error: {}", msg),
		}
	}
}

impl Error for ValidationError {}

/// Trait for validatable types
pub trait Validator {
	fn validate(&self) -> Result<(), ValidationError>;
}

// vim: ts=4
