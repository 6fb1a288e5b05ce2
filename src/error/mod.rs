//! Error Handling Module
//!
//! This module provides error handling for the relay, including:
//! - Core error types (`RelayError`, `ErrorCategory`)
//! - Structured tool-error payloads fed back to the backend
//! - Type conversions from common error types
//!
//! # Example
//!
//! ```rust
//! use reasoning_relay::error::{ErrorCategory, RelayError};
//!
//! let error = RelayError::api_error(404, "Not found");
//! assert_eq!(error.category(), ErrorCategory::Client);
//! assert!(!error.is_tool_recoverable());
//! ```

// Module declarations
mod conversions;
pub mod types;

// Re-exports for public API
pub use types::*;
