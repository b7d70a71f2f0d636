//! LLM Provider implementations for Conclave.
//!
//! All providers implement the `conclave_core::Provider` trait. Error
//! responses are normalized through [`error_kind::classify_api_error`].

pub mod error_kind;
pub mod openai_compat;

pub use error_kind::{ApiErrorKind, classify_api_error, is_context_overflow};
pub use openai_compat::OpenAiCompatProvider;
