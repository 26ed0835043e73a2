//! Concrete [`crate::llm::Provider`] implementations.
//!
//! The core depends only on the `Provider` trait; this module supplies one
//! real HTTP client and one in-memory stub so the crate is exercisable end
//! to end without pulling in every possible backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use eflycode_core::providers::OpenAICompatibleProvider;
//!
//! let provider = OpenAICompatibleProvider::new(std::env::var("OPENAI_API_KEY")?);
//! ```

pub mod common;
pub mod mock;

pub use common::OpenAICompatibleProvider;
pub use mock::MockProvider;
