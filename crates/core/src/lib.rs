//! `tasksvc-core`: shared primitives for the job service.
//!
//! This crate contains **pure** building blocks (no IO, no async runtime):
//! identifiers, the schema-less payload document, and the domain error model.

pub mod document;
pub mod error;
pub mod id;

pub use document::{Document, empty_document, is_truthy};
pub use error::{DomainError, DomainResult};
pub use id::JobId;
