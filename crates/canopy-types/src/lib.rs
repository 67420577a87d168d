//! Foundation types for the Canopy tree store.
//!
//! This crate provides the identifier and path types used throughout the
//! Canopy system. Every other Canopy crate depends on `canopy-types`.
//!
//! # Key Types
//!
//! - [`ContentId`] — Content-addressed identifier (BLAKE3 hash)
//! - [`path`] — Helpers for the absolute, `/`-separated node namespace
//! - [`TypeError`] — Validation and parse errors

pub mod error;
pub mod id;
pub mod path;

pub use error::TypeError;
pub use id::ContentId;
