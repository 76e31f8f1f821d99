//! Pipeline stages around the orchestrator.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ [orchestrator: gate, sanitize, compose, invoke] ──▶ postprocess
//! (pages)                                                       (cleanup)
//! ```
//!
//! 1. [`input`]       resolve a path or URL and split it into pages
//! 2. [`postprocess`] deterministic cleanup of provider output, including
//!    heading-depth correction and heading extraction

pub mod input;
pub mod postprocess;
