//! Placeholder template engine.
//!
//! Provides:
//! - `#{name}` extraction in first-appearance order
//! - Single-pass substitution of caller values
//! - Injection screening of raw values before substitution

pub mod injection;
pub mod placeholder;

pub use injection::{InjectionDetected, Signature};
pub use placeholder::{extract_placeholders, render, RenderedStatement};
