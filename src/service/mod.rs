//! External generation services consumed by the pipeline.
//!
//! Both are black boxes with a request/response contract:
//!
//! 1. [`text`]: chat completion returning raw text (expected to hold JSON)
//! 2. [`image`]: text-to-image returning URLs plus per-image safety flags
//!
//! Each is a trait so tests and embedders can inject their own backends.

pub mod image;
pub mod text;
