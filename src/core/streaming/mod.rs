//! Streaming accumulation
//!
//! The live stream reaches the caller untouched; every chunk is also fed
//! into a per-request accumulator that materialises one logical response
//! on the final chunk for logging, caching and tracing.

pub mod accumulator;
pub mod merge;

pub use accumulator::{ProcessOutcome, StreamTimings, StreamingAccumulator};
pub use merge::{AccumulatedData, MergedAudio, ReasoningDetail};
