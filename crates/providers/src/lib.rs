//! Inference backends for Pulse.
//!
//! [`OpenRouterProvider`] implements `pulse_core::Provider` for one model at
//! a time. [`InferenceClient`] drives it across a [`ModelCascade`], and
//! [`HttpCompressor`] is the remote summarizer used by context building.

pub mod cascade;
pub mod compressor;
pub mod openrouter;

pub use cascade::{
    CascadeSettings, FailureClass, FragmentStream, InferenceClient, ModelCascade, RetryPolicy,
    classify,
};
pub use compressor::HttpCompressor;
pub use openrouter::OpenRouterProvider;
