//! Encryption at rest for Pulse.
//!
//! Provides the optional [`Cipher`] a conversation store is bound to at
//! construction, plus key generation for first-time setup.

pub mod cipher;

pub use cipher::{Cipher, CipherError, TOKEN_PREFIX, generate_key};
