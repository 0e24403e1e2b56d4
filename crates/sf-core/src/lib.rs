//! sf-core: shared configuration, errors, and media-domain enums.
//!
//! This crate is the foundational dependency for the other sf-* crates,
//! providing the remuxer's tunable policy ([`RemuxConfig`]), a unified
//! error type for loading it, and the track/codec enums that both the
//! box writer and the remuxer speak.

pub mod config;
pub mod error;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use config::RemuxConfig;
pub use error::{Error, Result};
pub use media::*;
