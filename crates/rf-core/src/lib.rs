//! rf-core: shared types, IDs, errors, configuration, and the progress channel.
//!
//! This crate is the foundational dependency for all other rf-* crates,
//! providing type-safe identifiers, a unified error type, video lifecycle
//! enums, application configuration, and the per-video [`events::ProgressHub`].

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
