//! Roomlink Types
//!
//! Shared identifiers, track descriptions and the native room event model
//! used across all Roomlink crates.

pub mod ids;
pub mod track;
pub mod events;
pub mod stats;
pub mod error;

pub use ids::*;
pub use track::*;
pub use events::*;
pub use stats::*;
pub use error::*;
