//! Configuration model for percia.
//!
//! This module defines the Config struct that represents `.percia/config.yaml`.
//! Unknown fields are ignored, every field has a default, and a missing file
//! means "all defaults".

mod model;
mod operations;
pub mod types;


pub use model::Config;
pub use operations::MAX_LOCK_SECONDS;
