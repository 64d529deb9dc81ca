//! # Knights & Kings Core
//!
//! Core types, errors, and traits shared by the Knights & Kings caching and
//! region-resolution crates.
//!
//! - **Types**: Towns, districts, streets, structures and the region query/summary model
//! - **Errors**: A single cloneable error type so one failure can be handed to many waiters
//! - **Constants**: Cache and hierarchy defaults
//! - **Traits**: The [`DomainDataProvider`] port that supplies domain records
//!
//! ## Example
//!
//! ```rust
//! use knk_core::{DomainRegionQuery, DomainType};
//!
//! let query = DomainRegionQuery::new(["region-district-5"], true);
//! assert!(query.top_down_hierarchy);
//! assert_eq!(DomainType::District.to_string(), "district");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::{KnkError, Result};
pub use traits::*;
pub use types::*;
