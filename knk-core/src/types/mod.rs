//! Domain types for Knights & Kings.
//!
//! - [`Town`], [`District`], [`Street`], [`Structure`]: the containment tree
//! - [`DomainRecord`] / [`DomainEntity`]: typed and type-erased views over them
//! - [`DomainRegionQuery`] / [`RegionResolution`]: batch region resolution

mod domain;
mod region;

pub use domain::*;
pub use region::*;
