//! # Knights & Kings Providers
//!
//! Implementations of [`DomainDataProvider`](knk_core::DomainDataProvider).
//!
//! ## Available Backends
//!
//! | Backend | Use Case | Persistence |
//! |---------|----------|-------------|
//! | [`MemoryProvider`] | Testing, development | None |
//! | [`FileProvider`] | CLI, offline snapshots | JSON file |
//!
//! The memory backend doubles as a test fixture: it can be switched
//! unavailable, made to fail for chosen keys, slowed down, and it counts
//! every call so tests can observe loader invocations.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod dataset;
mod file;
mod memory;

pub use dataset::DomainDataset;
pub use file::FileProvider;
pub use memory::{CallCounts, MemoryProvider};
