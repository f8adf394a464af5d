//! Domain models for the release store.
//!
//! # Core Concepts
//!
//! ## Releases
//!
//! - [`Release`]: A named unit of content change that behaves like a branch.
//!   Releases move through [`ReleaseStatus`] and only one is DEPLOYED at a time.
//! - [`ReleaseContext`]: The release an operation runs against, resolved once per
//!   operation and passed along explicitly.
//!
//! ## Versioned Entities
//!
//! - [`EntityVersion`]: The state of one entity inside one release. Releases start
//!   empty, so an entity only has a version row in the releases that touched it.
//! - [`EntityRecord`]: The materialized effective view of an entity at a scope.
//! - [`EntitySpec`]: Declarative description of an entity type: which fields are
//!   typed columns, which tuples must be unique, and how drafts are validated.
//!
//! ## Reporting
//!
//! - [`ReleaseDiff`], [`ConflictReport`] and [`ReleaseStats`] are read-only views
//!   produced by the lifecycle manager.

mod entity;
mod release;
mod report;
mod spec;

pub use entity::*;
pub use release::*;
pub use report::*;
pub use spec::*;
