//! Config reconciliation: read what is on disk, decide what it should be,
//! and apply the smallest safe change.
//!
//! The pieces line up as a pipeline:
//!
//! 1. [`document::read`] loads a [`ConfigDocument`] (or reports it absent)
//! 2. [`resolver::Resolver`] turns that snapshot into a [`Decision`]
//! 3. [`writer::SafeWriter`] applies a [`Mutation`] with backup/restore
//!
//! The interactive parts (asking for a secret, approving an upgrade) live in
//! [`crate::gate`], and completion is recorded by [`crate::markers`].

pub mod document;
pub mod resolver;
pub mod secret;
pub mod writer;

pub use document::{ConfigDocument, Snapshot};
pub use resolver::{Decision, Resolution, Resolver, SecretProblem, ValidationWarning};
pub use secret::{SecretCheck, classify_secret, mask_secret};
pub use writer::{
    ApplyOutcome, FieldTarget, Mutation, RestoreStatus, SafeWriter, SectionTemplate, Strategy,
    WriteFailure,
};
