//! Merge engine: folds one snippet's declaration into the shared table.
//!
//! The engine is pure. It never reads or writes the shared resource itself;
//! the controller snapshots the table, calls into this module, and performs
//! the conditional write.
//!
//! - [`apply`] - set every declared entry, drop entries the snippet owned but
//!   no longer declares.
//! - [`remove`] - drop everything the snippet owns (finalization path).
//! - [`drift`] - what `apply` would change in the current table.
//!
//! # Ownership
//!
//! A snippet's `status` records the keys it last wrote. Ownership is
//! re-derived at merge time from every *other* snippet through [`Claims`],
//! never trusted from the subject's status alone, so a key another snippet
//! took over concurrently is not deleted.
//!
//! # Protected entries
//!
//! Entries whose RBAC name starts with a protected prefix (see
//! [`MergePolicy`]) belong to the platform. They are never added,
//! overwritten, or removed here.
//!
//! # Collisions
//!
//! When several active snippets declare the same key, the one with the
//! smallest [`SnippetId`](crate::model::SnippetId) holds it. The others skip
//! the key and report it as a [`Collision`](crate::model::Collision).

pub mod apply;
pub mod claims;
pub mod drift;
pub mod policy;
pub mod remove;

pub use apply::{MergeOutcome, apply};
pub use claims::Claims;
pub use drift::{KeyChange, diff, drift};
pub use policy::{DEFAULT_PROTECTED_PREFIX, MergePolicy, validate};
pub use remove::remove;
