//! Snippets: independently authored mapping declarations plus the status the
//! engine records about them.
//!
//! The two halves have different owners. [`SnippetSpec`] belongs to the
//! external author and is never written by the engine; [`SnippetStatus`]
//! belongs to the engine and is never written by the author.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::entry::{EntryKind, MappingEntry, SnippetId, role_wire, user_wire};
use crate::version::{Fingerprint, Generation};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle phase of a snippet record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Observed and not marked for deletion.
    #[default]
    Active,
    /// Deletion requested; cleanup pending.
    Deleting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deleting => write!(f, "deleting"),
        }
    }
}

// ---------------------------------------------------------------------------
// SnippetSpec
// ---------------------------------------------------------------------------

/// Author-owned declaration of role and user mappings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetSpec {
    /// Declared role entries, in declaration order.
    #[serde(rename = "mapRoles", default, with = "role_wire")]
    pub map_roles: Vec<MappingEntry>,
    /// Declared user entries, in declaration order.
    #[serde(rename = "mapUsers", default, with = "user_wire")]
    pub map_users: Vec<MappingEntry>,
}

impl SnippetSpec {
    /// Declared entries of one kind.
    #[must_use]
    pub fn entries(&self, kind: EntryKind) -> &[MappingEntry] {
        match kind {
            EntryKind::Role => &self.map_roles,
            EntryKind::User => &self.map_users,
        }
    }

    /// Declared ARNs of one kind.
    #[must_use]
    pub fn declared_arns(&self, kind: EntryKind) -> BTreeSet<String> {
        self.entries(kind)
            .iter()
            .map(|e| e.principal_arn.clone())
            .collect()
    }

    /// `true` if the snippet declares `arn` under `kind`.
    #[must_use]
    pub fn declares(&self, kind: EntryKind, arn: &str) -> bool {
        self.entries(kind).iter().any(|e| e.principal_arn == arn)
    }
}

// ---------------------------------------------------------------------------
// Collisions
// ---------------------------------------------------------------------------

/// Who holds a key that a snippet declared but could not take.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum CollisionHolder {
    /// Another snippet with precedence (smaller identity).
    Snippet(SnippetId),
    /// A platform-managed entry under a protected prefix.
    Protected,
}

/// A declared key that was not written because someone else holds it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Collision {
    /// Entry kind of the contested key.
    pub kind: EntryKind,
    /// The contested ARN.
    pub arn: String,
    /// Current holder.
    pub holder: CollisionHolder,
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.holder {
            CollisionHolder::Snippet(id) => {
                write!(f, "{} {} is held by snippet {id}", self.kind, self.arn)
            }
            CollisionHolder::Protected => {
                write!(f, "{} {} is a protected platform entry", self.kind, self.arn)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SnippetStatus
// ---------------------------------------------------------------------------

/// Engine-owned status of a snippet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetStatus {
    /// Role ARNs this snippet last wrote to the shared table.
    #[serde(default)]
    pub role_arns: BTreeSet<String>,
    /// User ARNs this snippet last wrote to the shared table.
    #[serde(default)]
    pub user_arns: BTreeSet<String>,
    /// Fingerprint of the spec that was last applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    /// Whether the shared table reflects the spec.
    #[serde(default)]
    pub is_synced: bool,
    /// Table generation at the last successful sync.
    #[serde(default)]
    pub observed_generation: Generation,
    /// Reason for the last failure, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Declared keys held by someone else.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collisions: Vec<Collision>,
}

impl SnippetStatus {
    /// Owned ARNs of one kind.
    #[must_use]
    pub const fn owned(&self, kind: EntryKind) -> &BTreeSet<String> {
        match kind {
            EntryKind::Role => &self.role_arns,
            EntryKind::User => &self.user_arns,
        }
    }

    /// `true` if this snippet owns `arn` under `kind`.
    #[must_use]
    pub fn owns(&self, kind: EntryKind, arn: &str) -> bool {
        self.owned(kind).contains(arn)
    }

    /// Copy of this status marked unsynced with a failure message.
    ///
    /// Ownership and fingerprint are kept: they still describe what is in the
    /// shared table.
    #[must_use]
    pub fn failed(&self, message: impl Into<String>) -> Self {
        Self {
            is_synced: false,
            message: Some(message.into()),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Snippet
// ---------------------------------------------------------------------------

/// A snippet record: identity, lifecycle, declaration, status, finalizers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    /// Identity.
    pub id: SnippetId,
    /// Lifecycle phase.
    #[serde(default)]
    pub phase: Phase,
    /// Author-owned declaration.
    #[serde(default)]
    pub spec: SnippetSpec,
    /// Engine-owned status.
    #[serde(default)]
    pub status: SnippetStatus,
    /// Persistent cleanup markers. A deleting snippet is only dropped once
    /// this is empty.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub finalizers: BTreeSet<String>,
}

impl Snippet {
    /// A fresh, active snippet with empty status.
    #[must_use]
    pub fn new(id: SnippetId, spec: SnippetSpec) -> Self {
        Self {
            id,
            phase: Phase::Active,
            spec,
            status: SnippetStatus::default(),
            finalizers: BTreeSet::new(),
        }
    }

    /// `true` once deletion was requested.
    #[must_use]
    pub const fn is_deleting(&self) -> bool {
        matches!(self.phase, Phase::Deleting)
    }

    /// `true` if the named finalizer is registered.
    #[must_use]
    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.contains(name)
    }
}
