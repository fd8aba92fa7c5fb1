//! Stored layout of the shared table.
//!
//! The resource is a config-map shaped document:
//!
//! ```text
//! metadata:
//!   namespace: kube-system
//!   name: aws-auth
//!   annotations:
//!     awsauth.io/authversion: "3"      ← generation, decimal string
//!     awsauth.io/managed: "true"       ← set once the engine has written
//! data:
//!   mapRoles: '[{"rolearn":…,"username":…,"groups":[…]}]'
//!   mapUsers: '[{"userarn":…,"username":…,"groups":[…]}]'
//! ```
//!
//! Arrays are written as JSON sorted by ARN and read as YAML, so block-style
//! arrays seeded by the platform decode too. An empty or missing array field
//! decodes as empty; a missing version annotation decodes as generation 0. Other data
//! keys and annotations are carried through writes unchanged.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::model::entry::{role_wire, user_wire};
use crate::model::{EntryKind, MappingEntry, SharedTable};
use crate::version::Generation;

/// Annotation carrying the generation counter.
pub const VERSION_ANNOTATION: &str = "awsauth.io/authversion";

/// Annotation marking the resource as written by this engine.
pub const MANAGED_ANNOTATION: &str = "awsauth.io/managed";

// ---------------------------------------------------------------------------
// TableRef
// ---------------------------------------------------------------------------

/// Namespace and name of the shared resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Namespace, `kube-system` by default.
    pub namespace: String,
    /// Name, `aws-auth` by default.
    pub name: String,
}

impl Default for TableRef {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_owned(),
            name: "aws-auth".to_owned(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ---------------------------------------------------------------------------
// TableDocument
// ---------------------------------------------------------------------------

/// Metadata block of the stored document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Resource name.
    pub name: String,
    /// Resource namespace.
    pub namespace: String,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// The stored document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDocument {
    /// Identity and annotations.
    pub metadata: DocumentMeta,
    /// Serialized entry arrays plus any foreign keys.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl TableDocument {
    /// A freshly created, empty document.
    #[must_use]
    pub fn empty(resource: &TableRef) -> Self {
        let mut data = BTreeMap::new();
        for kind in EntryKind::ALL {
            data.insert(kind.data_key().to_owned(), String::new());
        }
        Self {
            metadata: DocumentMeta {
                name: resource.name.clone(),
                namespace: resource.namespace.clone(),
                annotations: BTreeMap::new(),
            },
            data,
        }
    }

    /// The resource this document describes.
    #[must_use]
    pub fn resource(&self) -> TableRef {
        TableRef {
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// `true` once the engine has written this document.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.metadata
            .annotations
            .get(MANAGED_ANNOTATION)
            .is_some_and(|v| v == "true")
    }

    /// Decode the table.
    ///
    /// # Errors
    /// [`StoreError::Serialization`] for a malformed array or version.
    pub fn decode(&self) -> Result<SharedTable, StoreError> {
        let corrupt = |detail: String| StoreError::Serialization {
            resource: self.resource(),
            detail,
        };

        let generation = match self.metadata.annotations.get(VERSION_ANNOTATION) {
            None => Generation::ZERO,
            Some(raw) => raw
                .parse()
                .map_err(|e| corrupt(format!("{VERSION_ANNOTATION}={raw:?}: {e}")))?,
        };

        let mut table = SharedTable {
            generation,
            ..SharedTable::default()
        };
        for kind in EntryKind::ALL {
            let raw = self.data.get(kind.data_key()).map_or("", String::as_str);
            let entries = match kind {
                EntryKind::Role => role_wire::parse(raw),
                EntryKind::User => user_wire::parse(raw),
            }
            .map_err(|e| corrupt(format!("{}: {e}", kind.data_key())))?;
            for entry in entries {
                table.upsert(kind, entry);
            }
        }
        Ok(table)
    }

    /// This document with its entry arrays and generation replaced by
    /// `table`, marked as managed.
    ///
    /// # Errors
    /// [`StoreError::Serialization`] if the arrays cannot be rendered.
    pub fn encode(&self, table: &SharedTable) -> Result<Self, StoreError> {
        let mut doc = self.clone();
        for kind in EntryKind::ALL {
            let entries: Vec<MappingEntry> = table.entries(kind).values().cloned().collect();
            let rendered = match kind {
                EntryKind::Role => role_wire::to_json(&entries),
                EntryKind::User => user_wire::to_json(&entries),
            }
            .map_err(|e| StoreError::Serialization {
                resource: self.resource(),
                detail: format!("{}: {e}", kind.data_key()),
            })?;
            doc.data.insert(kind.data_key().to_owned(), rendered);
        }
        doc.metadata
            .annotations
            .insert(VERSION_ANNOTATION.to_owned(), table.generation.to_string());
        doc.metadata
            .annotations
            .insert(MANAGED_ANNOTATION.to_owned(), "true".to_owned());
        Ok(doc)
    }

    /// Pretty JSON rendering.
    ///
    /// # Errors
    /// [`StoreError::Serialization`] on failure.
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization {
            resource: self.resource(),
            detail: e.to_string(),
        })
    }

    /// Parse a stored document.
    ///
    /// # Errors
    /// [`StoreError::Serialization`] if the text is not a document.
    pub fn from_json(resource: &TableRef, text: &str) -> Result<Self, StoreError> {
        serde_json::from_str(text).map_err(|e| StoreError::Serialization {
            resource: resource.clone(),
            detail: e.to_string(),
        })
    }
}
