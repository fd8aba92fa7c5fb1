//! Snippet declaration files.
//!
//! A manifest is a JSON object shaped like the custom resource authors
//! submit, or an array of them:
//!
//! ```json
//! {
//!   "metadata": { "namespace": "team-a", "name": "admins" },
//!   "spec": {
//!     "mapRoles": [{ "rolearn": "arn:aws:iam::111:role/admin", "username": "admin", "groups": ["system:masters"] }],
//!     "mapUsers": []
//!   }
//! }
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use authmap_core::model::{SnippetId, SnippetSpec};
use serde::Deserialize;

use crate::controller::Event;

/// Identity block of a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestMeta {
    /// Snippet namespace.
    pub namespace: String,
    /// Snippet name.
    pub name: String,
}

/// One snippet declaration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SnippetManifest {
    /// Identity.
    pub metadata: ManifestMeta,
    /// Declared mappings.
    #[serde(default)]
    pub spec: SnippetSpec,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(SnippetManifest),
    Many(Vec<SnippetManifest>),
}

impl SnippetManifest {
    /// Validated identity.
    ///
    /// # Errors
    /// If namespace or name is malformed.
    pub fn id(&self) -> Result<SnippetId> {
        SnippetId::new(&self.metadata.namespace, &self.metadata.name).map_err(Into::into)
    }

    /// The upsert event this manifest stands for.
    ///
    /// # Errors
    /// If namespace or name is malformed.
    pub fn into_event(self) -> Result<Event> {
        Ok(Event::Upserted {
            id: self.id()?,
            map_roles: self.spec.map_roles,
            map_users: self.spec.map_users,
        })
    }

    /// Parse one manifest or an array of them.
    ///
    /// # Errors
    /// On malformed JSON.
    pub fn parse_all(text: &str) -> Result<Vec<Self>> {
        let parsed: OneOrMany = serde_json::from_str(text).context("not a snippet manifest")?;
        Ok(match parsed {
            OneOrMany::One(m) => vec![m],
            OneOrMany::Many(ms) => ms,
        })
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    /// On I/O failure or malformed JSON.
    pub fn load_all(path: &Path) -> Result<Vec<Self>> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse_all(&text).with_context(|| format!("parsing {}", path.display()))
    }
}
