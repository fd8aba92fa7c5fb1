//! Mapping entries, their kinds, and snippet identities.
//!
//! A [`MappingEntry`] maps one IAM principal (role or user ARN) to an RBAC
//! user name and a list of RBAC groups. Role and user entries share a shape
//! but live in separate collections and use different wire field names
//! (`rolearn` vs `userarn`), so serialization goes through the
//! [`role_wire`] / [`user_wire`] adapters.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EntryKind
// ---------------------------------------------------------------------------

/// Which collection an entry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// IAM role mapping (`mapRoles`).
    Role,
    /// IAM user mapping (`mapUsers`).
    User,
}

impl EntryKind {
    /// Both kinds, in the order they are processed and fingerprinted.
    pub const ALL: [Self; 2] = [Self::Role, Self::User];

    /// Key of the serialized array in the shared document.
    #[must_use]
    pub const fn data_key(self) -> &'static str {
        match self {
            Self::Role => "mapRoles",
            Self::User => "mapUsers",
        }
    }

    fn arn_pattern(self) -> &'static Regex {
        match self {
            Self::Role => &ROLE_ARN,
            Self::User => &USER_ARN,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role => write!(f, "role"),
            Self::User => write!(f, "user"),
        }
    }
}

static ROLE_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:[^:\n]*:iam:[^:\n]*:[^:\n]*:role/.+$").expect("role ARN pattern compiles")
});

static USER_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:[^:\n]*:iam:[^:\n]*:[^:\n]*:user/.+$").expect("user ARN pattern compiles")
});

/// Check that `arn` is a well-formed IAM ARN of the given kind.
///
/// # Errors
/// Returns a [`ValidationError`] naming the offending ARN.
pub fn validate_arn(kind: EntryKind, arn: &str) -> Result<(), ValidationError> {
    if kind.arn_pattern().is_match(arn) {
        Ok(())
    } else {
        Err(ValidationError {
            subject: format!("{kind} arn"),
            value: arn.to_owned(),
            reason: format!("expected arn:<partition>:iam:<region>:<account>:{kind}/<name>"),
        })
    }
}

// ---------------------------------------------------------------------------
// MappingEntry
// ---------------------------------------------------------------------------

/// One principal-to-RBAC mapping.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MappingEntry {
    /// The IAM role or user ARN. Natural key within its kind.
    pub principal_arn: String,
    /// RBAC user name the principal is mapped to.
    pub rbac_name: String,
    /// RBAC groups, in declaration order.
    pub groups: Vec<String>,
}

impl MappingEntry {
    /// Build an entry from borrowed parts.
    #[must_use]
    pub fn new(principal_arn: &str, rbac_name: &str, groups: &[&str]) -> Self {
        Self {
            principal_arn: principal_arn.to_owned(),
            rbac_name: rbac_name.to_owned(),
            groups: groups.iter().map(|g| (*g).to_owned()).collect(),
        }
    }
}

macro_rules! wire_format {
    ($(#[$doc:meta])* $module:ident, $arn:ident) => {
        $(#[$doc])*
        pub mod $module {
            use serde::{Deserialize, Deserializer, Serialize, Serializer};

            use super::MappingEntry;

            #[derive(Serialize, Deserialize)]
            struct Wire {
                $arn: String,
                username: String,
                #[serde(default)]
                groups: Vec<String>,
            }

            /// Serialize entries in wire form (usable with `#[serde(with)]`).
            ///
            /// # Errors
            /// Propagates serializer errors.
            pub fn serialize<S: Serializer>(
                entries: &[MappingEntry],
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                serializer.collect_seq(entries.iter().map(|e| Wire {
                    $arn: e.principal_arn.clone(),
                    username: e.rbac_name.clone(),
                    groups: e.groups.clone(),
                }))
            }

            /// Deserialize entries from wire form (usable with `#[serde(with)]`).
            ///
            /// # Errors
            /// Propagates deserializer errors.
            pub fn deserialize<'de, D: Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Vec<MappingEntry>, D::Error> {
                let wire = Vec::<Wire>::deserialize(deserializer)?;
                Ok(wire
                    .into_iter()
                    .map(|w| MappingEntry {
                        principal_arn: w.$arn,
                        rbac_name: w.username,
                        groups: w.groups,
                    })
                    .collect())
            }

            /// Render entries as a JSON array string.
            ///
            /// # Errors
            /// Returns the `serde_json` error on failure.
            pub fn to_json(entries: &[MappingEntry]) -> serde_json::Result<String> {
                let mut buf = Vec::new();
                serialize(entries, &mut serde_json::Serializer::new(&mut buf))?;
                Ok(String::from_utf8_lossy(&buf).into_owned())
            }

            /// Parse an array in YAML or JSON form, as found in a
            /// config map's data field. Blank input is an empty array.
            ///
            /// # Errors
            /// Returns the `serde_yaml` error if the text is not an array of
            /// entries.
            pub fn parse(text: &str) -> Result<Vec<MappingEntry>, serde_yaml::Error> {
                if text.trim().is_empty() {
                    return Ok(Vec::new());
                }
                deserialize(serde_yaml::Deserializer::from_str(text))
            }
        }
    };
}

wire_format!(
    /// Wire adapter for role entries: `{rolearn, username, groups}`.
    role_wire,
    rolearn
);
wire_format!(
    /// Wire adapter for user entries: `{userarn, username, groups}`.
    user_wire,
    userarn
);

// ---------------------------------------------------------------------------
// SnippetId
// ---------------------------------------------------------------------------

/// Identity of a snippet: `namespace/name`.
///
/// Ordering is lexicographic by namespace, then name. Collision precedence
/// relies on this ordering.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnippetId {
    namespace: String,
    name: String,
}

impl SnippetId {
    /// Create a validated identity.
    ///
    /// # Errors
    /// Returns an error if either part is empty or contains `/` or whitespace.
    pub fn new(namespace: &str, name: &str) -> Result<Self, ValidationError> {
        Self::validate_part("namespace", namespace)?;
        Self::validate_part("name", name)?;
        Ok(Self {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        })
    }

    /// The namespace part.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The name part.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate_part(subject: &str, value: &str) -> Result<(), ValidationError> {
        let reason = if value.is_empty() {
            "must not be empty"
        } else if value.contains('/') {
            "must not contain '/'"
        } else if value.chars().any(char::is_whitespace) {
            "must not contain whitespace"
        } else {
            return Ok(());
        };
        Err(ValidationError {
            subject: format!("snippet {subject}"),
            value: value.to_owned(),
            reason: reason.to_owned(),
        })
    }
}

impl fmt::Display for SnippetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for SnippetId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((namespace, name)) = s.split_once('/') else {
            return Err(ValidationError {
                subject: "snippet id".to_owned(),
                value: s.to_owned(),
                reason: "expected <namespace>/<name>".to_owned(),
            });
        };
        Self::new(namespace, name)
    }
}

impl TryFrom<String> for SnippetId {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SnippetId> for String {
    fn from(id: SnippetId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// A malformed identity, ARN, or entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What was being validated (e.g. `"role arn"`).
    pub subject: String,
    /// The rejected value.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} {:?}: {}", self.subject, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
