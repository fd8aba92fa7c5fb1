//! Domain model: mapping entries, snippets and the shared table.

pub mod entry;
pub mod snippet;
pub mod table;

pub use entry::{EntryKind, MappingEntry, SnippetId, ValidationError};
pub use snippet::{Collision, CollisionHolder, Phase, Snippet, SnippetSpec, SnippetStatus};
pub use table::SharedTable;
