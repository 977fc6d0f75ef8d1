//! Addressing for the session store: every value lives inside a document
//! (`collection/key`) at a field path made of validated segments.

use std::fmt;

use crate::dao::storage::{StorageError, StorageResult};

const MAX_SEGMENT_LEN: usize = 64;

/// Identifies one store document, the unit of atomicity for [`WriteBatch`](super::session_store::WriteBatch).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    collection: String,
    key: String,
}

impl DocumentRef {
    /// Build a document reference, validating both segments.
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> StorageResult<Self> {
        let collection = collection.into();
        let key = key.into();
        validate_segment(&collection)?;
        validate_segment(&key)?;
        Ok(Self { collection, key })
    }

    /// Name of the collection holding the document.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Key of the document inside its collection.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path addressing the whole document.
    pub fn root(&self) -> StorePath {
        StorePath {
            document: self.clone(),
            fields: Vec::new(),
        }
    }

    /// Shorthand for `self.root().field(segment)`.
    pub fn field(&self, segment: impl fmt::Display) -> StorePath {
        self.root().field(segment)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// Location of a value: a document plus a (possibly empty) list of field segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    document: DocumentRef,
    fields: Vec<String>,
}

impl StorePath {
    /// Extend the path by one field segment.
    ///
    /// Segments are validated lazily by the store: an invalid segment surfaces
    /// as [`StorageError::InvalidPath`] when the path is used.
    pub fn field(mut self, segment: impl fmt::Display) -> Self {
        self.fields.push(segment.to_string());
        self
    }

    /// Document this path belongs to.
    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    /// Field segments below the document root.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Whether the path addresses the document itself.
    pub fn is_document_root(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when a change at `self` is visible from a subscription on `other`,
    /// i.e. one of the two paths is a prefix of the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.document == other.document
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(left, right)| left == right)
    }

    /// Re-check every field segment; used by backends before touching data.
    pub fn validate(&self) -> StorageResult<()> {
        self.fields
            .iter()
            .try_for_each(|segment| validate_segment(segment))
            .map_err(|_| StorageError::InvalidPath {
                path: self.to_string(),
                reason: "segments must be 1-64 characters of [A-Za-z0-9_-]",
            })
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.document)?;
        for segment in &self.fields {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Whether `value` is usable as a path segment (and therefore as a user id).
pub fn is_valid_segment(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_SEGMENT_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_segment(value: &str) -> StorageResult<()> {
    if is_valid_segment(value) {
        Ok(())
    } else {
        Err(StorageError::InvalidPath {
            path: value.to_string(),
            reason: "segments must be 1-64 characters of [A-Za-z0-9_-]",
        })
    }
}
