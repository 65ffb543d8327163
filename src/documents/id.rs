use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extension of every stored artifact.
pub const ARTIFACT_EXTENSION: &str = "pdf";

/// Identifier of an uploaded document.
///
/// Always a canonical lowercase hyphenated UUID, so it is safe to splice into
/// a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid document identifier")]
pub struct InvalidDocumentId(pub String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidDocumentId> {
        // `Uuid::parse_str` also accepts braced and urn forms; only the plain
        // 36-char layout may reach the filesystem.
        if raw.len() != 36 {
            return Err(InvalidDocumentId(raw.to_string()));
        }
        Uuid::parse_str(raw)
            .map(|uuid| Self(uuid.hyphenated().to_string()))
            .map_err(|_| InvalidDocumentId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn artifact_path(&self, upload_dir: &Path) -> PathBuf {
        upload_dir.join(format!("{}.{}", self.0, ARTIFACT_EXTENSION))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = InvalidDocumentId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_generated_ids() {
        let id = DocumentId::generate();
        assert_eq!(DocumentId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn normalizes_uppercase() {
        let id = DocumentId::parse("1B57ADFD-E24D-4BBE-96D0-53DC791B1A75").unwrap();
        assert_eq!(id.as_str(), "1b57adfd-e24d-4bbe-96d0-53dc791b1a75");
    }

    #[test]
    fn rejects_traversal_and_free_text() {
        for raw in [
            "does-not-exist",
            "abc123",
            "../../etc/passwd",
            "",
            "{1b57adfd-e24d-4bbe-96d0-53dc791b1a75}",
            "1b57adfde24d4bbe96d053dc791b1a75",
        ] {
            assert!(DocumentId::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn artifact_path_stays_inside_upload_dir() {
        let id = DocumentId::parse("1b57adfd-e24d-4bbe-96d0-53dc791b1a75").unwrap();
        let path = id.artifact_path(Path::new("/srv/upload"));
        assert_eq!(
            path,
            PathBuf::from("/srv/upload/1b57adfd-e24d-4bbe-96d0-53dc791b1a75.pdf")
        );
    }
}
