//! Read side over generated documents.

use std::path::{Path, PathBuf};

use serde_json::json;

use crate::error::{ClosingError, Result};
use crate::store::{Database, DocumentRecord, Id};

/// File of a document within a package, as `(path, file name)`. Relative
/// paths are taken from `output_dir`.
pub fn resolve_document_file(
    db: &Database,
    output_dir: &Path,
    package_id: Id,
    document_id: Id,
) -> Result<(PathBuf, String)> {
    let missing = || {
        ClosingError::not_found(
            "Document file not found",
            json!({ "package_id": package_id, "document_id": document_id }),
        )
    };

    let document = db
        .document(document_id)
        .filter(|d| d.package_id == package_id)
        .ok_or_else(missing)?;
    let stored = document.file_path.as_ref().ok_or_else(missing)?;

    let path = if stored.is_absolute() {
        stored.clone()
    } else {
        output_dir.join(stored)
    };
    if !path.exists() {
        return Err(missing());
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((path, name))
}

/// Documents, newest first, optionally limited to one package.
pub fn list_documents(db: &Database, package_id: Option<Id>) -> Vec<&DocumentRecord> {
    let mut documents: Vec<&DocumentRecord> = db
        .documents
        .iter()
        .filter(|d| package_id.map_or(true, |id| d.package_id == id))
        .collect();
    documents.sort_by(|a, b| b.id.cmp(&a.id));
    documents
}
