//! File uploads from the browser side
//!
//! Uploaded files land beneath the data root. Localization files also get
//! their modification time recorded, so the next scan does not push them
//! back to the plugin that produced them.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use axum::body::Bytes;
use axum::extract::Multipart;
use figpreview_core::{is_contained_relative, modified_nanos, normalize_path, DataRoots, MtimeCache};

use crate::error::RequestError;

/// Collect every multipart field into memory, keyed by field name
pub async fn read_form(mut multipart: Multipart) -> Result<HashMap<String, Bytes>, RequestError> {
    let mut fields = HashMap::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let data = field.bytes().await?;
        fields.insert(name, data);
    }
    Ok(fields)
}

/// Take a required field out of a form
pub fn take_field(
    fields: &mut HashMap<String, Bytes>,
    name: &'static str,
) -> Result<Bytes, RequestError> {
    fields.remove(name).ok_or(RequestError::MissingField(name))
}

/// Destination of `filename` under the data root, or `None` if it escapes it
pub fn upload_destination(data_root: &Path, filename: &str) -> Option<PathBuf> {
    if !is_contained_relative(filename) {
        return None;
    }
    let rel: PathBuf = Path::new(&normalize_path(filename))
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if rel.as_os_str().is_empty() {
        return None;
    }
    Some(data_root.join(rel))
}

/// Write an uploaded file and refresh the localization cache if needed
pub async fn store_upload(
    roots: &DataRoots,
    mtimes: &MtimeCache,
    filename: &str,
    contents: &[u8],
) -> Result<PathBuf, RequestError> {
    let dest = upload_destination(&roots.data, filename)
        .ok_or_else(|| RequestError::InvalidFilename(filename.to_string()))?;
    let store_err = |source| RequestError::Store {
        path: dest.clone(),
        source,
    };

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(store_err)?;
    }
    tokio::fs::write(&dest, contents).await.map_err(store_err)?;
    tracing::info!("{} bytes written to {}", contents.len(), dest.display());

    if dest.starts_with(&roots.localization) {
        let metadata = tokio::fs::metadata(&dest).await.map_err(store_err)?;
        let mtime = modified_nanos(&metadata).map_err(store_err)?;
        tracing::info!("Updating modification time for {}", dest.display());
        mtimes.record(dest.clone(), mtime);
    }

    Ok(dest)
}
