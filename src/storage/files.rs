/// JSON flat-file helpers shared by the device registry and the task log
use std::fs;
use std::path::Path;

use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// Create `path` holding an empty JSON object if it does not exist yet
pub fn ensure_json_file(path: &Path) -> Result<(), StorageError> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, "{}")?;
    info!("'{}' file created.", path.display());
    Ok(())
}

/// Read a JSON document, treating a missing or empty file as the default value
pub fn read_json<T>(path: &Path) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(T::default()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write a JSON document atomically
///
/// The status watcher reads these files while the worker writes them, so the
/// content goes to a sibling temp file first and is renamed into place.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let content = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn ensure_creates_empty_object_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sensors.json");
        ensure_json_file(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");

        fs::write(&path, r#"{"a":"b"}"#).unwrap();
        ensure_json_file(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"a":"b"}"#);
    }

    #[test]
    fn missing_and_empty_files_read_as_default() {
        let dir = tempdir().unwrap();
        let missing: BTreeMap<String, String> = read_json(&dir.path().join("missing.json")).unwrap();
        assert!(missing.is_empty());

        let empty = dir.path().join("empty.json");
        fs::write(&empty, "").unwrap();
        let empty: BTreeMap<String, String> = read_json(&empty).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let mut value = BTreeMap::new();
        value.insert("k".to_string(), "v".to_string());

        write_json(&path, &value).unwrap();
        let back: BTreeMap<String, String> = read_json(&path).unwrap();

        assert_eq!(back, value);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let result: Result<BTreeMap<String, String>, _> = read_json(&path);
        assert!(matches!(result, Err(StorageError::Json(_))));
    }
}
