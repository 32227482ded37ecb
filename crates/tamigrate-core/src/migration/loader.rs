//! Change-set files.
//!
//! One JSON document per change set. A directory is read in file-name order,
//! which becomes the planner's declaration order. The file stem carries no
//! meaning; the `id` inside the document does.

use super::changeset::{ChangeSet, ChangeSetRecord};
use super::error::MigrationError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const EXTENSION: &str = "json";

/// Load every `*.json` change set in `dir`, sorted by file name.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<ChangeSet>, MigrationError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|e| load_error(dir, e))?;

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| load_error(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    let change_sets = paths
        .iter()
        .map(|path| load_file(path))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(dir = %dir.display(), count = change_sets.len(), "loaded change sets");
    Ok(change_sets)
}

/// Load and validate one change-set file.
pub fn load_file(path: impl AsRef<Path>) -> Result<ChangeSet, MigrationError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| load_error(path, e))?;
    let record: ChangeSetRecord =
        serde_json::from_str(&text).map_err(|e| load_error(path, e))?;
    ChangeSet::try_from(record)
}

/// Write a change set as pretty JSON.
pub fn write_file(path: impl AsRef<Path>, change_set: &ChangeSet) -> Result<(), MigrationError> {
    let path = path.as_ref();
    let mut json = change_set.to_json()?;
    json.push('\n');
    fs::write(path, json).map_err(|e| load_error(path, e))
}

fn load_error(path: &Path, err: impl std::fmt::Display) -> MigrationError {
    MigrationError::Load {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;
    use crate::migration::{ErrorKind, Operation};
    use tempfile::tempdir;

    fn schedule() -> ChangeSet {
        ChangeSetRecord::new("0001_initial")
            .initial()
            .with_operation(Operation::create_entity(
                "Schedule",
                [FieldDef::auto_id("id")],
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0001_initial.json");

        let cs = schedule();
        write_file(&path, &cs).unwrap();
        let loaded = load_file(&path).unwrap();

        assert_eq!(loaded, cs);
        assert_eq!(loaded.checksum(), cs.checksum());
    }

    #[test]
    fn test_load_dir_orders_by_file_name_and_skips_other_files() {
        let dir = tempdir().unwrap();
        let second = ChangeSetRecord::new("b")
            .with_dependency("0001_initial")
            .with_operation(Operation::add_field(
                "Schedule",
                FieldDef::integer("slot").nullable(),
            ))
            .build()
            .unwrap();

        write_file(dir.path().join("0002_b.json"), &second).unwrap();
        write_file(dir.path().join("0001_a.json"), &schedule()).unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();

        let loaded = load_dir(dir.path()).unwrap();
        let ids: Vec<&str> = loaded.iter().map(|cs| cs.id()).collect();
        assert_eq!(ids, vec!["0001_initial", "b"]);
    }

    #[test]
    fn test_malformed_json_is_load_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ \"id\": ").unwrap();

        let err = load_dir(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_invalid_change_set_is_validation_error() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("empty.json"),
            r#"{"id": "0002_empty", "operations": []}"#,
        )
        .unwrap();

        let err = load_dir(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_misspelled_key_is_load_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0002_typo.json");

        // A misspelled dependency list would otherwise leave the set unordered.
        fs::write(
            &path,
            r#"{
                "id": "0002_typo",
                "dependecies": ["0009_absent"],
                "operations": [{"op": "remove_field", "entity": "ClassList", "name": "owner"}]
            }"#,
        )
        .unwrap();
        let err = load_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(err.to_string().contains("dependecies"));

        // Same inside a field definition.
        fs::write(
            &path,
            r#"{
                "id": "0002_typo",
                "dependencies": ["0001_initial"],
                "operations": [{
                    "op": "add_field",
                    "entity": "MyUser",
                    "field": {"name": "email", "type": "string", "max_length": 50, "uniq": true}
                }]
            }"#,
        )
        .unwrap();
        let err = load_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(err.to_string().contains("uniq"));

        // And inside an operation.
        fs::write(
            &path,
            r#"{
                "id": "0002_typo",
                "dependencies": ["0001_initial"],
                "operations": [{"op": "remove_field", "entity": "ClassList", "field": "owner"}]
            }"#,
        )
        .unwrap();
        let err = load_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
    }

    #[test]
    fn test_missing_dir() {
        let dir = tempdir().unwrap();
        let err = load_dir(dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
    }
}
