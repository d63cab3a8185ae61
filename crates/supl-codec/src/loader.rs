use std::path::{Path, PathBuf};

use tracing::debug;

use crate::engine::Schema;
use crate::error::SchemaError;
use crate::schema::GrammarFile;

/// Parse one grammar file from disk.
pub fn load_grammar(path: impl AsRef<Path>) -> Result<GrammarFile, SchemaError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_grammar(&contents).map_err(|reason| SchemaError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_grammar(yaml: &str) -> Result<GrammarFile, String> {
    serde_yml::from_str(yaml).map_err(|e| e.to_string())
}

/// Compile a schema from in-memory grammar documents.
///
/// This is the primary entry point used in tests.
pub fn schema_from_str(name: &str, documents: &[&str]) -> Result<Schema, SchemaError> {
    let mut files = Vec::with_capacity(documents.len());
    for (i, doc) in documents.iter().enumerate() {
        let file = parse_grammar(doc).map_err(|reason| SchemaError::Parse {
            path: PathBuf::from(format!("<{name}#{i}>")),
            reason,
        })?;
        files.push(file);
    }
    Schema::compile(name, files)
}

/// Grammar files in `dir` whose names start with `{prefix}-` and end in
/// `.yaml` or `.yml`, sorted by name.
pub fn family_files(dir: impl AsRef<Path>, prefix: &str) -> Result<Vec<PathBuf>, SchemaError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|source| SchemaError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let stem = format!("{prefix}-");
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SchemaError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_yaml = name.ends_with(".yaml") || name.ends_with(".yml");
        if is_yaml && name.starts_with(&stem) && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load and compile every `{prefix}-*.yaml` file in `dir` into one schema.
///
/// Returns `Ok(None)` when no file of the family exists.
pub fn load_family(dir: impl AsRef<Path>, prefix: &str) -> Result<Option<Schema>, SchemaError> {
    let files = family_files(&dir, prefix)?;
    if files.is_empty() {
        return Ok(None);
    }
    let mut grammars = Vec::with_capacity(files.len());
    for path in &files {
        debug!(path = %path.display(), "loading grammar file");
        grammars.push(load_grammar(path)?);
    }
    Schema::compile(prefix, grammars).map(Some)
}

/// Like [`load_family`], but a missing family is an error.
pub fn require_family(dir: impl AsRef<Path>, prefix: &str) -> Result<Schema, SchemaError> {
    let dir = dir.as_ref();
    load_family(dir, prefix)?.ok_or_else(|| SchemaError::NoFiles {
        dir: dir.to_path_buf(),
        prefix: prefix.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_family_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("supl-common.yaml"),
            "module: A\ntypes:\n  Flag: BOOLEAN\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("supl-pdu.yml"),
            "module: B\ntypes:\n  PDU:\n    sequence:\n      fields:\n        - { name: f, type: Flag }\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("rrlp-pdu.yaml"), "module: C\ntypes: {}\n").unwrap();
        std::fs::write(dir.path().join("supl-notes.txt"), "ignored").unwrap();

        let files = family_files(dir.path(), "supl").unwrap();
        assert_eq!(files.len(), 2);

        let schema = require_family(dir.path(), "supl").unwrap();
        assert!(schema.has_type("PDU"));
        assert!(schema.has_type("Flag"));
        assert!(!schema.has_type("Other"));
    }

    #[test]
    fn missing_family_is_none_or_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_family(dir.path(), "lpp").unwrap().is_none());
        assert!(matches!(
            require_family(dir.path(), "lpp"),
            Err(SchemaError::NoFiles { .. })
        ));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("supl-bad.yaml");
        std::fs::write(&path, "module: [unterminated").unwrap();
        match load_grammar(&path) {
            Err(SchemaError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected Parse, got {:?}", other),
        }
    }
}
