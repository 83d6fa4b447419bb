//! Manifest files and manifest lists.
//!
//! A manifest is a JSON array of simulation documents. A manifest list is a
//! plain text file naming one manifest path per line; relative paths resolve
//! against the directory holding the list.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{AlphaBatchError, Result};
use crate::fingerprint::fingerprint;
use crate::model::SimulationRequest;

/// A parsed request together with its fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub fingerprint: String,
    pub request: SimulationRequest,
}

impl ManifestEntry {
    pub fn from_value(raw: &Value) -> Result<Self> {
        let request = SimulationRequest::from_value(raw)?;
        Ok(Self {
            fingerprint: fingerprint(&request),
            request,
        })
    }
}

/// Load and validate every entry of a manifest. Any invalid entry fails the file.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let text = fs::read_to_string(path).map_err(|e| {
        AlphaBatchError::manifest(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_manifest(&text).map_err(|e| match e {
        AlphaBatchError::Manifest(msg) => {
            AlphaBatchError::manifest(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Parse manifest text.
pub fn parse_manifest(text: &str) -> Result<Vec<ManifestEntry>> {
    let document: Value = serde_json::from_str(text)
        .map_err(|e| AlphaBatchError::manifest(format!("invalid JSON: {}", e)))?;
    let items = document
        .as_array()
        .ok_or_else(|| AlphaBatchError::manifest("manifest content is not a list"))?;

    let mut entries = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let entry = ManifestEntry::from_value(item)
            .map_err(|e| AlphaBatchError::manifest(format!("entry {}: {}", idx, e)))?;
        entries.push(entry);
    }
    debug!("Parsed {} manifest entries", entries.len());
    Ok(entries)
}

/// Read a manifest list file into manifest paths, in file order.
pub fn read_manifest_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(path).map_err(|e| {
        AlphaBatchError::manifest(format!("cannot read manifest list {}: {}", path.display(), e))
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let candidate = PathBuf::from(line);
            if candidate.is_absolute() {
                candidate
            } else {
                base.join(candidate)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_a_list_of_documents_in_order() {
        let text = r#"[
            {"type": "REGULAR", "regular": "rank(close)"},
            "rank(volume)",
            {"type": "SUPER", "combo": "c", "selection": "s"}
        ]"#;
        let entries = parse_manifest(text).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].request.payload().describe(), "rank(close)");
        assert_eq!(entries[1].request.payload().describe(), "rank(volume)");
        assert!(entries[2].request.is_super());
    }

    #[test]
    fn non_list_manifest_is_rejected() {
        let err = parse_manifest(r#"{"regular": "x"}"#).unwrap_err();
        assert!(matches!(err, AlphaBatchError::Manifest(_)));
        assert!(parse_manifest("not json").is_err());
    }

    #[test]
    fn one_bad_entry_fails_the_manifest() {
        let err = parse_manifest(r#"[{"regular": "x"}, {"type": "REGULAR"}]"#).unwrap_err();
        assert!(err.to_string().contains("entry 1"));
    }

    #[test]
    fn manifest_list_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let list_path = dir.path().join("batch.txt");
        let mut file = fs::File::create(&list_path).unwrap();
        writeln!(file, "first.json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "# skipped").unwrap();
        writeln!(file, "/abs/second.json").unwrap();

        let paths = read_manifest_list(&list_path).unwrap();
        assert_eq!(paths, vec![dir.path().join("first.json"), PathBuf::from("/abs/second.json")]);
    }

    #[test]
    fn equivalent_spellings_share_a_fingerprint() {
        let entries = parse_manifest(
            r#"[
                "x",
                {"regular": "x"},
                {"type": "REGULAR", "regular": "x", "settings": {"delay": 1}},
                {"regular": "x", "settings": {"delay": 1, "extraKnob": true}}
            ]"#,
        )
        .unwrap();
        assert!(entries.iter().all(|entry| entry.request == entries[0].request));
        assert!(entries.iter().all(|entry| entry.fingerprint == entries[0].fingerprint));
        assert_eq!(entries[0].fingerprint, fingerprint(&entries[0].request));

        let other = ManifestEntry::from_value(&serde_json::json!({"regular": "x", "settings": {"delay": 0}}))
            .unwrap();
        assert_ne!(other.fingerprint, entries[0].fingerprint);
    }

    #[test]
    fn missing_manifest_is_a_manifest_error() {
        let err = load_manifest(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.is_user_error());
    }
}
