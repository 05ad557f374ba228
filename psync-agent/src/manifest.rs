//! Declared policies.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{PolicySpec, SpecError};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Policy '{key}' is invalid: {source}")]
    Invalid {
        key: String,
        #[source]
        source: SpecError,
    },

    #[error("Policies '{0}' and '{1}' declare the same name in one compartment")]
    DuplicateName(String, String),
}

/// Desired policies keyed by a caller-chosen key.
///
/// ```json
/// { "policies": { "storage": { "name": "...", "description": "...",
///   "compartment_id": "...", "statements": ["..."] } } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub policies: BTreeMap<String, PolicySpec>,
}

impl Manifest {
    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ManifestError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut seen: BTreeMap<(&str, &str), &str> = BTreeMap::new();
        for (key, spec) in &self.policies {
            spec.validate().map_err(|source| ManifestError::Invalid {
                key: key.clone(),
                source,
            })?;
            let name_key = (spec.compartment_id.as_str(), spec.name.as_str());
            if let Some(other) = seen.insert(name_key, key.as_str()) {
                return Err(ManifestError::DuplicateName(other.to_string(), key.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "policies": {
            "storage": {
                "name": "storage-admins",
                "description": "Storage admins",
                "compartment_id": "ocid1.compartment.oc1..x",
                "statements": [
                    "Allow group A to read buckets in compartment X",
                    "Allow group A to write objects in compartment X"
                ]
            }
        }
    }"#;

    #[test]
    fn test_parse_keeps_statement_order() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let spec = &manifest.policies["storage"];
        assert_eq!(spec.name, "storage-admins");
        assert_eq!(
            spec.statements,
            vec![
                "Allow group A to read buckets in compartment X",
                "Allow group A to write objects in compartment X",
            ]
        );
    }

    #[test]
    fn test_parse_rejects_invalid_policy() {
        let content = MANIFEST.replace(r#""name": "storage-admins""#, r#""name": """#);
        let err = Manifest::parse(&content).unwrap_err();
        assert!(matches!(err, ManifestError::Invalid { ref key, source: SpecError::MissingName } if key == "storage"));
    }

    #[test]
    fn test_parse_rejects_duplicate_names() {
        let mut manifest = Manifest::parse(MANIFEST).unwrap();
        let copy = manifest.policies["storage"].clone();
        manifest.policies.insert("storage-copy".to_string(), copy);
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateName(_, _)));
    }

    #[test]
    fn test_empty_manifest_is_valid() {
        let manifest = Manifest::parse("{}").unwrap();
        assert!(manifest.policies.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = Manifest::load(Path::new("/nonexistent/psync.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }
}
