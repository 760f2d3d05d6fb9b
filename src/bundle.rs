//! Directory packaging into ConfigMap bundles
//!
//! A bundle is a flattened snapshot of an experiment directory: every
//! included file becomes one ConfigMap entry whose key is the relative path
//! with separators rewritten to `__` (ConfigMap keys must match
//! `[-._a-zA-Z0-9]+`). Text files land in `data`, everything else in
//! `binaryData`, so the consuming side never has to guess which entries were
//! byte-encoded.
//!
//! The API server caps ConfigMaps at roughly 3MB; packaging warns above a
//! 2MB soft threshold but still proceeds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tracing::{info, warn};

use crate::{Error, Result};

/// Soft size threshold above which packaging emits a warning
pub const BUNDLE_WARN_BYTES: usize = 2_000_000;

/// Path segments excluded from packaging wherever they appear
const EXCLUDED_SEGMENTS: &[&str] = &[
    "mlruns",
    "models",
    ".git",
    "__pycache__",
    ".ipynb_checkpoints",
    "data",
    "notebooks",
    ".dvc",
    ".pytest_cache",
    ".venv",
    "venv",
    ".DS_Store",
];

/// Filename suffixes excluded from packaging
const EXCLUDED_SUFFIXES: &[&str] = &[".pyc", ".pyo", ".pyd", ".egg-info"];

/// One bundle entry, tagged by how the file read back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleValue {
    /// File content that decoded as UTF-8
    Text(String),
    /// Raw bytes for files that did not decode as UTF-8
    Binary(Vec<u8>),
}

impl BundleValue {
    /// Length of this entry as it will travel on the wire.
    ///
    /// Binary entries are serialized as base64 inside `binaryData`, so their
    /// encoded length is what counts against the ConfigMap size limit.
    pub fn encoded_len(&self) -> usize {
        match self {
            BundleValue::Text(s) => s.len(),
            BundleValue::Binary(b) => base64::encoded_len(b.len(), true).unwrap_or(usize::MAX),
        }
    }
}

/// A flattened directory snapshot ready for transport as a ConfigMap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    /// Sanitized key → content, ordered for deterministic output
    pub entries: BTreeMap<String, BundleValue>,
}

/// Encode a relative path into a ConfigMap-legal key.
///
/// Both separator styles collapse to `__`. The scheme is not injective for
/// paths that themselves contain `__`; [`Bundle::from_dir`] rejects the
/// resulting collisions instead of silently overwriting.
pub fn encode_key(relative: &Path) -> String {
    relative
        .to_string_lossy()
        .replace('\\', "__")
        .replace('/', "__")
}

/// Reverse [`encode_key`], recovering the original relative path
pub fn decode_key(key: &str) -> String {
    key.replace("__", "/")
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

/// Check whether a relative path matches an exclusion rule.
///
/// A path is excluded if any segment exactly matches an excluded directory
/// name, or the filename ends with an excluded suffix.
fn is_excluded(relative: &Path) -> bool {
    for component in relative.components() {
        let segment = component.as_os_str().to_string_lossy();
        if EXCLUDED_SEGMENTS.contains(&segment.as_ref()) {
            return true;
        }
    }
    if let Some(name) = relative.file_name() {
        let name = name.to_string_lossy();
        if EXCLUDED_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return true;
        }
    }
    false
}

impl Bundle {
    /// Package a directory into a bundle.
    ///
    /// Walks the full subtree in filename order, skipping excluded paths.
    /// Two distinct paths that flatten to the same key (one of them contains
    /// a literal `__`) abort packaging with a validation error naming both.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let mut sources: BTreeMap<String, PathBuf> = BTreeMap::new();

        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::validation(format!("path outside bundle root: {}", e)))?
                .to_path_buf();
            if is_excluded(&relative) {
                continue;
            }

            let key = encode_key(&relative);
            if !is_valid_key(&key) {
                return Err(Error::validation(format!(
                    "file name '{}' cannot be encoded as a ConfigMap key \
                     (allowed characters: alphanumerics, '-', '_', '.')",
                    relative.display()
                )));
            }
            if let Some(previous) = sources.get(&key) {
                return Err(Error::validation(format!(
                    "bundle key collision: '{}' and '{}' both flatten to key '{}'",
                    previous.display(),
                    relative.display(),
                    key
                )));
            }

            let bytes = std::fs::read(entry.path())?;
            let value = match String::from_utf8(bytes) {
                Ok(text) => BundleValue::Text(text),
                Err(err) => BundleValue::Binary(err.into_bytes()),
            };
            sources.insert(key.clone(), relative);
            entries.insert(key, value);
        }

        let bundle = Bundle { entries };
        let total = bundle.total_bytes();
        info!(
            files = bundle.entries.len(),
            kb = total / 1024,
            "packaged directory into bundle"
        );
        if total > BUNDLE_WARN_BYTES {
            warn!(
                mb = format!("{:.1}", total as f64 / 1_048_576.0),
                "bundle size is approaching the 3MB ConfigMap limit; \
                 consider excluding more files"
            );
        }
        Ok(bundle)
    }

    /// Cumulative serialized size in bytes across all entries
    pub fn total_bytes(&self) -> usize {
        self.entries.values().map(BundleValue::encoded_len).sum()
    }

    /// Render this bundle as a ConfigMap named `name` in `namespace`
    pub fn to_config_map(&self, name: &str, namespace: &str) -> ConfigMap {
        let mut data = BTreeMap::new();
        let mut binary_data = BTreeMap::new();
        for (key, value) in &self.entries {
            match value {
                BundleValue::Text(text) => {
                    data.insert(key.clone(), text.clone());
                }
                BundleValue::Binary(bytes) => {
                    binary_data.insert(key.clone(), ByteString(bytes.clone()));
                }
            }
        }

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    [(
                        "app.kubernetes.io/managed-by".to_string(),
                        "mlp".to_string(),
                    )]
                    .into(),
                ),
                ..Default::default()
            },
            data: (!data.is_empty()).then_some(data),
            binary_data: (!binary_data.is_empty()).then_some(binary_data),
            ..Default::default()
        }
    }
}

/// Upsert a bundle into the target namespace.
///
/// Creates the ConfigMap; a name conflict replaces the existing one so a
/// resubmitted job always ships current code.
pub async fn apply_bundle(
    client: &Client,
    namespace: &str,
    name: &str,
    bundle: &Bundle,
) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let config_map = bundle.to_config_map(name, namespace);

    match api.create(&PostParams::default(), &config_map).await {
        Ok(_) => {
            info!(name = %name, "created bundle ConfigMap");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            api.replace(name, &PostParams::default(), &config_map)
                .await?;
            info!(name = %name, "replaced bundle ConfigMap");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete a bundle's ConfigMap. Absence is not an error.
pub async fn delete_bundle(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(name = %name, "deleted bundle ConfigMap");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &[u8]) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    // =========================================================================
    // Story: Packaging Is Deterministic
    // =========================================================================

    #[test]
    fn story_packaging_twice_yields_identical_bundles() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "train.py", b"print('hi')\n");
        write(dir.path(), "src/model.py", b"import torch\n");
        write(dir.path(), "weights.bin", &[0u8, 159, 146, 150]);

        let first = Bundle::from_dir(dir.path()).unwrap();
        let second = Bundle::from_dir(dir.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total_bytes(), second.total_bytes());
    }

    // =========================================================================
    // Story: Key Encoding
    // =========================================================================

    #[test]
    fn story_nested_paths_flatten_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/models/net.py", b"pass\n");

        let bundle = Bundle::from_dir(dir.path()).unwrap();
        // "models" only excludes when it is its own segment; here it is not
        let key = "src__models__net.py";
        assert!(bundle.entries.contains_key(key));
        assert_eq!(decode_key(key), "src/models/net.py");
    }

    #[test]
    fn story_round_trip_holds_without_literal_double_underscore() {
        for path in ["train.py", "src/utils.py", "configs/prod/train.yaml"] {
            let key = encode_key(Path::new(path));
            assert_eq!(decode_key(&key), path);
        }
    }

    /// A file literally named `a__b.txt` flattens to the same key as the
    /// nested `a/b.txt`. That ambiguity must abort packaging, not silently
    /// pick a winner.
    #[test]
    fn story_key_collision_is_flagged_not_resolved() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a__b.txt", b"flat\n");
        write(dir.path(), "a/b.txt", b"nested\n");

        assert_eq!(
            encode_key(Path::new("a__b.txt")),
            encode_key(Path::new("a/b.txt"))
        );

        let err = Bundle::from_dir(dir.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("collision"), "unexpected error: {}", msg);
        assert!(msg.contains("a__b.txt"));
    }

    #[test]
    fn rejects_unencodable_file_names() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "has space.py", b"pass\n");

        let err = Bundle::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("has space.py"));
    }

    // =========================================================================
    // Story: Exclusion Rules
    // =========================================================================

    #[test]
    fn story_excludes_caches_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "train.py", b"print('hi')\n");
        write(dir.path(), ".git/HEAD", b"ref: refs/heads/main\n");
        write(dir.path(), "__pycache__/train.cpython-310.pyc", b"\x00\x01");
        write(dir.path(), "src/helper.pyc", b"\x00\x01");
        write(dir.path(), "data/raw.csv", b"a,b\n");
        write(dir.path(), "mlruns/0/meta.yaml", b"x\n");
        write(dir.path(), "venv/lib/site.py", b"x\n");

        let bundle = Bundle::from_dir(dir.path()).unwrap();
        let keys: Vec<_> = bundle.entries.keys().cloned().collect();
        assert_eq!(keys, vec!["train.py".to_string()]);
    }

    #[test]
    fn exclusion_matches_whole_segments_only() {
        // "dataset" contains "data" but is not the excluded segment
        assert!(!is_excluded(Path::new("dataset/info.txt")));
        assert!(is_excluded(Path::new("data/info.txt")));
        assert!(is_excluded(Path::new("sub/data/info.txt")));
        assert!(is_excluded(Path::new("pkg.egg-info")));
        assert!(is_excluded(Path::new(".DS_Store")));
    }

    // =========================================================================
    // Story: Size Accounting
    // =========================================================================

    #[test]
    fn story_size_is_sum_of_encoded_lengths() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "train.py", b"0123456789"); // 10 text bytes
        write(dir.path(), "weights.bin", &[255u8; 5]); // 5 raw -> 8 base64

        let bundle = Bundle::from_dir(dir.path()).unwrap();
        let expected: usize = bundle.entries.values().map(BundleValue::encoded_len).sum();
        assert_eq!(bundle.total_bytes(), expected);
        assert_eq!(bundle.total_bytes(), 10 + 8);
    }

    #[test]
    fn story_excluded_files_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "train.py", b"print('hi')\n");
        let before = Bundle::from_dir(dir.path()).unwrap().total_bytes();

        write(dir.path(), "cache.pyc", b"xxxxxxxxxxxxxxxx");
        let after = Bundle::from_dir(dir.path()).unwrap().total_bytes();
        assert_eq!(before, after);

        write(dir.path(), "extra.py", b"x = 1\n");
        let with_extra = Bundle::from_dir(dir.path()).unwrap().total_bytes();
        assert!(with_extra > after);
    }

    // =========================================================================
    // Story: Text/Binary Tagging
    // =========================================================================

    /// End-to-end: a text script and a non-UTF-8 weights file produce one
    /// entry of each kind, and the binary side survives the wire encoding.
    #[test]
    fn story_text_and_binary_entries_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let weights = vec![0u8, 159, 146, 150, 255, 0, 1, 2];
        write(dir.path(), "train.py", b"import mlflow\n");
        write(dir.path(), "weights.bin", &weights);

        let bundle = Bundle::from_dir(dir.path()).unwrap();
        assert_eq!(bundle.entries.len(), 2);
        assert_eq!(
            bundle.entries.get("train.py"),
            Some(&BundleValue::Text("import mlflow\n".to_string()))
        );
        assert_eq!(
            bundle.entries.get("weights.bin"),
            Some(&BundleValue::Binary(weights.clone()))
        );

        // On the wire the binary entry is base64 inside binaryData
        let config_map = bundle.to_config_map("job-code", "ml-platform");
        let json = serde_json::to_value(&config_map).unwrap();
        assert_eq!(json["data"]["train.py"], "import mlflow\n");
        let encoded = json["binaryData"]["weights.bin"].as_str().unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), weights);
    }

    #[test]
    fn config_map_carries_name_namespace_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "train.py", b"pass\n");

        let bundle = Bundle::from_dir(dir.path()).unwrap();
        let config_map = bundle.to_config_map("train-1700000000-code", "ml-platform");
        assert_eq!(
            config_map.metadata.name.as_deref(),
            Some("train-1700000000-code")
        );
        assert_eq!(config_map.metadata.namespace.as_deref(), Some("ml-platform"));
        assert_eq!(
            config_map
                .metadata
                .labels
                .as_ref()
                .unwrap()
                .get("app.kubernetes.io/managed-by"),
            Some(&"mlp".to_string())
        );
        // No binary entries -> binaryData omitted entirely
        assert!(config_map.binary_data.is_none());
    }

    #[test]
    fn empty_directory_packages_to_empty_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = Bundle::from_dir(dir.path()).unwrap();
        assert!(bundle.entries.is_empty());
        assert_eq!(bundle.total_bytes(), 0);
    }
}
