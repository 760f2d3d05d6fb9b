//! Input validation for names, namespaces, and URIs
//!
//! All predicates here run before any remote call. Patterns are compiled
//! once per process.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-_]{2,49}$").expect("valid regex"));

static S3_URI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^s3://[a-z0-9][a-z0-9.-]{1,61}[a-z0-9](/.*)?$").expect("valid regex"));

static AZURE_URI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^azure://[a-z0-9][a-z0-9-]{1,61}[a-z0-9](/.*)?$").expect("valid regex"));

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("valid regex"));

static NAMESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

/// Validate a job or model name.
///
/// Lowercase alphanumeric with hyphens/underscores, 3-50 characters,
/// starting with an alphanumeric.
pub fn validate_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Validate an S3 URI (`s3://bucket/key`)
pub fn validate_s3_uri(uri: &str) -> bool {
    S3_URI_RE.is_match(uri)
}

/// Validate an Azure Blob Storage URI (`azure://container/path`)
pub fn validate_azure_uri(uri: &str) -> bool {
    AZURE_URI_RE.is_match(uri)
}

/// Validate an HTTP or HTTPS URL
pub fn validate_url(url: &str) -> bool {
    URL_RE.is_match(url)
}

/// Validate a Kubernetes namespace (DNS-1123 label, max 63 chars)
pub fn validate_namespace(namespace: &str) -> bool {
    namespace.len() <= 63 && NAMESPACE_RE.is_match(namespace)
}

/// Validate a Kubernetes context name (non-empty)
pub fn validate_context(context: &str) -> bool {
    !context.trim().is_empty()
}

/// Validate an MLflow model URI.
///
/// Accepts registry URIs (`models:/name/version`), run URIs
/// (`runs:/run-id/path`), and storage URIs (`s3://...`, `azure://...`,
/// `http(s)://...`).
pub fn validate_model_uri(uri: &str) -> bool {
    if let Some(rest) = uri.strip_prefix("models:/") {
        return !rest.is_empty();
    }
    if let Some(rest) = uri.strip_prefix("runs:/") {
        return !rest.is_empty();
    }
    validate_s3_uri(uri) || validate_azure_uri(uri) || validate_url(uri)
}

/// Parse a `KEY=VALUE` environment variable pair.
///
/// Splits on the first `=` only, so values may contain `=`.
pub fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| Error::validation(format!("invalid env var '{}', expected KEY=VALUE", pair)))?;
    if key.is_empty() {
        return Err(Error::validation(format!(
            "invalid env var '{}': key must not be empty",
            pair
        )));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_accepts_typical_identifiers() {
        assert!(validate_name("my-model"));
        assert!(validate_name("train_v2"));
        assert!(validate_name("abc"));
        assert!(validate_name("0-starts-with-digit"));
    }

    #[test]
    fn name_rejects_bad_identifiers() {
        assert!(!validate_name("ab")); // too short
        assert!(!validate_name("My-Model")); // uppercase
        assert!(!validate_name("-leading-dash"));
        assert!(!validate_name("has space"));
        assert!(!validate_name(&"a".repeat(51))); // too long
    }

    #[test]
    fn s3_and_azure_uris() {
        assert!(validate_s3_uri("s3://mlp-artifacts"));
        assert!(validate_s3_uri("s3://mlp-artifacts/models/churn"));
        assert!(!validate_s3_uri("s3://UP"));
        assert!(!validate_s3_uri("gs://bucket"));

        assert!(validate_azure_uri("azure://container/path"));
        assert!(!validate_azure_uri("azure://"));
    }

    #[test]
    fn urls() {
        assert!(validate_url("http://localhost:5000"));
        assert!(validate_url("https://mlflow.internal/api"));
        assert!(!validate_url("ftp://host"));
        assert!(!validate_url("not a url"));
    }

    #[test]
    fn namespaces() {
        assert!(validate_namespace("ml-platform"));
        assert!(validate_namespace("default"));
        assert!(!validate_namespace("ML-Platform"));
        assert!(!validate_namespace("-bad"));
        assert!(!validate_namespace(&"a".repeat(64)));
    }

    #[test]
    fn contexts() {
        assert!(validate_context("kind-mlp"));
        assert!(!validate_context(""));
        assert!(!validate_context("   "));
    }

    #[test]
    fn model_uris() {
        assert!(validate_model_uri("models:/churn/1"));
        assert!(validate_model_uri("runs:/abc123/model"));
        assert!(validate_model_uri("s3://bucket/model"));
        assert!(!validate_model_uri("models:/"));
        assert!(!validate_model_uri("churn"));
    }

    #[test]
    fn env_pairs() {
        assert_eq!(
            parse_env_pair("LR=0.001").unwrap(),
            ("LR".to_string(), "0.001".to_string())
        );
        // Only the first '=' splits
        assert_eq!(
            parse_env_pair("OPTS=a=b").unwrap(),
            ("OPTS".to_string(), "a=b".to_string())
        );
        // Empty value is allowed
        assert_eq!(
            parse_env_pair("FLAG=").unwrap(),
            ("FLAG".to_string(), String::new())
        );
        assert!(parse_env_pair("NOEQUALS").is_err());
        assert!(parse_env_pair("=value").is_err());
    }
}
