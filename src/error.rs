//! Error types for mlp operations
//!
//! Errors carry the job/deployment name and namespace they relate to so
//! failures deep in a submission pipeline stay attributable. Remote failures
//! keep the underlying Kubernetes error intact.

use thiserror::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mlp operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error (auth failure, quota, malformed spec, ...)
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Input rejected before any remote call was made
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// A create was rejected because the name is already taken
    #[error("{kind} {name} already exists in namespace {namespace}")]
    Collision {
        /// Resource kind (Job, Deployment, ...)
        kind: String,
        /// Conflicting resource name
        name: String,
        /// Namespace the collision occurred in
        namespace: String,
    },

    /// A wait exceeded its budget without the resource reaching a terminal state
    #[error("timed out after {seconds}s waiting for {what}")]
    Timeout {
        /// What was being waited on
        what: String,
        /// The exhausted budget in seconds
        seconds: u64,
    },

    /// A job reported failed pods before ever reporting an active one
    #[error("job {job} failed before starting ({failed} failed pod(s))")]
    JobFailed {
        /// Name of the failed job
        job: String,
        /// Failed-pod count reported by the orchestrator
        failed: i32,
    },

    /// The second half of a Deployment+Service apply failed
    #[error("partial apply for model {model}: {message}")]
    PartialApply {
        /// Model whose apply was interrupted
        model: String,
        /// What was applied, what failed, and the disposition of the remainder
        message: String,
    },

    /// Filesystem error while packaging or reading configuration
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/serialize error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parse/serialize error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a collision error for a named resource
    pub fn collision(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::Collision {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a timeout error for the given wait
    pub fn timeout(what: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            what: what.into(),
            seconds,
        }
    }

    /// Check if this error is worth retrying at the call site
    ///
    /// Validation and collision errors require caller changes. A timed-out
    /// wait may be retried (the wait, not the submission). Job failures are
    /// terminal. Kubernetes errors retry only when not a 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Validation { .. } => false,
            Error::Collision { .. } => false,
            Error::Timeout { .. } => true,
            Error::JobFailed { .. } => false,
            Error::PartialApply { .. } => false,
            Error::Io(_) => false,
            Error::Yaml(_) => false,
            Error::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation in Submission Pipelines
    // ==========================================================================
    //
    // Each error kind maps to a different caller policy: validation errors
    // are surfaced immediately, collisions depend on the resource kind,
    // timeouts may retry the wait, and job failures are terminal.

    /// Story: validation catches bad input before any remote call
    #[test]
    fn story_validation_rejects_bad_input() {
        let err = Error::validation("invalid job name 'My Job!'");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("My Job!"));
        assert!(!err.is_retryable());

        match Error::validation("any message") {
            Error::Validation { message } => assert_eq!(message, "any message"),
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: a same-second resubmission collides on the derived job name
    #[test]
    fn story_job_name_collision_is_fatal() {
        let err = Error::collision("Job", "train-1700000000", "ml-platform");
        assert!(err.to_string().contains("train-1700000000"));
        assert!(err.to_string().contains("ml-platform"));
        // Jobs are never auto-replaced; the caller must resubmit
        assert!(!err.is_retryable());
    }

    /// Story: timeout and job-failure are distinguishable wait outcomes
    ///
    /// A caller that times out may retry the wait; a caller whose job failed
    /// must not.
    #[test]
    fn story_timeout_vs_job_failure() {
        let timeout = Error::timeout("job train-17 to start", 600);
        assert!(timeout.to_string().contains("600s"));
        assert!(timeout.is_retryable());

        let failed = Error::JobFailed {
            job: "train-17".to_string(),
            failed: 2,
        };
        assert!(failed.to_string().contains("2 failed pod(s)"));
        assert!(!failed.is_retryable());

        // The two must never be conflated
        assert!(!matches!(timeout, Error::JobFailed { .. }));
        assert!(!matches!(failed, Error::Timeout { .. }));
    }

    /// Story: partial applies report what landed and what did not
    #[test]
    fn story_partial_apply_names_the_orphan() {
        let err = Error::PartialApply {
            model: "churn".to_string(),
            message: "deployment created but service apply failed: quota exceeded; \
                      deployment rolled back"
                .to_string(),
        };
        assert!(err.to_string().contains("churn"));
        assert!(err.to_string().contains("rolled back"));
        assert!(!err.is_retryable());
    }
}
