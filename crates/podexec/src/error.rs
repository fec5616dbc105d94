//! Error types for the podexec crate.

use std::time::Duration;

use thiserror::Error;

/// Lifecycle phases that carry a hard deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for the pod to report the Running phase.
    Readiness,
    /// Streaming a command inside the pod.
    Exec,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Readiness => f.write_str("readiness"),
            Self::Exec => f.write_str("exec"),
        }
    }
}

/// Errors that can occur while driving a pod through its lifecycle.
///
/// Every variant is fatal: it aborts the remaining lifecycle steps and is
/// propagated to the caller. A command that fails *inside* the pod is not an
/// error; it surfaces as [`ExecOutcome::FailedRemotely`] on the result.
///
/// [`ExecOutcome::FailedRemotely`]: crate::types::ExecOutcome::FailedRemotely
#[derive(Error, Debug)]
pub enum PodExecError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Kubeconfig could not be read or resolved.
    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// The watch stream failed or delivered a malformed event.
    #[error("watch failed for pod {namespace}/{name}: {reason}")]
    Watch {
        /// Namespace of the watched pod.
        namespace: String,
        /// Name of the watched pod.
        name: String,
        /// What went wrong with the stream.
        reason: String,
    },

    /// A readiness or exec deadline elapsed.
    #[error("timed out after {}s waiting for {phase} of pod {namespace}/{name}", timeout.as_secs())]
    Timeout {
        /// Which deadline elapsed.
        phase: TimeoutPhase,
        /// Namespace of the pod.
        namespace: String,
        /// Name of the pod.
        name: String,
        /// The deadline that was applied.
        timeout: Duration,
    },
}

impl PodExecError {
    /// Check whether this is the API's conflict response for a resource
    /// that already exists (benign during creation).
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::KubeApi(kube::Error::Api(e)) if e.code == 409)
    }

    /// Check whether this is the API's not-found response.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KubeApi(kube::Error::Api(e)) if e.code == 404)
    }
}

/// A specialized Result type for pod lifecycle operations.
pub type Result<T> = std::result::Result<T, PodExecError>;
