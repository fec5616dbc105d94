//! Types for the podexec crate.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

/// Desired state for a managed pod.
///
/// Immutable once a controller is constructed around it; the remote pod
/// object is the single source of truth for everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    /// Namespace the pod lives in.
    pub namespace: String,
    /// Pod name, unique within the namespace. Also used as the container name.
    pub name: String,
    /// Container image reference.
    pub image: String,
    /// Optional entrypoint override. Empty means the image default.
    pub command: Vec<String>,
    /// Optional single declared container port.
    pub container_port: Option<i32>,
}

impl PodSpec {
    /// Create a spec with no entrypoint override and no declared port.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            container_port: None,
        }
    }

    /// Set the entrypoint override.
    #[must_use]
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Declare a single container port.
    #[must_use]
    pub fn with_port(mut self, port: i32) -> Self {
        self.container_port = Some(port);
        self
    }
}

/// Phase of the pod lifecycle as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    /// Pod has been accepted but containers are not yet running.
    Pending,
    /// Pod is running with at least one container.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container failed.
    Failed,
    /// Pod status cannot be determined.
    #[default]
    Unknown,
}

impl PodPhase {
    /// Parse a pod phase from a Kubernetes phase string.
    #[must_use]
    pub fn from_k8s_phase(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// A status-change notification observed on a pod watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodEvent {
    /// Reported lifecycle phase.
    pub phase: PodPhase,
    /// Whether the Ready condition is True.
    pub ready: bool,
}

impl PodEvent {
    /// Extract an event from a watched pod object.
    #[must_use]
    pub fn from_pod(pod: &Pod) -> Self {
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(PodPhase::from_k8s_phase)
            .unwrap_or_default();

        let ready = pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });

        Self { phase, ready }
    }
}

/// A single command to run inside the pod's container, plus its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Already-tokenized argument sequence. Never re-split.
    pub command: Vec<String>,
    /// Hard deadline for the remote command.
    pub timeout: Duration,
}

impl ExecutionRequest {
    /// Create a request from a token sequence and a deadline.
    #[must_use]
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

/// Completion outcome of a remote command.
///
/// Deadline and transport failures while opening the channel are fatal
/// errors, not outcomes; see [`PodExecError`](crate::PodExecError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    /// The remote command exited zero.
    Succeeded,
    /// The remote command exited non-zero, or the stream was disrupted
    /// after it started.
    FailedRemotely,
}

/// Captured output of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error. Populated best-effort on remote failure.
    pub stderr: String,
    /// How the command completed.
    pub outcome: ExecOutcome,
}

impl ExecutionResult {
    /// The text to relay to the caller: stdout on success, stderr on
    /// remote failure.
    #[must_use]
    pub fn output(&self) -> &str {
        match self.outcome {
            ExecOutcome::Succeeded => &self.stdout,
            ExecOutcome::FailedRemotely => &self.stderr,
        }
    }

    /// Whether the remote command exited zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == ExecOutcome::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    #[test]
    fn pod_phase_from_k8s() {
        assert_eq!(PodPhase::from_k8s_phase("Pending"), PodPhase::Pending);
        assert_eq!(PodPhase::from_k8s_phase("Running"), PodPhase::Running);
        assert_eq!(PodPhase::from_k8s_phase("Succeeded"), PodPhase::Succeeded);
        assert_eq!(PodPhase::from_k8s_phase("Failed"), PodPhase::Failed);
        assert_eq!(PodPhase::from_k8s_phase("Invalid"), PodPhase::Unknown);
    }

    #[test]
    fn pod_event_from_running_pod() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let event = PodEvent::from_pod(&pod);
        assert_eq!(event.phase, PodPhase::Running);
        assert!(event.ready);
    }

    #[test]
    fn pod_event_from_statusless_pod() {
        let event = PodEvent::from_pod(&Pod::default());
        assert_eq!(event.phase, PodPhase::Unknown);
        assert!(!event.ready);
    }

    #[test]
    fn spec_builder_sets_optionals() {
        let spec = PodSpec::new("default", "curl", "curlimages/curl:8.4.0")
            .with_command(vec!["sleep".to_string(), "infinity".to_string()])
            .with_port(8080);

        assert_eq!(spec.command, vec!["sleep", "infinity"]);
        assert_eq!(spec.container_port, Some(8080));
    }

    #[test]
    fn result_output_selects_stream_by_outcome() {
        let ok = ExecutionResult {
            stdout: "body".to_string(),
            stderr: String::new(),
            outcome: ExecOutcome::Succeeded,
        };
        assert_eq!(ok.output(), "body");
        assert!(ok.succeeded());

        let failed = ExecutionResult {
            stdout: String::new(),
            stderr: "curl: (6) could not resolve host".to_string(),
            outcome: ExecOutcome::FailedRemotely,
        };
        assert_eq!(failed.output(), "curl: (6) could not resolve host");
        assert!(!failed.succeeded());
    }
}
