//! Pod lifecycle controller.
//!
//! [`PodController`] binds a [`ClusterHandle`] to one pod identity and
//! sequences the full lifecycle: existence check, create-if-absent,
//! readiness wait, command execution, and optional deletion. Every remote
//! operation runs at most once per invocation; fatal errors abort the
//! remaining steps immediately.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{PodExecError, Result, TimeoutPhase};
use crate::k8s::ClusterHandle;
use crate::types::{ExecOutcome, ExecutionRequest, ExecutionResult, PodPhase, PodSpec};

/// Controller for one named pod.
///
/// Owns no long-lived remote state; the remote pod object is the single
/// source of truth. Constructed per invocation and discarded after use.
pub struct PodController {
    handle: Arc<dyn ClusterHandle>,
    spec: PodSpec,
}

impl PodController {
    /// Bind a cluster handle to a pod spec.
    #[must_use]
    pub fn new(handle: Arc<dyn ClusterHandle>, spec: PodSpec) -> Self {
        Self { handle, spec }
    }

    /// The spec this controller manages.
    #[must_use]
    pub fn spec(&self) -> &PodSpec {
        &self.spec
    }

    /// Check whether the managed pod exists. Not-found is `Ok(false)`,
    /// never an error.
    ///
    /// # Errors
    ///
    /// Returns an error on any API failure other than not-found.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self
            .handle
            .get_pod(&self.spec.namespace, &self.spec.name)
            .await?
            .is_some())
    }

    /// Create the managed pod. A conflict with a concurrently created pod
    /// is benign: it is logged and the lifecycle proceeds.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails for any other reason.
    pub async fn create(&self) -> Result<()> {
        match self.handle.create_pod(&self.spec).await {
            Ok(()) => {
                info!(
                    pod = %self.spec.name,
                    namespace = %self.spec.namespace,
                    image = %self.spec.image,
                    "Created pod"
                );
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                warn!(
                    pod = %self.spec.name,
                    namespace = %self.spec.namespace,
                    "Pod was created concurrently, proceeding"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Create the pod unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check or creation fails.
    pub async fn ensure_created(&self) -> Result<()> {
        if self.exists().await? {
            info!(
                pod = %self.spec.name,
                namespace = %self.spec.namespace,
                "Pod already exists, skipping creation"
            );
            return Ok(());
        }
        self.create().await
    }

    /// Wait until the pod reports the Running phase, or the timeout
    /// elapses, whichever comes first.
    ///
    /// The watch connection is released on every exit path: the stream is
    /// dropped whether a Running event, the deadline, or a stream failure
    /// ends the wait.
    ///
    /// # Errors
    ///
    /// Returns [`PodExecError::Timeout`] if no Running event arrives in
    /// time, or a watch error if the stream fails or closes first.
    pub async fn wait_until_running(&self, timeout: Duration) -> Result<()> {
        let mut events = self
            .handle
            .watch_pod(&self.spec.namespace, &self.spec.name);

        info!(
            pod = %self.spec.name,
            namespace = %self.spec.namespace,
            timeout_secs = timeout.as_secs(),
            "Waiting for pod to be running"
        );

        let wait = async {
            while let Some(event) = events.next().await {
                let event = event?;
                if event.phase == PodPhase::Running {
                    info!(pod = %self.spec.name, "Pod is now running");
                    return Ok(());
                }
                debug!(
                    pod = %self.spec.name,
                    phase = ?event.phase,
                    "Ignoring pod event, not running yet"
                );
            }
            Err(PodExecError::Watch {
                namespace: self.spec.namespace.clone(),
                name: self.spec.name.clone(),
                reason: "watch stream closed before the pod was running".to_string(),
            })
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(PodExecError::Timeout {
                phase: TimeoutPhase::Readiness,
                namespace: self.spec.namespace.clone(),
                name: self.spec.name.clone(),
                timeout,
            }),
        }
    }

    /// Run a command inside the pod's container under a fresh deadline.
    ///
    /// A remote failure is not escalated: the captured stderr comes back as
    /// the result payload and the lifecycle proceeds as if the step
    /// succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the exec channel cannot be opened or the
    /// deadline elapses.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        info!(
            pod = %self.spec.name,
            namespace = %self.spec.namespace,
            command = ?request.command,
            "Executing command in pod"
        );

        let result = self
            .handle
            .exec(
                &self.spec.namespace,
                &self.spec.name,
                &self.spec.name,
                &request.command,
                request.timeout,
            )
            .await?;

        match result.outcome {
            ExecOutcome::Succeeded => {
                info!(pod = %self.spec.name, "Command executed successfully");
            }
            ExecOutcome::FailedRemotely => {
                warn!(
                    pod = %self.spec.name,
                    stderr = %result.stderr,
                    "Remote command failed, returning captured error output"
                );
            }
        }

        Ok(result)
    }

    /// Delete the managed pod with foreground propagation.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    pub async fn delete(&self) -> Result<()> {
        self.handle
            .delete_pod(&self.spec.namespace, &self.spec.name)
            .await?;
        info!(
            pod = %self.spec.name,
            namespace = %self.spec.namespace,
            "Deleted pod"
        );
        Ok(())
    }

    /// Drive the full lifecycle for one request.
    ///
    /// Sequence: create-if-absent, wait for Running, execute, and, when
    /// `cleanup` is set, delete. The readiness wait always runs, including
    /// for a pre-existing pod. Deletion runs after a remote command
    /// failure, but a timeout or transport error aborts before it.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error from any step.
    pub async fn run(&self, request: &ExecutionRequest, cleanup: bool) -> Result<ExecutionResult> {
        self.ensure_created().await?;
        self.wait_until_running(request.timeout).await?;
        let result = self.execute(request).await?;

        if cleanup {
            self.delete().await?;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::{ExecBehavior, MockClusterHandle, WatchStep};

    const SECOND: Duration = Duration::from_secs(1);

    fn test_spec() -> PodSpec {
        PodSpec::new("default", "curl", "curlimages/curl:8.4.0")
            .with_command(vec!["sleep".to_string(), "infinity".to_string()])
    }

    fn curl_request(timeout: Duration) -> ExecutionRequest {
        ExecutionRequest::new(
            vec!["curl".to_string(), "http://httpbin/ip".to_string()],
            timeout,
        )
    }

    fn running_at(delay: Duration) -> Vec<(Duration, WatchStep)> {
        vec![(delay, WatchStep::Phase(PodPhase::Running))]
    }

    fn controller(handle: &Arc<MockClusterHandle>) -> PodController {
        PodController::new(Arc::clone(handle) as Arc<dyn ClusterHandle>, test_spec())
    }

    #[tokio::test]
    async fn existence_check_is_idempotent() {
        let handle = Arc::new(MockClusterHandle::new());
        let controller = controller(&handle);

        assert!(!controller.exists().await.unwrap());
        assert!(!controller.exists().await.unwrap());

        handle.insert_pod(test_spec());

        assert!(controller.exists().await.unwrap());
        assert!(controller.exists().await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_creation_conflict_is_benign() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.insert_pod(test_spec());

        // Another actor created the pod between the existence check and
        // the create call; the conflict must not abort the lifecycle.
        controller(&handle).create().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn creates_pod_waits_and_runs_command() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.script_watch(running_at(2 * SECOND));
        handle.script_exec(ExecBehavior::Succeed(
            "{\"origin\": \"203.0.113.7\"}".to_string(),
        ));

        let result = controller(&handle)
            .run(&curl_request(30 * SECOND), false)
            .await
            .unwrap();

        assert!(handle.has_pod("default", "curl"));
        assert_eq!(handle.create_calls(), 1);
        assert!(result.succeeded());
        assert!(result.output().contains("origin"));
        assert_eq!(
            handle.exec_commands(),
            vec![vec!["curl".to_string(), "http://httpbin/ip".to_string()]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn skips_creation_when_pod_already_exists() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.insert_pod(test_spec());
        handle.script_watch(running_at(SECOND));

        controller(&handle)
            .run(&curl_request(30 * SECOND), false)
            .await
            .unwrap();

        // Creation skipped, but the readiness wait and exec still ran.
        assert_eq!(handle.create_calls(), 0);
        assert_eq!(handle.exec_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn running_event_inside_window_wins_the_race() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.insert_pod(test_spec());
        handle.script_watch(running_at(SECOND));

        controller(&handle)
            .wait_until_running(5 * SECOND)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn non_running_events_are_ignored() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.insert_pod(test_spec());
        handle.script_watch(vec![
            (SECOND, WatchStep::Phase(PodPhase::Pending)),
            (SECOND, WatchStep::Phase(PodPhase::Unknown)),
            (SECOND, WatchStep::Phase(PodPhase::Running)),
        ]);

        controller(&handle)
            .wait_until_running(10 * SECOND)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_aborts_whole_lifecycle() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.insert_pod(test_spec());
        handle.script_watch(vec![(
            20 * SECOND,
            WatchStep::Phase(PodPhase::Running),
        )]);

        let err = controller(&handle)
            .run(&curl_request(5 * SECOND), true)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PodExecError::Timeout {
                phase: TimeoutPhase::Readiness,
                ..
            }
        ));
        // No exec was attempted and cleanup never ran, cleanup flag or not.
        assert_eq!(handle.exec_calls(), 0);
        assert_eq!(handle.delete_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_watch_event_is_fatal() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.insert_pod(test_spec());
        handle.script_watch(vec![(SECOND, WatchStep::Malformed)]);

        let err = controller(&handle)
            .wait_until_running(10 * SECOND)
            .await
            .unwrap_err();

        assert!(matches!(err, PodExecError::Watch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_watch_stream_is_fatal() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.insert_pod(test_spec());
        handle.script_watch(vec![(SECOND, WatchStep::Phase(PodPhase::Pending))]);

        let err = controller(&handle)
            .wait_until_running(10 * SECOND)
            .await
            .unwrap_err();

        assert!(matches!(err, PodExecError::Watch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_is_not_escalated() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.script_watch(running_at(SECOND));
        handle.script_exec(ExecBehavior::FailRemotely(
            "curl: (6) Could not resolve host: httpbin".to_string(),
        ));

        let result = controller(&handle)
            .run(&curl_request(30 * SECOND), false)
            .await
            .unwrap();

        assert_eq!(result.outcome, ExecOutcome::FailedRemotely);
        assert!(!result.stderr.is_empty());
        assert_eq!(result.output(), "curl: (6) Could not resolve host: httpbin");
    }

    #[tokio::test(start_paused = true)]
    async fn stream_disruption_yields_remote_failure_with_partial_capture() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.script_watch(running_at(SECOND));
        handle.script_exec(ExecBehavior::Disrupt("partial error text".to_string()));

        let result = controller(&handle)
            .run(&curl_request(30 * SECOND), false)
            .await
            .unwrap();

        assert_eq!(result.outcome, ExecOutcome::FailedRemotely);
        assert_eq!(result.stderr, "partial error text");
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_deletes_pod_after_successful_exec() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.script_watch(running_at(SECOND));
        handle.script_exec(ExecBehavior::Succeed("ok".to_string()));

        controller(&handle)
            .run(&curl_request(30 * SECOND), true)
            .await
            .unwrap();

        assert_eq!(handle.delete_calls(), 1);
        assert!(!handle.has_pod("default", "curl"));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_runs_even_after_remote_failure() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.script_watch(running_at(SECOND));
        handle.script_exec(ExecBehavior::FailRemotely("boom".to_string()));

        controller(&handle)
            .run(&curl_request(30 * SECOND), true)
            .await
            .unwrap();

        assert_eq!(handle.delete_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_is_skipped_without_the_flag() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.script_watch(running_at(SECOND));

        controller(&handle)
            .run(&curl_request(30 * SECOND), false)
            .await
            .unwrap();

        assert_eq!(handle.delete_calls(), 0);
        assert!(handle.has_pod("default", "curl"));
    }

    #[tokio::test(start_paused = true)]
    async fn exec_timeout_aborts_before_cleanup() {
        let handle = Arc::new(MockClusterHandle::new());
        handle.script_watch(running_at(SECOND));
        handle.script_exec(ExecBehavior::TimeOut);

        let err = controller(&handle)
            .run(&curl_request(5 * SECOND), true)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PodExecError::Timeout {
                phase: TimeoutPhase::Exec,
                ..
            }
        ));
        assert_eq!(handle.delete_calls(), 0);
    }
}
