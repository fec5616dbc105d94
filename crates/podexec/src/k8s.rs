//! Cluster handle: the authenticated connection to the Kubernetes API.
//!
//! This module provides the [`ClusterHandle`] trait with the namespaced
//! read/write/watch primitives and the exec-stream transport the controller
//! is built on, plus the [`KubeClusterHandle`] production implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, AttachedProcess, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use kube::runtime::watcher::{self, watcher, Config as WatcherConfig};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::error::{PodExecError, Result, TimeoutPhase};
use crate::pod::build_pod;
use crate::types::{ExecOutcome, ExecutionResult, PodEvent, PodSpec};

/// The `ClusterHandle` trait exposes the namespaced pod primitives the
/// controller sequences: get, create, watch, delete, and the exec stream.
#[async_trait]
pub trait ClusterHandle: Send + Sync {
    /// Fetch a pod by name. `None` means the pod does not exist; any other
    /// failure is a transport error.
    ///
    /// # Errors
    ///
    /// Returns an error on any API failure other than not-found.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Create a pod from the spec.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails, including the 409 conflict when
    /// the pod already exists.
    async fn create_pod(&self, spec: &PodSpec) -> Result<()>;

    /// Open a watch scoped to the named pod. The stream is infinite until
    /// dropped or the remote connection closes; dropping it releases the
    /// watch connection.
    fn watch_pod(&self, namespace: &str, name: &str) -> BoxStream<'static, Result<PodEvent>>;

    /// Delete the named pod with foreground propagation, so dependent
    /// objects are gone before the call completes.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Run a command inside the named container and capture its output.
    ///
    /// A non-zero remote exit or a stream disruption after the channel
    /// opened is reported as [`ExecOutcome::FailedRemotely`] on the result,
    /// not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the exec channel cannot be opened, or
    /// [`PodExecError::Timeout`] if the deadline elapses first.
    async fn exec(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecutionResult>;
}

/// Cluster handle backed by a real `kube::Client`.
pub struct KubeClusterHandle {
    client: Client,
}

impl KubeClusterHandle {
    /// Connect to the cluster.
    ///
    /// With an explicit kubeconfig path the file is read directly; otherwise
    /// the client resolves `KUBECONFIG`, then `~/.kube/config`, then the
    /// in-cluster environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig cannot be read or the client
    /// cannot be constructed from it.
    pub async fn new(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                debug!(path = %path.display(), "Reading kubeconfig from explicit path");
                let kubeconfig = Kubeconfig::read_from(path)?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };

        Ok(Self { client })
    }

    /// Wrap a pre-configured client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn pods_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterHandle for KubeClusterHandle {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.pods_api(namespace).get_opt(name).await?)
    }

    async fn create_pod(&self, spec: &PodSpec) -> Result<()> {
        let pod = build_pod(spec);
        self.pods_api(&spec.namespace)
            .create(&PostParams::default(), &pod)
            .await?;
        Ok(())
    }

    fn watch_pod(&self, namespace: &str, name: &str) -> BoxStream<'static, Result<PodEvent>> {
        let pods = self.pods_api(namespace);
        let config = WatcherConfig::default().fields(&format!("metadata.name={name}"));
        let namespace = namespace.to_string();
        let name = name.to_string();

        watcher(pods, config)
            .filter_map(move |event| {
                let item = match event {
                    Ok(watcher::Event::Apply(pod) | watcher::Event::InitApply(pod)) => {
                        Some(Ok(PodEvent::from_pod(&pod)))
                    }
                    Ok(watcher::Event::Init
                    | watcher::Event::InitDone
                    | watcher::Event::Delete(_)) => None,
                    Err(e) => Some(Err(PodExecError::Watch {
                        namespace: namespace.clone(),
                        name: name.clone(),
                        reason: e.to_string(),
                    })),
                };
                std::future::ready(item)
            })
            .boxed()
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.pods_api(namespace)
            .delete(name, &DeleteParams::foreground())
            .await?;
        Ok(())
    }

    async fn exec(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        // A failure to open the channel is a transport error and fatal.
        let attached = self
            .pods_api(namespace)
            .exec(name, command.iter().map(String::as_str), &params)
            .await?;

        match tokio::time::timeout(timeout, collect_output(attached)).await {
            Ok(result) => Ok(result),
            Err(_) => Err(PodExecError::Timeout {
                phase: TimeoutPhase::Exec,
                namespace: namespace.to_string(),
                name: name.to_string(),
                timeout,
            }),
        }
    }
}

/// Drain both output streams and resolve the completion outcome.
///
/// Disruption after the channel opened degrades to `FailedRemotely` with
/// whatever was captured so far; it never escalates.
async fn collect_output(mut attached: AttachedProcess) -> ExecutionResult {
    let stdout_reader = attached.stdout();
    let stderr_reader = attached.stderr();

    // Read both halves concurrently so neither side can stall the other.
    let ((stdout_buf, stdout_disrupted), (stderr_buf, stderr_disrupted)) =
        tokio::join!(drain(stdout_reader), drain(stderr_reader));

    let status = match attached.take_status() {
        Some(status) => status.await,
        None => None,
    };

    let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
    let mut stderr = String::from_utf8_lossy(&stderr_buf).into_owned();

    let outcome = if stdout_disrupted || stderr_disrupted {
        if stderr.is_empty() {
            stderr = "exec stream disrupted".to_string();
        }
        ExecOutcome::FailedRemotely
    } else {
        match status {
            Some(s) if s.status.as_deref() == Some("Success") => ExecOutcome::Succeeded,
            Some(s) => {
                if stderr.is_empty() {
                    if let Some(message) = s.message {
                        stderr = message;
                    }
                }
                ExecOutcome::FailedRemotely
            }
            None => ExecOutcome::FailedRemotely,
        }
    };

    ExecutionResult {
        stdout,
        stderr,
        outcome,
    }
}

/// Read a stream half to completion, keeping any partial capture on error.
async fn drain(reader: Option<impl AsyncRead + Unpin>) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return (buf, false);
    };
    match reader.read_to_end(&mut buf).await {
        Ok(_) => (buf, false),
        Err(_) => (buf, true),
    }
}

/// A mock cluster handle for testing without a real Kubernetes cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kube::core::ErrorResponse;
    use parking_lot::Mutex;

    use crate::types::PodPhase;

    /// One scripted item on a mock watch stream.
    #[derive(Debug, Clone)]
    pub enum WatchStep {
        /// A well-formed status event reporting the given phase.
        Phase(PodPhase),
        /// A malformed event, surfaced as a fatal watch error.
        Malformed,
    }

    /// Scripted behavior of the mock exec stream.
    #[derive(Debug, Clone)]
    pub enum ExecBehavior {
        /// Remote command exits zero with the given stdout.
        Succeed(String),
        /// Remote command exits non-zero with the given stderr.
        FailRemotely(String),
        /// Transport disruption mid-stream, with partial stderr captured.
        Disrupt(String),
        /// The exec deadline elapses.
        TimeOut,
    }

    impl Default for ExecBehavior {
        fn default() -> Self {
            Self::Succeed(String::new())
        }
    }

    /// A mock cluster handle that stores pods in memory and replays
    /// scripted watch events and exec results.
    #[derive(Default)]
    pub struct MockClusterHandle {
        pods: Mutex<HashMap<String, PodSpec>>,
        watch_steps: Mutex<Vec<(Duration, WatchStep)>>,
        exec_behavior: Mutex<ExecBehavior>,
        exec_commands: Mutex<Vec<Vec<String>>>,
        create_calls: AtomicUsize,
        delete_calls: AtomicUsize,
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    fn api_error(code: u16, reason: &str, message: String) -> PodExecError {
        PodExecError::KubeApi(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message,
            reason: reason.to_string(),
            code,
        }))
    }

    impl MockClusterHandle {
        /// Create an empty mock handle.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Pre-populate a pod, as if another actor had created it.
        pub fn insert_pod(&self, spec: PodSpec) {
            self.pods
                .lock()
                .insert(key(&spec.namespace, &spec.name), spec);
        }

        /// Script the watch stream: each step is emitted after its delay.
        pub fn script_watch(&self, steps: Vec<(Duration, WatchStep)>) {
            *self.watch_steps.lock() = steps;
        }

        /// Script the exec stream behavior.
        pub fn script_exec(&self, behavior: ExecBehavior) {
            *self.exec_behavior.lock() = behavior;
        }

        /// Whether the named pod currently exists.
        #[must_use]
        pub fn has_pod(&self, namespace: &str, name: &str) -> bool {
            self.pods.lock().contains_key(&key(namespace, name))
        }

        /// Number of create attempts observed.
        #[must_use]
        pub fn create_calls(&self) -> usize {
            self.create_calls.load(Ordering::SeqCst)
        }

        /// Number of delete attempts observed.
        #[must_use]
        pub fn delete_calls(&self) -> usize {
            self.delete_calls.load(Ordering::SeqCst)
        }

        /// Number of exec attempts observed.
        #[must_use]
        pub fn exec_calls(&self) -> usize {
            self.exec_commands.lock().len()
        }

        /// The token sequences passed to exec, in order.
        #[must_use]
        pub fn exec_commands(&self) -> Vec<Vec<String>> {
            self.exec_commands.lock().clone()
        }
    }

    #[async_trait]
    impl ClusterHandle for MockClusterHandle {
        async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
            Ok(self
                .pods
                .lock()
                .get(&key(namespace, name))
                .map(build_pod))
        }

        async fn create_pod(&self, spec: &PodSpec) -> Result<()> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);

            let mut pods = self.pods.lock();
            let key = key(&spec.namespace, &spec.name);
            if pods.contains_key(&key) {
                return Err(api_error(
                    409,
                    "AlreadyExists",
                    format!("pods \"{}\" already exists", spec.name),
                ));
            }
            pods.insert(key, spec.clone());
            Ok(())
        }

        fn watch_pod(&self, namespace: &str, name: &str) -> BoxStream<'static, Result<PodEvent>> {
            let steps = self.watch_steps.lock().clone();
            let namespace = namespace.to_string();
            let name = name.to_string();

            futures::stream::iter(steps)
                .then(move |(delay, step)| {
                    let namespace = namespace.clone();
                    let name = name.clone();
                    async move {
                        tokio::time::sleep(delay).await;
                        match step {
                            WatchStep::Phase(phase) => Ok(PodEvent {
                                phase,
                                ready: phase == PodPhase::Running,
                            }),
                            WatchStep::Malformed => Err(PodExecError::Watch {
                                namespace,
                                name,
                                reason: "unexpected object in watch event".to_string(),
                            }),
                        }
                    }
                })
                .boxed()
        }

        async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);

            if self.pods.lock().remove(&key(namespace, name)).is_none() {
                return Err(api_error(
                    404,
                    "NotFound",
                    format!("pods \"{name}\" not found"),
                ));
            }
            Ok(())
        }

        async fn exec(
            &self,
            namespace: &str,
            name: &str,
            _container: &str,
            command: &[String],
            timeout: Duration,
        ) -> Result<ExecutionResult> {
            self.exec_commands.lock().push(command.to_vec());

            let behavior = self.exec_behavior.lock().clone();
            match behavior {
                ExecBehavior::Succeed(stdout) => Ok(ExecutionResult {
                    stdout,
                    stderr: String::new(),
                    outcome: ExecOutcome::Succeeded,
                }),
                ExecBehavior::FailRemotely(stderr) | ExecBehavior::Disrupt(stderr) => {
                    Ok(ExecutionResult {
                        stdout: String::new(),
                        stderr,
                        outcome: ExecOutcome::FailedRemotely,
                    })
                }
                ExecBehavior::TimeOut => Err(PodExecError::Timeout {
                    phase: TimeoutPhase::Exec,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    timeout,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockClusterHandle;
    use super::*;

    fn test_spec() -> PodSpec {
        PodSpec::new("default", "curl", "curlimages/curl:8.4.0")
            .with_command(vec!["sleep".to_string(), "infinity".to_string()])
    }

    #[tokio::test]
    async fn mock_get_returns_created_pod() {
        let handle = MockClusterHandle::new();
        assert!(handle.get_pod("default", "curl").await.unwrap().is_none());

        handle.create_pod(&test_spec()).await.unwrap();

        let pod = handle.get_pod("default", "curl").await.unwrap().unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("curl"));
    }

    #[tokio::test]
    async fn mock_create_conflicts_on_existing_pod() {
        let handle = MockClusterHandle::new();
        handle.create_pod(&test_spec()).await.unwrap();

        let err = handle.create_pod(&test_spec()).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(handle.create_calls(), 2);
    }

    #[tokio::test]
    async fn mock_delete_missing_pod_is_not_found() {
        let handle = MockClusterHandle::new();
        let err = handle.delete_pod("default", "curl").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
