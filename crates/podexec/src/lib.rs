//! Ephemeral pod lifecycle and remote-exec controller for Kubernetes.
//!
//! This crate provisions a short-lived, named pod in a cluster, waits for it
//! to be running, streams a single command inside it, captures the output,
//! and optionally tears the pod down. It is the engine behind the
//! `kubectl-curl` and `kubectl-grpcurl` plugins.
//!
//! Two layers:
//!
//! - [`ClusterHandle`]: the authenticated API connection, exposing pod
//!   get/create/watch/delete and the exec-stream transport.
//! - [`PodController`]: the lifecycle state machine over one pod identity:
//!   existence check, create-if-absent, timeout-bounded readiness wait,
//!   deadline-bounded exec, optional foreground deletion.
//!
//! A command that fails *inside* the pod is not an error: its captured
//! stderr becomes the result payload ([`ExecOutcome::FailedRemotely`]).
//! Transport failures and elapsed deadlines are fatal and abort the
//! remaining lifecycle steps.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use podexec::{ExecutionRequest, KubeClusterHandle, PodController, PodSpec};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = Arc::new(KubeClusterHandle::new(None).await?);
//!
//! let spec = PodSpec::new("default", "curl", "curlimages/curl:8.4.0")
//!     .with_command(vec!["sleep".into(), "infinity".into()]);
//! let controller = PodController::new(handle, spec);
//!
//! let request = ExecutionRequest::new(
//!     vec!["curl".into(), "http://httpbin/ip".into()],
//!     Duration::from_secs(30),
//! );
//! let result = controller.run(&request, true).await?;
//! println!("{}", result.output());
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real cluster, enable the `test-utils` feature and
//! use [`MockClusterHandle`], which stores pods in memory and replays
//! scripted watch events and exec results.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod controller;
pub mod error;
pub mod k8s;
pub mod pod;
pub mod types;

pub use controller::PodController;
pub use error::{PodExecError, Result, TimeoutPhase};
pub use k8s::{ClusterHandle, KubeClusterHandle};
pub use types::{ExecOutcome, ExecutionRequest, ExecutionResult, PodEvent, PodPhase, PodSpec};

#[cfg(any(test, feature = "test-utils"))]
pub use k8s::mock::MockClusterHandle;
