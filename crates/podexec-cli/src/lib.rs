//! Shared plugin frontend for the `kubectl-curl` and `kubectl-grpcurl`
//! binaries.
//!
//! The two plugins differ only in configuration: the tool binary invoked in
//! the pod, the default image, the default pod name, and the help text. One
//! [`PodController`] drives both.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches, Parser};
use podexec::{ExecutionRequest, KubeClusterHandle, PodController, PodSpec};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Which wrapped tool a plugin binary fronts.
///
/// Purely a configuration concern: it selects defaults and help text, never
/// a behavioral branch in the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// The `curl` HTTP client.
    Curl,
    /// The `grpcurl` gRPC client.
    Grpcurl,
}

impl ToolKind {
    /// The tool binary invoked inside the pod.
    #[must_use]
    pub fn command_name(self) -> &'static str {
        match self {
            Self::Curl => "curl",
            Self::Grpcurl => "grpcurl",
        }
    }

    /// Default container image carrying the tool.
    #[must_use]
    pub fn default_image(self) -> &'static str {
        match self {
            Self::Curl => "curlimages/curl:8.4.0",
            Self::Grpcurl => "fullstorydev/grpcurl:v1.8.9-alpine",
        }
    }

    /// Default name for the tool pod.
    #[must_use]
    pub fn default_pod_name(self) -> &'static str {
        self.command_name()
    }

    /// Example invocations shown in `--help`.
    #[must_use]
    pub fn example_usage(self) -> &'static str {
        match self {
            Self::Curl => {
                "Examples:\n  \
                 # Execute a curl command with default settings.\n  \
                 kubectl curl -- -i http://httpbin/ip\n\n  \
                 # Execute a curl command with custom plugin options.\n  \
                 kubectl curl -v -n foo -- -i http://httpbin/ip"
            }
            Self::Grpcurl => {
                "Examples:\n  \
                 # Execute a grpcurl command with default settings.\n  \
                 kubectl grpcurl -- -plaintext grpcbin:80 hello.HelloService.SayHello\n\n  \
                 # Execute a grpcurl command with custom plugin options.\n  \
                 kubectl grpcurl -v -n foo -- -plaintext grpcbin:80 hello.HelloService.SayHello"
            }
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command_name())
    }
}

/// Command-line options shared by both plugin binaries.
#[derive(Debug, Parser)]
#[command(version, disable_help_subcommand = true)]
pub struct PluginOptions {
    /// Path to the kubeconfig file.
    #[arg(long, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Container image with the tool (defaults to the plugin's image).
    #[arg(short, long)]
    pub image: Option<String>,

    /// Namespace in which the tool pod is created.
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Tool pod name (defaults to the tool name).
    #[arg(long)]
    pub name: Option<String>,

    /// Delete the tool pod at the end.
    #[arg(short, long)]
    pub cleanup: bool,

    /// Explain what is being done.
    #[arg(short, long)]
    pub verbose: bool,

    /// Timeout in seconds for pod readiness and command execution.
    #[arg(short, long, default_value_t = 30)]
    pub timeout: u64,

    /// Arguments forwarded to the tool inside the pod (after `--`).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Parse the process arguments with tool-specific naming and help text.
#[must_use]
pub fn parse_options(tool: ToolKind) -> PluginOptions {
    let command = PluginOptions::command()
        .name(format!("kubectl-{tool}"))
        .about(format!(
            "Executes a {tool} command from a dedicated Kubernetes pod"
        ))
        .after_help(tool.example_usage());

    match PluginOptions::from_arg_matches(&command.get_matches()) {
        Ok(options) => options,
        Err(e) => e.exit(),
    }
}

/// Install the tracing subscriber. Verbose selects debug-level output;
/// otherwise only warnings surface. `RUST_LOG` overrides both.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "podexec=debug,info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Prepend the tool binary token to the forwarded arguments.
#[must_use]
pub fn command_tokens(tool: ToolKind, args: &[String]) -> Vec<String> {
    let mut tokens = Vec::with_capacity(args.len() + 1);
    tokens.push(tool.command_name().to_string());
    tokens.extend(args.iter().cloned());
    tokens
}

/// Run the plugin lifecycle and return the text to emit.
///
/// A command that fails inside the pod still returns `Ok` with the captured
/// error text: remote command failures surface as content, not as a
/// process-level failure.
///
/// # Errors
///
/// Returns an error for fatal conditions: connection or API failures,
/// readiness/exec timeouts, and cleanup failures.
pub async fn run_plugin(tool: ToolKind, options: &PluginOptions) -> anyhow::Result<String> {
    let handle = KubeClusterHandle::new(options.kubeconfig.as_deref()).await?;

    let spec = PodSpec::new(
        options.namespace.clone(),
        options
            .name
            .clone()
            .unwrap_or_else(|| tool.default_pod_name().to_string()),
        options
            .image
            .clone()
            .unwrap_or_else(|| tool.default_image().to_string()),
    )
    .with_command(vec!["sleep".to_string(), "infinity".to_string()]);

    let controller = PodController::new(Arc::new(handle), spec);

    let request = ExecutionRequest::new(
        command_tokens(tool, &options.args),
        Duration::from_secs(options.timeout),
    );

    let result = controller.run(&request, options.cleanup).await?;
    tracing::debug!(
        tool = %tool,
        outcome = ?result.outcome,
        "Plugin lifecycle complete"
    );
    Ok(result.output().to_string())
}
