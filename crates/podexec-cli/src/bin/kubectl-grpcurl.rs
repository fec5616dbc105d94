//! kubectl plugin that runs grpcurl commands from a dedicated pod.

use podexec_cli::{init_tracing, parse_options, run_plugin, ToolKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = parse_options(ToolKind::Grpcurl);
    init_tracing(options.verbose);

    let output = run_plugin(ToolKind::Grpcurl, &options).await?;
    println!("{output}");
    Ok(())
}
