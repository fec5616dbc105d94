//! kubectl plugin that runs curl commands from a dedicated pod.

use podexec_cli::{init_tracing, parse_options, run_plugin, ToolKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = parse_options(ToolKind::Curl);
    init_tracing(options.verbose);

    let output = run_plugin(ToolKind::Curl, &options).await?;
    println!("{output}");
    Ok(())
}
