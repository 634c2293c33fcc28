use std::process::ExitCode;

use blobmirror::config::MirrorConfig;
use blobmirror::logging::init_logging;
use blobmirror::runner::MirrorRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    if parse_cli_mode(std::env::args())? == CliMode::Help {
        println!("Usage: blobmirror");
        println!("  Mirrors one remote container onto local disk and exits.");
        println!("  Configured through BLOBMIRROR_* environment variables (a .env file is read).");
        return Ok(ExitCode::SUCCESS);
    }
    init_logging();

    let config = MirrorConfig::from_env()?;
    let runtime = MirrorRuntime::bootstrap(config).await?;
    let report = runtime.run().await?;
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
