//! corral command line entry point.
//!
//! Query output (states, listings) goes to stdout; logs go to stderr.
//! Every failure exits non-zero after an error line naming the operation.

mod commands;
mod config;

use clap::Parser;
use commands::Commands;
use config::CorralConfig;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "corral")]
#[command(about = "Run systemd-nspawn sandboxes wired into a host bridge")]
#[command(version)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(format!("corral={level}").parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = CorralConfig::from_env();
    tracing::debug!(?config, "Configuration loaded");
    config.validate_warn();

    match commands::run(cli.command, &config).await {
        Ok(code) => Ok(code),
        Err(e) => {
            tracing::error!("{e:#}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use commands::{NetCommands, SandboxCommands, VethCommands};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_veth_detach_with_hint() {
        let cli =
            Cli::try_parse_from(["corral", "veth", "detach", "vh-web", "--bridge", "br0", "-v"])
                .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Veth(VethCommands::Detach { name, bridge }) => {
                assert_eq!(name, "vh-web");
                assert_eq!(bridge.as_deref(), Some("br0"));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_parse_net_and_sandbox() {
        let cli = Cli::try_parse_from(["corral", "net", "cleanup", "web"]).unwrap();
        assert!(matches!(cli.command, Commands::Net(NetCommands::Cleanup(_))));

        let cli = Cli::try_parse_from(["corral", "sandbox", "stop", "web"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sandbox(SandboxCommands::Stop { ref name }) if name == "web"
        ));

        assert!(Cli::try_parse_from(["corral", "veth", "create", "a"]).is_err());
    }
}
