//! Subcommands and their dispatch.

use crate::config::CorralConfig;
use anyhow::Context;
use clap::{Args, Subcommand};
use corral_core::{LifecycleManager, SystemdSupervisor};
use corral_net::{AttachmentOrchestrator, IpRoute, LinkState, NetHost};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum Commands {
    /// Manage network namespaces
    #[command(subcommand)]
    Netns(NetnsCommands),
    /// Manage veth pairs
    #[command(subcommand)]
    Veth(VethCommands),
    /// Manage bridges
    #[command(subcommand)]
    Bridge(BridgeCommands),
    /// Wire sandboxes into a bridge
    #[command(subcommand)]
    Net(NetCommands),
    /// Start, stop and inspect sandboxes
    #[command(subcommand)]
    Sandbox(SandboxCommands),
}

#[derive(Subcommand)]
pub enum NetnsCommands {
    /// Create a namespace
    Create { name: String },
    /// Delete a namespace and everything inside it
    Delete { name: String },
    /// Exit 0 if the namespace exists
    Exists { name: String },
    /// List namespaces
    List,
}

#[derive(Subcommand)]
pub enum VethCommands {
    /// Create a veth pair
    Create { name: String, peer: String },
    /// Delete a pair through either endpoint
    Delete { name: String },
    /// Delete a pair through whichever endpoint still exists
    DeletePair { name: String, peer: String },
    /// Attach an endpoint to a bridge or move it into a namespace
    Attach { name: String, target: String },
    /// Release an endpoint from its bridge
    Detach {
        name: String,
        #[arg(long, help = "Bridge the endpoint is expected to be in")]
        bridge: Option<String>,
    },
    /// Bring an endpoint up
    Up { name: String },
    /// Bring an endpoint down
    Down { name: String },
    /// Exit 0 if the endpoint exists
    Exists { name: String },
    /// Print the link state
    Status { name: String },
    /// List endpoints in the default namespace
    List {
        #[arg(long, help = "Show each pair once")]
        pairs: bool,
    },
    /// Show details of an endpoint
    Info { name: String },
}

#[derive(Subcommand)]
pub enum BridgeCommands {
    /// Create a bridge (succeeds if it already exists)
    Create {
        name: String,
        #[arg(long, help = "Address to assign, e.g. 10.77.0.1/24")]
        addr: Option<String>,
    },
    /// Bring a bridge down and delete it
    Delete { name: String },
    /// Bring a bridge up
    Up { name: String },
    /// Bring a bridge down
    Down { name: String },
    /// Exit 0 if the bridge exists
    Exists { name: String },
    /// Print the link state
    Status { name: String },
    /// List bridges
    List,
    /// List interfaces enslaved to a bridge
    Members { name: String },
    /// List addresses on a bridge
    Addresses { name: String },
    /// Enslave a veth endpoint
    Attach { name: String, veth: String },
    /// Release a veth endpoint
    Detach { name: String, veth: String },
}

#[derive(Args)]
pub struct SandboxNet {
    /// Sandbox name
    sandbox: String,
    #[arg(long, help = "Bridge to use (default: CORRAL_BRIDGE)")]
    bridge: Option<String>,
}

#[derive(Subcommand)]
pub enum NetCommands {
    /// Create the sandbox namespace and veth pair and attach it to the bridge
    Attach(SandboxNet),
    /// Remove the sandbox veth pair from the bridge
    Detach(SandboxNet),
    /// Reclaim the sandbox veth pair and namespace
    Cleanup(SandboxNet),
}

#[derive(Subcommand)]
pub enum SandboxCommands {
    /// Wire the network and launch the sandbox
    Start { name: String },
    /// Stop the sandbox, escalating to SIGKILL if needed
    Stop { name: String },
    /// Print the lifecycle state
    Status { name: String },
    /// Reclaim the network and unit of a sandbox
    Cleanup { name: String },
}

fn exit(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_state(state: LinkState) -> ExitCode {
    println!("{state}");
    exit(state != LinkState::NotExists)
}

/// Run a subcommand against the real host.
pub async fn run(command: Commands, config: &CorralConfig) -> anyhow::Result<ExitCode> {
    let host: Arc<dyn NetHost> = Arc::new(IpRoute::new());
    let net = AttachmentOrchestrator::new(host.clone());

    match command {
        Commands::Netns(cmd) => netns(&net, cmd).await,
        Commands::Veth(cmd) => veth(&net, cmd).await,
        Commands::Bridge(cmd) => bridge(&net, cmd).await,
        Commands::Net(cmd) => network(&net, cmd, config).await,
        Commands::Sandbox(cmd) => {
            let manager = LifecycleManager::new(
                host,
                Arc::new(SystemdSupervisor::new()),
                Arc::new(config.images()),
                config.manager_config(),
            )?;
            sandbox(&manager, cmd).await
        }
    }
}

async fn netns(net: &AttachmentOrchestrator, cmd: NetnsCommands) -> anyhow::Result<ExitCode> {
    let namespaces = net.namespaces();
    match cmd {
        NetnsCommands::Create { name } => namespaces
            .create(&name)
            .await
            .with_context(|| format!("netns create {name}"))?,
        NetnsCommands::Delete { name } => namespaces
            .delete(&name)
            .await
            .with_context(|| format!("netns delete {name}"))?,
        NetnsCommands::Exists { name } => return Ok(exit(namespaces.exists(&name).await)),
        NetnsCommands::List => {
            for name in namespaces.list().await.context("netns list")? {
                println!("{name}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn veth(net: &AttachmentOrchestrator, cmd: VethCommands) -> anyhow::Result<ExitCode> {
    let veths = net.veths();
    match cmd {
        VethCommands::Create { name, peer } => veths
            .create(&name, &peer)
            .await
            .with_context(|| format!("veth create {name} {peer}"))?,
        VethCommands::Delete { name } => veths
            .delete(&name)
            .await
            .with_context(|| format!("veth delete {name}"))?,
        VethCommands::DeletePair { name, peer } => veths
            .delete_pair(&name, &peer)
            .await
            .with_context(|| format!("veth delete-pair {name} {peer}"))?,
        VethCommands::Attach { name, target } => veths
            .attach(&name, &target)
            .await
            .with_context(|| format!("veth attach {name} {target}"))?,
        VethCommands::Detach { name, bridge } => veths
            .detach(&name, bridge.as_deref())
            .await
            .with_context(|| format!("veth detach {name}"))?,
        VethCommands::Up { name } => veths
            .up(&name)
            .await
            .with_context(|| format!("veth up {name}"))?,
        VethCommands::Down { name } => veths
            .down(&name)
            .await
            .with_context(|| format!("veth down {name}"))?,
        VethCommands::Exists { name } => return Ok(exit(veths.exists(&name).await)),
        VethCommands::Status { name } => return Ok(print_state(veths.state(&name).await)),
        VethCommands::List { pairs: true } => {
            for pair in veths.list_pairs().await.context("veth list")? {
                println!("{pair}");
            }
        }
        VethCommands::List { pairs: false } => {
            for veth in veths.list().await.context("veth list")? {
                println!(
                    "{:<15} {:<15} peer={} master={}",
                    veth.name,
                    veth.state,
                    veth.peer.as_deref().unwrap_or("-"),
                    veth.master.as_deref().unwrap_or("-")
                );
            }
        }
        VethCommands::Info { name } => {
            let info = veths
                .info(&name)
                .await
                .with_context(|| format!("veth info {name}"))?;
            println!("{info}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn bridge(net: &AttachmentOrchestrator, cmd: BridgeCommands) -> anyhow::Result<ExitCode> {
    let bridges = net.bridges();
    match cmd {
        BridgeCommands::Create { name, addr } => bridges
            .create(&name, addr.as_deref())
            .await
            .with_context(|| format!("bridge create {name}"))?,
        BridgeCommands::Delete { name } => bridges
            .delete(&name)
            .await
            .with_context(|| format!("bridge delete {name}"))?,
        BridgeCommands::Up { name } => bridges
            .up(&name)
            .await
            .with_context(|| format!("bridge up {name}"))?,
        BridgeCommands::Down { name } => bridges
            .down(&name)
            .await
            .with_context(|| format!("bridge down {name}"))?,
        BridgeCommands::Exists { name } => return Ok(exit(bridges.exists(&name).await)),
        BridgeCommands::Status { name } => return Ok(print_state(bridges.state(&name).await)),
        BridgeCommands::List => {
            for bridge in bridges.list().await.context("bridge list")? {
                println!("{:<15} {}", bridge.name, bridge.state);
            }
        }
        BridgeCommands::Members { name } => {
            let members = bridges
                .members(&name)
                .await
                .with_context(|| format!("bridge members {name}"))?;
            for member in members {
                println!("{member}");
            }
        }
        BridgeCommands::Addresses { name } => {
            let addresses = bridges
                .addresses(&name)
                .await
                .with_context(|| format!("bridge addresses {name}"))?;
            for addr in addresses {
                println!("{addr}");
            }
        }
        BridgeCommands::Attach { name, veth } => bridges
            .attach_endpoint(&name, &veth)
            .await
            .with_context(|| format!("bridge attach {name} {veth}"))?,
        BridgeCommands::Detach { name, veth } => bridges
            .detach_endpoint(&name, &veth)
            .await
            .with_context(|| format!("bridge detach {name} {veth}"))?,
    }
    Ok(ExitCode::SUCCESS)
}

async fn network(
    net: &AttachmentOrchestrator,
    cmd: NetCommands,
    config: &CorralConfig,
) -> anyhow::Result<ExitCode> {
    let bridge_for = |args: &SandboxNet| args.bridge.clone().unwrap_or_else(|| config.bridge.clone());
    match cmd {
        NetCommands::Attach(args) => {
            let bridge = bridge_for(&args);
            net.attach(&bridge, &args.sandbox)
                .await
                .with_context(|| format!("net attach {} to {bridge}", args.sandbox))?;
        }
        NetCommands::Detach(args) => {
            let bridge = bridge_for(&args);
            net.detach(&bridge, &args.sandbox)
                .await
                .with_context(|| format!("net detach {} from {bridge}", args.sandbox))?;
        }
        NetCommands::Cleanup(args) => {
            let bridge = bridge_for(&args);
            return Ok(exit(net.cleanup(&args.sandbox, &bridge).await));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn sandbox(manager: &LifecycleManager, cmd: SandboxCommands) -> anyhow::Result<ExitCode> {
    match cmd {
        SandboxCommands::Start { name } => manager
            .start(&name)
            .await
            .with_context(|| format!("sandbox start {name}"))?,
        SandboxCommands::Stop { name } => manager
            .stop(&name)
            .await
            .with_context(|| format!("sandbox stop {name}"))?,
        SandboxCommands::Status { name } => {
            let state = manager
                .state(&name)
                .await
                .with_context(|| format!("sandbox status {name}"))?;
            println!("{state}");
        }
        SandboxCommands::Cleanup { name } => return Ok(exit(manager.cleanup(&name).await)),
    }
    Ok(ExitCode::SUCCESS)
}
