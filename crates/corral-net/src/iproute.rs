//! iproute2 backend.
//!
//! Drives the host through the `ip` binary and decodes its `-j` JSON output.

use crate::error::{NetError, Result};
use crate::host::{LinkControl, LinkKind, LinkRecord, LinkState, NamespaceControl};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::process::Command;

/// Host control through iproute2.
#[derive(Debug, Clone)]
pub struct IpRoute {
    program: PathBuf,
}

impl Default for IpRoute {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry of `ip -j -d link show`.
#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    operstate: Option<String>,
    #[serde(default)]
    master: Option<String>,
    /// Peer name; only present when the peer is in the same namespace.
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    link_type: Option<String>,
    #[serde(default)]
    linkinfo: Option<IpLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct IpLinkInfo {
    #[serde(default)]
    info_kind: Option<String>,
}

/// One entry of `ip -j addr show`.
#[derive(Debug, Deserialize)]
struct IpAddrEntry {
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    local: String,
    prefixlen: u8,
}

/// One entry of `ip -j netns list`.
#[derive(Debug, Deserialize)]
struct IpNetns {
    name: String,
}

impl From<IpLink> for LinkRecord {
    fn from(link: IpLink) -> Self {
        let kind = match link.linkinfo.as_ref().and_then(|i| i.info_kind.as_deref()) {
            Some("veth") => LinkKind::Veth,
            Some("bridge") => LinkKind::Bridge,
            _ if link.link_type.as_deref() == Some("loopback") => LinkKind::Loopback,
            _ => LinkKind::Other,
        };
        let admin_up = link.flags.iter().any(|f| f == "UP");
        let state = link
            .operstate
            .as_deref()
            .map(LinkState::from_operstate)
            .unwrap_or(LinkState::Unknown);
        LinkRecord {
            name: link.ifname,
            kind,
            admin_up,
            state,
            master: link.master,
            peer: if kind == LinkKind::Veth { link.link } else { None },
        }
    }
}

fn parse_links(json: &str) -> Result<Vec<LinkRecord>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let links: Vec<IpLink> = serde_json::from_str(json)?;
    Ok(links.into_iter().map(LinkRecord::from).collect())
}

fn parse_addresses(json: &str) -> Result<Vec<String>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<IpAddrEntry> = serde_json::from_str(json)?;
    Ok(entries
        .into_iter()
        .flat_map(|e| e.addr_info)
        .map(|a| format!("{}/{}", a.local, a.prefixlen))
        .collect())
}

fn parse_namespaces(json: &str) -> Result<Vec<String>> {
    // Older iproute2 prints nothing at all when there are no namespaces.
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<IpNetns> = serde_json::from_str(json)?;
    Ok(entries.into_iter().map(|n| n.name).collect())
}

fn scoped<'a>(netns: Option<&'a str>, args: &[&'a str]) -> Vec<&'a str> {
    let mut full = Vec::with_capacity(args.len() + 2);
    if let Some(ns) = netns {
        full.extend(["-n", ns]);
    }
    full.extend_from_slice(args);
    full
}

impl IpRoute {
    /// Use `ip` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ip"),
        }
    }

    /// Use a specific `ip` binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        tracing::trace!(program = %self.program.display(), ?args, "Running command");
        let output = Command::new(&self.program).args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!(?args, %stderr, "Command failed");
            return Err(NetError::Command {
                program: self.program.display().to_string(),
                args: args.join(" "),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn is_missing_device(err: &NetError) -> bool {
    match err {
        NetError::Command { stderr, .. } => {
            stderr.contains("does not exist") || stderr.contains("Cannot find device")
        }
        _ => false,
    }
}

#[async_trait]
impl LinkControl for IpRoute {
    async fn link(&self, netns: Option<&str>, name: &str) -> Result<Option<LinkRecord>> {
        let args = scoped(netns, &["-j", "-d", "link", "show", "dev", name]);
        match self.run(&args).await {
            Ok(out) => Ok(parse_links(&out)?.into_iter().next()),
            Err(e) if is_missing_device(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn links(&self, netns: Option<&str>) -> Result<Vec<LinkRecord>> {
        let out = self
            .run(&scoped(netns, &["-j", "-d", "link", "show"]))
            .await?;
        parse_links(&out)
    }

    async fn add_veth(&self, name: &str, peer: &str) -> Result<()> {
        self.run(&["link", "add", name, "type", "veth", "peer", "name", peer])
            .await
            .map(drop)
    }

    async fn add_bridge(&self, name: &str) -> Result<()> {
        self.run(&["link", "add", "name", name, "type", "bridge"])
            .await
            .map(drop)
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        self.run(&["link", "delete", "dev", name]).await.map(drop)
    }

    async fn set_admin(&self, netns: Option<&str>, name: &str, up: bool) -> Result<()> {
        let state = if up { "up" } else { "down" };
        self.run(&scoped(netns, &["link", "set", "dev", name, state]))
            .await
            .map(drop)
    }

    async fn set_master(&self, name: &str, master: Option<&str>) -> Result<()> {
        let args = match master {
            Some(bridge) => vec!["link", "set", "dev", name, "master", bridge],
            None => vec!["link", "set", "dev", name, "nomaster"],
        };
        self.run(&args).await.map(drop)
    }

    async fn set_netns(&self, name: &str, netns: &str) -> Result<()> {
        self.run(&["link", "set", "dev", name, "netns", netns])
            .await
            .map(drop)
    }

    async fn addresses(&self, name: &str) -> Result<Vec<String>> {
        let out = self.run(&["-j", "addr", "show", "dev", name]).await?;
        parse_addresses(&out)
    }

    async fn add_address(&self, name: &str, addr: &str) -> Result<()> {
        self.run(&["addr", "add", addr, "dev", name]).await.map(drop)
    }
}

#[async_trait]
impl NamespaceControl for IpRoute {
    async fn namespaces(&self) -> Result<Vec<String>> {
        let out = self.run(&["-j", "netns", "list"]).await?;
        parse_namespaces(&out)
    }

    async fn add_namespace(&self, name: &str) -> Result<()> {
        self.run(&["netns", "add", name]).await.map(drop)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.run(&["netns", "delete", name]).await.map(drop)
    }
}
