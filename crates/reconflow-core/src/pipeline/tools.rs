use std::{
    collections::BTreeSet,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    process::Stdio,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, info, warn};

/// Captured result of one external tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Launches external scanning binaries.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[String], stdin: Option<&str>) -> Result<ToolOutput>;
}

/// Resolves host tokens to IPv4 addresses before port scanning.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>>;
}

/// Runs tools as child processes, piping optional stdin.
#[derive(Debug, Default, Clone)]
pub struct CommandToolRunner;

#[async_trait]
impl ToolRunner for CommandToolRunner {
    async fn run(&self, program: &Path, args: &[String], stdin: Option<&str>) -> Result<ToolOutput> {
        debug!(program = %program.display(), ?args, "spawning tool");
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", program.display()))?;

        let input = stdin.map(str::to_owned);
        let mut pipe = child.stdin.take();
        let feed = async move {
            if let (Some(pipe), Some(input)) = (pipe.as_mut(), input) {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            drop(pipe);
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.with_context(|| format!("failed to wait for {}", program.display()))?;
        if let Err(err) = fed {
            warn!(program = %program.display(), error = %err, "tool closed stdin early");
        }

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        })
    }
}

/// System resolver via `tokio::net::lookup_host`.
#[derive(Debug, Default, Clone)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .with_context(|| format!("failed to resolve {host}"))?;
        Ok(addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .collect())
    }
}

/// Run a tool and log its stderr when it exits unsuccessfully. Output is kept either way.
pub(crate) async fn invoke(
    runner: &dyn ToolRunner,
    program: &Path,
    args: &[String],
    stdin: Option<&str>,
) -> Result<String> {
    let output = runner.run(program, args, stdin).await?;
    if !output.success {
        warn!(
            program = %program.display(),
            stderr = %output.stderr.trim(),
            "tool exited with failure status"
        );
    }
    Ok(output.stdout)
}

/// Lines that are clearly not host names (enumeration arrows, annotations).
pub(crate) fn looks_like_host(token: &str) -> bool {
    !(token.contains(' ') || token.contains("-->") || token.contains('('))
}

/// Resolve host tokens into a sorted, unique IPv4 list, skipping anything that fails.
pub(crate) async fn resolve_hosts(resolver: &dyn HostResolver, hosts: &[String]) -> Vec<String> {
    let mut ips = BTreeSet::new();
    for host in hosts {
        if !looks_like_host(host) {
            debug!(%host, "skipping non-host line");
            continue;
        }
        match resolver.resolve_ipv4(host).await {
            Ok(resolved) => ips.extend(resolved),
            Err(err) => debug!(%host, error = %err, "resolution failed"),
        }
    }
    info!(hosts = hosts.len(), ips = ips.len(), "resolved scan targets");
    ips.into_iter().map(|ip| ip.to_string()).collect()
}

pub(crate) fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
