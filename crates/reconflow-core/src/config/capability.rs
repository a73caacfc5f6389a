use std::{fmt, path::PathBuf, time::Duration};

use serde::Serialize;
use thiserror::Error;

use crate::artifact::ArtifactKind;

/// Sentinel shipped in sample configuration files in place of a real credential.
pub const PLACEHOLDER_CREDENTIAL: &str = "CHANGE_ME";

/// Every capability the pipeline knows how to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityName {
    Amass,
    Subfinder,
    Naabu,
    Httpx,
    Nuclei,
    Hibp,
    Github,
    Ipinfo,
    Shodan,
}

impl CapabilityName {
    pub const ALL: [CapabilityName; 9] = [
        Self::Amass,
        Self::Subfinder,
        Self::Naabu,
        Self::Httpx,
        Self::Nuclei,
        Self::Hibp,
        Self::Github,
        Self::Ipinfo,
        Self::Shodan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amass => "amass",
            Self::Subfinder => "subfinder",
            Self::Naabu => "naabu",
            Self::Httpx => "httpx",
            Self::Nuclei => "nuclei",
            Self::Hibp => "hibp",
            Self::Github => "github",
            Self::Ipinfo => "ipinfo",
            Self::Shodan => "shodan",
        }
    }

    /// What a capability must carry before its stage may run.
    pub fn requirement(&self) -> Requirement {
        match self {
            Self::Amass | Self::Subfinder | Self::Naabu | Self::Httpx | Self::Nuclei => {
                Requirement::Executable
            }
            Self::Hibp | Self::Github | Self::Ipinfo | Self::Shodan => Requirement::Credential,
        }
    }

    pub(crate) fn default_lookup(&self) -> LookupSettings {
        let (concurrency, delay_ms, timeout_secs) = match self {
            Self::Hibp => (1, 0, 15),
            Self::Github => (1, 1000, 20),
            Self::Ipinfo => (4, 0, 10),
            Self::Shodan => (1, 1000, 20),
            _ => (1, 0, 30),
        };
        LookupSettings {
            base_url: None,
            concurrency,
            delay: Duration::from_millis(delay_ms),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Credential,
    Executable,
}

/// Outbound lookup tuning for provider-backed capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSettings {
    /// Override for the provider's public endpoint.
    pub base_url: Option<String>,
    pub concurrency: usize,
    /// Politeness delay applied before each lookup.
    pub delay: Duration,
    pub timeout: Duration,
}

/// Resolved configuration for one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub enabled: bool,
    pub credential: Option<String>,
    pub executable: Option<PathBuf>,
    pub lookup: LookupSettings,
}

impl Capability {
    pub fn tool(name: CapabilityName, executable: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            credential: None,
            executable: Some(executable.into()),
            lookup: name.default_lookup(),
        }
    }

    pub fn provider(name: CapabilityName, enabled: bool, credential: Option<String>) -> Self {
        Self {
            enabled,
            credential,
            executable: None,
            lookup: name.default_lookup(),
        }
    }
}

/// Why a stage did not run. Always a normal outcome, never a run failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("{0} is not configured")]
    NotConfigured(CapabilityName),
    #[error("{0} is disabled")]
    Disabled(CapabilityName),
    #[error("{0} credential is not set")]
    MissingCredential(CapabilityName),
    #[error("{0} credential is still the placeholder value")]
    PlaceholderCredential(CapabilityName),
    #[error("{0} executable path is not set")]
    MissingExecutable(CapabilityName),
    #[error("required artifact {0} is missing or empty")]
    MissingArtifact(String),
    #[error("{0}")]
    NoInput(String),
}

impl SkipReason {
    pub fn missing_artifact(kind: ArtifactKind) -> Self {
        Self::MissingArtifact(kind.file_name().to_string())
    }
}

/// Decide whether a capability may be used. `entry` is `None` when the
/// configuration does not mention the capability at all.
pub fn evaluate(name: CapabilityName, entry: Option<&Capability>) -> Result<(), SkipReason> {
    let capability = entry.ok_or(SkipReason::NotConfigured(name))?;
    if !capability.enabled {
        return Err(SkipReason::Disabled(name));
    }
    match name.requirement() {
        Requirement::Credential => {
            let credential = capability
                .credential
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or(SkipReason::MissingCredential(name))?;
            if credential == PLACEHOLDER_CREDENTIAL {
                return Err(SkipReason::PlaceholderCredential(name));
            }
        }
        Requirement::Executable => {
            capability
                .executable
                .as_ref()
                .filter(|path| !path.as_os_str().is_empty())
                .ok_or(SkipReason::MissingExecutable(name))?;
        }
    }
    Ok(())
}
