use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

pub mod parse;

/// Raw output file written by one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Subdomains,
    PortScan,
    PortScanTargets,
    HttpProbe,
    VulnerabilityScan,
    Breaches,
    CodeLeaks,
    IpIntel,
    HostIntel,
}

impl ArtifactKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Subdomains => "subdomains.txt",
            Self::PortScan => "naabu.json",
            Self::PortScanTargets => "naabu_targets.txt",
            Self::HttpProbe => "httpx.json",
            Self::VulnerabilityScan => "nuclei.json",
            Self::Breaches => "breaches_hibp.json",
            Self::CodeLeaks => "github_leaks.json",
            Self::IpIntel => "ipintel.json",
            Self::HostIntel => "shodan.json",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Target-scoped directory layout: `<data_dir>/<target>/raw/<artifact>`.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    identity: String,
    target_dir: PathBuf,
}

impl ArtifactLayout {
    /// `identity` is the target's file stem, not its display name.
    pub fn new(data_dir: impl AsRef<Path>, identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            target_dir: data_dir.as_ref().join(identity),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.target_dir.join("raw")
    }

    pub fn path(&self, kind: ArtifactKind) -> PathBuf {
        self.raw_dir().join(kind.file_name())
    }

    pub fn ensure_raw_dir(&self) -> Result<()> {
        let dir = self.raw_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create raw data dir {}", dir.display()))
    }

    /// Read an artifact, treating a missing file as empty text.
    pub fn read(&self, kind: ArtifactKind) -> Result<String> {
        let path = self.path(kind);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    /// True when the artifact exists and holds at least one non-blank character.
    pub fn has_content(&self, kind: ArtifactKind) -> bool {
        fs::read_to_string(self.path(kind))
            .map(|text| !text.trim().is_empty())
            .unwrap_or(false)
    }

    /// Overwrite an artifact in place.
    pub fn write(&self, kind: ArtifactKind, contents: &str) -> Result<PathBuf> {
        self.ensure_raw_dir()?;
        let path = self.path(kind);
        fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Serialize records as one JSON object per line and overwrite the artifact.
    pub fn write_jsonl<T: serde::Serialize>(&self, kind: ArtifactKind, records: &[T]) -> Result<PathBuf> {
        let mut lines = Vec::with_capacity(records.len());
        for record in records {
            lines.push(serde_json::to_string(record).context("failed to encode artifact record")?);
        }
        self.write(kind, &lines.join("\n"))
    }
}
