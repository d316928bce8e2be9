//! Small shared helpers

use anyhow::{Context, Result};
use config::PipelineError;
use log::info;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

/// Probe PATH for an external binary without executing it.
pub fn require_tool(name: &str) -> Result<()> {
    let status = Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("failed to run which")?;

    if !status.success() {
        return Err(PipelineError::ToolUnavailable(name.to_string()).into());
    }
    Ok(())
}

/// Logs the wall time of a pipeline phase when dropped.
pub struct PhaseTimer {
    name: &'static str,
    start: Instant,
}

impl PhaseTimer {
    pub fn new(name: &'static str) -> Self {
        info!("Starting {} phase...", name);
        Self {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        info!("Phase {} took {:?}", self.name, self.start.elapsed());
    }
}

/// Concatenate `srcs` into `dst` in the given order; a missing source is
/// fatal since ordering is load-bearing for downstream joins.
pub fn concat_files(srcs: &[PathBuf], dst: &Path) -> Result<()> {
    let mut out = BufWriter::new(
        File::create(dst).with_context(|| format!("failed to create {:?}", dst))?,
    );

    for src in srcs {
        if !src.is_file() {
            return Err(PipelineError::PathError(src.clone()).into());
        }
        let mut reader = File::open(src)?;
        std::io::copy(&mut reader, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_tool() {
        require_tool("sh").unwrap();
        assert!(require_tool("definitely-not-a-real-tool").is_err());
    }

    #[test]
    fn test_concat_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, "first\n").unwrap();
        std::fs::write(&b, "second\n").unwrap();

        let dst = dir.path().join("out");
        concat_files(&[b.clone(), a.clone()], &dst).unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "second\nfirst\n");
    }

    #[test]
    fn test_concat_missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("out");
        assert!(concat_files(&[dir.path().join("missing")], &dst).is_err());
    }
}
