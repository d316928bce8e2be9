//! Shared configuration for the fuseread pipeline
//!
//! This crate centralizes the working-directory file-name scheme, the
//! canonical chromosome set, the scheduler retry budget, the error
//! taxonomy and a handful of CLI/progress helpers used by every phase
//! of the pipeline.

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// working-directory file names
pub const PARAMS: &str = "params";
pub const BREAKINFO: &str = "breakinfo";
pub const MANIFEST: &str = "manifest";
pub const COLLECT: &str = "collect";
pub const COLLECT_RESTART: &str = "collect_restart";
pub const ALIGNMENT: &str = "align";
pub const ALIGNMENT_RESTART: &str = "align_restart";
pub const FILTER_MATCH: &str = "filter_match";
pub const FILTER_MISS: &str = "filter_miss";
pub const FILTER_WARN: &str = "filter_warning";
pub const FILTER_ERROR: &str = "filter_error";

// fixed output names
pub const WORK_DIRNAME: &str = "work";
pub const REPORT_FILENAME: &str = "fusion_sequences.txt";

// scheduler polling budget
pub const QACCT_INITIAL_WAIT: Duration = Duration::from_secs(10);
pub const QACCT_RETRY_WAIT: Duration = Duration::from_secs(30);
pub const QACCT_RETRIES: usize = 20;

// cluster resource requests
pub const COLLECT_VMEM: &str = "s_vmem=4G,mem_req=4G";
pub const ALIGN_VMEM: &str = "s_vmem=8G,mem_req=8G";

// file-format markers
pub const SAM_MATE_SAME_REF: &str = "=";
pub const SAM_FWD_SUPPLEMENTARY_TAG: &str = "XS:A:+";

// os
#[cfg(not(windows))]
const TICK_SETTINGS: (&str, u64) = ("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ", 80);
#[cfg(windows)]
const TICK_SETTINGS: (&str, u64) = (r"+-x| ", 200);

/// return a pre-configured progress bar
pub fn get_progress_bar(length: u64, msg: &str) -> ProgressBar {
    let progressbar_style = ProgressStyle::default_spinner()
        .tick_chars(TICK_SETTINGS.0)
        .template(" {spinner} {msg:<30} {wide_bar} ETA {eta_precise} ")
        .expect("no template error");

    let progress_bar = ProgressBar::new(length);

    progress_bar.set_style(progressbar_style);
    progress_bar.enable_steady_tick(Duration::from_millis(TICK_SETTINGS.1));
    progress_bar.set_message(msg.to_owned());

    progress_bar
}

/// breakpoint records outside this set are dropped at parse time
pub fn is_canonical_chrom(chrom: &str) -> bool {
    match chrom {
        "X" | "Y" => true,
        _ => matches!(chrom.parse::<u8>(), Ok(n) if (1..=22).contains(&n)),
    }
}

/// Immutable view of the working-directory layout.
///
/// Built once by the pipeline controller and passed by reference to each
/// phase, so no phase can silently rename another phase's files.
#[derive(Debug, Clone)]
pub struct WorkPaths {
    work_dir: PathBuf,
}

impl WorkPaths {
    pub fn new<P: AsRef<Path>>(work_dir: P) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn params(&self) -> PathBuf {
        self.work_dir.join(PARAMS)
    }

    pub fn breakinfo(&self) -> PathBuf {
        self.work_dir.join(BREAKINFO)
    }

    pub fn manifest(&self) -> PathBuf {
        self.work_dir.join(MANIFEST)
    }

    pub fn collect(&self) -> PathBuf {
        self.work_dir.join(COLLECT)
    }

    pub fn collect_restart(&self) -> PathBuf {
        self.work_dir.join(COLLECT_RESTART)
    }

    /// private output shard of one collection worker (1-based task id)
    pub fn collect_shard(&self, task: usize, width: usize) -> PathBuf {
        self.work_dir.join(format!("{}{:0width$}", COLLECT, task))
    }

    pub fn alignment(&self) -> PathBuf {
        self.work_dir.join(ALIGNMENT)
    }

    pub fn alignment_restart(&self) -> PathBuf {
        self.work_dir.join(ALIGNMENT_RESTART)
    }

    pub fn alignment_chunk(&self, task: usize, width: usize) -> PathBuf {
        self.work_dir.join(format!("{}{:0width$}", ALIGNMENT, task))
    }

    pub fn filter_match(&self) -> PathBuf {
        self.work_dir.join(FILTER_MATCH)
    }

    pub fn filter_miss(&self) -> PathBuf {
        self.work_dir.join(FILTER_MISS)
    }

    pub fn filter_warn(&self) -> PathBuf {
        self.work_dir.join(FILTER_WARN)
    }

    pub fn filter_error(&self) -> PathBuf {
        self.work_dir.join(FILTER_ERROR)
    }

    /// batch script / log locations for a named array job
    pub fn script(&self, name: &str) -> PathBuf {
        self.work_dir.join(format!("{}.sh", name))
    }

    pub fn job_log(&self, name: &str) -> PathBuf {
        self.work_dir.join(format!("{}.log", name))
    }
}

/// error handling for CLI
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// fatal conditions raised by the pipeline phases
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required tool not found in PATH: {0}")]
    ToolUnavailable(String),
    #[error("expected path does not exist: {0}")]
    PathError(PathBuf),
    #[error("collection worker failure:\n{0}")]
    WorkerFailure(String),
    #[error("scheduler did not report usable exit codes: {0}")]
    SchedulerAmbiguity(String),
    #[error("consistency check failed: {0}")]
    ConsistencyError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// argument validation seam; binaries implement `validate_args`
pub trait ArgCheck {
    fn check(&self) -> Result<(), CliError> {
        self.validate_args()
    }

    fn validate_args(&self) -> Result<(), CliError>;
}

/// argument validation
pub fn validate(arg: &PathBuf) -> Result<(), CliError> {
    if !arg.exists() {
        return Err(CliError::InvalidInput(format!(
            "ERROR: {:?} does not exist",
            arg
        )));
    }

    if !arg.is_file() {
        return Err(CliError::InvalidInput(format!(
            "ERROR: {:?} is not a file",
            arg
        )));
    }

    match std::fs::metadata(arg) {
        Ok(metadata) if metadata.len() == 0 => Err(CliError::InvalidInput(format!(
            "ERROR: file {:?} is empty",
            arg
        ))),
        Ok(_) => Ok(()),
        Err(e) => Err(CliError::IoError(e)),
    }
}

pub fn validate_dir(arg: &PathBuf) -> Result<(), CliError> {
    if !arg.exists() {
        return Err(CliError::InvalidInput(format!(
            "ERROR: {:?} does not exist",
            arg
        )));
    }

    if !arg.is_dir() {
        return Err(CliError::InvalidInput(format!(
            "ERROR: {:?} is not a directory",
            arg
        )));
    }

    Ok(())
}
