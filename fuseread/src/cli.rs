use clap::{ArgAction, Parser};
use config::{validate, validate_dir, ArgCheck, CliError};
use hashbrown::HashSet;

use std::path::PathBuf;

use crate::core::align::Aligner;
use crate::core::collect::Predicate;
use crate::core::filter::FilterOptions;
use crate::core::pipeline::{PipelineConfig, RestartPhase};

pub const DEFAULT_FUSIONS: &str = "fusions.tsv";
pub const DEFAULT_SAMPLES_SUBDIR: &str = "star";
pub const DEFAULT_ALIGNER_OPTS: &str = "-minScore=20 -minMatch=1 -noHead";

#[derive(Debug, Parser)]
#[command(name = "fuseread", version = config::VERSION)]
pub struct Args {
    #[arg(
        value_name = "INPUT",
        required_unless_present = "collect_shard",
        help = "Directory holding the breakpoint table and per-sample alignments"
    )]
    pub input_dir: Option<PathBuf>,

    #[arg(
        value_name = "OUTPUT",
        required_unless_present = "collect_shard",
        help = "Directory receiving the report and the working directory"
    )]
    pub output_dir: Option<PathBuf>,

    #[arg(
        long = "fusions",
        value_name = "PATH",
        help = "Breakpoint table [default: <INPUT>/fusions.tsv]"
    )]
    pub fusions: Option<PathBuf>,

    #[arg(
        long = "samples-dir",
        value_name = "PATH",
        help = "Directory with one subdirectory per sample [default: <INPUT>/star]"
    )]
    pub samples_dir: Option<PathBuf>,

    #[arg(
        short = 'g',
        long = "reference",
        required_unless_present = "collect_shard",
        value_name = "PATH",
        help = "Reference genome passed to the aligner"
    )]
    pub reference: Option<PathBuf>,

    #[arg(
        long = "aligner",
        value_name = "TOOL",
        default_value = "blat",
        help = "External aligner binary; must accept <opts> <ref> <in> <out>"
    )]
    pub aligner: String,

    #[arg(
        long = "aligner-opt",
        value_name = "OPTS",
        default_value = DEFAULT_ALIGNER_OPTS,
        help = "Options forwarded verbatim to the aligner"
    )]
    pub aligner_opt: String,

    #[arg(
        short = 'p',
        long = "workers",
        help = "Number of collection workers / threads",
        value_name = "WORKERS",
        default_value_t = num_cpus::get()
    )]
    pub workers: usize,

    #[arg(
        long = "start-extension",
        value_name = "BASES",
        default_value_t = 0,
        help = "Widen aligner target intervals leftward before breakpoint matching"
    )]
    pub start_extension: u64,

    #[arg(
        long = "end-extension",
        value_name = "BASES",
        default_value_t = 1,
        help = "Widen aligner target intervals rightward before breakpoint matching"
    )]
    pub end_extension: u64,

    #[arg(
        long = "lines",
        value_name = "LIST",
        help = "Restrict to these table rows, e.g. 2,5,8-10 (header is row 1)"
    )]
    pub lines: Option<String>,

    #[arg(
        long = "readname",
        value_name = "NAME",
        help = "Only collect reads with this exact name"
    )]
    pub readname: Option<String>,

    #[arg(
        long = "sequence",
        value_name = "SEQ",
        help = "Only collect reads with this exact sequence"
    )]
    pub sequence: Option<String>,

    #[arg(
        long = "restart-align",
        help = "Flag to resume from the alignment phase",
        value_name = "FLAG",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub restart_align: bool,

    #[arg(
        long = "restart-filter",
        help = "Flag to resume from the filtering phase",
        value_name = "FLAG",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub restart_filter: bool,

    #[arg(
        long = "cluster",
        help = "Flag to dispatch workers as a grid-engine array job",
        value_name = "FLAG",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub cluster: bool,

    #[arg(
        long = "keep-work",
        help = "Flag to keep the working directory for debugging",
        value_name = "FLAG",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub keep_work: bool,

    // worker re-invocation surface, not part of the public CLI
    #[arg(long = "collect-shard", value_name = "N", hide = true, requires = "workdir")]
    pub collect_shard: Option<usize>,

    #[arg(long = "workdir", value_name = "PATH", hide = true)]
    pub workdir: Option<PathBuf>,
}

impl Args {
    fn input_dir(&self) -> &PathBuf {
        self.input_dir.as_ref().expect("clap enforces INPUT")
    }

    fn output_dir(&self) -> &PathBuf {
        self.output_dir.as_ref().expect("clap enforces OUTPUT")
    }

    pub fn fusions_path(&self) -> PathBuf {
        self.fusions
            .clone()
            .unwrap_or_else(|| self.input_dir().join(DEFAULT_FUSIONS))
    }

    pub fn samples_path(&self) -> PathBuf {
        self.samples_dir
            .clone()
            .unwrap_or_else(|| self.input_dir().join(DEFAULT_SAMPLES_SUBDIR))
    }

    pub fn predicate(&self) -> Result<Predicate, CliError> {
        match (&self.readname, &self.sequence) {
            (Some(_), Some(_)) => Err(CliError::InvalidInput(
                "--readname and --sequence are mutually exclusive".to_string(),
            )),
            (Some(name), None) => Ok(Predicate::ReadName(name.clone())),
            (None, Some(seq)) => Ok(Predicate::Sequence(seq.clone())),
            (None, None) => Ok(Predicate::None),
        }
    }

    pub fn restart_phase(&self) -> Result<Option<RestartPhase>, CliError> {
        match (self.restart_align, self.restart_filter) {
            (true, true) => Err(CliError::InvalidInput(
                "--restart-align and --restart-filter are mutually exclusive".to_string(),
            )),
            (true, false) => Ok(Some(RestartPhase::Alignment)),
            (false, true) => Ok(Some(RestartPhase::Filtering)),
            (false, false) => Ok(None),
        }
    }

    pub fn selected_lines(&self) -> Result<Option<HashSet<u64>>, CliError> {
        self.lines.as_deref().map(parse_lines).transpose()
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, CliError> {
        Ok(PipelineConfig {
            fusions: self.fusions_path(),
            samples_dir: self.samples_path(),
            output_dir: self.output_dir().clone(),
            aligner: Aligner {
                program: self.aligner.clone(),
                options: self
                    .aligner_opt
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                reference: self.reference.clone().expect("clap enforces --reference"),
            },
            workers: self.workers,
            cluster: self.cluster,
            keep_work: self.keep_work,
            predicate: self.predicate()?,
            filter: FilterOptions {
                start_extension: self.start_extension,
                end_extension: self.end_extension,
            },
            selected_lines: self.selected_lines()?,
        })
    }
}

impl ArgCheck for Args {
    fn validate_args(&self) -> Result<(), CliError> {
        validate_dir(self.input_dir())?;
        validate(&self.fusions_path())?;
        validate_dir(&self.samples_path())?;

        if self.workers == 0 {
            return Err(CliError::InvalidInput(
                "--workers must be at least 1".to_string(),
            ));
        }

        self.predicate()?;
        self.restart_phase()?;
        self.selected_lines()?;

        Ok(())
    }
}

/// Parse a row selection like `2,5,8-10` into a set of line numbers.
pub fn parse_lines(spec: &str) -> Result<HashSet<u64>, CliError> {
    let invalid = || CliError::InvalidInput(format!("invalid --lines selection: {:?}", spec));

    let mut set = HashSet::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err(invalid());
        }
        match token.split_once('-') {
            Some((lo, hi)) => {
                let lo: u64 = lo.trim().parse().map_err(|_| invalid())?;
                let hi: u64 = hi.trim().parse().map_err(|_| invalid())?;
                if lo > hi {
                    return Err(invalid());
                }
                set.extend(lo..=hi);
            }
            None => {
                set.insert(token.parse().map_err(|_| invalid())?);
            }
        }
    }
    Ok(set)
}
