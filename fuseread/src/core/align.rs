//! Alignment dispatch
//!
//! Realigns the collected supporting reads against the reference with an
//! external aligner. Locally this is a single child process over the
//! whole collection file; on a cluster each collection shard is aligned
//! by one array task and the per-task outputs are concatenated in shard
//! order, so both modes produce one identically ordered alignment file.

use anyhow::{bail, Context, Result};
use config::{WorkPaths, ALIGN_VMEM};
use log::info;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::dispatch::{Dispatcher, TaskCommand, TASK_TOKEN};

/// External aligner invocation: `<program> <options..> <reference> <input> <output>`.
/// Defaults target blat with headerless tabular output; any aligner with
/// the same argument shape and output columns can be substituted.
#[derive(Debug, Clone)]
pub struct Aligner {
    pub program: String,
    pub options: Vec<String>,
    pub reference: PathBuf,
}

impl Aligner {
    fn invocation_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = self.options.clone();
        args.push(self.reference.to_string_lossy().into_owned());
        args.push(input.to_string_lossy().into_owned());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

/// Align `input` into the working directory's alignment file.
pub fn run_alignment(
    paths: &WorkPaths,
    aligner: &Aligner,
    input: &Path,
    cluster: bool,
    workers: usize,
) -> Result<()> {
    if cluster {
        run_cluster(paths, aligner, input, workers)
    } else {
        run_local(paths, aligner, input)
    }
}

fn run_local(paths: &WorkPaths, aligner: &Aligner, input: &Path) -> Result<()> {
    let output = paths.alignment();
    info!("Aligning supporting reads with {}...", aligner.program);

    let out = Command::new(&aligner.program)
        .args(aligner.invocation_args(input, &output))
        .current_dir(paths.work_dir())
        .output()
        .with_context(|| format!("failed to run aligner {:?}", aligner.program))?;

    if !out.status.success() {
        bail!(
            "aligner {:?} exited with {}:\n{}",
            aligner.program,
            out.status,
            String::from_utf8_lossy(&out.stderr)
        );
    }
    if !output.is_file() {
        bail!("aligner produced no output file at {:?}", output);
    }
    Ok(())
}

/// Split the collection file into read-balanced chunks named like the
/// task inputs of the array job; the first `reads % chunks` chunks carry
/// one extra read. Returns the chunk count.
fn split_collection(input: &Path, paths: &WorkPaths, workers: usize) -> Result<usize> {
    let total = BufReader::new(
        File::open(input).with_context(|| format!("failed to open {:?}", input))?,
    )
    .lines()
    .count();
    if total % 2 != 0 {
        bail!(
            "collection file {:?} is truncated: {} lines do not frame two-line records",
            input,
            total
        );
    }
    let reads = total / 2;
    if reads == 0 {
        bail!("collection file {:?} holds no reads", input);
    }

    let chunks = workers.min(reads).max(1);
    let base = reads / chunks;
    let rem = reads % chunks;
    let width = chunks.to_string().len();

    let mut lines = BufReader::new(File::open(input)?).lines();
    for task in 1..=chunks {
        let quota = base + usize::from(task <= rem);
        let path = paths.collect_shard(task, width);
        let mut out = BufWriter::new(
            File::create(&path).with_context(|| format!("failed to create {:?}", path))?,
        );
        for _ in 0..quota * 2 {
            let line = lines
                .next()
                .transpose()?
                .context("collection file shrank while splitting")?;
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
    }
    Ok(chunks)
}

/// Fan the alignment out as an array job, one read-balanced chunk per
/// task, and concatenate the chunk outputs in index order.
fn run_cluster(paths: &WorkPaths, aligner: &Aligner, input: &Path, workers: usize) -> Result<()> {
    let chunks = split_collection(input, paths, workers)?;
    let width = chunks.to_string().len();

    let input_token = paths
        .work_dir()
        .join(format!("{}{}", config::COLLECT, TASK_TOKEN));
    let output_token = paths
        .work_dir()
        .join(format!("{}{}", config::ALIGNMENT, TASK_TOKEN));

    let cmd = TaskCommand::new(
        PathBuf::from(&aligner.program),
        aligner.invocation_args(&input_token, &output_token),
        chunks,
    );

    let dispatcher = Dispatcher::Cluster {
        paths,
        vmem: ALIGN_VMEM,
    };
    let results = dispatcher.run("align", &cmd, chunks)?;

    let failures: Vec<String> = results
        .iter()
        .filter(|r| r.exit_code != 0)
        .map(|r| format!("alignment task {} exited with code {}", r.task, r.exit_code))
        .collect();
    if !failures.is_empty() {
        bail!("cluster alignment failed:\n{}", failures.join("\n"));
    }

    let outputs: Vec<PathBuf> = (1..=chunks)
        .map(|task| paths.alignment_chunk(task, width))
        .collect();
    crate::utils::concat_files(&outputs, &paths.alignment())?;
    Ok(())
}
