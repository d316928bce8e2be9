//! Supporting-read collection
//!
//! For each breakpoint record, find the reads whose split-alignment row
//! matches the breakpoint pair in either orientation, look their
//! sequences up in the sample's raw-alignment file and emit them as
//! two-line FASTA-like records keyed by `{line_number}-{occurrence}_{readname}`.
//!
//! The phase is split in two halves: the driver fans the record table out
//! to shard workers through the job dispatcher and concatenates their
//! private output files in shard order; the worker half is this same
//! binary re-invoked with a hidden `--collect-shard` flag, so local
//! processes and cluster array tasks run identical code.

use anyhow::{bail, Context, Result};
use config::{PipelineError, WorkPaths, SAM_FWD_SUPPLEMENTARY_TAG, SAM_MATE_SAME_REF};
use hashbrown::{HashMap, HashSet};
use log::info;
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::core::breakpoints::BreakpointRecord;
use crate::core::dispatch::{Dispatcher, TaskCommand, WorkerResult, TASK_TOKEN};

/// Optional restriction applied while collecting; when set, every
/// non-matching candidate is skipped entirely. The same value drives the
/// input reduction on restart, so a restarted filtered run and a full
/// run filtered post-hoc see identical read sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    #[default]
    None,
    ReadName(String),
    Sequence(String),
}

impl Predicate {
    pub fn is_active(&self) -> bool {
        !matches!(self, Predicate::None)
    }

    /// name-level gate, applied before the raw-alignment lookup
    pub fn accepts_name(&self, readname: &str) -> bool {
        match self {
            Predicate::ReadName(want) => readname == want,
            _ => true,
        }
    }

    /// sequence-level gate, applied per retained alignment
    pub fn accepts_seq(&self, seq: &str) -> bool {
        match self {
            Predicate::Sequence(want) => seq == want,
            _ => true,
        }
    }

    /// full gate for one collected (readname, sequence) pair
    pub fn accepts(&self, readname: &str, seq: &str) -> bool {
        self.accepts_name(readname) && self.accepts_seq(seq)
    }
}

/// Everything a shard worker needs beyond the breakpoint checkpoint.
/// Persisted as JSON next to it so workers on remote hosts can re-derive
/// their shard deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectManifest {
    pub samples_dir: PathBuf,
    pub shards: usize,
    pub predicate: Predicate,
}

pub fn encode_read_id(line_number: u64, occurrence: u64, readname: &str) -> String {
    format!("{}-{}_{}", line_number, occurrence, readname)
}

/// Inverse of [`encode_read_id`]; read names may themselves contain `_`.
pub fn decode_read_id(id: &str) -> Result<(u64, u64, &str)> {
    let (prefix, readname) = id
        .split_once('_')
        .with_context(|| format!("malformed read id: {:?}", id))?;
    let (nr, occ) = prefix
        .split_once('-')
        .with_context(|| format!("malformed read id prefix: {:?}", id))?;
    Ok((
        nr.parse()
            .with_context(|| format!("bad line number in read id {:?}", id))?,
        occ.parse()
            .with_context(|| format!("bad occurrence in read id {:?}", id))?,
        readname,
    ))
}

/// Contiguous, balanced shard ranges: every shard gets `n / workers`
/// records and the last shard absorbs the remainder.
pub fn partition(n: usize, workers: usize) -> Vec<Range<usize>> {
    let shards = workers.min(n).max(1);
    let base = n / shards;

    let mut ranges = Vec::with_capacity(shards);
    for i in 0..shards {
        let start = i * base;
        let end = if i == shards - 1 { n } else { start + base };
        ranges.push(start..end);
    }
    ranges
}

/// Command template re-invoking this binary as a shard worker.
pub fn worker_command(paths: &WorkPaths, shards: usize) -> Result<TaskCommand> {
    let program = std::env::current_exe().context("cannot locate own binary for workers")?;
    Ok(TaskCommand::new(
        program,
        vec![
            "--collect-shard".to_string(),
            TASK_TOKEN.to_string(),
            "--workdir".to_string(),
            paths.work_dir().to_string_lossy().into_owned(),
        ],
        shards,
    ))
}

/// Driver half: dispatch shard workers, concatenate their outputs in
/// shard order and derive per-record supporting counts from the result.
/// `cmd` is the per-shard worker invocation, normally [`worker_command`].
pub fn run_collection(
    table: &mut [BreakpointRecord],
    paths: &WorkPaths,
    manifest: &CollectManifest,
    dispatcher: &Dispatcher,
    cmd: &TaskCommand,
) -> Result<()> {
    let manifest_json = serde_json::to_string(manifest)?;
    std::fs::write(paths.manifest(), manifest_json)
        .with_context(|| format!("failed to write {:?}", paths.manifest()))?;

    let shards = partition(table.len(), manifest.shards).len();
    info!("Collecting supporting reads across {} shards...", shards);
    let results = dispatcher.run("collect", cmd, shards)?;
    check_worker_results(&results)?;

    let width = shards.to_string().len();
    let shard_files: Vec<PathBuf> = (1..=shards)
        .map(|task| paths.collect_shard(task, width))
        .collect();
    crate::utils::concat_files(&shard_files, &paths.collect())?;

    let counts = count_occurrences(&paths.collect())?;
    let total: u64 = counts.values().sum();
    if total == 0 {
        bail!("no supporting reads were collected; nothing to align");
    }
    info!("Supporting reads collected: {}", total);

    for rec in table.iter_mut() {
        rec.supporting_reads = counts.get(&rec.line_number).copied().unwrap_or(0);
    }
    Ok(())
}

/// All failures are aggregated into one report so a multi-shard run
/// surfaces every broken worker at once.
fn check_worker_results(results: &[WorkerResult]) -> Result<()> {
    let mut failures = Vec::new();
    for r in results {
        if r.exit_code != 0 {
            failures.push(format!(
                "shard {} exited with code {}: {}",
                r.task,
                r.exit_code,
                r.stderr.trim()
            ));
        } else if !r.stderr.trim().is_empty() {
            failures.push(format!("shard {} wrote to stderr: {}", r.task, r.stderr.trim()));
        } else if !r.stdout.is_empty() && r.stdout.trim().parse::<u64>().is_err() {
            // local workers report their emitted-read count on stdout
            failures.push(format!(
                "shard {} reported a non-numeric count: {:?}",
                r.task,
                r.stdout.trim()
            ));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::WorkerFailure(failures.join("\n")).into())
    }
}

/// Worker half, entered through the hidden `--collect-shard` flag.
/// Writes one private shard file and prints the emitted-read count.
pub fn run_shard(work_dir: &Path, task: usize) -> Result<()> {
    let paths = WorkPaths::new(work_dir);

    let manifest: CollectManifest =
        serde_json::from_str(&std::fs::read_to_string(paths.manifest())?)
            .context("failed to parse collection manifest")?;
    let table: Vec<BreakpointRecord> =
        serde_json::from_str(&std::fs::read_to_string(paths.breakinfo())?)
            .context("failed to parse breakpoint checkpoint")?;

    let ranges = partition(table.len(), manifest.shards);
    let range = ranges
        .get(task - 1)
        .with_context(|| format!("shard {} out of range ({} shards)", task, ranges.len()))?
        .clone();

    let width = ranges.len().to_string().len();
    let out_path = paths.collect_shard(task, width);
    let mut out = BufWriter::new(
        File::create(&out_path).with_context(|| format!("failed to create {:?}", out_path))?,
    );

    let mut junction_cache: HashMap<String, PathBuf> = HashMap::new();
    let mut total = 0u64;
    for rec in &table[range] {
        let jun_path = match junction_cache.get(&rec.sample) {
            Some(p) => p.clone(),
            None => {
                let p = locate_junction_file(&manifest.samples_dir, &rec.sample)?;
                junction_cache.insert(rec.sample.clone(), p.clone());
                p
            }
        };
        total += collect_record(rec, &jun_path, &manifest.predicate, &mut out)?;
    }
    out.flush()?;

    println!("{}", total);
    Ok(())
}

/// exactly one `*.junction` file per sample directory
fn locate_junction_file(samples_dir: &Path, sample: &str) -> Result<PathBuf> {
    let dir = samples_dir.join(sample);
    if !dir.is_dir() {
        return Err(PipelineError::PathError(dir).into());
    }

    let mut hits: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "junction"))
        .collect();

    if hits.len() != 1 {
        bail!(
            "expected exactly one junction file in {:?}, found {}",
            dir,
            hits.len()
        );
    }
    Ok(hits.remove(0))
}

fn sam_path_for(junction: &Path) -> PathBuf {
    junction.with_extension("sam")
}

/// Split-alignment rows matching the record's breakpoint pair in either
/// orientation; returns read names in file order, duplicates kept.
fn scan_junction(path: &Path, rec: &BreakpointRecord) -> Result<Vec<String>> {
    let reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open junction file {:?}", path))?,
    );

    let mut readnames = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let f: Vec<&str> = line.split('\t').collect();
        if f.len() < 10 {
            continue;
        }
        let (Ok(pos_a), Ok(pos_b)) = (f[1].parse::<u64>(), f[4].parse::<u64>()) else {
            continue;
        };

        let fwd = f[0] == rec.chr1 && pos_a == rec.bp1 && f[3] == rec.chr2 && pos_b == rec.bp2;
        let rev = f[0] == rec.chr2 && pos_a == rec.bp2 && f[3] == rec.chr1 && pos_b == rec.bp1;
        if fwd || rev {
            readnames.push(f[9].to_string());
        }
    }
    Ok(readnames)
}

/// Primary, mate-unmapped-elsewhere alignments only: mate reference must
/// differ, template length must be zero and the forward-supplementary
/// tag must be absent.
fn keep_sam_record(fields: &[&str]) -> bool {
    fields.len() >= 15
        && fields[6] != SAM_MATE_SAME_REF
        && fields[8] == "0"
        && fields[14] != SAM_FWD_SUPPLEMENTARY_TAG
}

/// Emit all retained sequences for one record; the occurrence counter
/// restarts at 1 for every record.
fn collect_record<W: Write>(
    rec: &BreakpointRecord,
    junction_path: &Path,
    predicate: &Predicate,
    out: &mut W,
) -> Result<u64> {
    let readnames = scan_junction(junction_path, rec)?;
    let wanted: Vec<&String> = readnames
        .iter()
        .filter(|name| predicate.accepts_name(name))
        .collect();
    if wanted.is_empty() {
        return Ok(0);
    }

    // one pass over the raw-alignment file for the whole record
    let name_set: HashSet<&str> = wanted.iter().map(|s| s.as_str()).collect();
    let sam_path = sam_path_for(junction_path);
    let reader = BufReader::new(
        File::open(&sam_path)
            .with_context(|| format!("failed to open raw-alignment file {:?}", sam_path))?,
    );

    let mut seqs: HashMap<String, Vec<String>> = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        if line.starts_with('@') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let Some(name) = fields.first() else {
            continue;
        };
        if name_set.contains(name) && keep_sam_record(&fields) {
            seqs.entry(name.to_string())
                .or_default()
                .push(fields[9].to_string());
        }
    }

    let mut occurrence = 0u64;
    for name in wanted {
        let Some(found) = seqs.get(name.as_str()) else {
            continue;
        };
        for seq in found {
            if !predicate.accepts_seq(seq) {
                continue;
            }
            occurrence += 1;
            writeln!(
                out,
                ">{}",
                encode_read_id(rec.line_number, occurrence, name)
            )?;
            writeln!(out, "{}", seq)?;
        }
    }
    Ok(occurrence)
}

/// Count emitted occurrences per line number by scanning the headers of
/// the concatenated collection output.
pub fn count_occurrences(path: &Path) -> Result<HashMap<u64, u64>> {
    let reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open collection output {:?}", path))?,
    );

    let mut counts: HashMap<u64, u64> = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let Some(id) = line.strip_prefix('>') else {
            continue;
        };
        let (line_number, _, _) = decode_read_id(id)?;
        *counts.entry(line_number).or_insert(0) += 1;
    }
    Ok(counts)
}
