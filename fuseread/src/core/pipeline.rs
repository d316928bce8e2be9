//! Pipeline controller
//!
//! Owns the working directory lifecycle, persists the breakpoint table
//! as a JSON checkpoint between phases and drives Collection, Alignment
//! and Filtering in order. Two restart entry points reuse the checkpoint
//! to skip the phases that already ran; an active read predicate on
//! restart first re-derives reduced collection/alignment inputs so the
//! filter sees exactly what a fresh filtered run would have produced.

use anyhow::{bail, Context, Result};
use config::{PipelineError, WorkPaths, COLLECT_VMEM, REPORT_FILENAME, WORK_DIRNAME};
use hashbrown::HashSet;
use log::info;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::align::{run_alignment, Aligner};
use crate::core::breakpoints::{parse_table, BreakpointRecord};
use crate::core::collect::{
    count_occurrences, decode_read_id, partition, run_collection, worker_command,
    CollectManifest, Predicate,
};
use crate::core::dispatch::Dispatcher;
use crate::core::filter::{run_filter, FilterOptions};
use crate::utils::{require_tool, PhaseTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Alignment,
    Filtering,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fusions: PathBuf,
    pub samples_dir: PathBuf,
    pub output_dir: PathBuf,
    pub aligner: Aligner,
    pub workers: usize,
    pub cluster: bool,
    pub keep_work: bool,
    pub predicate: Predicate,
    pub filter: FilterOptions,
    pub selected_lines: Option<HashSet<u64>>,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    paths: WorkPaths,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Self {
        let paths = WorkPaths::new(cfg.output_dir.join(WORK_DIRNAME));
        Self { cfg, paths }
    }

    pub fn work_paths(&self) -> &WorkPaths {
        &self.paths
    }

    fn report_path(&self) -> PathBuf {
        self.cfg.output_dir.join(REPORT_FILENAME)
    }

    /// External binaries are verified before any expensive work.
    fn check_tools(&self) -> Result<()> {
        require_tool(&self.cfg.aligner.program)?;
        if self.cfg.cluster {
            require_tool("qsub")?;
            require_tool("qacct")?;
        }
        Ok(())
    }

    pub fn run(&self) -> Result<()> {
        self.check_tools()?;
        self.recreate_work_dir()?;
        self.save_params()?;

        let mut table = {
            let _t = PhaseTimer::new("parse");
            parse_table(&self.cfg.fusions, self.cfg.selected_lines.as_ref())?
        };

        {
            let _t = PhaseTimer::new("collect");
            self.save_breakinfo(&table)?;
            let manifest = CollectManifest {
                samples_dir: self.cfg.samples_dir.clone(),
                shards: self.cfg.workers,
                predicate: self.cfg.predicate.clone(),
            };
            let dispatcher = if self.cfg.cluster {
                Dispatcher::Cluster {
                    paths: &self.paths,
                    vmem: COLLECT_VMEM,
                }
            } else {
                Dispatcher::Local
            };
            let shards = partition(table.len(), self.cfg.workers).len();
            let cmd = worker_command(&self.paths, shards)?;
            run_collection(&mut table, &self.paths, &manifest, &dispatcher, &cmd)?;
            // checkpoint again so restarts see the supporting counts
            self.save_breakinfo(&table)?;
        }

        {
            let _t = PhaseTimer::new("align");
            run_alignment(
                &self.paths,
                &self.cfg.aligner,
                &self.paths.collect(),
                self.cfg.cluster,
                self.cfg.workers,
            )?;
        }

        {
            let _t = PhaseTimer::new("filter");
            run_filter(
                &table,
                &self.paths.collect(),
                &self.paths.alignment(),
                &self.paths,
                &self.report_path(),
                &self.cfg.filter,
            )?;
        }

        self.cleanup()?;
        info!("Report written to {:?}", self.report_path());
        Ok(())
    }

    pub fn restart(&self, phase: RestartPhase) -> Result<()> {
        self.check_tools()?;

        if !self.paths.work_dir().is_dir() {
            return Err(PipelineError::PathError(self.paths.work_dir().to_path_buf()).into());
        }
        // the audit dump must reflect the resumed run's parameters
        self.save_params()?;
        let mut table = self.load_breakinfo()?;

        // a predicate narrows the previous run's outputs before refiltering
        let (collection, alignment) = if self.cfg.predicate.is_active() {
            let kept = self.refilter_collection(&mut table)?;
            if phase == RestartPhase::Filtering {
                self.refilter_alignment(&kept)?;
                (self.paths.collect_restart(), self.paths.alignment_restart())
            } else {
                (self.paths.collect_restart(), self.paths.alignment())
            }
        } else {
            (self.paths.collect(), self.paths.alignment())
        };

        if phase == RestartPhase::Alignment {
            let _t = PhaseTimer::new("align");
            run_alignment(
                &self.paths,
                &self.cfg.aligner,
                &collection,
                self.cfg.cluster,
                self.cfg.workers,
            )?;
        }

        {
            let _t = PhaseTimer::new("filter");
            run_filter(
                &table,
                &collection,
                &alignment,
                &self.paths,
                &self.report_path(),
                &self.cfg.filter,
            )?;
        }

        self.cleanup()?;
        info!("Report written to {:?}", self.report_path());
        Ok(())
    }

    fn recreate_work_dir(&self) -> Result<()> {
        let dir = self.paths.work_dir();
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("failed to clear working directory {:?}", dir))?;
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create working directory {:?}", dir))?;
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        if self.cfg.keep_work {
            info!("Keeping working directory {:?}", self.paths.work_dir());
            return Ok(());
        }
        std::fs::remove_dir_all(self.paths.work_dir()).with_context(|| {
            format!(
                "failed to remove working directory {:?}",
                self.paths.work_dir()
            )
        })?;
        Ok(())
    }

    /// Plain-text audit dump of every run parameter, one sorted
    /// `key: value` line per entry with aligned separators.
    fn save_params(&self) -> Result<()> {
        let mut entries = vec![
            ("version".to_string(), config::VERSION.to_string()),
            ("fusions".to_string(), format!("{:?}", self.cfg.fusions)),
            (
                "samples_dir".to_string(),
                format!("{:?}", self.cfg.samples_dir),
            ),
            (
                "output_dir".to_string(),
                format!("{:?}", self.cfg.output_dir),
            ),
            ("aligner".to_string(), self.cfg.aligner.program.clone()),
            (
                "aligner_options".to_string(),
                self.cfg.aligner.options.join(" "),
            ),
            (
                "reference".to_string(),
                format!("{:?}", self.cfg.aligner.reference),
            ),
            ("workers".to_string(), self.cfg.workers.to_string()),
            ("cluster".to_string(), self.cfg.cluster.to_string()),
            ("keep_work".to_string(), self.cfg.keep_work.to_string()),
            (
                "start_extension".to_string(),
                self.cfg.filter.start_extension.to_string(),
            ),
            (
                "end_extension".to_string(),
                self.cfg.filter.end_extension.to_string(),
            ),
            ("predicate".to_string(), format!("{:?}", self.cfg.predicate)),
            (
                "lines".to_string(),
                match &self.cfg.selected_lines {
                    Some(set) => {
                        let mut v: Vec<u64> = set.iter().copied().collect();
                        v.sort_unstable();
                        v.iter()
                            .map(|n| n.to_string())
                            .collect::<Vec<_>>()
                            .join(",")
                    }
                    None => "all".to_string(),
                },
            ),
        ];
        entries.sort();

        let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let mut out = BufWriter::new(File::create(self.paths.params())?);
        for (key, value) in entries {
            writeln!(out, "{:<width$}: {}", key, value, width = width)?;
        }
        out.flush()?;
        Ok(())
    }

    fn save_breakinfo(&self, table: &[BreakpointRecord]) -> Result<()> {
        let json = serde_json::to_string(table)?;
        std::fs::write(self.paths.breakinfo(), json)
            .with_context(|| format!("failed to write checkpoint {:?}", self.paths.breakinfo()))?;
        Ok(())
    }

    fn load_breakinfo(&self) -> Result<Vec<BreakpointRecord>> {
        let path = self.paths.breakinfo();
        if !path.is_file() {
            return Err(PipelineError::PathError(path).into());
        }
        let table: Vec<BreakpointRecord> = serde_json::from_str(&std::fs::read_to_string(&path)?)
            .with_context(|| format!("failed to parse checkpoint {:?}", path))?;
        if table.is_empty() {
            bail!("checkpoint {:?} holds no breakpoint records", path);
        }
        Ok(table)
    }

    /// Copy predicate-matching reads into the restart collection file and
    /// recompute each record's supporting count from the reduced set.
    fn refilter_collection(&self, table: &mut [BreakpointRecord]) -> Result<HashSet<String>> {
        let src = self.paths.collect();
        let dst = self.paths.collect_restart();
        let kept = refilter_reads(&src, &dst, &self.cfg.predicate)?;
        if kept.is_empty() {
            bail!("no collected read matches the requested predicate");
        }

        let counts = count_occurrences(&dst)?;
        for rec in table.iter_mut() {
            rec.supporting_reads = counts.get(&rec.line_number).copied().unwrap_or(0);
        }
        Ok(kept)
    }

    /// Keep only alignment rows whose query belongs to the reduced set.
    fn refilter_alignment(&self, kept: &HashSet<String>) -> Result<()> {
        let src = self.paths.alignment();
        let dst = self.paths.alignment_restart();
        let reader = BufReader::new(
            File::open(&src)
                .with_context(|| format!("failed to open alignment output {:?}", src))?,
        );
        let mut out = BufWriter::new(File::create(&dst)?);

        for line in reader.lines() {
            let line = line?;
            let qname = line.split('\t').nth(9).unwrap_or("");
            if kept.contains(qname) {
                writeln!(out, "{}", line)?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

/// Stream `src` two lines at a time, keeping reads the predicate
/// accepts; returns the retained read ids.
fn refilter_reads(src: &Path, dst: &Path, predicate: &Predicate) -> Result<HashSet<String>> {
    let mut lines = BufReader::new(
        File::open(src).with_context(|| format!("failed to open collection output {:?}", src))?,
    )
    .lines();
    let mut out = BufWriter::new(File::create(dst)?);

    let mut kept = HashSet::new();
    while let Some(header) = lines.next().transpose()? {
        let Some(id) = header.strip_prefix('>') else {
            bail!("collection output is malformed near {:?}", header);
        };
        let seq = lines
            .next()
            .transpose()?
            .with_context(|| format!("collection output truncated after {:?}", id))?;

        let (_, _, readname) = decode_read_id(id)?;
        if predicate.accepts(readname, &seq) {
            kept.insert(id.to_string());
            writeln!(out, ">{}", id)?;
            writeln!(out, "{}", seq)?;
        }
    }
    out.flush()?;
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line_number: u64, reads: u64) -> BreakpointRecord {
        BreakpointRecord {
            line_number,
            sample: "s1".to_string(),
            chr1: "7".to_string(),
            bp1: 101,
            strand1: '+',
            gene1: "GENEA".to_string(),
            junction1: "jA".to_string(),
            chr2: "9".to_string(),
            bp2: 499,
            strand2: '-',
            gene2: "GENEB".to_string(),
            junction2: "jB".to_string(),
            supporting_reads: reads,
        }
    }

    #[test]
    fn test_refilter_reads_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("collect");
        let dst = dir.path().join("collect_restart");
        std::fs::write(
            &src,
            ">2-1_READ1\nAAAA\n>2-2_READ2\nCCCC\n>3-1_READ1\nGGGG\n",
        )
        .unwrap();

        let kept = refilter_reads(&src, &dst, &Predicate::ReadName("READ1".to_string())).unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.contains("2-1_READ1"));
        assert!(kept.contains("3-1_READ1"));
        assert_eq!(
            std::fs::read_to_string(&dst).unwrap(),
            ">2-1_READ1\nAAAA\n>3-1_READ1\nGGGG\n"
        );
    }

    #[test]
    fn test_refilter_reads_by_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("collect");
        let dst = dir.path().join("collect_restart");
        std::fs::write(&src, ">2-1_READ1\nAAAA\n>2-2_READ2\nCCCC\n").unwrap();

        let kept = refilter_reads(&src, &dst, &Predicate::Sequence("CCCC".to_string())).unwrap();
        assert_eq!(kept.len(), 1);
        assert!(kept.contains("2-2_READ2"));
    }

    #[test]
    fn test_restart_requires_workdir_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig {
            fusions: dir.path().join("fusions.tsv"),
            samples_dir: dir.path().join("star"),
            output_dir: dir.path().to_path_buf(),
            aligner: Aligner {
                program: "true".to_string(),
                options: vec![],
                reference: dir.path().join("ref"),
            },
            workers: 1,
            cluster: false,
            keep_work: true,
            predicate: Predicate::None,
            filter: FilterOptions {
                start_extension: 0,
                end_extension: 1,
            },
            selected_lines: None,
        };
        let pipeline = Pipeline::new(cfg);

        // no working directory at all
        assert!(pipeline.restart(RestartPhase::Filtering).is_err());

        // working directory without a checkpoint
        std::fs::create_dir_all(pipeline.work_paths().work_dir()).unwrap();
        assert!(pipeline.restart(RestartPhase::Filtering).is_err());
    }

    #[test]
    fn test_restart_rewrites_params_dump() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig {
            fusions: dir.path().join("fusions.tsv"),
            samples_dir: dir.path().join("star"),
            output_dir: dir.path().to_path_buf(),
            aligner: Aligner {
                program: "true".to_string(),
                options: vec![],
                reference: dir.path().join("ref"),
            },
            workers: 1,
            cluster: false,
            keep_work: true,
            predicate: Predicate::None,
            filter: FilterOptions {
                start_extension: 0,
                end_extension: 5,
            },
            selected_lines: None,
        };
        let pipeline = Pipeline::new(cfg);
        let paths = pipeline.work_paths().clone();
        std::fs::create_dir_all(paths.work_dir()).unwrap();

        // stale audit dump plus the outputs a filter-phase resume needs
        std::fs::write(paths.params(), "end_extension: 1\n").unwrap();
        let table = vec![record(2, 1)];
        std::fs::write(paths.breakinfo(), serde_json::to_string(&table).unwrap()).unwrap();
        std::fs::write(paths.collect(), ">2-1_READ1\nACGT\n").unwrap();
        std::fs::write(paths.alignment(), "").unwrap();

        pipeline.restart(RestartPhase::Filtering).unwrap();

        let params = std::fs::read_to_string(paths.params()).unwrap();
        assert!(params
            .lines()
            .any(|l| l.starts_with("end_extension") && l.ends_with(": 5")));
        assert!(dir.path().join(REPORT_FILENAME).is_file());
    }

    #[test]
    fn test_predicate_restart_matches_posthoc_filtering() {
        // filtering a full run's streams down to one read name must agree
        // with a predicate restart over the same inputs
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();
        let paths = WorkPaths::new(&work);

        fn hit_row(read_id: &str, qstart0: u64, qend: u64, chrom: &str, ts0: u64, te: u64) -> String {
            let mut f = vec!["0".to_string(); 17];
            f[8] = "+".to_string();
            f[9] = read_id.to_string();
            f[11] = qstart0.to_string();
            f[12] = qend.to_string();
            f[13] = chrom.to_string();
            f[15] = ts0.to_string();
            f[16] = te.to_string();
            f.join("\t")
        }

        let seq = "A".repeat(80);
        std::fs::write(
            paths.collect(),
            format!(">2-1_READ1\n{}\n>2-2_READ2\n{}\n", seq, seq),
        )
        .unwrap();
        let hits = |id: &str| {
            format!(
                "{}\n{}\n",
                hit_row(id, 0, 40, "7", 60, 100),
                hit_row(id, 39, 80, "9", 498, 539),
            )
        };
        std::fs::write(
            paths.alignment(),
            format!("{}{}", hits("2-1_READ1"), hits("2-2_READ2")),
        )
        .unwrap();
        let mut table = vec![record(2, 2)];
        std::fs::write(paths.breakinfo(), serde_json::to_string(&table).unwrap()).unwrap();

        // full run over both reads
        let opts = FilterOptions {
            start_extension: 0,
            end_extension: 1,
        };
        let full_report = dir.path().join("full.txt");
        run_filter(
            &table,
            &paths.collect(),
            &paths.alignment(),
            &paths,
            &full_report,
            &opts,
        )
        .unwrap();
        let full = std::fs::read_to_string(&full_report).unwrap();
        let posthoc: String = full
            .split("\n\n")
            .filter(|block| block.contains("READ1"))
            .map(|block| format!("{}\n\n", block))
            .collect();

        // predicate restart path: refilter inputs, then filter again
        let predicate = Predicate::ReadName("READ1".to_string());
        let kept = refilter_reads(&paths.collect(), &paths.collect_restart(), &predicate).unwrap();
        let counts = count_occurrences(&paths.collect_restart()).unwrap();
        table[0].supporting_reads = counts.get(&2).copied().unwrap();

        let reader = std::fs::read_to_string(paths.alignment()).unwrap();
        let restart_rows: String = reader
            .lines()
            .filter(|l| kept.contains(l.split('\t').nth(9).unwrap_or("")))
            .map(|l| format!("{}\n", l))
            .collect();
        std::fs::write(paths.alignment_restart(), restart_rows).unwrap();

        let restart_report = dir.path().join("restart.txt");
        run_filter(
            &table,
            &paths.collect_restart(),
            &paths.alignment_restart(),
            &paths,
            &restart_report,
            &opts,
        )
        .unwrap();

        assert_eq!(std::fs::read_to_string(&restart_report).unwrap(), posthoc);
    }
}
