//! Job dispatch for homogeneous task arrays
//!
//! Runs N independent tasks either as local worker processes or as a
//! cluster array job, exposing one success/failure contract to callers.
//! Both backends execute the same task command; the only difference is
//! how the per-task index is substituted and where exit codes come from.
//!
//! The dispatcher never proceeds past a phase with unknown-status tasks:
//! any task whose final exit code cannot be determined is reported as
//! failed or, for the cluster backend, escalated to a fatal
//! `SchedulerAmbiguity` after the polling budget is exhausted.

use anyhow::{bail, Context, Result};
use config::{
    get_progress_bar, PipelineError, WorkPaths, QACCT_INITIAL_WAIT, QACCT_RETRIES, QACCT_RETRY_WAIT,
};
use crossbeam_channel::unbounded;
use log::{info, warn};

use std::path::PathBuf;
use std::process::Command;

/// placeholder replaced with the zero-padded 1-based task id
pub const TASK_TOKEN: &str = "{task_id}";

/// One command template executed once per task.
#[derive(Debug, Clone)]
pub struct TaskCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// zero-padding width for the substituted task id
    pub pad_width: usize,
}

impl TaskCommand {
    pub fn new(program: PathBuf, args: Vec<String>, ntasks: usize) -> Self {
        Self {
            program,
            args,
            pad_width: ntasks.to_string().len(),
        }
    }

    fn resolved_args(&self, task: usize) -> Vec<String> {
        let id = format!("{:0width$}", task, width = self.pad_width);
        self.args
            .iter()
            .map(|a| a.replace(TASK_TOKEN, &id))
            .collect()
    }

    /// command line for the batch script, task id taken from `$num`
    fn cluster_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.replace(TASK_TOKEN, "${num}"));
        }
        line
    }
}

/// Outcome of one task, aggregated by the dispatcher. Cluster tasks carry
/// empty stdout/stderr since the scheduler only reports exit codes.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub task: usize,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum Dispatcher<'a> {
    Local,
    Cluster { paths: &'a WorkPaths, vmem: &'a str },
}

impl Dispatcher<'_> {
    /// Run `ntasks` instances of `cmd` and return one result per task,
    /// ordered by task id. Individual task failures are reported in the
    /// results, not raised, so the caller sees every failure at once.
    pub fn run(&self, name: &str, cmd: &TaskCommand, ntasks: usize) -> Result<Vec<WorkerResult>> {
        match self {
            Dispatcher::Local => run_local(name, cmd, ntasks),
            Dispatcher::Cluster { paths, vmem } => run_cluster(name, cmd, ntasks, paths, vmem),
        }
    }
}

fn run_local(name: &str, cmd: &TaskCommand, ntasks: usize) -> Result<Vec<WorkerResult>> {
    let pb = get_progress_bar(ntasks as u64, name);
    let (tx, rx) = unbounded::<WorkerResult>();

    std::thread::scope(|scope| {
        for task in 1..=ntasks {
            let tx = tx.clone();
            scope.spawn(move || {
                let result = match Command::new(&cmd.program)
                    .args(cmd.resolved_args(task))
                    .output()
                {
                    Ok(out) => WorkerResult {
                        task,
                        // a killed process has no code; treat as failed
                        exit_code: out.status.code().unwrap_or(-1),
                        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                    },
                    Err(e) => WorkerResult {
                        task,
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: format!("failed to spawn worker: {}", e),
                    },
                };
                // receiver outlives all senders within the scope
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(ntasks);
        while let Ok(result) = rx.recv() {
            pb.inc(1);
            results.push(result);
        }
        pb.finish_and_clear();

        results.sort_by_key(|r| r.task);
        Ok(results)
    })
}

fn run_cluster(
    name: &str,
    cmd: &TaskCommand,
    ntasks: usize,
    paths: &WorkPaths,
    vmem: &str,
) -> Result<Vec<WorkerResult>> {
    let script_path = paths.script(name);
    let log_path = paths.job_log(name);
    let script = format!(
        "#!/bin/bash\n\
         #$ -S /bin/bash\n\
         #$ -cwd\n\
         #$ -l {vmem}\n\
         #$ -e {log}\n\
         #$ -o {log}\n\
         set -eu\n\
         num=$(printf \"%0{width}d\" ${{SGE_TASK_ID}})\n\
         {line}\n",
        vmem = vmem,
        log = log_path.display(),
        width = cmd.pad_width,
        line = cmd.cluster_line(),
    );
    std::fs::write(&script_path, script)
        .with_context(|| format!("failed to write batch script {:?}", script_path))?;

    info!("Submitting array job {} ({} tasks)...", name, ntasks);
    let out = Command::new("qsub")
        .args(["-terse", "-sync", "y", "-t"])
        .arg(format!("1-{}:1", ntasks))
        .arg(&script_path)
        .current_dir(paths.work_dir())
        .output()
        .context("failed to run qsub")?;

    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
    if !stderr.trim().is_empty() {
        bail!("qsub reported errors:\n{}\n[stdout]\n{}", stderr, stdout);
    }

    let (job_id, codes) = parse_qsub_exit_codes(&stdout);
    let codes = if codes.len() == ntasks {
        codes
    } else {
        warn!("Submission output did not yield all exit codes; polling accounting...");
        let job_id = job_id.ok_or_else(|| {
            PipelineError::SchedulerAmbiguity("no job id in submission output".to_string())
        })?;
        poll_qacct(&job_id, ntasks)?
    };

    Ok(codes
        .into_iter()
        .enumerate()
        .map(|(i, exit_code)| WorkerResult {
            task: i + 1,
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
        })
        .collect())
}

/// Parse `qsub -terse -sync y` output: the first line carries the job id,
/// completion lines look like `Job 12345.3 exited with exit code 0.`.
/// Exit codes are returned in task order.
fn parse_qsub_exit_codes(out: &str) -> (Option<String>, Vec<i32>) {
    let mut lines = out.lines();
    let job_id = lines
        .next()
        .map(|l| l.trim().split('.').next().unwrap_or(l.trim()).to_string())
        .filter(|id| !id.is_empty());

    let mut tasks: Vec<(usize, i32)> = Vec::new();
    for line in lines {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("Job ") else {
            continue;
        };
        let Some((id, code)) = rest.split_once(" exited with exit code ") else {
            continue;
        };
        let Ok(code) = code.trim_end_matches('.').parse::<i32>() else {
            continue;
        };
        // array tasks report ids as jobid.taskid
        let task = id
            .split('.')
            .nth(1)
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(tasks.len() + 1);
        tasks.push((task, code));
    }

    tasks.sort_by_key(|(task, _)| *task);
    (job_id, tasks.into_iter().map(|(_, code)| code).collect())
}

/// Bounded fallback when the submission output is unusable: query the
/// scheduler's accounting database until it knows the job, then require
/// exactly one exit_status entry per task.
fn poll_qacct(job_id: &str, ntasks: usize) -> Result<Vec<i32>> {
    std::thread::sleep(QACCT_INITIAL_WAIT);

    for attempt in 0..QACCT_RETRIES {
        let out = Command::new("qacct")
            .args(["-j", job_id])
            .output()
            .context("failed to run qacct")?;

        if out.status.success() {
            let stdout = String::from_utf8_lossy(&out.stdout);
            let codes = parse_qacct_exit_statuses(&stdout);
            if codes.len() != ntasks {
                return Err(PipelineError::SchedulerAmbiguity(format!(
                    "qacct returned {} exit_status entries for job {}, expected {}",
                    codes.len(),
                    job_id,
                    ntasks
                ))
                .into());
            }
            return Ok(codes);
        }

        warn!(
            "qacct does not know job {} yet (attempt {}/{})",
            job_id,
            attempt + 1,
            QACCT_RETRIES
        );
        std::thread::sleep(QACCT_RETRY_WAIT);
    }

    Err(PipelineError::SchedulerAmbiguity(format!(
        "exit status of job {} unavailable after {} attempts",
        job_id, QACCT_RETRIES
    ))
    .into())
}

fn parse_qacct_exit_statuses(out: &str) -> Vec<i32> {
    out.lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("exit_status")?
                .trim()
                .parse::<i32>()
                .ok()
        })
        .collect()
}
