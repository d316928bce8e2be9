//! Pipeline entry point
//!
//! Runs the full collect-align-filter pipeline, or one of its restart
//! entry points, over a breakpoint table and per-sample alignments.
//! When invoked with the hidden shard flag the binary acts as a
//! collection worker instead; workers stay silent on stderr because the
//! dispatcher treats any stderr output as a failure.

use clap::Parser;
use config::ArgCheck;
use log::{error, info, Level};
use simple_logger::init_with_level;

use fuseread::{
    cli::Args,
    core::{collect::run_shard, pipeline::Pipeline},
};

fn main() {
    let start = std::time::Instant::now();
    let args: Args = Args::parse();

    if let Some(task) = args.collect_shard {
        let workdir = args.workdir.as_deref().expect("clap enforces --workdir");
        run_shard(workdir, task).unwrap_or_else(|e| {
            eprintln!("{:#}", e);
            std::process::exit(1);
        });
        return;
    }

    init_with_level(Level::Info).unwrap();
    args.check().unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.workers)
        .build_global()
        .unwrap();

    let cfg = args.pipeline_config().unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });
    std::fs::create_dir_all(&cfg.output_dir).unwrap_or_else(|e| {
        error!(
            "ERROR: Failed to create output directory {:?}: {}",
            cfg.output_dir, e
        );
        std::process::exit(1);
    });

    let pipeline = Pipeline::new(cfg);
    let result = match args.restart_phase().expect("checked above") {
        Some(phase) => {
            info!("Resuming pipeline from {:?}...", phase);
            pipeline.restart(phase)
        }
        None => pipeline.run(),
    };

    result.unwrap_or_else(|e| {
        error!("{:#}", e);
        std::process::exit(1);
    });

    info!("Elapsed time: {:?}", start.elapsed());
}
