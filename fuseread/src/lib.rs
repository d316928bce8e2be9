//! Breakpoint supporting-read verification
//!
//! Turns candidate gene-fusion breakpoint calls into confirmed,
//! annotated supporting read sequences. The pipeline extracts candidate
//! reads per breakpoint, realigns them against a reference genome with
//! an external aligner and filters the hits to decide, per read, whether
//! it truly spans the claimed junction.

pub mod cli;
pub mod core;
pub mod utils;
