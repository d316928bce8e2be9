//! Breakpoint table parsing
//!
//! Reads the tab-separated candidate-fusion table, drops records whose
//! chromosomes fall outside the canonical set and adjusts each breakpoint
//! by strand so that downstream junction matching and alignment filtering
//! work on a single coordinate convention.

use anyhow::{anyhow, bail, Context, Result};
use config::{is_canonical_chrom, PipelineError};
use hashbrown::HashSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::fs;
use std::path::Path;

/// One candidate fusion event, tied back to its source row.
///
/// `line_number` is the physical 1-based row index of the table (the
/// header is row 1, so data rows start at 2). Positions are stored
/// already adjusted by strand. `supporting_reads` is zero until the
/// collection phase fills it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointRecord {
    pub line_number: u64,
    pub sample: String,
    pub chr1: String,
    pub bp1: u64,
    pub strand1: char,
    pub gene1: String,
    pub junction1: String,
    pub chr2: String,
    pub bp2: u64,
    pub strand2: char,
    pub gene2: String,
    pub junction2: String,
    pub supporting_reads: u64,
}

impl BreakpointRecord {
    /// Copy with the two loci exchanged, including annotations. Used when
    /// the filter reorders output so locus printed first matches the
    /// interval that starts first in the read.
    pub fn swapped_loci(&self) -> Self {
        Self {
            chr1: self.chr2.clone(),
            bp1: self.bp2,
            strand1: self.strand2,
            gene1: self.gene2.clone(),
            junction1: self.junction2.clone(),
            chr2: self.chr1.clone(),
            bp2: self.bp1,
            strand2: self.strand1,
            gene2: self.gene1.clone(),
            junction2: self.junction1.clone(),
            ..self.clone()
        }
    }
}

/// `+` strand shifts the breakpoint one base right, `-` one base left.
pub fn adjust_breakpoint(bp: u64, strand: char) -> Result<u64> {
    match strand {
        '+' => Ok(bp + 1),
        '-' => bp
            .checked_sub(1)
            .ok_or_else(|| anyhow!("breakpoint position 0 cannot be shifted left")),
        _ => bail!("invalid strand: {:?}", strand),
    }
}

fn parse_strand(field: &str) -> Result<char> {
    match field {
        "+" => Ok('+'),
        "-" => Ok('-'),
        _ => bail!("invalid strand field: {:?}", field),
    }
}

/// Parse the breakpoint table.
///
/// `selected` optionally restricts parsing to a set of physical line
/// numbers (the `--lines` option). Records on non-canonical chromosomes
/// are dropped silently; a missing or data-free table is fatal.
pub fn parse_table(path: &Path, selected: Option<&HashSet<u64>>) -> Result<Vec<BreakpointRecord>> {
    if !path.is_file() {
        return Err(PipelineError::PathError(path.to_path_buf()).into());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read breakpoint table {:?}", path))?;

    // physical row numbers, header = 1
    let rows: Vec<(u64, &str)> = contents
        .lines()
        .enumerate()
        .skip(1)
        .map(|(i, row)| (i as u64 + 1, row))
        .filter(|(nr, _)| selected.map_or(true, |set| set.contains(nr)))
        .collect();

    if rows.is_empty() {
        bail!("breakpoint table {:?} has no data rows", path);
    }

    let records = rows
        .par_iter()
        .map(|(nr, row)| parse_row(*nr, row))
        .collect::<Result<Vec<Option<BreakpointRecord>>>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    log::info!("Breakpoint records kept: {}", records.len());
    Ok(records)
}

fn parse_row(line_number: u64, row: &str) -> Result<Option<BreakpointRecord>> {
    let fields: Vec<&str> = row.trim_end_matches('\n').split('\t').collect();
    if fields.len() < 12 {
        bail!(
            "breakpoint table row {} has {} fields, expected at least 12",
            line_number,
            fields.len()
        );
    }

    let (chr1, chr2) = (fields[1], fields[4]);
    if !is_canonical_chrom(chr1) || !is_canonical_chrom(chr2) {
        return Ok(None);
    }

    let strand1 = parse_strand(fields[3])
        .with_context(|| format!("breakpoint table row {}", line_number))?;
    let strand2 = parse_strand(fields[6])
        .with_context(|| format!("breakpoint table row {}", line_number))?;

    let bp1: u64 = fields[2]
        .parse()
        .with_context(|| format!("bad bp1 at breakpoint table row {}", line_number))?;
    let bp2: u64 = fields[5]
        .parse()
        .with_context(|| format!("bad bp2 at breakpoint table row {}", line_number))?;

    Ok(Some(BreakpointRecord {
        line_number,
        sample: fields[0].to_string(),
        chr1: chr1.to_string(),
        bp1: adjust_breakpoint(bp1, strand1)?,
        strand1,
        gene1: fields[8].to_string(),
        junction1: fields[9].to_string(),
        chr2: chr2.to_string(),
        bp2: adjust_breakpoint(bp2, strand2)?,
        strand2,
        gene2: fields[10].to_string(),
        junction2: fields[11].to_string(),
        supporting_reads: 0,
    }))
}
