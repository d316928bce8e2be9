//! Alignment filtering and report writing
//!
//! Decides, per collected read, whether the realignment hits corroborate
//! the claimed breakpoint pair. Hits are tagged with the locus they
//! support, reduced to a minimal non-redundant interval set and
//! classified into one of four streams: match, miss, warning (span
//! length disagreement) and error (only one locus represented). The
//! match and miss streams are concatenated, in that order, into the
//! final report.
//!
//! The collection stream and the aligner output are consumed in
//! lock-step. Hits must appear grouped per read in collection order;
//! groups left unconsumed at the end of the merge indicate a violated
//! ordering contract and fail the run.

use anyhow::{bail, Context, Result};
use config::{PipelineError, WorkPaths};
use log::info;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;

use crate::core::breakpoints::BreakpointRecord;
use crate::core::collect::decode_read_id;

#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    /// widen the target interval leftward before the containment test
    pub start_extension: u64,
    /// widen the target interval rightward before the containment test
    pub end_extension: u64,
}

/// One row of headerless tabular aligner output. Query and target starts
/// are converted to 1-based inclusive coordinates at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentHit {
    pub strand: char,
    pub read_id: String,
    pub qstart: u64,
    pub qend: u64,
    pub chrom: String,
    pub tstart: u64,
    pub tend: u64,
}

pub fn parse_hit(line: &str) -> Result<AlignmentHit> {
    let f: Vec<&str> = line.split('\t').collect();
    if f.len() < 17 {
        bail!("alignment row has {} columns, expected at least 17", f.len());
    }

    let hit = AlignmentHit {
        strand: f[8].chars().next().unwrap_or('+'),
        read_id: f[9].to_string(),
        qstart: f[11].parse::<u64>().context("bad query start")? + 1,
        qend: f[12].parse().context("bad query end")?,
        chrom: f[13].to_string(),
        tstart: f[15].parse::<u64>().context("bad target start")? + 1,
        tend: f[16].parse().context("bad target end")?,
    };
    if hit.qend < hit.qstart || hit.tend < hit.tstart {
        bail!(
            "alignment row for read {:?} has an inverted interval",
            hit.read_id
        );
    }
    Ok(hit)
}

/// A hit that supports one locus of the breakpoint pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedSpan {
    pub qstart: u64,
    pub qend: u64,
    pub locus: u8,
    pub tstart: u64,
    pub tend: u64,
    pub chrom: String,
    pub strand: char,
}

/// Tag each hit with the locus whose breakpoint falls inside its
/// extended target interval; locus 1 takes precedence when a hit could
/// satisfy both.
pub fn tag_hits(
    rec: &BreakpointRecord,
    hits: &[AlignmentHit],
    opts: &FilterOptions,
) -> Vec<TaggedSpan> {
    let mut spans = Vec::new();
    for hit in hits {
        let lo = hit.tstart.saturating_sub(opts.start_extension);
        let hi = hit.tend + opts.end_extension;

        let locus = if hit.chrom == rec.chr1 && (lo..=hi).contains(&rec.bp1) {
            1
        } else if hit.chrom == rec.chr2 && (lo..=hi).contains(&rec.bp2) {
            2
        } else {
            continue;
        };

        spans.push(TaggedSpan {
            qstart: hit.qstart,
            qend: hit.qend,
            locus,
            tstart: hit.tstart,
            tend: hit.tend,
            chrom: hit.chrom.clone(),
            strand: hit.strand,
        });
    }
    spans
}

/// Reduce tagged spans to the minimal non-redundant interval chain.
///
/// Spans are ordered by query start; of spans sharing a start only the
/// widest survives, and a span fully nested inside an already-kept wider
/// span is dropped. Fewer than two survivors means the read shows no
/// confirmable junction, so the result collapses to empty.
pub fn reduce_spans(mut spans: Vec<TaggedSpan>) -> Vec<TaggedSpan> {
    if spans.len() < 2 {
        return Vec::new();
    }

    spans.sort_by(|a, b| a.qstart.cmp(&b.qstart).then(b.qend.cmp(&a.qend)));
    spans.dedup_by_key(|s| s.qstart);

    let mut kept: Vec<TaggedSpan> = Vec::new();
    let mut max_end = 0;
    for span in spans {
        if kept.is_empty() || span.qend > max_end {
            max_end = span.qend;
            kept.push(span);
        }
    }

    if kept.len() < 2 {
        return Vec::new();
    }
    kept
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Match,
    /// both loci present but no exact query/target span pair per locus
    SpanMismatch,
    /// only one side of the fusion is represented
    SingleLocus,
}

fn classify(spans: &[TaggedSpan]) -> Verdict {
    let mut loci = [false; 2];
    for s in spans {
        loci[(s.locus - 1) as usize] = true;
    }
    if !(loci[0] && loci[1]) {
        return Verdict::SingleLocus;
    }

    // at least one span per locus must map without length distortion
    let mut exact = [false; 2];
    for s in spans {
        if s.qend - s.qstart == s.tend - s.tstart {
            exact[(s.locus - 1) as usize] = true;
        }
    }
    if exact[0] && exact[1] {
        Verdict::Match
    } else {
        Verdict::SpanMismatch
    }
}

/// Order spans so the locus starting first in the read comes first, and
/// swap the record's loci when that locus is 2, so the first printed
/// locus always corresponds to the first interval of the read.
fn orient(spans: &mut Vec<TaggedSpan>, rec: &BreakpointRecord) -> BreakpointRecord {
    let first_locus = spans
        .iter()
        .min_by_key(|s| s.qstart)
        .map(|s| s.locus)
        .unwrap_or(1);

    spans.sort_by_key(|s| (s.locus != first_locus, s.qstart));
    if first_locus == 1 {
        rec.clone()
    } else {
        rec.swapped_loci()
    }
}

/// Lazy grouping of the aligner's hit stream by read id. A group is only
/// consumed when the caller asks for exactly its read id, so ordering
/// violations surface as unconsumed groups.
struct HitGroups<R: BufRead> {
    lines: Lines<R>,
    pending: Option<AlignmentHit>,
}

impl<R: BufRead> HitGroups<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            pending: None,
        }
    }

    fn next_hit(&mut self) -> Result<Option<AlignmentHit>> {
        for line in self.lines.by_ref() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            return parse_hit(&line).map(Some);
        }
        Ok(None)
    }

    /// All contiguous hits for `read_id`, or an empty set when the next
    /// group belongs to a different read.
    fn take_group_for(&mut self, read_id: &str) -> Result<Vec<AlignmentHit>> {
        if self.pending.is_none() {
            self.pending = self.next_hit()?;
        }

        let mut hits = Vec::new();
        while let Some(hit) = &self.pending {
            if hit.read_id != read_id {
                break;
            }
            hits.push(self.pending.take().unwrap());
            self.pending = self.next_hit()?;
        }
        Ok(hits)
    }

    fn finish(mut self) -> Result<()> {
        if self.pending.is_none() {
            self.pending = self.next_hit()?;
        }
        if let Some(hit) = self.pending {
            return Err(PipelineError::ConsistencyError(format!(
                "alignment output contains hits for read {:?} that match no collected read; \
                 hit grouping must follow collection order",
                hit.read_id
            ))
            .into());
        }
        Ok(())
    }
}

/// Replays the per-record occurrence counts to map the i-th collected
/// read back to its owning record.
struct ReadIndex<'a> {
    table: &'a [BreakpointRecord],
    rec: usize,
    remaining: u64,
}

impl<'a> ReadIndex<'a> {
    fn new(table: &'a [BreakpointRecord]) -> Self {
        Self {
            table,
            rec: 0,
            remaining: table.first().map_or(0, |r| r.supporting_reads),
        }
    }

    fn next_record(&mut self, line_number: u64) -> Result<&'a BreakpointRecord> {
        while self.remaining == 0 {
            self.rec += 1;
            match self.table.get(self.rec) {
                Some(r) => self.remaining = r.supporting_reads,
                None => {
                    return Err(PipelineError::ConsistencyError(format!(
                        "collected read for row {} exceeds recorded supporting counts",
                        line_number
                    ))
                    .into())
                }
            }
        }

        self.remaining -= 1;
        let rec = &self.table[self.rec];
        if rec.line_number != line_number {
            return Err(PipelineError::ConsistencyError(format!(
                "collected read claims row {} but replay expects row {}",
                line_number, rec.line_number
            ))
            .into());
        }
        Ok(rec)
    }

    fn finish(mut self) -> Result<()> {
        let leftover: u64 = self.remaining
            + self
                .table
                .get(self.rec + 1..)
                .unwrap_or(&[])
                .iter()
                .map(|r| r.supporting_reads)
                .sum::<u64>();
        if leftover != 0 {
            return Err(PipelineError::ConsistencyError(format!(
                "{} supporting reads recorded but missing from the collection output",
                leftover
            ))
            .into());
        }
        Ok(())
    }
}

struct Streams {
    matched: BufWriter<File>,
    missed: BufWriter<File>,
    warned: BufWriter<File>,
    errored: BufWriter<File>,
}

impl Streams {
    fn open(paths: &WorkPaths) -> Result<Self> {
        Ok(Self {
            matched: BufWriter::new(File::create(paths.filter_match())?),
            missed: BufWriter::new(File::create(paths.filter_miss())?),
            warned: BufWriter::new(File::create(paths.filter_warn())?),
            errored: BufWriter::new(File::create(paths.filter_error())?),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.matched.flush()?;
        self.missed.flush()?;
        self.warned.flush()?;
        self.errored.flush()?;
        Ok(())
    }
}

/// One report block: read name (occurrence prefix stripped), both loci,
/// the sequence and, for matches, one aligned annotation line per span.
fn write_block<W: Write>(
    out: &mut W,
    rec: &BreakpointRecord,
    readname: &str,
    seq: &str,
    spans: &[TaggedSpan],
) -> Result<()> {
    writeln!(out, "{} fusionLineNr={}", readname, rec.line_number)?;
    writeln!(
        out,
        "{} {} {} {} {}",
        rec.chr1, rec.bp1, rec.strand1, rec.gene1, rec.junction1
    )?;
    writeln!(
        out,
        "{} {} {} {} {}",
        rec.chr2, rec.bp2, rec.strand2, rec.gene2, rec.junction2
    )?;
    writeln!(out, "{}", seq)?;
    if !spans.is_empty() {
        out.write_all(annotation_lines(seq, spans).as_bytes())?;
    }
    writeln!(out)?;
    Ok(())
}

/// Per-span annotation: the matched subsequence indented to its query
/// offset, then query interval, target interval, chromosome and strand,
/// with the first four columns padded to equal width within the block.
fn annotation_lines(seq: &str, spans: &[TaggedSpan]) -> String {
    let cols: Vec<[String; 4]> = spans
        .iter()
        .map(|s| {
            let qs = (s.qstart - 1) as usize;
            let qe = (s.qend as usize).min(seq.len());
            [
                format!("{}{}", " ".repeat(qs), &seq[qs.min(qe)..qe]),
                format!("[{},{}]", s.qstart, s.qend),
                format!("[{},{}]", s.tstart, s.tend),
                format!("chr{}", s.chrom),
            ]
        })
        .collect();

    let widths: Vec<usize> = (0..4)
        .map(|i| cols.iter().map(|c| c[i].len()).max().unwrap_or(0))
        .collect();

    let mut out = String::new();
    for (row, span) in cols.iter().zip(spans) {
        for (i, cell) in row.iter().enumerate() {
            out.push_str(cell);
            out.push_str(&" ".repeat(widths[i] - cell.len()));
            out.push(' ');
        }
        out.push(span.strand);
        out.push('\n');
    }
    out
}

/// Diagnostic block for the warning/error side channels, spans listed
/// locus 1 first.
fn write_detail<W: Write>(
    out: &mut W,
    condition: &str,
    rec: &BreakpointRecord,
    readname: &str,
    seq: &str,
    spans: &[TaggedSpan],
) -> Result<()> {
    writeln!(out, "{}: read {} (row {})", condition, readname, rec.line_number)?;
    let mut ordered: Vec<&TaggedSpan> = spans.iter().collect();
    ordered.sort_by_key(|s| (s.locus, s.qstart));
    for s in ordered {
        writeln!(
            out,
            "  locus {}: query [{},{}] target [{},{}] chr{} {} qspan={} tspan={}",
            s.locus,
            s.qstart,
            s.qend,
            s.tstart,
            s.tend,
            s.chrom,
            s.strand,
            s.qend - s.qstart,
            s.tend - s.tstart
        )?;
    }
    writeln!(out, "  sequence {}", seq)?;
    writeln!(out)?;
    Ok(())
}

fn display_readname(readname: &str) -> &str {
    readname.split_once('_').map_or(readname, |(_, rest)| rest)
}

/// Merge the collection stream with the aligner output and write the
/// four filter streams plus the concatenated report.
pub fn run_filter(
    table: &[BreakpointRecord],
    collection: &Path,
    alignment: &Path,
    paths: &WorkPaths,
    report: &Path,
    opts: &FilterOptions,
) -> Result<()> {
    if table.is_empty() {
        bail!("no breakpoint records to filter");
    }

    let mut collect_lines = BufReader::new(
        File::open(collection)
            .with_context(|| format!("failed to open collection output {:?}", collection))?,
    )
    .lines();
    let mut groups = HitGroups::new(BufReader::new(
        File::open(alignment)
            .with_context(|| format!("failed to open alignment output {:?}", alignment))?,
    ));
    let mut index = ReadIndex::new(table);
    let mut streams = Streams::open(paths)?;

    let (mut n_match, mut n_miss, mut n_warn, mut n_err) = (0u64, 0u64, 0u64, 0u64);
    while let Some(header) = collect_lines.next().transpose()? {
        let Some(read_id) = header.strip_prefix('>') else {
            bail!("collection output is malformed near {:?}", header);
        };
        let seq = collect_lines
            .next()
            .transpose()?
            .with_context(|| format!("collection output truncated after {:?}", read_id))?;

        let (line_number, _, _) = decode_read_id(read_id)?;
        let rec = index.next_record(line_number)?;
        let readname = display_readname(read_id);

        let hits = groups.take_group_for(read_id)?;
        let spans = reduce_spans(tag_hits(rec, &hits, opts));
        if spans.is_empty() {
            n_miss += 1;
            write_block(&mut streams.missed, rec, readname, &seq, &[])?;
            continue;
        }

        match classify(&spans) {
            Verdict::SingleLocus => {
                n_err += 1;
                write_detail(
                    &mut streams.errored,
                    "single locus",
                    rec,
                    readname,
                    &seq,
                    &spans,
                )?;
                write_block(&mut streams.missed, rec, readname, &seq, &[])?;
            }
            verdict => {
                if verdict == Verdict::SpanMismatch {
                    n_warn += 1;
                    write_detail(
                        &mut streams.warned,
                        "span length mismatch",
                        rec,
                        readname,
                        &seq,
                        &spans,
                    )?;
                }
                n_match += 1;
                let mut spans = spans;
                let oriented = orient(&mut spans, rec);
                write_block(&mut streams.matched, &oriented, readname, &seq, &spans)?;
            }
        }
    }

    index.finish()?;
    groups.finish()?;
    streams.flush()?;

    info!(
        "Filter verdicts: {} match, {} miss, {} warning, {} error",
        n_match, n_miss, n_warn, n_err
    );

    crate::utils::concat_files(&[paths.filter_match(), paths.filter_miss()], report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const OPTS: FilterOptions = FilterOptions {
        start_extension: 0,
        end_extension: 1,
    };

    fn record() -> BreakpointRecord {
        BreakpointRecord {
            line_number: 2,
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
            supporting_reads: 0,
        }
    }

    fn hit(read_id: &str, qstart0: u64, qend: u64, chrom: &str, tstart0: u64, tend: u64) -> String {
        // 17 tab-separated columns, the unread ones zeroed
        let mut f = vec!["0".to_string(); 17];
        f[8] = "+".to_string();
        f[9] = read_id.to_string();
        f[11] = qstart0.to_string();
        f[12] = qend.to_string();
        f[13] = chrom.to_string();
        f[15] = tstart0.to_string();
        f[16] = tend.to_string();
        f.join("\t")
    }

    fn span(qstart: u64, qend: u64, locus: u8, tstart: u64, tend: u64) -> TaggedSpan {
        TaggedSpan {
            qstart,
            qend,
            locus,
            tstart,
            tend,
            chrom: if locus == 1 { "7" } else { "9" }.to_string(),
            strand: '+',
        }
    }

    #[test]
    fn test_parse_hit_converts_starts_to_one_based() {
        let h = parse_hit(&hit("2-1_R1", 0, 40, "7", 60, 100)).unwrap();
        assert_eq!(h.read_id, "2-1_R1");
        assert_eq!((h.qstart, h.qend), (1, 40));
        assert_eq!((h.tstart, h.tend), (61, 100));
        assert_eq!(h.chrom, "7");

        assert!(parse_hit("too\tfew\tcolumns").is_err());
    }

    #[test]
    fn test_parse_hit_rejects_inverted_intervals() {
        // end < start on the query side, then on the target side
        assert!(parse_hit(&hit("r", 40, 10, "7", 60, 100)).is_err());
        assert!(parse_hit(&hit("r", 0, 40, "7", 100, 60)).is_err());

        // zero-width spans survive parsing
        assert!(parse_hit(&hit("r", 9, 10, "7", 59, 60)).is_ok());
    }

    #[test]
    fn test_tag_hits_uses_extended_interval() {
        let rec = record(); // bp1 = 101, bp2 = 499
        let rows = [
            hit("r", 0, 40, "7", 60, 100),  // tend + 1 = 101, contains bp1
            hit("r", 39, 80, "9", 498, 540), // tstart + 1 = 499 = bp2
            hit("r", 0, 40, "7", 150, 200), // right chrom, bp outside
            hit("r", 0, 40, "12", 60, 100), // wrong chrom
        ];
        let hits: Vec<AlignmentHit> = rows.iter().map(|r| parse_hit(r).unwrap()).collect();

        let spans = tag_hits(&rec, &hits, &OPTS);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].locus, 1);
        assert_eq!(spans[1].locus, 2);

        // without the end extension the first hit no longer reaches bp1
        let tight = FilterOptions {
            start_extension: 0,
            end_extension: 0,
        };
        let spans = tag_hits(&rec, &hits, &tight);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].locus, 2);
    }

    #[test]
    fn test_reduce_drops_nested_and_same_start_narrower_spans() {
        let spans = vec![
            span(1, 40, 1, 61, 100),
            span(1, 25, 1, 61, 85),   // same start, narrower
            span(10, 35, 1, 70, 95),  // nested in the first
            span(38, 80, 2, 499, 541),
        ];
        let reduced = reduce_spans(spans);
        assert_eq!(
            reduced
                .iter()
                .map(|s| (s.qstart, s.qend))
                .collect::<Vec<_>>(),
            vec![(1, 40), (38, 80)]
        );

        // already-reduced input is a fixed point
        assert_eq!(reduce_spans(reduced.clone()), reduced);
    }

    #[test]
    fn test_reduce_collapses_below_two_survivors() {
        assert!(reduce_spans(vec![span(1, 40, 1, 61, 100)]).is_empty());
        assert!(reduce_spans(vec![
            span(1, 40, 1, 61, 100),
            span(5, 30, 2, 499, 524),
        ])
        .is_empty());
        assert!(reduce_spans(Vec::new()).is_empty());
    }

    #[test]
    fn test_classification() {
        let both = vec![span(1, 40, 1, 61, 100), span(38, 80, 2, 499, 541)];
        assert_eq!(classify(&both), Verdict::Match);

        let single = vec![span(1, 40, 1, 61, 100), span(38, 80, 1, 499, 541)];
        assert_eq!(classify(&single), Verdict::SingleLocus);

        // locus 2 span maps with a length distortion
        let warped = vec![span(1, 40, 1, 61, 100), span(38, 80, 2, 499, 560)];
        assert_eq!(classify(&warped), Verdict::SpanMismatch);
    }

    #[test]
    fn test_orient_swaps_loci_when_second_locus_leads() {
        let rec = record();
        let mut spans = vec![span(38, 80, 1, 61, 103), span(1, 40, 2, 460, 499)];
        let oriented = orient(&mut spans, &rec);

        assert_eq!(spans[0].locus, 2);
        assert_eq!(oriented.chr1, "9");
        assert_eq!(oriented.gene1, "GENEB");
        assert_eq!(oriented.chr2, "7");

        let mut spans = vec![span(1, 40, 1, 61, 100), span(38, 80, 2, 499, 541)];
        let oriented = orient(&mut spans, &rec);
        assert_eq!(spans[0].locus, 1);
        assert_eq!(oriented.chr1, "7");
    }

    #[test]
    fn test_annotation_lines_align_columns() {
        let seq = "ACGTACGTACGTACGTACGT";
        let spans = vec![span(1, 10, 1, 61, 70), span(9, 20, 2, 490, 501)];
        let lines = annotation_lines(seq, &spans);
        let rows: Vec<&str> = lines.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("ACGTACGTAC"));
        assert!(rows[1].starts_with("        ACGTACGTACGT"));
        assert!(rows[0].contains("[1,10]"));
        assert!(rows[1].contains("[9,20]"));
        assert!(rows[0].contains("chr7"));
        assert!(rows[1].contains("chr9"));
        // strand column starts at the same offset in both rows
        let col = rows[0].rfind('+').unwrap();
        assert_eq!(rows[1].rfind('+').unwrap(), col);
    }

    #[test]
    fn test_hit_groups_consume_in_order_and_flag_leftovers() {
        let data = format!(
            "{}\n{}\n{}\n",
            hit("2-1_R1", 0, 40, "7", 60, 100),
            hit("2-1_R1", 39, 80, "9", 498, 540),
            hit("2-2_R2", 0, 40, "7", 60, 100),
        );

        let mut groups = HitGroups::new(data.as_bytes());
        assert_eq!(groups.take_group_for("2-1_R1").unwrap().len(), 2);
        assert!(groups.take_group_for("2-9_R9").unwrap().is_empty());
        assert_eq!(groups.take_group_for("2-2_R2").unwrap().len(), 1);
        groups.finish().unwrap();

        let mut groups = HitGroups::new(data.as_bytes());
        assert_eq!(groups.take_group_for("2-1_R1").unwrap().len(), 2);
        assert!(groups.finish().is_err());
    }

    #[test]
    fn test_read_index_replay_and_mismatch() {
        let mut a = record();
        a.supporting_reads = 2;
        let mut b = record();
        b.line_number = 5;
        b.supporting_reads = 1;
        let table = vec![a, b];

        let mut index = ReadIndex::new(&table);
        assert_eq!(index.next_record(2).unwrap().line_number, 2);
        assert_eq!(index.next_record(2).unwrap().line_number, 2);
        assert_eq!(index.next_record(5).unwrap().line_number, 5);
        index.finish().unwrap();

        let mut index = ReadIndex::new(&table);
        assert!(index.next_record(5).is_err());

        let mut index = ReadIndex::new(&table);
        index.next_record(2).unwrap();
        assert!(index.finish().is_err());
    }

    fn write_fixture(dir: &Path) -> (PathBuf, PathBuf, WorkPaths) {
        let work = dir.join("work");
        std::fs::create_dir(&work).unwrap();
        let collection = work.join("collect");
        let alignment = work.join("align");

        // read 1 spans both loci, read 2 has no usable hits
        std::fs::write(
            &collection,
            ">2-1_READ1\nAAAACCCCGGGGTTTTAAAACCCCGGGGTTTTAAAACCCCGGGGTTTTAAAACCCCGGGGTTTTAAAACCCCGGGGTTTT\n\
             >2-2_READ2\nTTTTGGGG\n",
        )
        .unwrap();
        std::fs::write(
            &alignment,
            format!(
                "{}\n{}\n",
                hit("2-1_READ1", 0, 40, "7", 60, 100),
                hit("2-1_READ1", 39, 80, "9", 498, 539),
            ),
        )
        .unwrap();

        (collection, alignment, WorkPaths::new(&work))
    }

    #[test]
    fn test_run_filter_streams_and_report_order() {
        let dir = tempfile::tempdir().unwrap();
        let (collection, alignment, paths) = write_fixture(dir.path());
        let report = dir.path().join("fusion_sequences.txt");

        let mut rec = record();
        rec.supporting_reads = 2;
        run_filter(&[rec], &collection, &alignment, &paths, &report, &OPTS).unwrap();

        let matched = std::fs::read_to_string(paths.filter_match()).unwrap();
        assert!(matched.starts_with("READ1 fusionLineNr=2\n7 101 + GENEA jA\n9 499 - GENEB jB\n"));
        assert!(matched.contains("[1,40]"));
        assert!(matched.contains("[40,80]"));

        let missed = std::fs::read_to_string(paths.filter_miss()).unwrap();
        assert!(missed.starts_with("READ2 fusionLineNr=2\n"));
        assert!(!missed.contains('['));

        assert!(std::fs::read_to_string(paths.filter_warn())
            .unwrap()
            .is_empty());
        assert!(std::fs::read_to_string(paths.filter_error())
            .unwrap()
            .is_empty());

        // match stream precedes miss stream in the report
        let report = std::fs::read_to_string(&report).unwrap();
        let read1 = report.find("READ1").unwrap();
        let read2 = report.find("READ2").unwrap();
        assert!(read1 < read2);
    }

    #[test]
    fn test_run_filter_single_locus_goes_to_error_and_miss() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();
        let collection = work.join("collect");
        let alignment = work.join("align");
        std::fs::write(&collection, ">2-1_READ1\nAAAACCCCGGGGTTTT\n").unwrap();
        std::fs::write(
            &alignment,
            format!(
                "{}\n{}\n",
                hit("2-1_READ1", 0, 8, "7", 60, 100),
                hit("2-1_READ1", 7, 16, "7", 92, 101),
            ),
        )
        .unwrap();

        let paths = WorkPaths::new(&work);
        let report = dir.path().join("report");
        let mut rec = record();
        rec.supporting_reads = 1;
        run_filter(&[rec], &collection, &alignment, &paths, &report, &OPTS).unwrap();

        let errored = std::fs::read_to_string(paths.filter_error()).unwrap();
        assert!(errored.contains("single locus"));
        assert!(errored.contains("READ1"));

        let missed = std::fs::read_to_string(paths.filter_miss()).unwrap();
        assert!(missed.contains("READ1"));
        assert!(std::fs::read_to_string(paths.filter_match())
            .unwrap()
            .is_empty());
    }
}
