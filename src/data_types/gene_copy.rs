use bio::io::fasta;
use flate2::bufread::MultiGzDecoder;
use log::{debug, info, warn};
use rustc_hash::FxHashSet as HashSet;
use simple_error::bail;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// The gap character used by multiple sequence aligners, also used to represent a deleted base in a read
pub const GAP: u8 = b'-';

/// Converts a raw base into a usable allele.
/// Returns `None` for anything outside of `ACGT-`, which includes `N` and the other IUPAC ambiguity codes.
/// `.` is treated as a gap because some aligners emit it for gap columns.
pub fn normalize_allele(base: u8) -> Option<u8> {
    match base.to_ascii_uppercase() {
        b'A' => Some(b'A'),
        b'C' => Some(b'C'),
        b'G' => Some(b'G'),
        b'T' => Some(b'T'),
        b'-' | b'.' => Some(GAP),
        _ => None
    }
}

/// A genomic interval on the original reference for a gene copy, 0-based half-open
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct GenomicInterval {
    pub chrom: String,
    pub start: u64,
    pub end: u64
}

impl std::fmt::Display for GenomicInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

impl FromStr for GenomicInterval {
    type Err = simple_error::SimpleError;

    /// Parses `chrom:start-end`, the chromosome itself may contain ':'
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chrom, coordinates) = match s.rsplit_once(':') {
            Some(split) => split,
            None => bail!("Missing ':' in genomic interval \"{}\"", s)
        };
        let (start, end) = match coordinates.split_once('-') {
            Some(split) => split,
            None => bail!("Missing '-' in genomic interval \"{}\"", s)
        };
        let start: u64 = start.replace(',', "").parse()
            .map_err(|e| simple_error::SimpleError::new(format!("Bad start in \"{s}\": {e}")))?;
        let end: u64 = end.replace(',', "").parse()
            .map_err(|e| simple_error::SimpleError::new(format!("Bad end in \"{s}\": {e}")))?;
        if chrom.is_empty() || start >= end {
            bail!("Invalid genomic interval \"{}\"", s);
        }
        Ok(GenomicInterval {
            chrom: chrom.to_string(),
            start,
            end
        })
    }
}

/// One of the similar gene copies competing for read assignment.
/// The sequence is stored as a row of the multiple alignment, so every candidate in a run has the same length.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneCopyCandidate {
    /// The index of this candidate in the input order
    copy_index: usize,
    /// The candidate identifier, also used as the contig name when reads are aligned to it
    name: String,
    /// Optional source location of the copy
    interval: Option<GenomicInterval>,
    /// ASCII sequence in the shared alignment frame, gaps are `-`
    aligned_sequence: Vec<u8>
}

impl GeneCopyCandidate {
    /// Creates a new candidate, the sequence is upper-cased on the way in.
    /// # Arguments
    /// * `copy_index` - the input order of the candidate
    /// * `name` - the identifier of the candidate
    /// * `interval` - optional genomic interval the copy came from
    /// * `aligned_sequence` - the gapped row from the multiple alignment
    pub fn new(copy_index: usize, name: String, interval: Option<GenomicInterval>, aligned_sequence: &[u8]) -> GeneCopyCandidate {
        GeneCopyCandidate {
            copy_index,
            name,
            interval,
            aligned_sequence: aligned_sequence.to_ascii_uppercase()
        }
    }

    pub fn copy_index(&self) -> usize {
        self.copy_index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Option<&GenomicInterval> {
        self.interval.as_ref()
    }

    pub fn aligned_sequence(&self) -> &[u8] {
        &self.aligned_sequence
    }

    /// The number of columns in the shared alignment frame
    pub fn aligned_len(&self) -> usize {
        self.aligned_sequence.len()
    }

    /// Returns the allele at a given column, or None if the column is out of range or not a usable base
    pub fn allele(&self, column: usize) -> Option<u8> {
        self.aligned_sequence.get(column).and_then(|&b| normalize_allele(b))
    }

    /// Returns the sequence with all gaps removed, this is what reads get aligned against
    pub fn ungapped_sequence(&self) -> Vec<u8> {
        self.aligned_sequence.iter()
            .filter(|&&b| normalize_allele(b) != Some(GAP))
            .cloned()
            .collect()
    }

    /// Returns a lookup from ungapped coordinate to alignment column.
    /// For example, `A-CG` returns `[0, 2, 3]`.
    pub fn column_lookup(&self) -> Vec<usize> {
        self.aligned_sequence.iter().enumerate()
            .filter(|(_c, &b)| normalize_allele(b) != Some(GAP))
            .map(|(c, _b)| c)
            .collect()
    }
}

/// Loads all gene copy candidates from a multiple alignment in FASTA format.
/// Each record is one candidate; the description may carry the source interval as `chrom:start-end`.
/// # Arguments
/// * `fasta_fn` - the FASTA filename, gzip is allowed
/// # Errors
/// * if the file or any record fails to load
/// * if identifiers are duplicated or a row is empty
pub fn load_candidates(fasta_fn: &Path) -> Result<Vec<GeneCopyCandidate>, Box<dyn std::error::Error>> {
    info!("Loading {:?}...", fasta_fn);
    let fasta_file: std::fs::File = std::fs::File::open(fasta_fn)?;
    let file_reader = BufReader::new(fasta_file);
    let fasta_reader: fasta::Reader<Box<dyn BufRead>> = if fasta_fn.extension().unwrap_or_default() == "gz" {
        debug!("Detected gzip extension, loading candidates with MultiGzDecoder...");
        let gz_decoder = MultiGzDecoder::new(file_reader);
        let bufreader = BufReader::new(gz_decoder);
        fasta::Reader::from_bufread(Box::new(bufreader))
    } else {
        debug!("Loading candidates as plain-text file...");
        fasta::Reader::from_bufread(Box::new(file_reader))
    };

    let mut candidates: Vec<GeneCopyCandidate> = vec![];
    let mut observed_names: HashSet<String> = Default::default();
    for entry in fasta_reader.records() {
        let record: fasta::Record = entry?;
        let name: String = record.id().to_string();
        if !observed_names.insert(name.clone()) {
            bail!("Duplicate candidate identifier in {:?}: {}", fasta_fn, name);
        }
        if record.seq().is_empty() {
            bail!("Candidate {} has an empty sequence", name);
        }

        // the first whitespace token of the description is allowed to be an interval
        let interval: Option<GenomicInterval> = match record.desc().and_then(|d| d.split_whitespace().next()) {
            Some(token) => match token.parse::<GenomicInterval>() {
                Ok(gi) => Some(gi),
                Err(e) => {
                    warn!("Ignoring description for candidate {}: {}", name, e);
                    None
                }
            },
            None => None
        };

        candidates.push(GeneCopyCandidate::new(candidates.len(), name, interval, record.seq()));
    }
    info!("Finished loading {} gene copy candidates.", candidates.len());
    Ok(candidates)
}
