use crate::data_types::aligned_read::AlignedRead;
use crate::data_types::gene_copy::{GAP, GeneCopyCandidate};
use crate::site_index::CalledSite;

use log::{debug, info, trace, warn};
use rust_htslib::bam::record::Cigar;
use rust_htslib::{bam, bcf, htslib};
use rustc_hash::FxHashMap as HashMap;
use simple_error::bail;
use std::path::{Path, PathBuf};

/// Returns true if an alignment record should be ignored.
/// Supplementary alignments are kept because they get collapsed with their primary.
/// # Arguments
/// * `record` - the record to check
/// * `min_mapq` - the minimum mapping quality
pub fn filter_out_alignment_record(record: &bam::Record, min_mapq: u8) -> bool {
    static FLAG_FILTER: u32 =
        htslib::BAM_FUNMAP | htslib::BAM_FSECONDARY | htslib::BAM_FQCFAIL | htslib::BAM_FDUP;

    ((record.flags() as u32) & FLAG_FILTER) != 0 || record.mapq() < min_mapq
}

/// htslib fills the quality array with this value when a record has no qualities
const MISSING_QUALITY: u8 = 0xff;

/// Returns the base qualities of a record, or `missing_base_quality` for every base if the record has none.
/// The second value is true if the qualities were filled in.
/// # Arguments
/// * `raw_qualities` - the qualities as stored in the record
/// * `read_length` - the length of the read sequence
/// * `missing_base_quality` - the quality to use when none are stored
pub fn fill_missing_qualities(raw_qualities: &[u8], read_length: usize, missing_base_quality: u8) -> (Vec<u8>, bool) {
    match raw_qualities.first() {
        Some(&q) if q != MISSING_QUALITY => (raw_qualities.to_vec(), false),
        _ => (vec![missing_base_quality; read_length], true)
    }
}

/// Projects one alignment against the frame candidate's ungapped sequence onto alignment columns.
/// Frame gap columns are filled with inserted bases when the insertion fits them exactly, with `-` when the read has no insertion there, and with `N` otherwise.
/// Deleted positions become `-` and inherit the quality of the preceding read base.
/// Returns None if the alignment consumes no reference bases.
/// # Arguments
/// * `read_name` - the read name
/// * `ref_start` - 0-based start on the ungapped frame sequence
/// * `cigar` - the alignment operations
/// * `sequence` - the full read sequence, including soft clips
/// * `qualities` - the full read qualities
/// * `column_lookup` - ungapped frame coordinate to alignment column, from `GeneCopyCandidate::column_lookup`
/// # Errors
/// * if the alignment extends past the frame sequence
/// * if the CIGAR consumes more read bases than exist
pub fn project_alignment(
    read_name: String, ref_start: usize, cigar: &[Cigar], sequence: &[u8], qualities: &[u8],
    column_lookup: &[usize]
) -> Result<Option<AlignedRead>, Box<dyn std::error::Error>> {
    // per reference position (base, qual), insertions keyed by the reference position they follow
    let mut ref_calls: Vec<(u8, u8)> = vec![];
    let mut insertions: HashMap<usize, Vec<(u8, u8)>> = Default::default();
    let mut deleted: Vec<usize> = vec![];
    let mut read_pos: usize = 0;
    let mut last_qual: u8 = qualities.first().cloned().unwrap_or(0);

    for op in cigar.iter() {
        match op {
            Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => {
                let l = *l as usize;
                if read_pos + l > sequence.len() || read_pos + l > qualities.len() {
                    bail!("CIGAR for {} consumes more bases than the read has", read_name);
                }
                for i in read_pos..(read_pos + l) {
                    ref_calls.push((sequence[i], qualities[i]));
                }
                read_pos += l;
                last_qual = qualities[read_pos - 1];
            },
            Cigar::Ins(l) => {
                let l = *l as usize;
                if read_pos + l > sequence.len() || read_pos + l > qualities.len() {
                    bail!("CIGAR for {} consumes more bases than the read has", read_name);
                }
                if !ref_calls.is_empty() {
                    let anchor: usize = ref_start + ref_calls.len() - 1;
                    insertions.entry(anchor).or_default()
                        .extend((read_pos..(read_pos + l)).map(|i| (sequence[i], qualities[i])));
                }
                read_pos += l;
            },
            Cigar::Del(l) => {
                for _ in 0..*l {
                    deleted.push(ref_start + ref_calls.len());
                    ref_calls.push((GAP, last_qual));
                }
            },
            Cigar::RefSkip(l) => {
                for _ in 0..*l {
                    ref_calls.push((b'N', 0));
                }
            },
            Cigar::SoftClip(l) => {
                read_pos += *l as usize;
            },
            Cigar::HardClip(_) | Cigar::Pad(_) => {}
        };
    }

    if ref_calls.is_empty() {
        return Ok(None);
    }
    let ref_end: usize = ref_start + ref_calls.len();
    if ref_end > column_lookup.len() {
        bail!("Alignment for {} ends at {}, but the frame sequence has length {}", read_name, ref_end, column_lookup.len());
    }

    let start_column: usize = column_lookup[ref_start];
    let mut bases: Vec<u8> = vec![];
    let mut quals: Vec<u8> = vec![];
    let mut indel_columns: Vec<usize> = deleted.iter().map(|&r| column_lookup[r]).collect();
    for (offset, &(base, qual)) in ref_calls.iter().enumerate() {
        let ref_pos: usize = ref_start + offset;
        let column: usize = column_lookup[ref_pos];
        bases.push(base);
        quals.push(qual);

        let gap_columns: usize = if ref_pos + 1 < ref_end {
            column_lookup[ref_pos + 1] - column - 1
        } else {
            0
        };
        match insertions.get(&ref_pos) {
            Some(inserted) if inserted.len() == gap_columns => {
                for &(b, q) in inserted.iter() {
                    bases.push(b);
                    quals.push(q);
                }
            },
            Some(inserted) => {
                trace!("{} insertion of {} at column {} does not fit {} gap columns", read_name, inserted.len(), column, gap_columns);
                indel_columns.push(column);
                for _ in 0..gap_columns {
                    bases.push(b'N');
                    quals.push(0);
                }
            },
            None => {
                for _ in 0..gap_columns {
                    bases.push(GAP);
                    quals.push(qual);
                }
            }
        };
    }

    Ok(Some(AlignedRead::new(read_name, start_column, bases, quals, indel_columns)))
}

/// Loads every usable alignment to the frame candidate and projects it onto alignment columns.
/// Records aligned to other contigs are ignored.
/// # Arguments
/// * `bam_filenames` - the alignment files, indexing is not required
/// * `frame` - the candidate the reads were aligned to, its name must be a contig in each file
/// * `min_mapq` - the minimum MAPQ to keep a record
/// * `missing_base_quality` - the quality given to every base of a record without qualities
/// # Errors
/// * if a file cannot be opened or parsed
/// * if the frame contig is missing from a file header
/// * if an alignment does not fit the frame
pub fn load_aligned_reads(
    bam_filenames: &[PathBuf], frame: &GeneCopyCandidate, min_mapq: u8, missing_base_quality: u8
) -> Result<Vec<AlignedRead>, Box<dyn std::error::Error>> {
    use rust_htslib::bam::Read;

    let column_lookup: Vec<usize> = frame.column_lookup();
    let mut reads: Vec<AlignedRead> = vec![];
    for bam_filename in bam_filenames.iter() {
        info!("Loading {:?}...", bam_filename);
        let mut bam_reader = bam::Reader::from_path(bam_filename)?;
        let frame_tid: i32 = match bam_reader.header().tid(frame.name().as_bytes()) {
            Some(tid) => tid as i32,
            None => bail!("Frame contig {} was not found in {:?}", frame.name(), bam_filename)
        };
        if let Some(target_len) = bam_reader.header().target_len(frame_tid as u32) {
            if target_len as usize != column_lookup.len() {
                warn!(
                    "Contig {} has length {} in {:?}, but the ungapped candidate has length {}",
                    frame.name(), target_len, bam_filename, column_lookup.len()
                );
            }
        }

        let mut num_records: u64 = 0;
        let mut skipped_records: u64 = 0;
        let mut filled_records: u64 = 0;
        for read_entry in bam_reader.records() {
            let record = read_entry?;
            num_records += 1;
            if filter_out_alignment_record(&record, min_mapq) || record.tid() != frame_tid {
                skipped_records += 1;
                continue;
            }

            let read_name: String = String::from_utf8(record.qname().to_vec())?;
            let sequence: Vec<u8> = record.seq().as_bytes();
            let (qualities, filled) = fill_missing_qualities(record.qual(), sequence.len(), missing_base_quality);
            if filled {
                trace!("{} has no base qualities, using {}", read_name, missing_base_quality);
                filled_records += 1;
            }
            let cigar_view = record.cigar();
            let projected: Option<AlignedRead> = project_alignment(
                read_name, record.pos() as usize, cigar_view.as_slice(),
                &sequence, &qualities, &column_lookup
            )?;
            match projected {
                Some(aligned_read) => reads.push(aligned_read),
                None => skipped_records += 1
            };
        }
        debug!("Parsed {} records, skipped {}", num_records, skipped_records);
        if filled_records > 0 {
            warn!("{} records in {:?} have no base qualities, they were given quality {}", filled_records, bam_filename, missing_base_quality);
        }
        info!("Finished loading {} alignments from {:?}.", num_records - skipped_records, bam_filename);
    }
    Ok(reads)
}

/// Loads externally called within-copy sites from a VCF on the frame contig and converts them to alignment columns.
/// Only SNV records with QUAL at or above `min_quality` are kept; a missing QUAL passes.
/// # Arguments
/// * `vcf_filename` - the VCF file, indexing is not required
/// * `frame` - the candidate the variants were called against
/// * `min_quality` - the minimum QUAL for a record
/// # Errors
/// * if the file cannot be opened or a record fails to parse
pub fn load_called_sites(vcf_filename: &Path, frame: &GeneCopyCandidate, min_quality: f32) -> Result<Vec<CalledSite>, Box<dyn std::error::Error>> {
    use rust_htslib::bcf::Read;

    info!("Loading {:?}...", vcf_filename);
    let column_lookup: Vec<usize> = frame.column_lookup();
    let mut vcf_reader = bcf::Reader::from_path(vcf_filename)?;
    let frame_rid: u32 = match vcf_reader.header().name2rid(frame.name().as_bytes()) {
        Ok(rid) => rid,
        Err(_) => {
            warn!("Frame contig {} was not found in {:?}, no called sites loaded", frame.name(), vcf_filename);
            return Ok(vec![]);
        }
    };

    let mut called_sites: Vec<CalledSite> = vec![];
    for record_entry in vcf_reader.records() {
        let record = record_entry?;
        if record.rid() != Some(frame_rid) {
            continue;
        }

        let qual: f32 = record.qual();
        if !qual.is_nan() && qual < min_quality {
            trace!("Skipping low quality record at {}", record.pos());
            continue;
        }

        let alleles: Vec<&[u8]> = record.alleles();
        let is_snv: bool = alleles.len() >= 2 && alleles.iter().all(|a| a.len() == 1 && a[0] != b'*');
        if !is_snv {
            trace!("Skipping non-SNV record at {}", record.pos());
            continue;
        }

        let position: usize = record.pos() as usize;
        if position >= column_lookup.len() {
            warn!("Skipping record at {} beyond the end of {}", position, frame.name());
            continue;
        }
        called_sites.push(CalledSite {
            position: column_lookup[position],
            alleles: alleles.iter().map(|a| a[0].to_ascii_uppercase()).collect()
        });
    }
    info!("Finished loading {} called sites.", called_sites.len());
    Ok(called_sites)
}
