use crate::data_types::aligned_read::AlignedRead;
use crate::data_types::gene_copy::normalize_allele;
use crate::data_types::read_evidence::{ReadEvidence, SiteObservation};
use crate::site_index::VariantSiteIndex;

use log::{debug, info, trace};
use rustc_hash::FxHashMap as HashMap;
use std::sync::{Arc, mpsc};
use threadpool::ThreadPool;

/// The number of extraction jobs queued per worker thread
const CHUNKS_PER_THREAD: usize = 4;

/// Controls how base qualities and nearby indels become observation confidence
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EvidenceParams {
    /// columns on either side of a site used for the harmonic mean quality
    pub quality_window: usize,
    /// columns on either side of a site checked for indel events
    pub indel_window: usize,
    /// multiplier applied to the confidence when an indel is nearby
    pub indel_discount: f64
}

impl Default for EvidenceParams {
    fn default() -> Self {
        Self {
            quality_window: 2,
            indel_window: 5,
            indel_discount: 0.5
        }
    }
}

/// Converts a phred quality into the probability the base is correct
pub fn phred_to_confidence(quality: f64) -> f64 {
    1.0 - 10.0_f64.powf(-quality / 10.0)
}

/// Harmonic mean of the base qualities around a column; qualities are floored at 1.
/// Only columns carrying an allele (including deletions, which hold a flanking quality) contribute.
/// Returns None if nothing in the window is usable.
fn window_quality(read: &AlignedRead, column: usize, quality_window: usize) -> Option<f64> {
    let start: usize = column.saturating_sub(quality_window).max(read.start());
    let end: usize = (column + quality_window + 1).min(read.end());

    let mut count: usize = 0;
    let mut inverse_sum: f64 = 0.0;
    for c in start..end {
        let usable = read.base(c).and_then(normalize_allele).is_some();
        if usable {
            let q: u8 = read.qual(c).unwrap_or(0).max(1);
            inverse_sum += 1.0 / q as f64;
            count += 1;
        }
    }

    if count == 0 {
        None
    } else {
        Some(count as f64 / inverse_sum)
    }
}

/// Converts one aligned read into its sparse observations at the discriminating sites.
/// Reads that cover no site return empty evidence.
/// # Arguments
/// * `read` - the read projected onto the alignment frame
/// * `site_index` - the discriminating sites for this run
/// * `params` - quality and indel handling
pub fn extract_evidence(read: &AlignedRead, site_index: &VariantSiteIndex, params: &EvidenceParams) -> ReadEvidence {
    let mut observations: Vec<SiteObservation> = vec![];
    let site_range = site_index.sites_in_range(read.aligned_range());
    for si in site_range {
        let site = site_index.site(si);
        let column: usize = site.position();
        let allele: u8 = match read.base(column).and_then(normalize_allele) {
            Some(a) => a,
            None => {
                trace!("{} skipping unusable base at column {}", read.read_name(), column);
                continue;
            }
        };

        let quality: f64 = match window_quality(read, column, params.quality_window) {
            Some(q) => q,
            None => continue
        };
        let mut confidence: f64 = phred_to_confidence(quality);

        // the site column itself is excluded so a deletion allele does not discount itself
        let left = column.saturating_sub(params.indel_window)..column;
        let right = (column + 1)..(column + params.indel_window + 1);
        if read.has_indel_within(left) || read.has_indel_within(right) {
            confidence *= params.indel_discount;
        }

        if confidence > 0.0 {
            observations.push(SiteObservation {
                site_index: si,
                allele,
                confidence: confidence.min(1.0)
            });
        }
    }

    trace!("{} => {} observations", read.read_name(), observations.len());
    ReadEvidence::new(read.read_name().to_string(), observations)
}

/// Extracts the evidence for every read, collapses records that share a read name, and returns them sorted by name.
/// # Arguments
/// * `reads` - all aligned reads for the run, primary and supplementary records allowed
/// * `site_index` - the discriminating sites for this run
/// * `params` - quality and indel handling
/// * `threads` - the number of worker threads; 1 runs everything inline
pub fn extract_all_evidence(
    reads: Vec<AlignedRead>, site_index: Arc<VariantSiteIndex>, params: EvidenceParams, threads: usize
) -> Vec<ReadEvidence> {
    let num_records: usize = reads.len();
    let fragments: Vec<ReadEvidence> = if threads <= 1 || num_records < 2 {
        reads.iter()
            .map(|r| extract_evidence(r, &site_index, &params))
            .collect()
    } else {
        let num_chunks: usize = (threads * CHUNKS_PER_THREAD).min(num_records);
        let chunk_size: usize = num_records.div_ceil(num_chunks);
        debug!("Extracting evidence with {} threads in chunks of {}", threads, chunk_size);

        let pool = ThreadPool::new(threads);
        let (tx, rx) = mpsc::channel();
        let mut reads = reads;
        let mut jobs_queued: usize = 0;
        while !reads.is_empty() {
            let remainder: Vec<AlignedRead> = reads.split_off(chunk_size.min(reads.len()));
            let chunk: Vec<AlignedRead> = std::mem::replace(&mut reads, remainder);
            let chunk_index: usize = jobs_queued;
            let tx = tx.clone();
            let site_index = site_index.clone();
            pool.execute(move || {
                let evidence: Vec<ReadEvidence> = chunk.iter()
                    .map(|r| extract_evidence(r, &site_index, &params))
                    .collect();
                tx.send((chunk_index, evidence)).expect("channel will be there waiting for the pool");
            });
            jobs_queued += 1;
        }
        drop(tx);

        let mut chunk_results: Vec<Option<Vec<ReadEvidence>>> = vec![None; jobs_queued];
        for (chunk_index, evidence) in rx.iter() {
            chunk_results[chunk_index] = Some(evidence);
        }
        assert_eq!(pool.panic_count(), 0, "panic detected in evidence extraction pool");
        chunk_results.into_iter()
            .flat_map(|c| c.expect("every chunk reports back"))
            .collect()
    };

    // group fragments by read so supplementary alignments collapse into one vector
    let mut groups: HashMap<String, Vec<ReadEvidence>> = Default::default();
    for fragment in fragments.into_iter() {
        groups.entry(fragment.read_name().to_string()).or_default().push(fragment);
    }

    let mut all_evidence: Vec<ReadEvidence> = groups.into_values()
        .map(|g| ReadEvidence::collapse(&g))
        .collect();
    all_evidence.sort_by(|a, b| a.read_name().cmp(b.read_name()));

    let num_empty: usize = all_evidence.iter().filter(|e| e.is_empty()).count();
    info!(
        "Extracted evidence for {} reads from {} alignment records, {} reads cover no discriminating site",
        all_evidence.len(), num_records, num_empty
    );
    all_evidence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::gene_copy::GeneCopyCandidate;

    fn simple_index() -> VariantSiteIndex {
        // sites at 2, 7, 12
        let candidates = vec![
            GeneCopyCandidate::new(0, "a".to_string(), None, b"AAAAAAAAAAAAAAA"),
            GeneCopyCandidate::new(1, "b".to_string(), None, b"AACAAAACAAAA-AA"),
        ];
        VariantSiteIndex::build(&candidates, None, &[], 3).unwrap()
    }

    #[test]
    fn test_phred_to_confidence() {
        assert!((phred_to_confidence(10.0) - 0.9).abs() < 1e-9);
        assert!((phred_to_confidence(30.0) - 0.999).abs() < 1e-9);
        assert_eq!(phred_to_confidence(0.0), 0.0);
    }

    #[test]
    fn test_window_quality() {
        let read = AlignedRead::new("r".to_string(), 0, b"ACNGT".to_vec(), vec![10, 20, 40, 0, 20], vec![]);
        // columns 0, 1, 3 (N skipped); q=0 floors to 1
        let hm = 3.0 / (1.0 / 10.0 + 1.0 / 20.0 + 1.0);
        assert!((window_quality(&read, 1, 2).unwrap() - hm).abs() < 1e-9);
        // single column
        assert!((window_quality(&read, 4, 0).unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(window_quality(&read, 2, 0), None);
    }

    #[test]
    fn test_extract_evidence() {
        let index = simple_index();
        let params = EvidenceParams::default();

        // matches candidate b everywhere, uniform Q30
        let read = AlignedRead::new("read".to_string(), 0, b"AACAAAACAAAA-AA".to_vec(), vec![30; 15], vec![]);
        let evidence = extract_evidence(&read, &index, &params);
        let alleles: Vec<u8> = evidence.observations().iter().map(|o| o.allele).collect();
        assert_eq!(alleles, b"CC-".to_vec());
        for obs in evidence.observations() {
            assert!((obs.confidence - 0.999).abs() < 1e-9);
        }

        // partial read only covers the middle site, with an N that is skipped at the last
        let read = AlignedRead::new("partial".to_string(), 5, b"AAAAAAAN".to_vec(), vec![30; 8], vec![]);
        let evidence = extract_evidence(&read, &index, &params);
        let sites: Vec<usize> = evidence.observations().iter().map(|o| o.site_index).collect();
        assert_eq!(sites, vec![1]);
        assert_eq!(evidence.observation(1).unwrap().allele, b'A');

        // no overlap at all
        let read = AlignedRead::new("none".to_string(), 3, b"AAA".to_vec(), vec![30; 3], vec![]);
        assert!(extract_evidence(&read, &index, &params).is_empty());
    }

    #[test]
    fn test_indel_discount() {
        let index = simple_index();
        let params = EvidenceParams::default();

        // indel at column 4 is within 5 of sites 2 and 7, not 12
        let read = AlignedRead::new("read".to_string(), 0, b"AAAAAAAAAAAAAAA".to_vec(), vec![30; 15], vec![4]);
        let evidence = extract_evidence(&read, &index, &params);
        let confidences: Vec<f64> = evidence.observations().iter().map(|o| o.confidence).collect();
        assert!((confidences[0] - 0.4995).abs() < 1e-9);
        assert!((confidences[1] - 0.4995).abs() < 1e-9);
        assert!((confidences[2] - 0.999).abs() < 1e-9);

        // a deletion at the site itself does not discount
        let read = AlignedRead::new("del".to_string(), 10, b"AA-AA".to_vec(), vec![30; 5], vec![12]);
        let evidence = extract_evidence(&read, &index, &params);
        assert_eq!(evidence.observation(2).unwrap().allele, b'-');
        assert!((evidence.observation(2).unwrap().confidence - 0.999).abs() < 1e-9);
    }

    #[test]
    fn test_extract_all_evidence() {
        let index = Arc::new(simple_index());
        let mut reads = vec![];
        for i in (0..20).rev() {
            reads.push(AlignedRead::new(format!("read_{i:02}"), 0, b"AAAAAAAAAAAAAAA".to_vec(), vec![30; 15], vec![]));
        }
        // supplementary pieces of one read that agree on the shared site
        reads.push(AlignedRead::new("split".to_string(), 0, b"AACAAAAC".to_vec(), vec![30; 8], vec![]));
        reads.push(AlignedRead::new("split".to_string(), 7, b"CAAAA-AA".to_vec(), vec![20; 8], vec![]));
        reads.push(AlignedRead::new("zero".to_string(), 3, b"AAA".to_vec(), vec![30; 3], vec![]));

        let single = extract_all_evidence(reads.clone(), index.clone(), EvidenceParams::default(), 1);
        let multi = extract_all_evidence(reads, index, EvidenceParams::default(), 3);
        assert_eq!(single, multi);
        assert_eq!(single.len(), 22);

        let names: Vec<&str> = single.iter().map(|e| e.read_name()).collect();
        let mut sorted_names = names.clone();
        sorted_names.sort();
        assert_eq!(names, sorted_names);

        let split = single.iter().find(|e| e.read_name() == "split").unwrap();
        assert_eq!(split.num_observations(), 3);
        assert!((split.observation(1).unwrap().confidence - 0.999).abs() < 1e-9);
        assert!(single.iter().find(|e| e.read_name() == "zero").unwrap().is_empty());
    }
}
