use crate::data_types::read_evidence::ReadEvidence;

use bit_vec::BitVec;
use log::{debug, info};
use std::sync::{Arc, mpsc};
use threadpool::ThreadPool;

/// The number of scoring jobs queued per worker thread
const CHUNKS_PER_THREAD: usize = 4;

/// A scored, unordered pair of reads; `read_a < read_b` always holds
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarityEdge {
    /// index of the first read in the evidence list
    pub read_a: usize,
    /// index of the second read in the evidence list
    pub read_b: usize,
    /// agreement score in [-1, 1]
    pub score: f64,
    /// the number of filtered sites both reads observe
    pub shared_sites: usize
}

/// Scores two reads over the sites set in the filter.
/// Agreeing alleles add `c_a * c_b`, disagreeing alleles subtract it, and the total is divided by the shared site count.
/// Returns None when no filtered site is shared.
pub fn pair_score(read_a: &ReadEvidence, read_b: &ReadEvidence, site_filter: &BitVec) -> Option<(f64, usize)> {
    let mut iter_a = read_a.filtered(site_filter).peekable();
    let mut iter_b = read_b.filtered(site_filter).peekable();
    let mut total: f64 = 0.0;
    let mut shared: usize = 0;
    while let (Some(obs_a), Some(obs_b)) = (iter_a.peek(), iter_b.peek()) {
        match obs_a.site_index.cmp(&obs_b.site_index) {
            std::cmp::Ordering::Less => { iter_a.next(); },
            std::cmp::Ordering::Greater => { iter_b.next(); },
            std::cmp::Ordering::Equal => {
                let weight: f64 = obs_a.confidence * obs_b.confidence;
                if obs_a.allele == obs_b.allele {
                    total += weight;
                } else {
                    total -= weight;
                }
                shared += 1;
                iter_a.next();
                iter_b.next();
            }
        }
    }

    if shared == 0 {
        None
    } else {
        Some(((total / shared as f64).clamp(-1.0, 1.0), shared))
    }
}

/// Scores every read in `reads` against all higher-indexed reads that share a site with it.
/// Candidates come from the per-site read lists, so reads with no common site are never compared.
fn score_reads(
    reads: std::ops::Range<usize>, evidence: &[ReadEvidence], site_filter: &BitVec,
    site_reads: &[Vec<usize>]
) -> Vec<SimilarityEdge> {
    let mut edges: Vec<SimilarityEdge> = vec![];
    for read_a in reads {
        let mut partners: Vec<usize> = evidence[read_a].filtered(site_filter)
            .flat_map(|o| site_reads[o.site_index].iter().cloned())
            .filter(|&read_b| read_b > read_a)
            .collect();
        partners.sort_unstable();
        partners.dedup();

        for read_b in partners.into_iter() {
            if let Some((score, shared_sites)) = pair_score(&evidence[read_a], &evidence[read_b], site_filter) {
                edges.push(SimilarityEdge {
                    read_a,
                    read_b,
                    score,
                    shared_sites
                });
            }
        }
    }
    edges
}

/// Sparse weighted graph over reads, nodes are indices into the evidence list the graph was built from
#[derive(Debug)]
pub struct SimilarityGraph {
    /// the number of nodes
    num_reads: usize,
    /// all edges sorted by (read_a, read_b)
    edges: Vec<SimilarityEdge>,
    /// per-node neighbor list of (neighbor, score), sorted by neighbor
    adjacency: Vec<Vec<(usize, f64)>>
}

impl SimilarityGraph {
    /// Builds the graph restricted to the sites set in `site_filter`.
    /// # Arguments
    /// * `evidence` - all read evidence in canonical order
    /// * `site_filter` - one bit per discriminating site, set bits are used
    /// * `threads` - the number of worker threads; 1 runs everything inline
    pub fn build(evidence: Arc<Vec<ReadEvidence>>, site_filter: Arc<BitVec>, threads: usize) -> SimilarityGraph {
        let num_reads: usize = evidence.len();

        // reads per site, in read order
        let mut site_reads: Vec<Vec<usize>> = vec![vec![]; site_filter.len()];
        for (read_index, re) in evidence.iter().enumerate() {
            for obs in re.filtered(&site_filter) {
                site_reads[obs.site_index].push(read_index);
            }
        }
        let site_reads: Arc<Vec<Vec<usize>>> = Arc::new(site_reads);

        let edges: Vec<SimilarityEdge> = if threads <= 1 || num_reads < 2 {
            score_reads(0..num_reads, &evidence, &site_filter, &site_reads)
        } else {
            let num_chunks: usize = (threads * CHUNKS_PER_THREAD).min(num_reads);
            let chunk_size: usize = num_reads.div_ceil(num_chunks);
            debug!("Scoring read pairs with {} threads in chunks of {}", threads, chunk_size);

            let pool = ThreadPool::new(threads);
            let (tx, rx) = mpsc::channel();
            let mut jobs_queued: usize = 0;
            for chunk_start in (0..num_reads).step_by(chunk_size) {
                let chunk = chunk_start..(chunk_start + chunk_size).min(num_reads);
                let chunk_index: usize = jobs_queued;
                let tx = tx.clone();
                let evidence = evidence.clone();
                let site_filter = site_filter.clone();
                let site_reads = site_reads.clone();
                pool.execute(move || {
                    let edges = score_reads(chunk, &evidence, &site_filter, &site_reads);
                    tx.send((chunk_index, edges)).expect("channel will be there waiting for the pool");
                });
                jobs_queued += 1;
            }
            drop(tx);

            let mut chunk_results: Vec<Vec<SimilarityEdge>> = vec![vec![]; jobs_queued];
            let mut results_received: usize = 0;
            for (chunk_index, edges) in rx.iter() {
                chunk_results[chunk_index] = edges;
                results_received += 1;
            }
            assert_eq!(pool.panic_count(), 0, "panic detected in pair scoring pool");
            assert_eq!(results_received, jobs_queued);
            chunk_results.into_iter().flatten().collect()
        };

        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![vec![]; num_reads];
        for edge in edges.iter() {
            adjacency[edge.read_a].push((edge.read_b, edge.score));
            adjacency[edge.read_b].push((edge.read_a, edge.score));
        }
        for neighbors in adjacency.iter_mut() {
            neighbors.sort_by_key(|&(n, _s)| n);
        }

        info!("Built similarity graph with {} reads over {} sites and {} edges", num_reads, site_filter.iter().filter(|&b| b).count(), edges.len());
        SimilarityGraph {
            num_reads,
            edges,
            adjacency
        }
    }

    pub fn num_reads(&self) -> usize {
        self.num_reads
    }

    pub fn edges(&self) -> &[SimilarityEdge] {
        &self.edges
    }

    /// Returns the (neighbor, score) pairs for one read, sorted by neighbor
    pub fn neighbors(&self, read_index: usize) -> &[(usize, f64)] {
        &self.adjacency[read_index]
    }

    /// Returns the score between two reads if they share a site, in either argument order
    pub fn score(&self, read_a: usize, read_b: usize) -> Option<f64> {
        let neighbors = &self.adjacency[read_a];
        neighbors.binary_search_by_key(&read_b, |&(n, _s)| n)
            .ok()
            .map(|i| neighbors[i].1)
    }
}
