use crate::data_types::read_evidence::ReadEvidence;
use crate::similarity::SimilarityGraph;
use crate::site_index::{SiteClass, VariantSiteIndex};

use bit_vec::BitVec;
use log::{debug, info, trace};
use priority_queue::PriorityQueue;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::cmp::Reverse;
use std::sync::{Arc, mpsc};
use threadpool::ThreadPool;

/// Scores are compared in fixed point so queue ordering is exact
const FIXED_POINT: f64 = 1e9;
/// Agreement values closer than this are considered tied
const TIE_EPSILON: f64 = 1e-9;
/// Upper bound on prototype refinement rounds, refinement normally converges in two or three
const MAX_REFINEMENT_ROUNDS: usize = 20;

/// Why a read could not be placed into a (copy, haplotype) bucket
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, strum_macros::Display, strum_macros::EnumString)]
pub enum AmbiguityReason {
    /// The read does not cover any discriminating site
    NoOverlap,
    /// The read's cluster matched no gene copy well enough, or matched several equally
    CopyUnresolved,
    /// The read could not be placed into one haplotype of its gene copy
    HaplotypeUnresolved
}

/// Where a read is in the partitioning process
#[derive(Clone, Debug, PartialEq)]
pub enum ReadState {
    /// Has evidence, not yet clustered
    Unassigned,
    /// Matched to a gene copy inside the provisional cluster `phase_set`
    CopyAssigned { copy_index: usize, phase_set: usize, copy_agreement: f64 },
    /// Fully placed, terminal
    HaplotypeAssigned { copy_index: usize, phase_set: usize, haplotype: usize, confidence: f64 },
    /// Could not be placed, terminal
    Ambiguous(AmbiguityReason)
}

impl ReadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadState::HaplotypeAssigned { .. } | ReadState::Ambiguous(_))
    }
}

/// Controls the greedy average-linkage agglomeration
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AgglomerationParams {
    /// edges with an absolute score below this are ignored
    pub min_edge_confidence: f64,
    /// clusters keep merging while their mean counted edge score is at least this
    pub merge_threshold: f64
}

/// All thresholds used by the clusterer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusteringParams {
    pub agglomeration: AgglomerationParams,
    /// minimum weighted allele agreement between a cluster and its gene copy
    pub min_copy_agreement: f64,
    /// minimum mean similarity between a read and its haplotype
    pub haplotype_threshold: f64,
    /// minimum reads in a sub-cluster for it to become a haplotype
    pub min_haplotype_support: usize,
    /// maximum haplotypes per gene copy cluster
    pub max_haplotypes: usize
}

#[derive(Clone, Copy, Debug, Default)]
struct Linkage {
    sum: f64,
    count: usize
}

impl Linkage {
    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

type LinkPriority = (i64, i64, Reverse<usize>, Reverse<usize>);

/// Higher mean first, then higher aggregate weight, then lower cluster ids
fn link_priority(pair: (usize, usize), link: &Linkage) -> LinkPriority {
    (
        (link.mean() * FIXED_POINT).round() as i64,
        (link.sum * FIXED_POINT).round() as i64,
        Reverse(pair.0),
        Reverse(pair.1)
    )
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

/// Greedy average-linkage agglomeration of a subset of graph nodes.
/// Each node starts alone; the pair of clusters with the best mean counted edge score merges until that mean drops below the merge threshold.
/// Merged clusters keep the lower identifier. Returns the clusters ordered by identifier, each with sorted members.
/// # Arguments
/// * `graph` - the similarity graph
/// * `members` - the nodes to partition, edges leaving this set are ignored
/// * `params` - edge and merge thresholds
pub fn agglomerate(graph: &SimilarityGraph, members: &[usize], params: &AgglomerationParams) -> Vec<Vec<usize>> {
    let member_set: HashSet<usize> = members.iter().cloned().collect();
    let mut clusters: HashMap<usize, Vec<usize>> = members.iter().map(|&m| (m, vec![m])).collect();

    let mut linkage: HashMap<usize, HashMap<usize, Linkage>> = Default::default();
    let mut queue: PriorityQueue<(usize, usize), LinkPriority> = PriorityQueue::new();
    for &a in members.iter() {
        for &(b, score) in graph.neighbors(a).iter() {
            if a < b && member_set.contains(&b) && score.abs() >= params.min_edge_confidence {
                let link = Linkage { sum: score, count: 1 };
                linkage.entry(a).or_default().insert(b, link);
                linkage.entry(b).or_default().insert(a, link);
                queue.push((a, b), link_priority((a, b), &link));
            }
        }
    }

    let mut num_merges: usize = 0;
    while let Some((&(a, b), _)) = queue.peek() {
        let link: Linkage = linkage[&a][&b];
        if link.mean() < params.merge_threshold {
            break;
        }
        queue.pop();
        trace!("Merging cluster {} into {} with mean {:.4} over {} edges", b, a, link.mean(), link.count);

        // fold every link of b into a
        let b_links: HashMap<usize, Linkage> = linkage.remove(&b).unwrap_or_default();
        if let Some(a_links) = linkage.get_mut(&a) {
            a_links.remove(&b);
        }
        for (c, b_link) in b_links.into_iter() {
            if c == a {
                continue;
            }
            queue.remove(&ordered(b, c));
            let c_links = linkage.get_mut(&c).expect("links are symmetric");
            c_links.remove(&b);
            let entry = c_links.entry(a).or_default();
            entry.sum += b_link.sum;
            entry.count += b_link.count;
            let updated: Linkage = *entry;
            linkage.entry(a).or_default().insert(c, updated);
            let pair = ordered(a, c);
            queue.push(pair, link_priority(pair, &updated));
        }

        let b_members: Vec<usize> = clusters.remove(&b).unwrap_or_default();
        clusters.entry(a).or_default().extend(b_members);
        num_merges += 1;
    }

    let mut result: Vec<(usize, Vec<usize>)> = clusters.into_iter().collect();
    result.sort_by_key(|(cluster_id, _m)| *cluster_id);
    trace!("Agglomerated {} nodes into {} clusters with {} merges", members.len(), result.len(), num_merges);
    result.into_iter()
        .map(|(_id, mut m)| {
            m.sort_unstable();
            m
        })
        .collect()
}

/// Confidence-weighted agreement between a set of reads and each copy prototype over the inter-copy sites.
/// Sites where a prototype has no usable allele count against that copy.
/// Returns one value per copy in [0, 1], all zero if the reads have no inter-copy observations.
pub fn copy_agreement(reads: &[usize], evidence: &[ReadEvidence], prototypes: &CopyPrototypes, inter_filter: &BitVec) -> Vec<f64> {
    let num_copies: usize = prototypes.num_copies();
    let mut agree: Vec<f64> = vec![0.0; num_copies];
    let mut total: f64 = 0.0;
    for &read_index in reads.iter() {
        for obs in evidence[read_index].filtered(inter_filter) {
            total += obs.confidence;
            for (copy_index, agreement) in agree.iter_mut().enumerate() {
                if prototypes.allele(copy_index, obs.site_index) == Some(obs.allele) {
                    *agreement += obs.confidence;
                }
            }
        }
    }

    if total > 0.0 {
        agree.iter().map(|a| a / total).collect()
    } else {
        agree
    }
}

/// Picks the best candidate from agreement values; returns None if the best is below the minimum or tied
fn best_copy(agreement: &[f64], min_copy_agreement: f64) -> Option<(usize, f64)> {
    let mut order: Vec<usize> = (0..agreement.len()).collect();
    order.sort_by(|&i, &j| agreement[j].total_cmp(&agreement[i]).then(i.cmp(&j)));
    let best: usize = order[0];
    if agreement[best] < min_copy_agreement {
        return None;
    }
    if order.len() > 1 && agreement[best] - agreement[order[1]] <= TIE_EPSILON {
        return None;
    }
    Some((best, agreement[best]))
}

/// The allele each gene copy is expected to show at every discriminating site.
/// Seeded from the candidate rows and then refined from the reads assigned to each copy.
#[derive(Clone, Debug, PartialEq)]
pub struct CopyPrototypes {
    /// alleles[copy][site], None where the copy has no usable allele
    alleles: Vec<Vec<Option<u8>>>,
    /// assignment and update rounds that were run
    rounds: usize,
    /// true if the last round left every prototype unchanged
    converged: bool
}

impl CopyPrototypes {
    /// One prototype per candidate, copying the candidate alleles
    pub fn from_site_index(site_index: &VariantSiteIndex) -> CopyPrototypes {
        let alleles: Vec<Vec<Option<u8>>> = (0..site_index.num_candidates())
            .map(|copy_index| site_index.sites().iter().map(|s| s.candidate_allele(copy_index)).collect())
            .collect();
        CopyPrototypes {
            alleles,
            rounds: 0,
            converged: true
        }
    }

    pub fn num_copies(&self) -> usize {
        self.alleles.len()
    }

    pub fn allele(&self, copy_index: usize, site_index: usize) -> Option<u8> {
        self.alleles[copy_index][site_index]
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Counts the (copy, site) alleles that differ from `other`
    pub fn count_changes(&self, other: &CopyPrototypes) -> usize {
        self.alleles.iter().zip(other.alleles.iter())
            .map(|(a, b)| a.iter().zip(b.iter()).filter(|(x, y)| x != y).count())
            .sum()
    }
}

/// Picks the consensus allele from weighted votes.
/// Ties keep the current allele when it is among the best, otherwise the lowest byte wins.
fn consensus_allele(votes: &[(u8, f64)], current: Option<u8>) -> Option<u8> {
    let best_weight: f64 = votes.iter().map(|&(_a, w)| w).fold(f64::NEG_INFINITY, f64::max);
    let mut best: Vec<u8> = votes.iter()
        .filter(|&&(_a, w)| best_weight - w <= TIE_EPSILON)
        .map(|&(a, _w)| a)
        .collect();
    match current {
        Some(c) if best.contains(&c) => Some(c),
        _ => {
            best.sort_unstable();
            best.first().cloned()
        }
    }
}

/// Nearest-prototype refinement of the copy prototypes.
/// Each round assigns every read to the prototype it agrees with most and then sets each prototype to the weighted majority allele of its reads.
/// Sites no assigned read covers keep their allele; reads tied between prototypes do not vote.
/// Stops when a round changes nothing, or after `MAX_REFINEMENT_ROUNDS`.
/// # Arguments
/// * `reads` - the reads allowed to vote
/// * `evidence` - all read evidence
/// * `seed` - the starting prototypes, usually from `CopyPrototypes::from_site_index`
/// * `inter_filter` - the inter-copy sites
pub fn refine_prototypes(reads: &[usize], evidence: &[ReadEvidence], seed: CopyPrototypes, inter_filter: &BitVec) -> CopyPrototypes {
    let num_copies: usize = seed.num_copies();
    let num_sites: usize = inter_filter.len();
    let mut prototypes: CopyPrototypes = seed;
    prototypes.converged = false;

    for round in 1..=MAX_REFINEMENT_ROUNDS {
        let mut votes: Vec<Vec<Vec<(u8, f64)>>> = vec![vec![vec![]; num_sites]; num_copies];
        for &read_index in reads.iter() {
            let agreement: Vec<f64> = copy_agreement(&[read_index], evidence, &prototypes, inter_filter);
            let copy_index: usize = match best_copy(&agreement, 0.0) {
                Some((ci, a)) if a > 0.0 => ci,
                _ => continue
            };
            for obs in evidence[read_index].filtered(inter_filter) {
                let site_votes = &mut votes[copy_index][obs.site_index];
                match site_votes.iter_mut().find(|(allele, _w)| *allele == obs.allele) {
                    Some(v) => v.1 += obs.confidence,
                    None => site_votes.push((obs.allele, obs.confidence))
                };
            }
        }

        let mut changed: usize = 0;
        for (copy_votes, copy_alleles) in votes.iter().zip(prototypes.alleles.iter_mut()) {
            for (site_votes, allele) in copy_votes.iter().zip(copy_alleles.iter_mut()) {
                if site_votes.is_empty() {
                    continue;
                }
                let consensus: Option<u8> = consensus_allele(site_votes, *allele);
                if consensus != *allele {
                    *allele = consensus;
                    changed += 1;
                }
            }
        }
        prototypes.rounds = round;
        trace!("Prototype refinement round {} changed {} alleles", round, changed);
        if changed == 0 {
            prototypes.converged = true;
            break;
        }
    }

    if !prototypes.converged {
        debug!("Copy prototypes did not converge after {} rounds", MAX_REFINEMENT_ROUNDS);
    }
    prototypes
}

/// The reads of one provisional cluster that went to the same gene copy, or a whole unresolved provisional cluster
#[derive(Clone, Debug, PartialEq)]
pub struct CopyCluster {
    /// ordinal of the copy cluster, haplotype labels are only comparable inside it
    pub phase_set: usize,
    /// the matched gene copy, None when unresolved
    pub copy_index: Option<usize>,
    /// the weighted agreement of the members with each copy prototype
    pub agreement: Vec<f64>,
    /// member read indices, sorted
    pub members: Vec<usize>
}

/// The haplotype call for one read inside a copy cluster, None if unresolved
type HaplotypeCall = Option<(usize, f64)>;

/// Splits one copy cluster into haplotypes over the within-copy graph and places every member.
/// Returns (read index, call) in member order.
/// # Arguments
/// * `members` - the reads of the copy cluster
/// * `evidence` - all read evidence
/// * `within_filter` - the within-copy sites
/// * `graph` - the within-copy similarity graph
/// * `params` - clustering thresholds
fn phase_copy_cluster(
    members: &[usize], evidence: &[ReadEvidence], within_filter: &BitVec,
    graph: &SimilarityGraph, params: &ClusteringParams
) -> Vec<(usize, HaplotypeCall)> {
    let informative: Vec<usize> = members.iter()
        .filter(|&&r| evidence[r].count_filtered(within_filter) > 0)
        .cloned()
        .collect();

    let single_haplotype = || -> Vec<(usize, HaplotypeCall)> {
        members.iter().map(|&r| (r, Some((0, 1.0)))).collect()
    };
    if informative.is_empty() {
        return single_haplotype();
    }

    let mut sub_clusters: Vec<Vec<usize>> = agglomerate(graph, &informative, &params.agglomeration);
    sub_clusters.retain(|c| c.len() >= params.min_haplotype_support);
    // largest first, ties to the lower identifier which is the lowest member
    sub_clusters.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
    sub_clusters.truncate(params.max_haplotypes);
    if sub_clusters.is_empty() {
        debug!("No supported haplotype among {} informative reads, keeping one haplotype", informative.len());
        return single_haplotype();
    }

    let haplotype_sets: Vec<HashSet<usize>> = sub_clusters.iter()
        .map(|c| c.iter().cloned().collect())
        .collect();

    members.iter()
        .map(|&read_index| {
            let mut sums: Vec<f64> = vec![0.0; haplotype_sets.len()];
            let mut counts: Vec<usize> = vec![0; haplotype_sets.len()];
            for &(neighbor, score) in graph.neighbors(read_index).iter() {
                for (h, hap_set) in haplotype_sets.iter().enumerate() {
                    if hap_set.contains(&neighbor) {
                        sums[h] += score;
                        counts[h] += 1;
                    }
                }
            }

            let means: Vec<Option<f64>> = sums.iter().zip(counts.iter())
                .map(|(&s, &c)| if c > 0 { Some(s / c as f64) } else { None })
                .collect();
            let mut ranked: Vec<(usize, f64)> = means.iter().enumerate()
                .filter_map(|(h, m)| m.map(|v| (h, v)))
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

            let call: HaplotypeCall = match ranked.first() {
                Some(&(haplotype, support)) => {
                    let tied = ranked.len() > 1 && support - ranked[1].1 <= TIE_EPSILON;
                    if support < params.haplotype_threshold || tied {
                        None
                    } else {
                        Some((haplotype, support.clamp(0.0, 1.0)))
                    }
                },
                None => None
            };
            trace!("{} haplotype means {:?} => {:?}", evidence[read_index].read_name(), means, call);
            (read_index, call)
        })
        .collect()
}

/// Drives every read through the partitioning state machine
pub struct PhasingClusterer {
    /// all read evidence in canonical order
    evidence: Arc<Vec<ReadEvidence>>,
    /// the discriminating sites
    site_index: Arc<VariantSiteIndex>,
    /// thresholds
    params: ClusteringParams,
    /// one state per read
    states: Vec<ReadState>,
    /// the copy prototypes, refined by `assign_copies`
    prototypes: CopyPrototypes
}

impl PhasingClusterer {
    /// Reads without evidence start as `Ambiguous(NoOverlap)`, all others as `Unassigned`.
    pub fn new(evidence: Arc<Vec<ReadEvidence>>, site_index: Arc<VariantSiteIndex>, params: ClusteringParams) -> PhasingClusterer {
        let states: Vec<ReadState> = evidence.iter()
            .map(|re| if re.is_empty() { ReadState::Ambiguous(AmbiguityReason::NoOverlap) } else { ReadState::Unassigned })
            .collect();
        let prototypes: CopyPrototypes = CopyPrototypes::from_site_index(&site_index);
        PhasingClusterer {
            evidence,
            site_index,
            params,
            states,
            prototypes
        }
    }

    pub fn states(&self) -> &[ReadState] {
        &self.states
    }

    pub fn prototypes(&self) -> &CopyPrototypes {
        &self.prototypes
    }

    /// Returns the read states and the copy prototypes
    pub fn into_parts(self) -> (Vec<ReadState>, CopyPrototypes) {
        (self.states, self.prototypes)
    }

    fn inter_filter(&self) -> BitVec {
        self.site_index.class_filter(SiteClass::InterCopy)
    }

    /// Partitions the `Unassigned` reads into copy clusters.
    /// Reads are first agglomerated into provisional clusters, and the copy prototypes are refined from all reads.
    /// A provisional cluster whose overall best copy is unresolved leaves every member `Ambiguous(CopyUnresolved)`.
    /// Otherwise each member goes to its own nearest prototype, so one provisional cluster can split into several copy clusters.
    /// Members whose own best copy is below `min_copy_agreement` or tied become `Ambiguous(CopyUnresolved)`.
    /// # Arguments
    /// * `copy_graph` - the similarity graph over inter-copy sites
    /// # Panics
    /// * if called twice
    pub fn assign_copies(&mut self, copy_graph: &SimilarityGraph) -> Vec<CopyCluster> {
        let unassigned: Vec<usize> = self.states.iter().enumerate()
            .filter(|(_i, s)| **s == ReadState::Unassigned)
            .map(|(i, _s)| i)
            .collect();
        let inter_filter: BitVec = self.inter_filter();
        let min_copy_agreement: f64 = self.params.min_copy_agreement;

        let seed: CopyPrototypes = CopyPrototypes::from_site_index(&self.site_index);
        let prototypes: CopyPrototypes = refine_prototypes(&unassigned, &self.evidence, seed.clone(), &inter_filter);
        debug!(
            "Copy prototypes refined in {} rounds (converged: {}), {} alleles differ from the candidates",
            prototypes.rounds(), prototypes.converged(), prototypes.count_changes(&seed)
        );

        let provisional: Vec<Vec<usize>> = agglomerate(copy_graph, &unassigned, &self.params.agglomeration);
        let num_provisional: usize = provisional.len();
        let mut copy_clusters: Vec<CopyCluster> = Vec::with_capacity(num_provisional);
        for (provisional_index, members) in provisional.into_iter().enumerate() {
            let agreement: Vec<f64> = copy_agreement(&members, &self.evidence, &prototypes, &inter_filter);
            let cluster_copy: Option<usize> = best_copy(&agreement, min_copy_agreement).map(|(c, _a)| c);
            debug!("Provisional cluster {} with {} reads: agreement {:?} => {:?}", provisional_index, members.len(), agreement, cluster_copy);

            // per copy, the members and their own agreement
            let mut groups: Vec<Vec<(usize, f64)>> = vec![vec![]; prototypes.num_copies()];
            for &read_index in members.iter() {
                assert_eq!(self.states[read_index], ReadState::Unassigned);
                let read_call: Option<(usize, f64)> = match cluster_copy {
                    Some(_c) => {
                        let read_agreement = copy_agreement(&[read_index], &self.evidence, &prototypes, &inter_filter);
                        best_copy(&read_agreement, min_copy_agreement)
                    },
                    None => None
                };
                match read_call {
                    Some((ci, read_agreement)) => groups[ci].push((read_index, read_agreement)),
                    None => self.states[read_index] = ReadState::Ambiguous(AmbiguityReason::CopyUnresolved)
                };
            }

            if groups.iter().all(|g| g.is_empty()) {
                copy_clusters.push(CopyCluster {
                    phase_set: copy_clusters.len(),
                    copy_index: None,
                    agreement,
                    members
                });
                continue;
            }

            for (copy_index, group) in groups.into_iter().enumerate() {
                if group.is_empty() {
                    continue;
                }
                if Some(copy_index) != cluster_copy {
                    debug!("Provisional cluster {}: {} reads are closer to copy {}", provisional_index, group.len(), copy_index);
                }
                let phase_set: usize = copy_clusters.len();
                for &(read_index, read_agreement) in group.iter() {
                    self.states[read_index] = ReadState::CopyAssigned {
                        copy_index,
                        phase_set,
                        copy_agreement: read_agreement
                    };
                }
                let group_members: Vec<usize> = group.into_iter().map(|(r, _a)| r).collect();
                copy_clusters.push(CopyCluster {
                    phase_set,
                    copy_index: Some(copy_index),
                    agreement: copy_agreement(&group_members, &self.evidence, &prototypes, &inter_filter),
                    members: group_members
                });
            }
        }

        let num_resolved: usize = copy_clusters.iter().filter(|c| c.copy_index.is_some()).count();
        info!(
            "Formed {} provisional copy clusters, split into {} copy clusters matched to a gene copy",
            num_provisional, num_resolved
        );
        self.prototypes = prototypes;
        copy_clusters
    }

    /// Phases every resolved copy cluster into haplotypes.
    /// Reads move from `CopyAssigned` to `HaplotypeAssigned` or `Ambiguous(HaplotypeUnresolved)`.
    /// # Arguments
    /// * `within_graph` - the similarity graph over within-copy sites
    /// * `copy_clusters` - the output of `assign_copies`
    /// * `threads` - the number of worker threads; 1 runs everything inline
    pub fn assign_haplotypes(&mut self, within_graph: Arc<SimilarityGraph>, copy_clusters: &[CopyCluster], threads: usize) {
        let within_filter: Arc<BitVec> = Arc::new(self.site_index.class_filter(SiteClass::WithinCopy));
        let resolved: Vec<&CopyCluster> = copy_clusters.iter()
            .filter(|c| c.copy_index.is_some())
            .collect();

        let mut calls: Vec<(usize, HaplotypeCall)> = if threads <= 1 || resolved.len() < 2 {
            resolved.iter()
                .flat_map(|c| phase_copy_cluster(&c.members, &self.evidence, &within_filter, &within_graph, &self.params))
                .collect()
        } else {
            debug!("Phasing {} copy clusters with {} threads", resolved.len(), threads);
            let pool = ThreadPool::new(threads);
            let (tx, rx) = mpsc::channel();
            for cluster in resolved.iter() {
                let tx = tx.clone();
                let members: Vec<usize> = cluster.members.clone();
                let evidence = self.evidence.clone();
                let within_filter = within_filter.clone();
                let within_graph = within_graph.clone();
                let params = self.params;
                pool.execute(move || {
                    let calls = phase_copy_cluster(&members, &evidence, &within_filter, &within_graph, &params);
                    tx.send(calls).expect("channel will be there waiting for the pool");
                });
            }
            drop(tx);
            let all_calls: Vec<(usize, HaplotypeCall)> = rx.iter().flatten().collect();
            assert_eq!(pool.panic_count(), 0, "panic detected in haplotype phasing pool");
            all_calls
        };
        calls.sort_by_key(|(read_index, _c)| *read_index);

        for (read_index, call) in calls.into_iter() {
            let (copy_index, phase_set, copy_agreement) = match self.states[read_index] {
                ReadState::CopyAssigned { copy_index, phase_set, copy_agreement } => (copy_index, phase_set, copy_agreement),
                ref other => panic!("read {read_index} phased from state {other:?}")
            };
            self.states[read_index] = match call {
                Some((haplotype, support)) => ReadState::HaplotypeAssigned {
                    copy_index,
                    phase_set,
                    haplotype,
                    confidence: copy_agreement * support
                },
                None => ReadState::Ambiguous(AmbiguityReason::HaplotypeUnresolved)
            };
        }

        assert!(self.states.iter().all(|s| s.is_terminal()), "reads left in a non-terminal state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::gene_copy::GeneCopyCandidate;
    use crate::data_types::read_evidence::SiteObservation;
    use crate::site_index::CalledSite;

    fn evidence(name: &str, obs: &[(usize, u8)]) -> ReadEvidence {
        ReadEvidence::new(
            name.to_string(),
            obs.iter().map(|&(site_index, allele)| SiteObservation { site_index, allele, confidence: 1.0 }).collect()
        )
    }

    fn default_params() -> ClusteringParams {
        ClusteringParams {
            agglomeration: AgglomerationParams { min_edge_confidence: 0.1, merge_threshold: 0.5 },
            min_copy_agreement: 0.7,
            haplotype_threshold: 0.5,
            min_haplotype_support: 2,
            max_haplotypes: 2
        }
    }

    /// sites 0, 1, 2 are inter-copy (A vs C); site 3 is a within-copy call at column 4 with G/T
    fn site_index() -> VariantSiteIndex {
        let candidates = vec![
            GeneCopyCandidate::new(0, "copy_a".to_string(), None, b"AAAAA"),
            GeneCopyCandidate::new(1, "copy_c".to_string(), None, b"CCCAA"),
        ];
        let called = vec![CalledSite { position: 4, alleles: b"AG".to_vec() }];
        VariantSiteIndex::build(&candidates, None, &called, 3).unwrap()
    }

    #[test]
    fn test_agglomerate() {
        let reads = Arc::new(vec![
            evidence("a0", &[(0, b'A'), (1, b'A')]),
            evidence("c0", &[(0, b'C'), (1, b'C')]),
            evidence("a1", &[(0, b'A'), (1, b'A'), (2, b'A')]),
            evidence("c1", &[(1, b'C'), (2, b'C')]),
            evidence("lonely", &[(3, b'G')]),
        ]);
        let graph = SimilarityGraph::build(reads, Arc::new(BitVec::from_elem(4, true)), 1);
        let params = default_params().agglomeration;
        let clusters = agglomerate(&graph, &[0, 1, 2, 3, 4], &params);
        assert_eq!(clusters, vec![vec![0, 2], vec![1, 3], vec![4]]);

        // a subset ignores edges to outsiders
        let clusters = agglomerate(&graph, &[0, 1], &params);
        assert_eq!(clusters, vec![vec![0], vec![1]]);

        // an impossible threshold merges nothing
        let strict = AgglomerationParams { min_edge_confidence: 0.1, merge_threshold: 1.5 };
        assert_eq!(agglomerate(&graph, &[0, 1, 2, 3, 4], &strict).len(), 5);
    }

    #[test]
    fn test_average_linkage() {
        // r0-r1 agree strongly, r2 agrees with r0 but disagrees with r1; mean linkage keeps r2 out
        let reads = Arc::new(vec![
            evidence("r0", &[(0, b'A'), (1, b'A')]),
            evidence("r1", &[(0, b'A'), (1, b'A'), (2, b'A'), (3, b'A')]),
            evidence("r2", &[(0, b'A'), (2, b'C'), (3, b'C')]),
        ]);
        let graph = SimilarityGraph::build(reads, Arc::new(BitVec::from_elem(4, true)), 1);
        assert_eq!(graph.score(0, 2), Some(1.0));
        assert!((graph.score(1, 2).unwrap() + 1.0 / 3.0).abs() < 1e-9);

        let clusters = agglomerate(&graph, &[0, 1, 2], &default_params().agglomeration);
        // (0, 1) and (0, 2) tie on mean and weight so the lower ids merge first, then r2 averages out to 1/3
        assert_eq!(clusters, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(AmbiguityReason::CopyUnresolved.to_string(), "CopyUnresolved");
        assert_eq!("HaplotypeUnresolved".parse::<AmbiguityReason>().unwrap(), AmbiguityReason::HaplotypeUnresolved);
        assert!("Unknown".parse::<AmbiguityReason>().is_err());
        assert!(!ReadState::Unassigned.is_terminal());
        assert!(ReadState::Ambiguous(AmbiguityReason::NoOverlap).is_terminal());
    }

    #[test]
    fn test_copy_agreement() {
        let index = site_index();
        let inter = index.class_filter(SiteClass::InterCopy);
        let reads = vec![
            evidence("a", &[(0, b'A'), (1, b'A'), (2, b'C')]),
            evidence("gap", &[(0, b'-')]),
            evidence("within", &[(3, b'G')]),
        ];
        let prototypes = CopyPrototypes::from_site_index(&index);
        let agreement = copy_agreement(&[0], &reads, &prototypes, &inter);
        assert!((agreement[0] - 2.0 / 3.0).abs() < 1e-9);
        assert!((agreement[1] - 1.0 / 3.0).abs() < 1e-9);

        assert_eq!(copy_agreement(&[1], &reads, &prototypes, &inter), vec![0.0, 0.0]);
        assert_eq!(copy_agreement(&[2], &reads, &prototypes, &inter), vec![0.0, 0.0]);

        assert_eq!(best_copy(&[0.9, 0.1], 0.7), Some((0, 0.9)));
        assert_eq!(best_copy(&[0.6, 0.1], 0.7), None);
        assert_eq!(best_copy(&[0.8, 0.8], 0.7), None);
        assert_eq!(best_copy(&[0.1, 0.8, 0.75], 0.7), Some((1, 0.8)));
    }

    #[test]
    fn test_consensus_allele() {
        assert_eq!(consensus_allele(&[(b'A', 1.0), (b'C', 2.0)], Some(b'A')), Some(b'C'));
        assert_eq!(consensus_allele(&[(b'T', 1.0), (b'C', 1.0)], Some(b'T')), Some(b'T'));
        assert_eq!(consensus_allele(&[(b'T', 1.0), (b'C', 1.0)], Some(b'A')), Some(b'C'));
        assert_eq!(consensus_allele(&[(b'G', 0.5)], None), Some(b'G'));
    }

    #[test]
    fn test_refine_prototypes() {
        // copy_b has no usable allele at column 2, its reads fill it in
        let candidates = vec![
            GeneCopyCandidate::new(0, "copy_a".to_string(), None, b"AAAA"),
            GeneCopyCandidate::new(1, "copy_b".to_string(), None, b"CCNC"),
            GeneCopyCandidate::new(2, "copy_g".to_string(), None, b"GGGG"),
        ];
        let index = VariantSiteIndex::build(&candidates, None, &[], 3).unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.site(2).candidate_allele(1), None);
        let inter = index.class_filter(SiteClass::InterCopy);

        let mut reads = vec![];
        for i in 0..3 {
            reads.push(evidence(&format!("a{i}"), &[(0, b'A'), (1, b'A'), (2, b'A'), (3, b'A')]));
            reads.push(evidence(&format!("b{i}"), &[(0, b'C'), (1, b'C'), (2, b'T'), (3, b'C')]));
        }
        // tied between the copies, never votes
        reads.push(evidence("tied", &[(0, b'A'), (1, b'C')]));
        let all: Vec<usize> = (0..reads.len()).collect();

        let seed = CopyPrototypes::from_site_index(&index);
        assert!((copy_agreement(&[1], &reads, &seed, &inter)[1] - 0.75).abs() < 1e-9);

        let refined = refine_prototypes(&all, &reads, seed.clone(), &inter);
        assert!(refined.converged());
        assert_eq!(refined.rounds(), 2);
        assert_eq!(refined.count_changes(&seed), 1);
        assert_eq!(refined.allele(1, 2), Some(b'T'));
        assert_eq!(refined.allele(0, 2), Some(b'A'));
        assert_eq!(refined.allele(2, 2), Some(b'G'));

        // the refined copy_b fully agrees with its reads
        assert_eq!(copy_agreement(&[1], &reads, &refined, &inter), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_cluster_split_by_prototype() {
        // copy_a and copy_b differ only at column 0, copy_c differs from both at columns 1..4
        let candidates = vec![
            GeneCopyCandidate::new(0, "copy_a".to_string(), None, b"AAAAA"),
            GeneCopyCandidate::new(1, "copy_b".to_string(), None, b"GAAAA"),
            GeneCopyCandidate::new(2, "copy_c".to_string(), None, b"ACCCC"),
        ];
        let index = Arc::new(VariantSiteIndex::build(&candidates, None, &[], 3).unwrap());
        assert_eq!(index.len(), 5);

        let mut reads = vec![];
        for i in 0..4 {
            reads.push(evidence(&format!("a{i}"), &[(0, b'A'), (1, b'A'), (2, b'A'), (3, b'A'), (4, b'A')]));
        }
        for i in 0..3 {
            reads.push(evidence(&format!("b{i}"), &[(0, b'G'), (1, b'A'), (2, b'A'), (3, b'A'), (4, b'A')]));
        }
        for i in 0..2 {
            reads.push(evidence(&format!("c{i}"), &[(0, b'A'), (1, b'C'), (2, b'C'), (3, b'C'), (4, b'C')]));
        }
        // misses column 0, equally close to copy_a and copy_b
        reads.push(evidence("blind", &[(1, b'A'), (2, b'A')]));
        let reads = Arc::new(reads);

        let mut clusterer = PhasingClusterer::new(reads.clone(), index.clone(), default_params());
        let copy_graph = SimilarityGraph::build(reads.clone(), Arc::new(index.class_filter(SiteClass::InterCopy)), 1);
        let copy_clusters = clusterer.assign_copies(&copy_graph);

        assert_eq!(copy_clusters.len(), 3);
        assert_eq!(copy_clusters[0].members, vec![0, 1, 2, 3]);
        assert_eq!(copy_clusters[0].copy_index, Some(0));
        assert_eq!(copy_clusters[1].members, vec![4, 5, 6]);
        assert_eq!(copy_clusters[1].copy_index, Some(1));
        assert_eq!(copy_clusters[1].phase_set, 1);
        assert_eq!(copy_clusters[2].members, vec![7, 8]);
        assert_eq!(copy_clusters[2].copy_index, Some(2));

        assert!(clusterer.prototypes().converged());
        assert_eq!(clusterer.prototypes().rounds(), 1);
        let states = clusterer.states();
        assert_eq!(states[4], ReadState::CopyAssigned { copy_index: 1, phase_set: 1, copy_agreement: 1.0 });
        assert_eq!(states[9], ReadState::Ambiguous(AmbiguityReason::CopyUnresolved));
    }

    #[test]
    fn test_state_machine() {
        let index = Arc::new(site_index());
        let mut reads = vec![];
        // copy A, haplotype G
        for i in 0..3 {
            reads.push(evidence(&format!("a_g{i}"), &[(0, b'A'), (1, b'A'), (2, b'A'), (3, b'G')]));
        }
        // copy A, haplotype A
        for i in 0..3 {
            reads.push(evidence(&format!("a_a{i}"), &[(0, b'A'), (1, b'A'), (2, b'A'), (3, b'A')]));
        }
        // copy C, no within-copy information
        for i in 0..3 {
            reads.push(evidence(&format!("c{i}"), &[(0, b'C'), (1, b'C'), (2, b'C')]));
        }
        // conflicted read
        reads.push(evidence("conflict", &[(0, b'A'), (1, b'C')]));
        // no evidence
        reads.push(evidence("empty", &[]));
        let reads = Arc::new(reads);

        let mut clusterer = PhasingClusterer::new(reads.clone(), index.clone(), default_params());
        assert_eq!(clusterer.states()[10], ReadState::Ambiguous(AmbiguityReason::NoOverlap));
        assert_eq!(clusterer.states()[0], ReadState::Unassigned);

        let copy_graph = SimilarityGraph::build(reads.clone(), Arc::new(index.class_filter(SiteClass::InterCopy)), 1);
        let copy_clusters = clusterer.assign_copies(&copy_graph);
        assert_eq!(copy_clusters.len(), 3);
        assert_eq!(copy_clusters[0].members, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(copy_clusters[0].copy_index, Some(0));
        assert_eq!(copy_clusters[1].members, vec![6, 7, 8]);
        assert_eq!(copy_clusters[1].copy_index, Some(1));
        assert_eq!(copy_clusters[2].members, vec![9]);
        assert_eq!(copy_clusters[2].copy_index, None);
        assert_eq!(clusterer.states()[9], ReadState::Ambiguous(AmbiguityReason::CopyUnresolved));

        let within_graph = Arc::new(SimilarityGraph::build(reads, Arc::new(index.class_filter(SiteClass::WithinCopy)), 1));
        clusterer.assign_haplotypes(within_graph, &copy_clusters, 2);
        let (states, prototypes) = clusterer.into_parts();
        assert_eq!(prototypes, CopyPrototypes { converged: true, rounds: 1, ..CopyPrototypes::from_site_index(&index) });
        for (read_index, state) in states.iter().enumerate().take(6) {
            let expected_hap = if read_index < 3 { 0 } else { 1 };
            match state {
                ReadState::HaplotypeAssigned { copy_index, phase_set, haplotype, confidence } => {
                    assert_eq!(*copy_index, 0);
                    assert_eq!(*phase_set, 0);
                    assert_eq!(*haplotype, expected_hap);
                    assert!((confidence - 1.0).abs() < 1e-9);
                },
                other => panic!("unexpected state {other:?}")
            };
        }
        for state in states[6..9].iter() {
            assert_eq!(*state, ReadState::HaplotypeAssigned { copy_index: 1, phase_set: 1, haplotype: 0, confidence: 1.0 });
        }
    }

    #[test]
    fn test_negative_support_clamped() {
        let index = site_index();
        let reads = vec![
            evidence("g0", &[(3, b'G')]),
            evidence("g1", &[(3, b'G')]),
            evidence("a", &[(3, b'A')]),
        ];
        let within_filter = index.class_filter(SiteClass::WithinCopy);
        let graph = SimilarityGraph::build(Arc::new(reads.clone()), Arc::new(within_filter.clone()), 1);
        let params = ClusteringParams { haplotype_threshold: -1.0, ..default_params() };

        // "a" only disagrees with the one supported haplotype, a negative threshold still accepts it
        let calls = phase_copy_cluster(&[0, 1, 2], &reads, &within_filter, &graph, &params);
        assert_eq!(calls, vec![(0, Some((0, 1.0))), (1, Some((0, 1.0))), (2, Some((0, 0.0)))]);
    }

    #[test]
    fn test_haplotype_unresolved() {
        let index = Arc::new(site_index());
        let mut reads = vec![];
        for i in 0..3 {
            reads.push(evidence(&format!("g{i}"), &[(0, b'A'), (1, b'A'), (2, b'A'), (3, b'G')]));
        }
        // no within-copy observation inside an informative cluster
        reads.push(evidence("blind", &[(0, b'A'), (1, b'A'), (2, b'A')]));
        let reads = Arc::new(reads);

        let mut clusterer = PhasingClusterer::new(reads.clone(), index.clone(), default_params());
        let copy_graph = SimilarityGraph::build(reads.clone(), Arc::new(index.class_filter(SiteClass::InterCopy)), 1);
        let copy_clusters = clusterer.assign_copies(&copy_graph);
        assert_eq!(copy_clusters.len(), 1);

        let within_graph = Arc::new(SimilarityGraph::build(reads, Arc::new(index.class_filter(SiteClass::WithinCopy)), 1));
        clusterer.assign_haplotypes(within_graph, &copy_clusters, 1);
        let states = clusterer.states();
        assert!(matches!(states[0], ReadState::HaplotypeAssigned { haplotype: 0, .. }));
        assert_eq!(states[3], ReadState::Ambiguous(AmbiguityReason::HaplotypeUnresolved));
    }
}
