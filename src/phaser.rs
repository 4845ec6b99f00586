use crate::clustering::{AgglomerationParams, ClusteringParams, CopyCluster, CopyPrototypes, PhasingClusterer};
use crate::data_types::aligned_read::AlignedRead;
use crate::data_types::gene_copy::GeneCopyCandidate;
use crate::data_types::masked_regions::MaskedRegions;
use crate::data_types::read_evidence::ReadEvidence;
use crate::evidence::{EvidenceParams, extract_all_evidence};
use crate::report::{PartitionIntegrityError, PhaseReport, assemble_report};
use crate::similarity::SimilarityGraph;
use crate::site_index::{CalledSite, SiteClass, SiteIndexError, VariantSiteIndex};

use log::{debug, info};
use std::sync::Arc;

/// All tunable thresholds for one run
#[derive(Clone, Debug, PartialEq)]
pub struct PhasingConfig {
    /// minimum inter-copy discriminating sites
    pub min_sites: usize,
    /// if true, a supplied mask removes sites
    pub mask_sites: bool,
    /// half-width of the harmonic mean quality window
    pub quality_window: usize,
    /// half-width of the window checked for indel events
    pub indel_window: usize,
    /// confidence multiplier when an indel is nearby
    pub indel_discount: f64,
    /// minimum absolute edge score that participates in clustering
    pub min_edge_confidence: f64,
    /// minimum mean linkage for two clusters to merge
    pub merge_threshold: f64,
    /// minimum weighted allele agreement between a cluster and its gene copy
    pub min_copy_agreement: f64,
    /// minimum mean similarity between a read and its haplotype
    pub haplotype_threshold: f64,
    /// minimum reads supporting a haplotype
    pub min_haplotype_support: usize,
    /// maximum haplotypes per gene copy cluster
    pub max_haplotypes: usize,
    /// worker threads
    pub threads: usize
}

impl Default for PhasingConfig {
    fn default() -> Self {
        Self {
            min_sites: 3,
            mask_sites: true,
            quality_window: 2,
            indel_window: 5,
            indel_discount: 0.5,
            min_edge_confidence: 0.1,
            merge_threshold: 0.5,
            min_copy_agreement: 0.7,
            haplotype_threshold: 0.5,
            min_haplotype_support: 2,
            max_haplotypes: 2,
            threads: 1
        }
    }
}

impl PhasingConfig {
    pub fn evidence_params(&self) -> EvidenceParams {
        EvidenceParams {
            quality_window: self.quality_window,
            indel_window: self.indel_window,
            indel_discount: self.indel_discount
        }
    }

    pub fn clustering_params(&self) -> ClusteringParams {
        ClusteringParams {
            agglomeration: AgglomerationParams {
                min_edge_confidence: self.min_edge_confidence,
                merge_threshold: self.merge_threshold
            },
            min_copy_agreement: self.min_copy_agreement,
            haplotype_threshold: self.haplotype_threshold,
            min_haplotype_support: self.min_haplotype_support,
            max_haplotypes: self.max_haplotypes
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PhasingError {
    #[error("site selection failed: {0}")]
    SiteIndex(#[from] SiteIndexError),
    #[error("partition integrity violated: {0}")]
    Integrity(#[from] PartitionIntegrityError)
}

/// Everything produced by a run, the intermediate results are kept for the output tables
pub struct PhaseResult {
    /// The final read partition
    pub report: PhaseReport,
    /// The discriminating sites that were used
    pub site_index: Arc<VariantSiteIndex>,
    /// Per-read evidence, in report input order
    pub evidence: Arc<Vec<ReadEvidence>>,
    /// The copy clusters, split by nearest prototype
    pub copy_clusters: Vec<CopyCluster>,
    /// The refined per-copy alleles at every site
    pub prototypes: CopyPrototypes
}

/// Runs the full pipeline on one multi-copy region: site selection, evidence extraction, copy clustering, haplotype phasing, and reporting.
/// # Arguments
/// * `candidates` - the gene copy candidates as rows of one multiple alignment
/// * `reads` - all read alignments projected onto the alignment frame
/// * `mask` - optional repeat mask in alignment columns
/// * `called_sites` - externally called within-copy sites in alignment columns
/// * `config` - thresholds and thread count
/// # Errors
/// * if the candidates are malformed or have too few discriminating sites; no reads are processed in that case
/// * if the final partition fails the integrity check
pub fn solve_region(
    candidates: &[GeneCopyCandidate], reads: Vec<AlignedRead>, mask: Option<&MaskedRegions>,
    called_sites: &[CalledSite], config: &PhasingConfig
) -> Result<PhaseResult, PhasingError> {
    debug!("Solving region with {} candidates and {} alignment records", candidates.len(), reads.len());
    let mask: Option<&MaskedRegions> = if config.mask_sites { mask } else { None };

    let stage_time = cpu_time::ThreadTime::now();
    let site_index: Arc<VariantSiteIndex> = Arc::new(VariantSiteIndex::build(candidates, mask, called_sites, config.min_sites)?);
    debug!("Site selection finished in {:.3} cpu seconds", stage_time.elapsed().as_secs_f64());

    let stage_time = cpu_time::ThreadTime::now();
    let evidence: Arc<Vec<ReadEvidence>> = Arc::new(extract_all_evidence(
        reads, site_index.clone(), config.evidence_params(), config.threads
    ));
    debug!("Evidence extraction finished in {:.3} cpu seconds", stage_time.elapsed().as_secs_f64());

    let stage_time = cpu_time::ThreadTime::now();
    let copy_graph: SimilarityGraph = SimilarityGraph::build(
        evidence.clone(), Arc::new(site_index.class_filter(SiteClass::InterCopy)), config.threads
    );
    let mut clusterer = PhasingClusterer::new(evidence.clone(), site_index.clone(), config.clustering_params());
    let copy_clusters: Vec<CopyCluster> = clusterer.assign_copies(&copy_graph);
    drop(copy_graph);
    debug!("Copy clustering finished in {:.3} cpu seconds", stage_time.elapsed().as_secs_f64());

    let stage_time = cpu_time::ThreadTime::now();
    let within_graph: Arc<SimilarityGraph> = Arc::new(SimilarityGraph::build(
        evidence.clone(), Arc::new(site_index.class_filter(SiteClass::WithinCopy)), config.threads
    ));
    clusterer.assign_haplotypes(within_graph, &copy_clusters, config.threads);
    debug!("Haplotype phasing finished in {:.3} cpu seconds", stage_time.elapsed().as_secs_f64());

    let (states, prototypes) = clusterer.into_parts();
    let report: PhaseReport = assemble_report(&evidence, &states, candidates)?;
    info!("Assigned {} of {} reads to {} clusters", report.num_reads() - report.ambiguous().len(), report.num_reads(), report.clusters().len());

    Ok(PhaseResult {
        report,
        site_index,
        evidence,
        copy_clusters,
        prototypes
    })
}
