use crate::data_types::gene_copy::{GeneCopyCandidate, normalize_allele};
use crate::data_types::masked_regions::MaskedRegions;

use bit_vec::BitVec;
use log::{debug, info, trace, warn};
use rustc_hash::FxHashSet as HashSet;
use std::ops::Range;

/// Where the discriminating power of a site comes from
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, strum_macros::Display)]
pub enum SiteClass {
    /// The gene copy candidates disagree at this column
    InterCopy,
    /// The candidates agree, but an external caller found a heterozygous site inside a copy
    WithinCopy
}

/// A variant site reported by the external variant caller, in alignment column coordinates
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CalledSite {
    /// the alignment column of the site
    pub position: usize,
    /// the called alleles, REF first
    pub alleles: Vec<u8>
}

#[derive(thiserror::Error, Debug)]
pub enum SiteIndexError {
    #[error("at least 2 gene copy candidates are required, found {found}")]
    TooFewCandidates { found: usize },
    #[error("candidate {name} has aligned length {found}, expected {expected}")]
    AlignmentLengthMismatch { name: String, found: usize, expected: usize },
    #[error("duplicate gene copy candidate identifier: {name}")]
    DuplicateCandidate { name: String },
    #[error("found {found} discriminating sites between gene copies, at least {minimum} are required")]
    InsufficientSites { found: usize, minimum: usize }
}

/// A column of the shared frame that can be used to tell reads apart
#[derive(Clone, Debug, PartialEq)]
pub struct DiscriminatingSite {
    /// The alignment column
    position: usize,
    /// The allele of each candidate in input order, None if the candidate has no usable base here
    candidate_alleles: Vec<Option<u8>>,
    /// The distinct alleles at this site, sorted
    alleles: Vec<u8>,
    /// How well this site separates groups, in [0, 1]
    power: f64,
    /// Whether the site separates gene copies or haplotypes inside a copy
    site_class: SiteClass
}

impl DiscriminatingSite {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn candidate_alleles(&self) -> &[Option<u8>] {
        &self.candidate_alleles
    }

    /// Returns the allele of one candidate at this site
    pub fn candidate_allele(&self, copy_index: usize) -> Option<u8> {
        self.candidate_alleles[copy_index]
    }

    pub fn alleles(&self) -> &[u8] {
        &self.alleles
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn site_class(&self) -> SiteClass {
        self.site_class
    }
}

/// Scores an alignment column across all candidates.
/// Returns None if fewer than two covered candidates disagree.
/// Power is the normalized number of distinct alleles, weighted by the fraction of candidate pairs that are both covered.
/// # Arguments
/// * `candidate_alleles` - the usable allele of each candidate at the column
fn score_column(candidate_alleles: &[Option<u8>]) -> Option<(Vec<u8>, f64)> {
    let num_candidates: usize = candidate_alleles.len();
    let covered: Vec<u8> = candidate_alleles.iter().flatten().cloned().collect();
    if covered.len() < 2 {
        return None;
    }

    let mut distinct: Vec<u8> = covered.clone();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 2 {
        return None;
    }

    let covered_pairs: f64 = (covered.len() * (covered.len() - 1)) as f64 / 2.0;
    let total_pairs: f64 = (num_candidates * (num_candidates - 1)) as f64 / 2.0;
    let allele_fraction: f64 = (distinct.len() - 1) as f64 / (num_candidates - 1) as f64;
    let power: f64 = (allele_fraction * covered_pairs / total_pairs).min(1.0);
    Some((distinct, power))
}

/// The immutable collection of discriminating sites for one run, sorted by position
#[derive(Debug)]
pub struct VariantSiteIndex {
    /// All sites, sorted by position
    sites: Vec<DiscriminatingSite>,
    /// The number of candidates the sites were built from
    num_candidates: usize
}

impl VariantSiteIndex {
    /// Scans the candidate alignment for discriminating columns and merges in any externally called sites.
    /// # Arguments
    /// * `candidates` - the gene copy candidates, all rows of the same multiple alignment
    /// * `mask` - optional repeat mask; columns inside it are never discriminating
    /// * `called_sites` - heterozygous sites from the external variant caller, in column coordinates
    /// * `min_sites` - the minimum number of inter-copy sites required
    /// # Errors
    /// * if there are fewer than 2 candidates, rows differ in length, or names repeat
    /// * if fewer than `min_sites` inter-copy sites are found
    pub fn build(
        candidates: &[GeneCopyCandidate], mask: Option<&MaskedRegions>,
        called_sites: &[CalledSite], min_sites: usize
    ) -> Result<VariantSiteIndex, SiteIndexError> {
        if candidates.len() < 2 {
            return Err(SiteIndexError::TooFewCandidates { found: candidates.len() });
        }
        let num_columns: usize = candidates[0].aligned_len();
        let mut names: HashSet<&str> = Default::default();
        for candidate in candidates.iter() {
            if candidate.aligned_len() != num_columns {
                return Err(SiteIndexError::AlignmentLengthMismatch {
                    name: candidate.name().to_string(),
                    found: candidate.aligned_len(),
                    expected: num_columns
                });
            }
            if !names.insert(candidate.name()) {
                return Err(SiteIndexError::DuplicateCandidate { name: candidate.name().to_string() });
            }
        }

        let column_mask: BitVec = match mask {
            Some(m) => m.column_mask(num_columns),
            None => BitVec::from_elem(num_columns, false)
        };

        let mut sites: Vec<DiscriminatingSite> = vec![];
        let mut masked_columns: usize = 0;
        for column in 0..num_columns {
            let candidate_alleles: Vec<Option<u8>> = candidates.iter()
                .map(|c| c.allele(column))
                .collect();
            if let Some((alleles, power)) = score_column(&candidate_alleles) {
                if column_mask[column] {
                    trace!("Masked discriminating column {}: {:?}", column, alleles);
                    masked_columns += 1;
                    continue;
                }
                sites.push(DiscriminatingSite {
                    position: column,
                    candidate_alleles,
                    alleles,
                    power,
                    site_class: SiteClass::InterCopy
                });
            }
        }

        let num_inter_copy: usize = sites.len();
        debug!("Found {} inter-copy sites, {} more were masked", num_inter_copy, masked_columns);
        if num_inter_copy < min_sites {
            return Err(SiteIndexError::InsufficientSites { found: num_inter_copy, minimum: min_sites });
        }

        // now fold in the called sites; the inter-copy positions are a sorted list we can search
        let mut used_positions: HashSet<usize> = sites.iter().map(|s| s.position).collect();
        let mut within_copy: Vec<DiscriminatingSite> = vec![];
        for called in called_sites.iter() {
            if called.position >= num_columns {
                warn!("Ignoring called site at column {}, alignment only has {} columns", called.position, num_columns);
                continue;
            }
            if column_mask[called.position] {
                trace!("Ignoring masked called site at column {}", called.position);
                continue;
            }
            if !used_positions.insert(called.position) {
                // either an inter-copy column or a repeat of another call
                trace!("Ignoring duplicate called site at column {}", called.position);
                continue;
            }

            let mut alleles: Vec<u8> = called.alleles.iter()
                .filter_map(|&a| normalize_allele(a))
                .collect();
            alleles.sort_unstable();
            alleles.dedup();
            if alleles.len() < 2 {
                trace!("Ignoring called site at column {} with {} usable alleles", called.position, alleles.len());
                used_positions.remove(&called.position);
                continue;
            }

            let power: f64 = 1.0 - 1.0 / alleles.len() as f64;
            within_copy.push(DiscriminatingSite {
                position: called.position,
                candidate_alleles: candidates.iter().map(|c| c.allele(called.position)).collect(),
                alleles,
                power,
                site_class: SiteClass::WithinCopy
            });
        }

        info!("Discriminating sites: {} inter-copy, {} within-copy", num_inter_copy, within_copy.len());
        sites.extend(within_copy);
        sites.sort_by_key(|s| s.position);

        Ok(VariantSiteIndex {
            sites,
            num_candidates: candidates.len()
        })
    }

    pub fn sites(&self) -> &[DiscriminatingSite] {
        &self.sites
    }

    pub fn site(&self, site_index: usize) -> &DiscriminatingSite {
        &self.sites[site_index]
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn num_candidates(&self) -> usize {
        self.num_candidates
    }

    /// Returns the number of sites of a given class
    pub fn count_class(&self, site_class: SiteClass) -> usize {
        self.sites.iter().filter(|s| s.site_class == site_class).count()
    }

    /// Returns one bit per site, set when the site is of the requested class
    pub fn class_filter(&self, site_class: SiteClass) -> BitVec {
        self.sites.iter().map(|s| s.site_class == site_class).collect()
    }

    /// Returns the range of site indices whose positions fall inside the column range
    pub fn sites_in_range(&self, columns: Range<usize>) -> Range<usize> {
        let first = self.sites.partition_point(|s| s.position < columns.start);
        let last = self.sites.partition_point(|s| s.position < columns.end);
        first..last.max(first)
    }
}
