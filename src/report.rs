use crate::clustering::{AmbiguityReason, ReadState};
use crate::data_types::gene_copy::GeneCopyCandidate;
use crate::data_types::read_evidence::ReadEvidence;

use log::info;
use rustc_hash::FxHashMap as HashMap;
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PartitionIntegrityError {
    #[error("read {read_name} is missing from the phase report")]
    MissingRead { read_name: String },
    #[error("read {read_name} appears {count} times in the phase report")]
    DuplicateRead { read_name: String, count: usize },
    #[error("read {read_name} is in the phase report but was never an input")]
    UnexpectedRead { read_name: String },
    #[error("read {read_name} was left in non-terminal state {state}")]
    NonTerminalRead { read_name: String, state: String }
}

/// A group of reads assigned to one haplotype of one gene copy
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseCluster {
    /// ordinal of the cluster in the report
    pub cluster_id: usize,
    /// the candidate index of the gene copy
    pub copy_index: usize,
    /// the candidate identifier of the gene copy
    pub copy_name: String,
    /// the provisional copy cluster this haplotype was phased inside
    pub phase_set: usize,
    /// the haplotype label, 0-based and only comparable within the phase set
    pub haplotype: usize,
    /// member read names, sorted
    pub members: Vec<String>,
    /// per-member confidence, parallel to `members`
    pub member_confidence: Vec<f64>,
    /// mean member confidence
    pub confidence: f64
}

impl PhaseCluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A read that could not be placed
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AmbiguousRead {
    pub read_name: String,
    pub reason: AmbiguityReason
}

/// The final partition of reads
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseReport {
    /// clusters ordered by (copy index, phase set, haplotype)
    clusters: Vec<PhaseCluster>,
    /// ambiguous reads ordered by name
    ambiguous: Vec<AmbiguousRead>
}

impl PhaseReport {
    pub fn clusters(&self) -> &[PhaseCluster] {
        &self.clusters
    }

    pub fn ambiguous(&self) -> &[AmbiguousRead] {
        &self.ambiguous
    }

    /// Total reads across clusters and the ambiguous list
    pub fn num_reads(&self) -> usize {
        self.clusters.iter().map(|c| c.len()).sum::<usize>() + self.ambiguous.len()
    }

    /// Returns the number of ambiguous reads with a given reason
    pub fn count_ambiguous(&self, reason: AmbiguityReason) -> usize {
        self.ambiguous.iter().filter(|a| a.reason == reason).count()
    }

    /// Builds the summary statistics for this report
    pub fn summary(&self) -> PhaseSummary {
        let mut ambiguous_by_reason: BTreeMap<AmbiguityReason, usize> = BTreeMap::new();
        for reason in [AmbiguityReason::NoOverlap, AmbiguityReason::CopyUnresolved, AmbiguityReason::HaplotypeUnresolved] {
            ambiguous_by_reason.insert(reason, self.count_ambiguous(reason));
        }
        PhaseSummary {
            num_reads: self.num_reads(),
            num_clusters: self.clusters.len(),
            num_assigned: self.clusters.iter().map(|c| c.len()).sum(),
            cluster_sizes: self.clusters.iter().map(|c| c.len()).collect(),
            cluster_confidences: self.clusters.iter().map(|c| c.confidence).collect(),
            ambiguous_by_reason
        }
    }
}

/// Aggregate counts for a report
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseSummary {
    pub num_reads: usize,
    pub num_clusters: usize,
    pub num_assigned: usize,
    /// size of each cluster in report order
    pub cluster_sizes: Vec<usize>,
    /// mean confidence of each cluster in report order
    pub cluster_confidences: Vec<f64>,
    pub ambiguous_by_reason: BTreeMap<AmbiguityReason, usize>
}

impl PhaseSummary {
    pub fn num_ambiguous(&self) -> usize {
        self.ambiguous_by_reason.values().sum()
    }

    /// Writes the summary through the logger
    pub fn log_summary(&self) {
        info!("Phase report summary:");
        info!("\tTotal reads: {}", self.num_reads);
        info!("\tAssigned reads: {} in {} clusters", self.num_assigned, self.num_clusters);
        for (i, (size, confidence)) in self.cluster_sizes.iter().zip(self.cluster_confidences.iter()).enumerate() {
            info!("\t\tcluster {}: {} reads, mean confidence {:.4}", i, size, confidence);
        }
        info!("\tAmbiguous reads: {}", self.num_ambiguous());
        for (reason, count) in self.ambiguous_by_reason.iter() {
            info!("\t\t{}: {}", reason, count);
        }
    }
}

/// Counts every read name in the report and compares against the inputs
fn check_integrity(report: &PhaseReport, evidence: &[ReadEvidence]) -> Result<(), PartitionIntegrityError> {
    let mut counts: HashMap<&str, usize> = Default::default();
    for cluster in report.clusters.iter() {
        for name in cluster.members.iter() {
            *counts.entry(name.as_str()).or_insert(0) += 1;
        }
    }
    for ar in report.ambiguous.iter() {
        *counts.entry(ar.read_name.as_str()).or_insert(0) += 1;
    }

    for re in evidence.iter() {
        match counts.remove(re.read_name()) {
            None => return Err(PartitionIntegrityError::MissingRead { read_name: re.read_name().to_string() }),
            Some(1) => {},
            Some(count) => return Err(PartitionIntegrityError::DuplicateRead { read_name: re.read_name().to_string(), count })
        };
    }

    // anything left over was never an input
    let mut leftover: Vec<&str> = counts.into_keys().collect();
    leftover.sort_unstable();
    match leftover.first() {
        Some(name) => Err(PartitionIntegrityError::UnexpectedRead { read_name: name.to_string() }),
        None => Ok(())
    }
}

/// Consolidates the final read states into a report and verifies the partition.
/// # Arguments
/// * `evidence` - all read evidence in canonical order, names must be unique
/// * `states` - the terminal state of each read, parallel to `evidence`
/// * `candidates` - the gene copy candidates, used for naming
/// # Errors
/// * if any read is missing, duplicated, unexpected, or not in a terminal state
pub fn assemble_report(
    evidence: &[ReadEvidence], states: &[ReadState], candidates: &[GeneCopyCandidate]
) -> Result<PhaseReport, PartitionIntegrityError> {
    assert_eq!(evidence.len(), states.len());

    // key is (copy index, phase set, haplotype)
    let mut groups: BTreeMap<(usize, usize, usize), Vec<(String, f64)>> = BTreeMap::new();
    let mut ambiguous: Vec<AmbiguousRead> = vec![];
    for (re, state) in evidence.iter().zip(states.iter()) {
        match state {
            ReadState::HaplotypeAssigned { copy_index, phase_set, haplotype, confidence } => {
                groups.entry((*copy_index, *phase_set, *haplotype)).or_default()
                    .push((re.read_name().to_string(), *confidence));
            },
            ReadState::Ambiguous(reason) => {
                ambiguous.push(AmbiguousRead {
                    read_name: re.read_name().to_string(),
                    reason: *reason
                });
            },
            other => {
                return Err(PartitionIntegrityError::NonTerminalRead {
                    read_name: re.read_name().to_string(),
                    state: format!("{other:?}")
                });
            }
        };
    }

    let clusters: Vec<PhaseCluster> = groups.into_iter().enumerate()
        .map(|(cluster_id, ((copy_index, phase_set, haplotype), mut members))| {
            members.sort_by(|a, b| a.0.cmp(&b.0));
            let confidence: f64 = members.iter().map(|(_n, c)| c).sum::<f64>() / members.len() as f64;
            let (members, member_confidence): (Vec<String>, Vec<f64>) = members.into_iter().unzip();
            PhaseCluster {
                cluster_id,
                copy_index,
                copy_name: candidates[copy_index].name().to_string(),
                phase_set,
                haplotype,
                members,
                member_confidence,
                confidence
            }
        })
        .collect();
    ambiguous.sort_by(|a, b| a.read_name.cmp(&b.read_name));

    let report = PhaseReport {
        clusters,
        ambiguous
    };
    check_integrity(&report, evidence)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<ReadEvidence> {
        names.iter().map(|n| ReadEvidence::new(n.to_string(), vec![])).collect()
    }

    fn candidates() -> Vec<GeneCopyCandidate> {
        vec![
            GeneCopyCandidate::new(0, "SMN1".to_string(), None, b"ACGT"),
            GeneCopyCandidate::new(1, "SMN2".to_string(), None, b"ACTT")
        ]
    }

    #[test]
    fn test_assemble_report() {
        let evidence = names(&["r_a", "r_b", "r_c", "r_d", "r_e"]);
        let states = vec![
            ReadState::HaplotypeAssigned { copy_index: 1, phase_set: 0, haplotype: 0, confidence: 0.8 },
            ReadState::HaplotypeAssigned { copy_index: 0, phase_set: 1, haplotype: 1, confidence: 0.9 },
            ReadState::Ambiguous(AmbiguityReason::CopyUnresolved),
            ReadState::HaplotypeAssigned { copy_index: 1, phase_set: 0, haplotype: 0, confidence: 0.6 },
            ReadState::Ambiguous(AmbiguityReason::NoOverlap),
        ];
        let report = assemble_report(&evidence, &states, &candidates()).unwrap();
        assert_eq!(report.num_reads(), 5);
        assert_eq!(report.clusters().len(), 2);

        let first = &report.clusters()[0];
        assert_eq!(first.cluster_id, 0);
        assert_eq!(first.copy_name, "SMN1");
        assert_eq!(first.haplotype, 1);
        assert_eq!(first.members, vec!["r_b".to_string()]);

        let second = &report.clusters()[1];
        assert_eq!(second.copy_name, "SMN2");
        assert_eq!(second.members, vec!["r_a".to_string(), "r_d".to_string()]);
        assert_eq!(second.member_confidence, vec![0.8, 0.6]);
        assert!((second.confidence - 0.7).abs() < 1e-9);

        assert_eq!(report.ambiguous(), &[
            AmbiguousRead { read_name: "r_c".to_string(), reason: AmbiguityReason::CopyUnresolved },
            AmbiguousRead { read_name: "r_e".to_string(), reason: AmbiguityReason::NoOverlap }
        ]);

        let summary = report.summary();
        assert_eq!(summary.num_reads, 5);
        assert_eq!(summary.num_assigned, 3);
        assert_eq!(summary.num_ambiguous(), 2);
        assert_eq!(summary.cluster_sizes, vec![1, 2]);
        assert_eq!(summary.ambiguous_by_reason[&AmbiguityReason::HaplotypeUnresolved], 0);
        summary.log_summary();
    }

    #[test]
    fn test_non_terminal() {
        let evidence = names(&["r_a"]);
        let states = vec![ReadState::Unassigned];
        assert!(matches!(
            assemble_report(&evidence, &states, &candidates()),
            Err(PartitionIntegrityError::NonTerminalRead { .. })
        ));
    }

    #[test]
    fn test_integrity_checks() {
        let cluster = PhaseCluster {
            cluster_id: 0, copy_index: 0, copy_name: "SMN1".to_string(), phase_set: 0, haplotype: 0,
            members: vec!["r_a".to_string(), "r_b".to_string()],
            member_confidence: vec![1.0, 1.0],
            confidence: 1.0
        };
        let report = PhaseReport {
            clusters: vec![cluster.clone()],
            ambiguous: vec![AmbiguousRead { read_name: "r_a".to_string(), reason: AmbiguityReason::NoOverlap }]
        };
        assert_eq!(
            check_integrity(&report, &names(&["r_a", "r_b"])),
            Err(PartitionIntegrityError::DuplicateRead { read_name: "r_a".to_string(), count: 2 })
        );

        let report = PhaseReport { clusters: vec![cluster.clone()], ambiguous: vec![] };
        assert_eq!(
            check_integrity(&report, &names(&["r_a", "r_b", "r_c"])),
            Err(PartitionIntegrityError::MissingRead { read_name: "r_c".to_string() })
        );
        assert_eq!(
            check_integrity(&report, &names(&["r_b"])),
            Err(PartitionIntegrityError::UnexpectedRead { read_name: "r_a".to_string() })
        );
        assert_eq!(check_integrity(&report, &names(&["r_a", "r_b"])), Ok(()));
    }
}
