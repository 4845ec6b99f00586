use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::clustering::CopyCluster;
use crate::report::PhaseReport;

/// Contains all the data written to each row of the cluster file
#[derive(Serialize)]
struct ClusterRow {
    /// the cluster ordinal in the report
    cluster_id: usize,
    /// the gene copy identifier
    copy_name: String,
    /// the provisional copy cluster this haplotype was phased inside
    phase_set: usize,
    /// the haplotype label within the phase set
    haplotype: usize,
    /// the number of reads in the cluster
    num_reads: usize,
    /// mean read confidence
    mean_confidence: f64,
    /// lowest read confidence
    min_confidence: f64,
    /// highest read confidence
    max_confidence: f64,
    /// weighted agreement of the whole phase set with its gene copy
    copy_agreement: Option<f64>
}

/// Will write all clusters to a CSV filename in report order
/// # Arguments
/// * `filename` - the filename for the output (tsv/csv)
/// * `report` - the final phase report
/// * `copy_clusters` - the provisional copy clusters, used to look up the agreement of each phase set
pub fn write_cluster_stats(filename: &Path, report: &PhaseReport, copy_clusters: &[CopyCluster]) -> csv::Result<()> {
    // modify the delimiter to "," if it ends with .csv
    let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
    let delimiter: u8 = if is_csv { b',' } else { b'\t' };
    let mut csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(filename)?;

    for cluster in report.clusters().iter() {
        let copy_agreement: Option<f64> = copy_clusters.iter()
            .find(|cc| cc.phase_set == cluster.phase_set)
            .map(|cc| cc.agreement[cluster.copy_index]);
        let row = ClusterRow {
            cluster_id: cluster.cluster_id,
            copy_name: cluster.copy_name.clone(),
            phase_set: cluster.phase_set,
            haplotype: cluster.haplotype,
            num_reads: cluster.len(),
            mean_confidence: cluster.confidence,
            min_confidence: cluster.member_confidence.iter().cloned().fold(f64::INFINITY, f64::min),
            max_confidence: cluster.member_confidence.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            copy_agreement
        };
        csv_writer.serialize(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::ReadState;
    use crate::data_types::gene_copy::GeneCopyCandidate;
    use crate::data_types::read_evidence::ReadEvidence;
    use crate::report::assemble_report;

    #[test]
    fn test_write_cluster_stats() {
        let evidence: Vec<ReadEvidence> = ["r_a", "r_b", "r_c"].iter()
            .map(|n| ReadEvidence::new(n.to_string(), vec![]))
            .collect();
        let states = vec![
            ReadState::HaplotypeAssigned { copy_index: 1, phase_set: 0, haplotype: 0, confidence: 0.5 },
            ReadState::HaplotypeAssigned { copy_index: 1, phase_set: 0, haplotype: 0, confidence: 1.0 },
            ReadState::HaplotypeAssigned { copy_index: 0, phase_set: 1, haplotype: 0, confidence: 0.25 },
        ];
        let candidates = vec![
            GeneCopyCandidate::new(0, "SMN1".to_string(), None, b"AC"),
            GeneCopyCandidate::new(1, "SMN2".to_string(), None, b"AG")
        ];
        let report = assemble_report(&evidence, &states, &candidates).unwrap();
        let copy_clusters = vec![
            CopyCluster { phase_set: 0, copy_index: Some(1), agreement: vec![0.0, 1.0], members: vec![0, 1] },
        ];

        let filename = std::env::temp_dir().join(format!("sgphasing_clusters_{}.tsv", std::process::id()));
        write_cluster_stats(&filename, &report, &copy_clusters).unwrap();
        let contents = std::fs::read_to_string(&filename).unwrap();
        std::fs::remove_file(&filename).unwrap();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "cluster_id\tcopy_name\tphase_set\thaplotype\tnum_reads\tmean_confidence\tmin_confidence\tmax_confidence\tcopy_agreement");
        assert_eq!(lines[1], "0\tSMN1\t1\t0\t1\t0.25\t0.25\t0.25\t");
        assert_eq!(lines[2], "1\tSMN2\t0\t0\t2\t0.75\t0.5\t1.0\t1.0");
    }
}
