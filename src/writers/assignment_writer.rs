
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::report::PhaseReport;

/// Writes one row per read describing where it was placed
pub struct AssignmentWriter {
    /// Handle for the CSV writer
    csv_writer: csv::Writer<File>
}

/// Contains all the data written to each row of the assignment file
#[derive(Serialize)]
struct AssignmentRow {
    /// the read name
    read_name: String,
    /// "assigned" or "ambiguous"
    status: &'static str,
    /// the gene copy identifier, empty when ambiguous
    copy_name: Option<String>,
    /// the provisional copy cluster, empty when ambiguous
    phase_set: Option<usize>,
    /// the haplotype label within the phase set, empty when ambiguous
    haplotype: Option<usize>,
    /// read confidence, empty when ambiguous
    confidence: Option<f64>,
    /// the ambiguity reason, empty when assigned
    reason: Option<String>
}

impl AssignmentWriter {
    /// Creates a new writer for a given filename
    /// # Arguments
    /// * `filename` - the path to write all assignments to
    pub fn new(filename: &Path) -> csv::Result<AssignmentWriter> {
        // modify the delimiter to "," if it ends with .csv
        let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
        let delimiter: u8 = if is_csv { b',' } else { b'\t' };
        let csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(filename)?;
        Ok(AssignmentWriter {
            csv_writer
        })
    }

    /// Writes every read from the report, sorted by read name.
    /// # Arguments
    /// * `report` - the final phase report
    /// # Errors
    /// * if the csv_writer has any errors
    pub fn write_report(&mut self, report: &PhaseReport) -> csv::Result<()> {
        let mut rows: Vec<AssignmentRow> = Vec::with_capacity(report.num_reads());
        for cluster in report.clusters().iter() {
            for (read_name, &confidence) in cluster.members.iter().zip(cluster.member_confidence.iter()) {
                rows.push(AssignmentRow {
                    read_name: read_name.clone(),
                    status: "assigned",
                    copy_name: Some(cluster.copy_name.clone()),
                    phase_set: Some(cluster.phase_set),
                    haplotype: Some(cluster.haplotype),
                    confidence: Some(confidence),
                    reason: None
                });
            }
        }
        for ambiguous in report.ambiguous().iter() {
            rows.push(AssignmentRow {
                read_name: ambiguous.read_name.clone(),
                status: "ambiguous",
                copy_name: None,
                phase_set: None,
                haplotype: None,
                confidence: None,
                reason: Some(ambiguous.reason.to_string())
            });
        }
        rows.sort_by(|a, b| a.read_name.cmp(&b.read_name));

        for row in rows.iter() {
            self.csv_writer.serialize(row)?;
        }
        self.csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::{AmbiguityReason, ReadState};
    use crate::data_types::gene_copy::GeneCopyCandidate;
    use crate::data_types::read_evidence::ReadEvidence;
    use crate::report::assemble_report;

    #[test]
    fn test_write_report() {
        let evidence: Vec<ReadEvidence> = ["r_b", "r_a"].iter()
            .map(|n| ReadEvidence::new(n.to_string(), vec![]))
            .collect();
        let states = vec![
            ReadState::HaplotypeAssigned { copy_index: 0, phase_set: 0, haplotype: 1, confidence: 0.5 },
            ReadState::Ambiguous(AmbiguityReason::HaplotypeUnresolved)
        ];
        let candidates = vec![
            GeneCopyCandidate::new(0, "SMN1".to_string(), None, b"AC"),
            GeneCopyCandidate::new(1, "SMN2".to_string(), None, b"AG")
        ];
        let report = assemble_report(&evidence, &states, &candidates).unwrap();

        let filename = std::env::temp_dir().join(format!("sgphasing_assignments_{}.csv", std::process::id()));
        let mut writer = AssignmentWriter::new(&filename).unwrap();
        writer.write_report(&report).unwrap();
        drop(writer);

        let contents = std::fs::read_to_string(&filename).unwrap();
        std::fs::remove_file(&filename).unwrap();
        assert_eq!(contents, "\
read_name,status,copy_name,phase_set,haplotype,confidence,reason
r_a,ambiguous,,,,,HaplotypeUnresolved
r_b,assigned,SMN1,0,1,0.5,
");
    }
}
