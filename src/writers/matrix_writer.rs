use std::fs::File;
use std::path::Path;

use crate::clustering::CopyPrototypes;
use crate::data_types::read_evidence::ReadEvidence;
use crate::site_index::VariantSiteIndex;

/// Placeholder for sites a read does not observe
const MISSING: &str = ".";

/// Writes the read by site allele matrix, one row per read and one column per discriminating site.
/// Column headers are `<column>_<class>` so inter-copy and within-copy sites can be told apart.
/// # Arguments
/// * `filename` - the filename for the output (tsv/csv)
/// * `evidence` - all read evidence in canonical order
/// * `site_index` - the discriminating sites
/// * `prototypes` - the refined copy prototypes, written after the candidate rows
pub fn write_allele_matrix(filename: &Path, evidence: &[ReadEvidence], site_index: &VariantSiteIndex, prototypes: &CopyPrototypes) -> csv::Result<()> {
    // modify the delimiter to "," if it ends with .csv
    let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
    let delimiter: u8 = if is_csv { b',' } else { b'\t' };
    let mut csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(filename)?;

    let mut header: Vec<String> = vec!["read_name".to_string()];
    header.extend(site_index.sites().iter().map(|s| format!("{}_{}", s.position(), s.site_class())));
    csv_writer.write_record(&header)?;

    // one candidate row per gene copy makes the matrix readable on its own
    for copy_index in 0..site_index.num_candidates() {
        let mut row: Vec<String> = vec![format!("candidate_{copy_index}")];
        row.extend(site_index.sites().iter().map(|s| match s.candidate_allele(copy_index) {
            Some(a) => (a as char).to_string(),
            None => MISSING.to_string()
        }));
        csv_writer.write_record(&row)?;
    }
    for copy_index in 0..prototypes.num_copies() {
        let mut row: Vec<String> = vec![format!("prototype_{copy_index}")];
        row.extend((0..site_index.len()).map(|si| match prototypes.allele(copy_index, si) {
            Some(a) => (a as char).to_string(),
            None => MISSING.to_string()
        }));
        csv_writer.write_record(&row)?;
    }

    for re in evidence.iter() {
        let mut row: Vec<String> = vec![MISSING.to_string(); site_index.len() + 1];
        row[0] = re.read_name().to_string();
        for obs in re.observations().iter() {
            row[obs.site_index + 1] = (obs.allele as char).to_string();
        }
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::gene_copy::GeneCopyCandidate;
    use crate::clustering::refine_prototypes;
    use crate::data_types::read_evidence::SiteObservation;
    use crate::site_index::SiteClass;

    #[test]
    fn test_write_allele_matrix() {
        let candidates = vec![
            GeneCopyCandidate::new(0, "a".to_string(), None, b"AAAN"),
            GeneCopyCandidate::new(1, "b".to_string(), None, b"CA-T"),
            GeneCopyCandidate::new(2, "c".to_string(), None, b"CAGT"),
        ];
        let index = VariantSiteIndex::build(&candidates, None, &[], 2).unwrap();
        let evidence = vec![
            ReadEvidence::new("read_1".to_string(), vec![SiteObservation { site_index: 1, allele: b'-', confidence: 0.9 }]),
            ReadEvidence::new("read_2".to_string(), vec![]),
        ];

        let filename = std::env::temp_dir().join(format!("sgphasing_matrix_{}.csv", std::process::id()));
        // read_1 already matches copy 1, so the prototypes stay at the candidate alleles
        let prototypes = refine_prototypes(&[0, 1], &evidence, CopyPrototypes::from_site_index(&index), &index.class_filter(SiteClass::InterCopy));
        write_allele_matrix(&filename, &evidence, &index, &prototypes).unwrap();
        let contents = std::fs::read_to_string(&filename).unwrap();
        std::fs::remove_file(&filename).unwrap();
        assert_eq!(contents, "\
read_name,0_InterCopy,2_InterCopy
candidate_0,A,A
candidate_1,C,-
candidate_2,C,G
prototype_0,A,A
prototype_1,C,-
prototype_2,C,G
read_1,.,-
read_2,.,.
");
    }
}
