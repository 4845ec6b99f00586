use sgphasing::cli::{Settings, check_settings, get_raw_settings};
use sgphasing::data_types::aligned_read::AlignedRead;
use sgphasing::data_types::gene_copy::{GeneCopyCandidate, load_candidates};
use sgphasing::data_types::masked_regions::MaskedRegions;
use sgphasing::phaser::{PhaseResult, PhasingError, solve_region};
use sgphasing::read_parsing::{load_aligned_reads, load_called_sites};
use sgphasing::site_index::CalledSite;
use sgphasing::writers::assignment_writer::AssignmentWriter;
use sgphasing::writers::cluster_stats::write_cluster_stats;
use sgphasing::writers::matrix_writer::write_allele_matrix;

use log::{LevelFilter, error, info};
use std::time::Instant;

fn main() {
    // get the settings
    let settings: Settings = get_raw_settings();
    let filter_level: LevelFilter = match settings.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace
    };

    // immediately setup logging first
    env_logger::builder()
        .format_timestamp_millis()
        .filter_level(filter_level)
        .init();

    // okay, now we can check all the other settings
    let cli_settings: Settings = check_settings(settings);
    let start_time = Instant::now();

    let candidates: Vec<GeneCopyCandidate> = match load_candidates(&cli_settings.candidates_filename) {
        Ok(c) => c,
        Err(e) => {
            error!("Error while loading gene copy candidates: {}", e);
            std::process::exit(exitcode::DATAERR);
        }
    };
    if candidates.is_empty() {
        error!("No gene copy candidates found in {:?}", cli_settings.candidates_filename);
        std::process::exit(exitcode::DATAERR);
    }

    // reads are aligned to one candidate, which anchors the alignment columns
    let frame: &GeneCopyCandidate = match cli_settings.frame_reference.as_ref() {
        Some(frame_name) => match candidates.iter().find(|c| c.name() == frame_name) {
            Some(c) => c,
            None => {
                error!("Frame reference {:?} is not one of the gene copy candidates", frame_name);
                std::process::exit(exitcode::DATAERR);
            }
        },
        None => &candidates[0]
    };
    info!("Using {} as the frame reference", frame.name());

    let mask: Option<MaskedRegions> = match cli_settings.mask_filename.as_ref() {
        Some(filename) => match MaskedRegions::from_bed(filename) {
            Ok(m) => Some(m),
            Err(e) => {
                error!("Error while loading mask file: {}", e);
                std::process::exit(exitcode::DATAERR);
            }
        },
        None => None
    };

    let called_sites: Vec<CalledSite> = match cli_settings.vcf_filename.as_ref() {
        Some(filename) => match load_called_sites(filename, frame, cli_settings.min_variant_quality) {
            Ok(cs) => cs,
            Err(e) => {
                error!("Error while loading called sites: {}", e);
                std::process::exit(exitcode::IOERR);
            }
        },
        None => vec![]
    };

    let reads: Vec<AlignedRead> = match load_aligned_reads(
        &cli_settings.bam_filenames, frame, cli_settings.min_mapping_quality, cli_settings.missing_base_quality
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("Error while loading alignments: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };

    let phase_result: PhaseResult = match solve_region(
        &candidates, reads, mask.as_ref(), &called_sites, &cli_settings.phasing_config()
    ) {
        Ok(pr) => pr,
        Err(e) => {
            error!("Error while phasing: {}", e);
            let code = match e {
                PhasingError::SiteIndex(_) => exitcode::DATAERR,
                PhasingError::Integrity(_) => exitcode::SOFTWARE
            };
            std::process::exit(code);
        }
    };
    phase_result.report.summary().log_summary();

    info!("Saving read assignments to {:?}...", cli_settings.assignment_filename);
    let write_result = AssignmentWriter::new(&cli_settings.assignment_filename)
        .and_then(|mut writer| writer.write_report(&phase_result.report));
    if let Err(e) = write_result {
        error!("Error while writing assignment file: {}", e);
        std::process::exit(exitcode::IOERR);
    }

    if let Some(ref filename) = cli_settings.clusters_filename {
        info!("Saving cluster statistics to {:?}...", filename);
        match write_cluster_stats(filename, &phase_result.report, &phase_result.copy_clusters) {
            Ok(()) => {},
            Err(e) => {
                error!("Error while writing clusters file: {}", e);
                std::process::exit(exitcode::IOERR);
            }
        };
    }

    if let Some(ref filename) = cli_settings.matrix_filename {
        info!("Saving allele matrix to {:?}...", filename);
        match write_allele_matrix(filename, &phase_result.evidence, &phase_result.site_index, &phase_result.prototypes) {
            Ok(()) => {},
            Err(e) => {
                error!("Error while writing matrix file: {}", e);
                std::process::exit(exitcode::IOERR);
            }
        };
    }

    info!("All reads phased successfully after {} seconds.", start_time.elapsed().as_secs_f64());
}
