use clap::Parser;
use chrono::Datelike;
use lazy_static::lazy_static;
use log::{error, info, warn};
use std::path::{Path, PathBuf};

use crate::phaser::PhasingConfig;

lazy_static! {
    /// Stores the full version string we plan to use.
    /// # Examples
    /// * `0.1.0-6bb9635-dirty` - while on a dirty branch
    /// * `0.1.0-6bb9635` - with a fresh commit
    pub static ref FULL_VERSION: String = format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("VERGEN_GIT_DESCRIBE"));
}

#[derive(Clone, Parser)]
#[clap(author,
    version = &**FULL_VERSION,
    about,
    after_help = format!("Copyright (C) 2021-{}     SGPhasing developers
This program comes with ABSOLUTELY NO WARRANTY; it is intended for
Research Use Only and not for use in diagnostic procedures.", chrono::Utc::now().year()))]
pub struct Settings {
    /// Gene copy candidates as a multiple alignment in FASTA format
    #[clap(required = true)]
    #[clap(short = 'g')]
    #[clap(long = "candidates")]
    #[clap(value_name = "FASTA")]
    #[clap(help_heading = Some("Input/Output"))]
    pub candidates_filename: PathBuf,

    /// Input alignment file in BAM format, aligned to the frame candidate
    #[clap(required = true)]
    #[clap(short = 'b')]
    #[clap(long = "bam")]
    #[clap(value_name = "BAM")]
    #[clap(help_heading = Some("Input/Output"))]
    pub bam_filenames: Vec<PathBuf>,

    /// Candidate the reads are aligned to (default: first candidate)
    #[clap(short = 'f')]
    #[clap(long = "frame-reference")]
    #[clap(value_name = "ID")]
    #[clap(help_heading = Some("Input/Output"))]
    pub frame_reference: Option<String>,

    /// Called within-copy variants on the frame candidate in VCF format (optional)
    #[clap(short = 'c')]
    #[clap(long = "vcf")]
    #[clap(value_name = "VCF")]
    #[clap(help_heading = Some("Input/Output"))]
    pub vcf_filename: Option<PathBuf>,

    /// Repeat mask in alignment column coordinates, BED format (optional)
    #[clap(short = 'm')]
    #[clap(long = "mask")]
    #[clap(value_name = "BED")]
    #[clap(help_heading = Some("Input/Output"))]
    pub mask_filename: Option<PathBuf>,

    /// Output per-read assignment file (csv/tsv)
    #[clap(required = true)]
    #[clap(short = 'o')]
    #[clap(long = "output-assignments")]
    #[clap(value_name = "FILE")]
    #[clap(help_heading = Some("Input/Output"))]
    pub assignment_filename: PathBuf,

    /// Output cluster summary file (optional, csv/tsv)
    #[clap(long = "clusters-file")]
    #[clap(value_name = "FILE")]
    #[clap(help_heading = Some("Input/Output"))]
    pub clusters_filename: Option<PathBuf>,

    /// Output read by site allele matrix (optional, csv/tsv)
    #[clap(long = "matrix-file")]
    #[clap(value_name = "FILE")]
    #[clap(help_heading = Some("Input/Output"))]
    pub matrix_filename: Option<PathBuf>,

    /// Number of threads to use for phasing
    #[clap(short = 't')]
    #[clap(long = "threads")]
    #[clap(value_name = "THREADS")]
    #[clap(default_value = "1")]
    pub threads: usize,

    /// Enable verbose output
    #[clap(short = 'v')]
    #[clap(long = "verbose")]
    #[clap(action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Sets a minimum MAPQ to include a read
    #[clap(long = "min-mapq")]
    #[clap(value_name = "MAPQ")]
    #[clap(default_value = "5")]
    #[clap(help_heading = Some("Site Selection"))]
    pub min_mapping_quality: u8,

    /// Sets a minimum QUAL to include a called within-copy variant
    #[clap(long = "min-vcf-qual")]
    #[clap(value_name = "QUAL")]
    #[clap(default_value = "20.0")]
    #[clap(help_heading = Some("Site Selection"))]
    pub min_variant_quality: f32,

    /// Sets the minimum number of discriminating sites between gene copies
    #[clap(long = "min-sites")]
    #[clap(value_name = "COUNT")]
    #[clap(default_value = "3")]
    #[clap(help_heading = Some("Site Selection"))]
    pub min_sites: usize,

    /// Keeps discriminating sites inside masked regions
    #[clap(long = "keep-masked-sites")]
    #[clap(help_heading = Some("Site Selection"))]
    pub keep_masked_sites: bool,

    /// Sets the base quality used for alignment records that carry no qualities
    #[clap(long = "missing-base-quality")]
    #[clap(value_name = "QUAL")]
    #[clap(default_value = "10")]
    #[clap(help_heading = Some("Evidence"))]
    pub missing_base_quality: u8,

    /// Sets the half-width of the base quality window around each site
    #[clap(long = "quality-window")]
    #[clap(value_name = "LENGTH")]
    #[clap(default_value = "2")]
    #[clap(help_heading = Some("Evidence"))]
    pub quality_window: usize,

    /// Sets the half-width of the window checked for nearby indels
    #[clap(long = "indel-window")]
    #[clap(value_name = "LENGTH")]
    #[clap(default_value = "5")]
    #[clap(help_heading = Some("Evidence"))]
    pub indel_window: usize,

    /// Sets the confidence multiplier for observations near an indel
    #[clap(long = "indel-discount")]
    #[clap(value_name = "FRAC")]
    #[clap(default_value = "0.5")]
    #[clap(help_heading = Some("Evidence"))]
    pub indel_discount: f64,

    /// Sets the minimum absolute read similarity used for clustering
    #[clap(long = "min-edge-confidence")]
    #[clap(value_name = "SCORE")]
    #[clap(default_value = "0.1")]
    #[clap(help_heading = Some("Clustering"))]
    pub min_edge_confidence: f64,

    /// Sets the minimum mean similarity for two clusters to merge
    #[clap(long = "merge-threshold")]
    #[clap(value_name = "SCORE")]
    #[clap(default_value = "0.5")]
    #[clap(help_heading = Some("Clustering"))]
    pub merge_threshold: f64,

    /// Sets the minimum allele agreement between a cluster and its gene copy
    #[clap(long = "min-copy-agreement")]
    #[clap(value_name = "FRAC")]
    #[clap(default_value = "0.7")]
    #[clap(help_heading = Some("Clustering"))]
    pub min_copy_agreement: f64,

    /// Sets the minimum mean similarity between a read and its haplotype
    #[clap(long = "haplotype-threshold")]
    #[clap(value_name = "SCORE")]
    #[clap(default_value = "0.5")]
    #[clap(help_heading = Some("Haplotypes"))]
    pub haplotype_threshold: f64,

    /// Sets the minimum number of reads supporting a haplotype
    #[clap(long = "min-haplotype-support")]
    #[clap(value_name = "READS")]
    #[clap(default_value = "2")]
    #[clap(help_heading = Some("Haplotypes"))]
    pub min_haplotype_support: usize,

    /// Sets the maximum number of haplotypes per gene copy
    #[clap(long = "max-haplotypes")]
    #[clap(value_name = "COUNT")]
    #[clap(default_value = "2")]
    #[clap(help_heading = Some("Haplotypes"))]
    pub max_haplotypes: usize,
}

/// Checks if a file exists and will otherwise exit
/// # Arguments
/// * `filename` - the file path to check for
/// * `label` - the label to use for error messages
fn check_required_filename(filename: &Path, label: &str) {
    if !filename.exists() {
        error!("{} does not exist: \"{}\"", label, filename.display());
        std::process::exit(exitcode::NOINPUT);
    } else {
        info!("{}: \"{}\"", label, filename.display());
    }
}

/// Exits if a value is outside of [0, 1]
fn check_fraction(value: f64, option: &str) {
    if !(0.0..=1.0).contains(&value) {
        error!("{} must be in the range [0.0, 1.0], got {}", option, value);
        std::process::exit(exitcode::USAGE);
    }
}

impl Settings {
    /// Wrapper function to build the phasing configuration from our CLI settings
    pub fn phasing_config(&self) -> PhasingConfig {
        PhasingConfig {
            min_sites: self.min_sites,
            mask_sites: !self.keep_masked_sites,
            quality_window: self.quality_window,
            indel_window: self.indel_window,
            indel_discount: self.indel_discount,
            min_edge_confidence: self.min_edge_confidence,
            merge_threshold: self.merge_threshold,
            min_copy_agreement: self.min_copy_agreement,
            haplotype_threshold: self.haplotype_threshold,
            min_haplotype_support: self.min_haplotype_support,
            max_haplotypes: self.max_haplotypes,
            threads: self.threads
        }
    }
}

pub fn get_raw_settings() -> Settings {
    Settings::parse()
}

/// Do some additional checks here, we may increase these as we go.
/// Also can modify settings if needed since we're passing it around.
/// # Arguments
/// * `settings` - the raw settings, nothing has been checked other than what clap does for us.
pub fn check_settings(mut settings: Settings) -> Settings {
    //check for any of our required files
    check_required_filename(&settings.candidates_filename, "Candidate alignment");
    for filename in settings.bam_filenames.iter() {
        check_required_filename(filename, "Alignment file");
    }
    if let Some(filename) = settings.vcf_filename.as_ref() {
        check_required_filename(filename, "Variant file");
    }
    if let Some(filename) = settings.mask_filename.as_ref() {
        check_required_filename(filename, "Mask file");
    }

    // 0 doesn't make sense, so lets just error proof it up to 1
    if settings.threads == 0 {
        settings.threads = 1;
    }
    if settings.max_haplotypes == 0 {
        settings.max_haplotypes = 1;
    }
    if settings.min_haplotype_support == 0 {
        settings.min_haplotype_support = 1;
    }

    check_fraction(settings.indel_discount, "--indel-discount");
    check_fraction(settings.min_edge_confidence, "--min-edge-confidence");
    check_fraction(settings.min_copy_agreement, "--min-copy-agreement");
    if !(-1.0..=1.0).contains(&settings.merge_threshold) {
        error!("--merge-threshold must be in the range [-1.0, 1.0]");
        std::process::exit(exitcode::USAGE);
    }
    check_fraction(settings.haplotype_threshold, "--haplotype-threshold");

    // dump stuff to the logger
    info!("Frame reference: {}", settings.frame_reference.as_deref().unwrap_or("first candidate"));
    info!("Site selection:");
    info!("\tMinimum mapping quality: {}", settings.min_mapping_quality);
    info!("\tMinimum called variant quality: {}", settings.min_variant_quality);
    info!("\tMinimum discriminating sites: {}", settings.min_sites);
    if settings.mask_filename.is_some() {
        info!("\tMasked sites: {}", if settings.keep_masked_sites { "KEPT" } else { "REMOVED" });
    } else if settings.keep_masked_sites {
        warn!("\t--keep-masked-sites has no effect without --mask");
    }
    if settings.min_sites < 3 {
        warn!("\tSetting the minimum discriminating sites < 3 has not been tested.");
    }

    info!("Evidence:");
    info!("\tMissing base quality: {}", settings.missing_base_quality);
    info!("\tQuality window: +-{}", settings.quality_window);
    info!("\tIndel window: +-{}", settings.indel_window);
    info!("\tIndel discount: {}", settings.indel_discount);

    info!("Clustering:");
    info!("\tMinimum edge confidence: {}", settings.min_edge_confidence);
    info!("\tMerge threshold: {}", settings.merge_threshold);
    info!("\tMinimum copy agreement: {}", settings.min_copy_agreement);

    info!("Haplotypes:");
    info!("\tHaplotype threshold: {}", settings.haplotype_threshold);
    info!("\tMinimum haplotype support: {}", settings.min_haplotype_support);
    info!("\tMaximum haplotypes: {}", settings.max_haplotypes);

    info!("Processing threads: {}", settings.threads);

    //send the settings back
    settings
}
