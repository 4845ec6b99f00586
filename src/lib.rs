
/// CLI functionality and checks
pub mod cli;
/// Groups reads into gene copies and then haplotypes with average-linkage agglomeration
pub mod clustering;
/// Contains multiple wrappers for useful data types in SGPhasing
pub mod data_types;
/// Converts aligned reads into allele observations at discriminating sites
pub mod evidence;
/// Organizes the primary workflow for a region: site selection, evidence, clustering, and reporting
pub mod phaser;
/// Components for loading reads from a BAM file and called sites from a VCF file into the alignment frame
pub mod read_parsing;
/// Final read partition and the integrity checks around it
pub mod report;
/// Pairwise read similarity over a subset of sites
pub mod similarity;
/// Discriminating sites between gene copies and within them
pub mod site_index;
/// Contains all the various output writer functionality
pub mod writers;
