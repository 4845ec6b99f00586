
/// Contains the writer for per-read assignments
pub mod assignment_writer;
/// Contains the writer for cluster level statistics
pub mod cluster_stats;
/// Contains the writer for the read by site allele matrix
pub mod matrix_writer;
