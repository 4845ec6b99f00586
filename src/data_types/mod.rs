
/// Contains the AlignedRead type, a read projected onto the shared alignment frame
pub mod aligned_read;
/// Contains the gene copy candidate type and the multiple alignment loader
pub mod gene_copy;
/// Repeat / low-complexity masks in alignment coordinates
pub mod masked_regions;
/// Contains the sparse per-read evidence type
pub mod read_evidence;
