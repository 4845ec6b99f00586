use std::ops::Range;

/// A read alignment projected onto the shared alignment frame.
/// There is exactly one base and one quality per spanned column; deleted columns are stored as `-`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AlignedRead {
    /// the read name
    read_name: String,
    /// the first column covered by the read
    start: usize,
    /// the observed base at each column from `start`, `-` for deletions and `N` when unknown
    bases: Vec<u8>,
    /// the base quality at each column from `start`, deletions inherit a flanking quality
    quals: Vec<u8>,
    /// columns where the read has an insertion or deletion event, sorted
    indel_columns: Vec<usize>
}

impl AlignedRead {
    /// Creates a new aligned read.
    /// # Arguments
    /// * `read_name` - the read name
    /// * `start` - the first column the read covers
    /// * `bases` - one base per covered column
    /// * `quals` - one quality per covered column
    /// * `indel_columns` - columns with an indel event, does not need to be sorted
    /// # Panics
    /// * if `bases.len() != quals.len()`
    pub fn new(read_name: String, start: usize, bases: Vec<u8>, quals: Vec<u8>, mut indel_columns: Vec<usize>) -> AlignedRead {
        assert_eq!(bases.len(), quals.len());
        indel_columns.sort_unstable();
        indel_columns.dedup();
        AlignedRead {
            read_name,
            start,
            bases,
            quals,
            indel_columns
        }
    }

    pub fn read_name(&self) -> &str {
        &self.read_name
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// The column after the last covered column
    pub fn end(&self) -> usize {
        self.start + self.bases.len()
    }

    pub fn aligned_range(&self) -> Range<usize> {
        self.start..self.end()
    }

    /// Returns the base at a column or None if the read does not span it
    pub fn base(&self, column: usize) -> Option<u8> {
        if self.aligned_range().contains(&column) {
            Some(self.bases[column - self.start])
        } else {
            None
        }
    }

    /// Returns the quality at a column or None if the read does not span it
    pub fn qual(&self, column: usize) -> Option<u8> {
        if self.aligned_range().contains(&column) {
            Some(self.quals[column - self.start])
        } else {
            None
        }
    }

    pub fn indel_columns(&self) -> &[usize] {
        &self.indel_columns
    }

    /// Returns true if any indel event falls inside the given column range
    pub fn has_indel_within(&self, columns: Range<usize>) -> bool {
        let first = self.indel_columns.partition_point(|&c| c < columns.start);
        first < self.indel_columns.len() && self.indel_columns[first] < columns.end
    }
}
