use bio::data_structures::interval_tree::IntervalTree;
use bit_vec::BitVec;
use log::info;
use simple_error::bail;
use std::ops::Range;
use std::path::Path;

/// Repeat or low-complexity annotations in alignment column coordinates.
/// Any discriminating column inside one of these intervals is not trusted.
#[derive(Default)]
pub struct MaskedRegions {
    /// Interval tree of masked columns, the data is the region label
    intervals: IntervalTree<usize, String>,
    /// The number of intervals loaded
    num_regions: usize
}

impl MaskedRegions {
    /// Creates a mask from pre-built intervals.
    /// # Arguments
    /// * `regions` - tuples of (label, column range)
    /// # Panics
    /// * if any range is empty
    pub fn from_intervals(regions: Vec<(String, Range<usize>)>) -> MaskedRegions {
        let mut intervals: IntervalTree<usize, String> = IntervalTree::new();
        let num_regions = regions.len();
        for (label, range) in regions.into_iter() {
            assert!(range.start < range.end, "empty masked range for {label}");
            intervals.insert(range, label);
        }
        MaskedRegions {
            intervals,
            num_regions
        }
    }

    /// Loads a BED-style file with columns `name start end` (0-based, half-open, alignment columns).
    /// Lines starting with `#` are skipped and extra columns are ignored.
    /// # Arguments
    /// * `bed_fn` - the tab-delimited mask file
    /// # Errors
    /// * if the file cannot be read
    /// * if a row has fewer than three columns or unparseable/empty coordinates
    pub fn from_bed(bed_fn: &Path) -> Result<MaskedRegions, Box<dyn std::error::Error>> {
        info!("Loading {:?}...", bed_fn);
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .from_path(bed_fn)?;

        let mut regions: Vec<(String, Range<usize>)> = vec![];
        for row in csv_reader.records() {
            let row: csv::StringRecord = row?;
            if row.len() < 3 {
                bail!("Mask row has {} columns, expected at least 3: {:?}", row.len(), row);
            }
            let start: usize = row[1].trim().parse()?;
            let end: usize = row[2].trim().parse()?;
            if start >= end {
                bail!("Mask row has an empty interval: {:?}", row);
            }
            regions.push((row[0].to_string(), start..end));
        }
        info!("Finished loading {} masked regions.", regions.len());
        Ok(Self::from_intervals(regions))
    }

    pub fn len(&self) -> usize {
        self.num_regions
    }

    pub fn is_empty(&self) -> bool {
        self.num_regions == 0
    }

    /// Returns true if the column falls in any masked interval
    pub fn is_masked(&self, column: usize) -> bool {
        self.intervals.find(column..(column+1)).next().is_some()
    }

    /// Flattens the mask into one bit per column, set bits are masked
    /// # Arguments
    /// * `num_columns` - the total number of columns in the alignment frame
    pub fn column_mask(&self, num_columns: usize) -> BitVec {
        let mut mask = BitVec::from_elem(num_columns, false);
        for entry in self.intervals.find(0..num_columns.max(1)) {
            let interval = entry.interval();
            for column in interval.start..interval.end.min(num_columns) {
                mask.set(column, true);
            }
        }
        mask
    }
}
