use bit_vec::BitVec;

/// A single allele observation from a read at a discriminating site
#[derive(Clone, Debug, PartialEq)]
pub struct SiteObservation {
    /// index into the discriminating site list
    pub site_index: usize,
    /// the observed allele, one of `ACGT-`
    pub allele: u8,
    /// confidence in the observation, in (0, 1]
    pub confidence: f64
}

/// Container for a read that has been converted into its discriminating-site representation.
/// Observations are sparse; sites the read does not cover are simply absent.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadEvidence {
    /// the read name
    read_name: String,
    /// observations sorted by site index, at most one per site
    observations: Vec<SiteObservation>
}

impl ReadEvidence {
    /// Creates new read evidence from a collection of observations.
    /// # Arguments
    /// * `read_name` - the read name
    /// * `observations` - the observations, any order
    /// # Panics
    /// * if two observations share a site index
    pub fn new(read_name: String, mut observations: Vec<SiteObservation>) -> ReadEvidence {
        observations.sort_by_key(|o| o.site_index);
        assert!(
            observations.windows(2).all(|w| w[0].site_index < w[1].site_index),
            "duplicate site observation for {read_name}"
        );
        ReadEvidence {
            read_name,
            observations
        }
    }

    /// Given a collection of evidence for the same read (e.g. primary + supplementary alignments), this will collapse them into one.
    /// Matching alleles keep the highest confidence, conflicting alleles are dropped from the result.
    /// # Arguments
    /// * `read_evidence` - the evidence to collapse together
    /// # Panics
    /// * if `read_evidence` is empty
    /// * if the read names differ
    pub fn collapse(read_evidence: &[ReadEvidence]) -> ReadEvidence {
        assert!(!read_evidence.is_empty());
        if read_evidence.len() == 1 {
            return read_evidence[0].clone();
        }

        let read_name: String = read_evidence[0].read_name().to_string();
        let mut all_observations: Vec<&SiteObservation> = vec![];
        for re in read_evidence.iter() {
            assert_eq!(read_name, re.read_name());
            all_observations.extend(re.observations.iter());
        }
        all_observations.sort_by_key(|o| o.site_index);

        let mut observations: Vec<SiteObservation> = vec![];
        let mut conflicted: bool = false;
        for obs in all_observations.into_iter() {
            match observations.last_mut() {
                Some(previous) if previous.site_index == obs.site_index => {
                    if conflicted {
                        // already marked for removal
                    } else if previous.allele == obs.allele {
                        previous.confidence = previous.confidence.max(obs.confidence);
                    } else {
                        conflicted = true;
                    }
                },
                _ => {
                    if conflicted {
                        // the last pushed one had conflicting alleles, throw it out
                        observations.pop();
                        conflicted = false;
                    }
                    observations.push(obs.clone());
                }
            }
        }
        if conflicted {
            observations.pop();
        }

        Self::new(read_name, observations)
    }

    pub fn read_name(&self) -> &str {
        &self.read_name
    }

    pub fn observations(&self) -> &[SiteObservation] {
        &self.observations
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    /// Returns the observation for a site if the read covers it
    pub fn observation(&self, site_index: usize) -> Option<&SiteObservation> {
        self.observations.binary_search_by_key(&site_index, |o| o.site_index)
            .ok()
            .map(|i| &self.observations[i])
    }

    /// Iterates over the observations whose site is set in the filter
    /// # Arguments
    /// * `site_filter` - one bit per site, set bits are kept
    pub fn filtered<'a>(&'a self, site_filter: &'a BitVec) -> impl Iterator<Item = &'a SiteObservation> + 'a {
        self.observations.iter()
            .filter(move |o| site_filter.get(o.site_index).unwrap_or(false))
    }

    /// Returns the number of observations whose site is set in the filter
    pub fn count_filtered(&self, site_filter: &BitVec) -> usize {
        self.filtered(site_filter).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(site_index: usize, allele: u8, confidence: f64) -> SiteObservation {
        SiteObservation { site_index, allele, confidence }
    }

    #[test]
    fn test_constructor() {
        let re = ReadEvidence::new(
            "read_name".to_string(),
            vec![obs(4, b'A', 0.9), obs(1, b'C', 0.5), obs(2, b'-', 0.7)]
        );
        let sites: Vec<usize> = re.observations().iter().map(|o| o.site_index).collect();
        assert_eq!(sites, vec![1, 2, 4]);
        assert_eq!(re.num_observations(), 3);
        assert_eq!(re.observation(2), Some(&obs(2, b'-', 0.7)));
        assert_eq!(re.observation(3), None);
        assert!(!re.is_empty());
        assert!(ReadEvidence::new("empty".to_string(), vec![]).is_empty());
    }

    #[test]
    #[should_panic]
    fn test_duplicate_sites() {
        ReadEvidence::new("read_name".to_string(), vec![obs(1, b'A', 0.9), obs(1, b'C', 0.5)]);
    }

    #[test]
    fn test_filtered() {
        let re = ReadEvidence::new(
            "read_name".to_string(),
            vec![obs(0, b'A', 0.9), obs(1, b'C', 0.5), obs(3, b'G', 0.7)]
        );
        let mut filter = BitVec::from_elem(4, false);
        filter.set(1, true);
        filter.set(3, true);
        let kept: Vec<usize> = re.filtered(&filter).map(|o| o.site_index).collect();
        assert_eq!(kept, vec![1, 3]);
        assert_eq!(re.count_filtered(&filter), 2);

        // out of range filters just drop things
        let short_filter = BitVec::from_elem(1, true);
        assert_eq!(re.count_filtered(&short_filter), 1);
    }

    #[test]
    fn test_collapse() {
        let re1 = ReadEvidence::new(
            "read_name".to_string(),
            vec![obs(0, b'A', 0.5), obs(1, b'C', 0.5), obs(2, b'G', 0.9)]
        );
        let re2 = ReadEvidence::new(
            "read_name".to_string(),
            vec![obs(1, b'C', 0.8), obs(2, b'T', 0.9), obs(5, b'-', 0.4)]
        );
        let expected = ReadEvidence::new(
            "read_name".to_string(),
            vec![obs(0, b'A', 0.5), obs(1, b'C', 0.8), obs(5, b'-', 0.4)]
        );
        assert_eq!(ReadEvidence::collapse(&[re1.clone(), re2.clone()]), expected);

        // a conflict at the very last site is also removed
        let re3 = ReadEvidence::new("read_name".to_string(), vec![obs(5, b'A', 0.4)]);
        let collapsed = ReadEvidence::collapse(&[re2, re3]);
        let sites: Vec<usize> = collapsed.observations().iter().map(|o| o.site_index).collect();
        assert_eq!(sites, vec![1, 2]);

        // single entries pass through
        assert_eq!(ReadEvidence::collapse(&[re1.clone()]), re1);
    }
}
