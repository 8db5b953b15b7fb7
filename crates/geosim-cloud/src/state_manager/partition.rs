/// Disjoint, contiguous host-id ranges forming the partitions of one data
/// center. Partition ids are the range indices.
#[derive(Clone, Debug)]
pub struct PartitionRangesManager {
    // inclusive (first, last) host-id ranges, ascending
    ranges: Vec<(u32, u32)>,
}

impl PartitionRangesManager {
    /// Builds the manager from explicit ranges, checking that they cover the
    /// host-id space `0..host_num` without gaps or overlaps.
    pub fn from_ranges(ranges: Vec<(u32, u32)>, host_num: u32) -> Result<Self, String> {
        if ranges.is_empty() {
            return Err("at least one partition range is required".to_owned());
        }
        let mut expected_start = 0;
        for &(first, last) in &ranges {
            if first != expected_start {
                return Err(format!("partition ranges must be contiguous, expected start {expected_start}, got {first}"));
            }
            if last < first {
                return Err(format!("empty partition range ({first}, {last})"));
            }
            expected_start = last + 1;
        }
        if expected_start != host_num {
            return Err(format!("partition ranges cover {expected_start} hosts, data center has {host_num}"));
        }
        Ok(Self { ranges })
    }

    /// Splits `host_num` hosts into `partition_num` nearly equal partitions.
    pub fn average_divided(host_num: u32, partition_num: u32) -> Self {
        let base = host_num / partition_num;
        let extra = host_num % partition_num;
        let mut ranges = Vec::with_capacity(partition_num as usize);
        let mut start = 0;
        for p in 0..partition_num {
            let len = base + u32::from(p < extra);
            ranges.push((start, start + len - 1));
            start += len;
        }
        Self { ranges }
    }

    pub fn partition_of(&self, host_id: u32) -> u32 {
        self.ranges.partition_point(|&(_, last)| last < host_id) as u32
    }

    pub fn range(&self, partition: u32) -> (u32, u32) {
        self.ranges[partition as usize]
    }

    pub fn partition_num(&self) -> u32 {
        self.ranges.len() as u32
    }

    pub fn host_num(&self) -> u32 {
        self.ranges.last().map_or(0, |&(_, last)| last + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ranges_rejects_gaps_and_wrong_coverage() {
        assert!(PartitionRangesManager::from_ranges(vec![(0, 3), (4, 9)], 10).is_ok());
        assert!(PartitionRangesManager::from_ranges(vec![(0, 3), (5, 9)], 10).is_err());
        assert!(PartitionRangesManager::from_ranges(vec![(0, 3), (4, 8)], 10).is_err());
        assert!(PartitionRangesManager::from_ranges(vec![(1, 9)], 10).is_err());
        assert!(PartitionRangesManager::from_ranges(vec![], 0).is_err());
    }

    #[test]
    fn average_divided_spreads_remainder_over_first_partitions() {
        let ranges = PartitionRangesManager::average_divided(10, 3);
        assert_eq!(ranges.range(0), (0, 3));
        assert_eq!(ranges.range(1), (4, 6));
        assert_eq!(ranges.range(2), (7, 9));
        assert_eq!(ranges.partition_num(), 3);
        assert_eq!(ranges.host_num(), 10);
    }

    #[test]
    fn partition_of_maps_host_ids_to_range_indices() {
        let ranges = PartitionRangesManager::average_divided(10, 3);
        assert_eq!(ranges.partition_of(0), 0);
        assert_eq!(ranges.partition_of(3), 0);
        assert_eq!(ranges.partition_of(4), 1);
        assert_eq!(ranges.partition_of(9), 2);
    }
}
