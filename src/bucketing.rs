//! Mapping of units to buckets and of buckets to fixed allocations.
use crate::{
    bundle::{Allocation, BucketRange},
    hash::hash,
};

/// Compute the bucket of `unit_key_value` within `layer_id`.
///
/// The result is always in `[0, bucket_count)`. Buckets of different layers are independent.
/// `bucket_count` of zero is treated as one, so the function never panics on a malformed bundle.
pub fn compute_bucket(unit_key_value: &str, layer_id: &str, bucket_count: u32) -> u32 {
    hash(&format!("{unit_key_value}:{layer_id}")) % bucket_count.max(1)
}

/// Find the allocation whose inclusive bucket range contains `bucket`.
///
/// Allocations without a range never match. Ranges need not cover the whole bucket space; a
/// bucket in a gap gets no allocation.
pub fn find_matching_allocation(bucket: u32, allocations: &[Allocation]) -> Option<&Allocation> {
    allocations.iter().find(|allocation| {
        allocation
            .bucket_range
            .as_ref()
            .is_some_and(|range| range.contains(bucket))
    })
}

impl BucketRange {
    /// Return `true` if `bucket` lies within `[start, end]`.
    pub fn contains(&self, bucket: u32) -> bool {
        self.start <= bucket && bucket <= self.end
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{bundle::Allocation, hash::hash};

    use super::{compute_bucket, find_matching_allocation};

    fn allocations() -> Vec<Allocation> {
        serde_json::from_value(json!([
            {"id": "a1", "name": "control", "bucketRange": {"start": 0, "end": 499}, "parameters": {}},
            {"id": "a2", "name": "treatment", "bucketRange": {"start": 500, "end": 899}, "parameters": {}}
        ]))
        .unwrap()
    }

    #[test]
    fn known_buckets() {
        assert_eq!(compute_bucket("user-abc", "layer_ui", 1000), 551);
        assert_eq!(compute_bucket("user-abc", "layer_pricing", 1000), 913);
        assert_eq!(compute_bucket("user-xyz", "layer_ui", 1000), 214);
        assert_eq!(compute_bucket("user-xyz", "layer_pricing", 1000), 42);
        assert_eq!(compute_bucket("user-123", "layer_ui", 1000), 871);
        assert_eq!(compute_bucket("user-123", "layer_pricing", 1000), 177);
    }

    #[test]
    fn bucket_is_always_in_range() {
        for i in 0..500 {
            let unit = format!("unit-{i}");
            assert!(compute_bucket(&unit, "layer", 100) < 100);
            assert!(compute_bucket(&unit, "layer", 7) < 7);
        }
    }

    #[test]
    fn layers_use_distinct_preimages() {
        assert_ne!(hash("user-abc:layer_1"), hash("user-abc:layer_2"));
    }

    #[test]
    fn zero_bucket_count_does_not_panic() {
        assert_eq!(compute_bucket("user-abc", "layer_ui", 0), 0);
    }

    #[test]
    fn finds_allocation_by_inclusive_range() {
        let allocations = allocations();
        assert_eq!(find_matching_allocation(0, &allocations).unwrap().id, "a1");
        assert_eq!(find_matching_allocation(499, &allocations).unwrap().id, "a1");
        assert_eq!(find_matching_allocation(500, &allocations).unwrap().id, "a2");
        assert_eq!(find_matching_allocation(899, &allocations).unwrap().id, "a2");
    }

    #[test]
    fn bucket_in_gap_has_no_allocation() {
        assert!(find_matching_allocation(900, &allocations()).is_none());
        assert!(find_matching_allocation(0, &[]).is_none());
    }
}
