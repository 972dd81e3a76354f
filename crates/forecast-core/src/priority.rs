//! Start-order ranking of VPUs for the routing fan-out.

use std::collections::HashMap;

use crate::error::{PipelineError, Result};
use crate::ids::VpuId;

/// Historical routing run times, slowest first. Starting the long poles early
/// keeps the bounded pool busy until the end of the batch.
pub const DEFAULT_PRIORITY: [u32; 125] = [
    605, 714, 109, 302, 609, 122, 402, 303, 304, 502, 214, 406, 105, 111, 804, 106, 409, 503, 404, 706,
    103, 412, 703, 508, 715, 501, 513, 217, 123, 407, 607, 704, 126, 210, 408, 221, 603, 701, 220, 413,
    218, 216, 613, 205, 414, 112, 213, 102, 709, 419, 116, 801, 411, 203, 418, 415, 510, 110, 711, 612,
    606, 209, 707, 608, 611, 119, 113, 211, 422, 201, 301, 120, 505, 117, 121, 708, 610, 506, 101, 401,
    509, 421, 206, 511, 410, 713, 115, 215, 125, 118, 108, 423, 716, 202, 504, 416, 114, 512, 604, 405,
    712, 124, 710, 602, 403, 219, 507, 212, 104, 702, 208, 803, 107, 417, 601, 614, 204, 802, 718, 717,
    420, 305, 207, 705, 514,
];

/// Orders VPUs by a fixed ranking. Unranked VPUs are rejected.
#[derive(Debug, Clone)]
pub struct PriorityOrderer {
    rank: HashMap<VpuId, usize>,
}

impl PriorityOrderer {
    pub fn new<I, V>(priority: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<VpuId>,
    {
        let mut rank = HashMap::new();
        for (i, vpu) in priority.into_iter().enumerate() {
            rank.entry(vpu.into()).or_insert(i);
        }
        Self { rank }
    }

    /// The built-in ranking, or `custom` when settings replace it.
    pub fn from_settings(custom: Option<&[u32]>) -> Self {
        match custom {
            Some(list) => Self::new(list.iter().copied()),
            None => Self::new(DEFAULT_PRIORITY),
        }
    }

    pub fn rank(&self, vpu: &VpuId) -> Option<usize> {
        self.rank.get(vpu).copied()
    }

    /// Sorts `vpus` by rank. Fails on the first VPU that has no rank.
    pub fn order(&self, vpus: &[VpuId]) -> Result<Vec<VpuId>> {
        self.order_by(vpus.to_vec(), |v| v)
    }

    /// Sorts arbitrary items by the rank of the VPU they belong to.
    pub fn order_by<T>(&self, mut items: Vec<T>, vpu_of: impl Fn(&T) -> &VpuId) -> Result<Vec<T>> {
        if let Some(unranked) = items.iter().map(&vpu_of).find(|v| !self.rank.contains_key(*v)) {
            return Err(PipelineError::UnrankedVpu(unranked.to_string()));
        }
        // Every key is present after the check above.
        items.sort_by_key(|item| self.rank.get(vpu_of(item)).copied().unwrap_or(usize::MAX));
        Ok(items)
    }
}

impl Default for PriorityOrderer {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[u32]) -> Vec<VpuId> {
        v.iter().map(|&n| VpuId::from(n)).collect()
    }

    #[test]
    fn slowest_first() {
        let ordered = PriorityOrderer::default().order(&ids(&[109, 605])).unwrap();
        assert_eq!(ordered, ids(&[605, 109]));
    }

    #[test]
    fn unranked_vpu_is_rejected() {
        let err = PriorityOrderer::default().order(&ids(&[605, 999])).unwrap_err();
        assert!(matches!(err, PipelineError::UnrankedVpu(v) if v == "999"));
    }

    #[test]
    fn default_list_has_no_duplicates() {
        let orderer = PriorityOrderer::default();
        assert_eq!(orderer.rank.len(), DEFAULT_PRIORITY.len());
    }

    #[test]
    fn custom_ranking_replaces_default() {
        let orderer = PriorityOrderer::from_settings(Some(&[101, 605]));
        assert_eq!(orderer.order(&ids(&[605, 101])).unwrap(), ids(&[101, 605]));
        assert!(orderer.order(&ids(&[714])).is_err());
    }

    #[test]
    fn order_by_keeps_payload() {
        let items = vec![(VpuId::from(109), "a"), (VpuId::from(605), "b"), (VpuId::from(109), "c")];
        let ordered = PriorityOrderer::default().order_by(items, |(v, _)| v).unwrap();
        let labels: Vec<&str> = ordered.iter().map(|(_, l)| *l).collect();
        assert_eq!(labels, ["b", "a", "c"]);
    }
}
