//! Operations on ascending, duplicate-free id vectors, and the shared id
//! array backing a list.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::model::ResourceId;
use crate::sync::lock_pair;

/// Sort and deduplicate scan output unless the backend already promises order.
pub(crate) fn from_scan(mut ids: Vec<ResourceId>, id_ordered: bool) -> Vec<ResourceId> {
    if !id_ordered {
        ids.sort_unstable();
    }
    ids.dedup();
    ids
}

pub(crate) fn normalize(ids: &mut Vec<ResourceId>) {
    ids.sort_unstable();
    ids.dedup();
}

pub(crate) fn intersect(a: &[ResourceId], b: &[ResourceId]) -> Vec<ResourceId> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

pub(crate) fn union(a: &[ResourceId], b: &[ResourceId]) -> Vec<ResourceId> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len() + b.len());
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// `a` without the ids in `b`.
pub(crate) fn subtract(a: &[ResourceId], b: &[ResourceId]) -> Vec<ResourceId> {
    let mut j = 0;
    let mut out = Vec::with_capacity(a.len());
    for &id in a {
        while j < b.len() && b[j] < id {
            j += 1;
        }
        if j < b.len() && b[j] == id {
            continue;
        }
        out.push(id);
    }
    out
}

// ============================================================================
// IdArray
// ============================================================================

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Ids held by a list, in list order.
#[derive(Debug, Default)]
pub(crate) struct IdState {
    pub(crate) ids: Vec<ResourceId>,
    /// True when `ids` is in ascending id order.
    pub(crate) sorted_by_id: bool,
}

impl IdState {
    pub(crate) fn position(&self, id: ResourceId) -> Option<usize> {
        if self.sorted_by_id {
            self.ids.binary_search(&id).ok()
        } else {
            self.ids.iter().position(|x| *x == id)
        }
    }

    pub(crate) fn sorted_ids(&self) -> Vec<ResourceId> {
        let mut ids = self.ids.clone();
        if !self.sorted_by_id {
            normalize(&mut ids);
        }
        ids
    }
}

/// Lockable id array. Two arrays are always locked together through
/// [`lock_pair`], keyed by their allocation sequence number.
#[derive(Debug)]
pub(crate) struct IdArray {
    seq: u64,
    pub(crate) state: Mutex<IdState>,
}

impl IdArray {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(IdState { ids: Vec::new(), sorted_by_id: true }),
        })
    }

    pub(crate) fn contains(&self, id: ResourceId) -> bool {
        self.state.lock().position(id).is_some()
    }

    pub(crate) fn sorted_ids(&self) -> Vec<ResourceId> {
        self.state.lock().sorted_ids()
    }

    /// Intersection of two arrays read under one consistent dual lock.
    pub(crate) fn intersect_pair(a: &IdArray, b: &IdArray) -> Vec<ResourceId> {
        let pair = lock_pair(&a.state, a.seq, &b.state, b.seq);
        intersect(&pair.first().sorted_ids(), &pair.second().sorted_ids())
    }
}
