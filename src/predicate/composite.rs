//! Intersection and union.
//!
//! An intersection splits its members by selection cost. The cheapest
//! members are *selective*: they are selected and intersected pairwise.
//! The rest are *filtering*: each remaining candidate is tested against
//! them one by one. If the candidate set is still large after the
//! selective pass, the cheapest filtering member is selected as well and
//! folded in before per-candidate testing starts.
//!
//! When every member costs the same, the first member is the only
//! selective one.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::model::ResourceId;
use crate::store::ResourceStore;
use crate::Result;

use super::sorted::{self, IdArray};
use super::{Node, Predicate};

/// Members of an intersection or union.
#[derive(Debug)]
pub(crate) struct Composite {
    pub(crate) members: Vec<Predicate>,
    plan: Mutex<Option<Arc<Plan>>>,
}

/// Member indices by role, filtering members ordered cheapest first.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Plan {
    pub(crate) selective: Vec<usize>,
    pub(crate) filtering: Vec<usize>,
}

impl Plan {
    fn build(members: &[Predicate]) -> Plan {
        let costs: Vec<u32> = members.iter().map(Predicate::selection_cost).collect();
        let Some(&min) = costs.iter().min() else {
            return Plan { selective: Vec::new(), filtering: Vec::new() };
        };
        let (mut selective, mut filtering): (Vec<usize>, Vec<usize>) =
            (0..members.len()).partition(|&i| costs[i] == min);
        if filtering.is_empty() {
            filtering = selective.split_off(1);
        }
        filtering.sort_by_key(|&i| costs[i]);
        Plan { selective, filtering }
    }
}

impl Composite {
    pub(crate) fn new(members: Vec<Predicate>) -> Self {
        Self { members, plan: Mutex::new(None) }
    }

    /// The evaluation plan, computed on first use.
    pub(crate) fn plan(&self) -> Arc<Plan> {
        let mut plan = self.plan.lock();
        if let Some(plan) = plan.as_ref() {
            return plan.clone();
        }
        let built = Arc::new(Plan::build(&self.members));
        debug!(
            selective = ?built.selective,
            filtering = ?built.filtering,
            "intersection plan"
        );
        *plan = Some(built.clone());
        built
    }

    pub(crate) fn select_intersection(&self, store: &ResourceStore) -> Result<Vec<ResourceId>> {
        let plan = self.plan();
        if plan.selective.is_empty() {
            return Ok(Vec::new());
        }
        let selective: Vec<&Predicate> = plan.selective.iter().map(|&i| &self.members[i]).collect();
        let mut candidates = intersect_selective(store, &selective)?;

        let mut filters: &[usize] = &plan.filtering;
        let threshold = store.inner.config.intersection_fold_threshold;
        if candidates.len() > threshold {
            if let Some((&cheapest, rest)) = filters.split_first() {
                debug!(
                    candidates = candidates.len(),
                    member = cheapest,
                    "folding filtering predicate into intersection"
                );
                let folded = self.members[cheapest].select(store)?;
                candidates = sorted::intersect(&candidates, &folded);
                filters = rest;
            }
        }
        if filters.is_empty() || candidates.is_empty() {
            return Ok(candidates);
        }

        let mut out = Vec::with_capacity(candidates.len());
        'candidates: for id in candidates {
            let resource = match store.inner.resource(id)? {
                Some(r) if !r.is_deleted() => r,
                _ => {
                    warn!(resource = id.0, "resource vanished during intersection; skipped");
                    continue;
                }
            };
            for &i in filters {
                if !self.members[i].test(store, &resource)? {
                    continue 'candidates;
                }
            }
            out.push(id);
        }
        Ok(out)
    }

    pub(crate) fn select_union(&self, store: &ResourceStore) -> Result<Vec<ResourceId>> {
        let mut acc: Vec<ResourceId> = Vec::new();
        for member in &self.members {
            let ids = member.select(store)?;
            acc = if acc.is_empty() { ids } else { sorted::union(&acc, &ids) };
        }
        Ok(acc)
    }
}

fn cached_ids(predicate: &Predicate) -> Option<&Arc<IdArray>> {
    match predicate.node() {
        Node::CachedList(ids) => Some(ids),
        _ => None,
    }
}

/// Intersect the selective members two at a time. Two list-backed members
/// are read together under a dual lock so they are observed consistently.
fn intersect_selective(store: &ResourceStore, members: &[&Predicate]) -> Result<Vec<ResourceId>> {
    let mut acc: Option<Vec<ResourceId>> = None;
    for pair in members.chunks(2) {
        let part = match pair {
            [a, b] => match (cached_ids(a), cached_ids(b)) {
                (Some(x), Some(y)) => IdArray::intersect_pair(x, y),
                _ => {
                    let left = a.select(store)?;
                    if left.is_empty() {
                        return Ok(left);
                    }
                    sorted::intersect(&left, &b.select(store)?)
                }
            },
            _ => pair[0].select(store)?,
        };
        let next = match acc {
            Some(prev) => sorted::intersect(&prev, &part),
            None => part,
        };
        if next.is_empty() {
            return Ok(next);
        }
        acc = Some(next);
    }
    Ok(acc.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PropId, ResourceTypeId};

    #[test]
    fn test_plan_splits_by_cost() {
        let members = vec![
            Predicate::of_type(ResourceTypeId(1)),
            Predicate::prop_value(PropId(1), 1),
            Predicate::has_prop(PropId(2)),
            Predicate::prop_value(PropId(3), 1),
        ];
        let plan = Plan::build(&members);
        assert_eq!(plan.selective, vec![1, 3]);
        assert_eq!(plan.filtering, vec![2, 0]);
    }

    #[test]
    fn test_plan_tie_makes_first_selective() {
        let members = vec![
            Predicate::has_prop(PropId(1)),
            Predicate::has_prop(PropId(2)),
            Predicate::has_prop(PropId(3)),
        ];
        let plan = Plan::build(&members);
        assert_eq!(plan.selective, vec![0]);
        assert_eq!(plan.filtering, vec![1, 2]);
    }

    #[test]
    fn test_plan_cached() {
        let composite = Composite::new(vec![Predicate::has_prop(PropId(1))]);
        assert!(Arc::ptr_eq(&composite.plan(), &composite.plan()));
    }
}
