//! Set difference.

use tracing::warn;

use crate::model::ResourceId;
use crate::store::ResourceStore;
use crate::Result;

use super::{cost, sorted, Predicate};

/// Select `include`, then drop what `exclude` matches. An expensive
/// `exclude` is tested per candidate; a cheap one is selected and
/// subtracted.
pub(super) fn select(
    store: &ResourceStore,
    include: &Predicate,
    exclude: &Predicate,
) -> Result<Vec<ResourceId>> {
    let left = include.select(store)?;
    if left.is_empty() {
        return Ok(left);
    }
    if exclude.selection_cost() < cost::SCAN_AND_TEST {
        return Ok(sorted::subtract(&left, &exclude.select(store)?));
    }

    let mut out = Vec::with_capacity(left.len());
    for id in left {
        let resource = match store.inner.resource(id)? {
            Some(r) if !r.is_deleted() => r,
            _ => {
                warn!(resource = id.0, "resource vanished during subtraction; skipped");
                continue;
            }
        };
        if !exclude.test(store, &resource)? {
            out.push(id);
        }
    }
    Ok(out)
}
