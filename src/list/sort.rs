//! List ordering.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::model::{PropId, PropValue};
use crate::resource::Resource;

/// User-supplied ordering of resources.
pub trait ResourceComparer: Send + Sync {
    fn compare(&self, a: &Resource, b: &Resource) -> Ordering;
}

impl<F> ResourceComparer for F
where
    F: Fn(&Resource, &Resource) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &Resource, b: &Resource) -> Ordering {
        self(a, b)
    }
}

/// What a sort key reads from a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Prop(PropId),
    DisplayName,
    Type,
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub field: SortField,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(field: SortField) -> Self {
        Self { field, ascending: true }
    }

    pub fn desc(field: SortField) -> Self {
        Self { field, ascending: false }
    }
}

/// How a list orders its resources.
///
/// Key lists compare field by field and fall back to the resource id, so
/// two distinct resources never compare equal. Missing property values
/// sort first.
#[derive(Clone, Default)]
pub enum SortOrder {
    /// Ascending resource id.
    #[default]
    Id,
    Keys(Vec<SortKey>),
    Custom(Arc<dyn ResourceComparer>),
}

impl std::fmt::Debug for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::Id => f.write_str("Id"),
            SortOrder::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            SortOrder::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl SortOrder {
    pub fn by_prop(prop: PropId, ascending: bool) -> Self {
        SortOrder::Keys(vec![SortKey { field: SortField::Prop(prop), ascending }])
    }

    pub fn custom(comparer: impl ResourceComparer + 'static) -> Self {
        SortOrder::Custom(Arc::new(comparer))
    }

    pub fn is_id(&self) -> bool {
        match self {
            SortOrder::Id => true,
            SortOrder::Keys(keys) => {
                matches!(keys.first(), Some(SortKey { field: SortField::Id, ascending: true }))
            }
            SortOrder::Custom(_) => false,
        }
    }

    /// Larger is more specific. A merge of two lists keeps the more
    /// specific order.
    pub(crate) fn specificity(&self) -> usize {
        match self {
            SortOrder::Id => 0,
            SortOrder::Keys(keys) => keys.len(),
            SortOrder::Custom(_) => usize::MAX,
        }
    }

    /// Properties whose change can move a resource under this order.
    /// None when the order depends on arbitrary state.
    pub(crate) fn key_props(&self) -> Option<Vec<PropId>> {
        match self {
            SortOrder::Id => Some(Vec::new()),
            SortOrder::Keys(keys) => {
                let mut props = Vec::new();
                for key in keys {
                    match key.field {
                        SortField::Prop(p) => props.push(p.base()),
                        SortField::DisplayName => return None,
                        SortField::Type | SortField::Id => {}
                    }
                }
                Some(props)
            }
            SortOrder::Custom(_) => None,
        }
    }

    pub(crate) fn compare(&self, a: &Resource, b: &Resource) -> Ordering {
        match self {
            SortOrder::Id => a.original_id().cmp(&b.original_id()),
            SortOrder::Keys(keys) => keys
                .iter()
                .map(|key| {
                    let ord = compare_field(key.field, a, b);
                    if key.ascending { ord } else { ord.reverse() }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.original_id().cmp(&b.original_id())),
            SortOrder::Custom(comparer) => comparer.compare(a, b),
        }
    }
}

fn prop_of(resource: &Resource, prop: PropId) -> Option<PropValue> {
    resource.get_prop(prop).ok().flatten()
}

fn compare_field(field: SortField, a: &Resource, b: &Resource) -> Ordering {
    match field {
        SortField::Prop(prop) => match (prop_of(a, prop), prop_of(b, prop)) {
            (Some(x), Some(y)) => x.sort_cmp(&y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        SortField::DisplayName => {
            let x = a.display_name().unwrap_or_default();
            let y = b.display_name().unwrap_or_default();
            x.cmp(&y)
        }
        SortField::Type => a.type_id().cmp(&b.type_id()),
        SortField::Id => a.original_id().cmp(&b.original_id()),
    }
}
