//! Property type and resource type definitions.

use serde::{Deserialize, Serialize};
use super::{PropDataType, PropId, ResourceTypeId};

/// A registered property type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropType {
    pub id: PropId,
    pub name: String,
    pub data_type: PropDataType,
    /// Only meaningful for links: directed types keep a reverse slot.
    pub directed: bool,
}

impl PropType {
    pub fn is_link(&self) -> bool {
        self.data_type == PropDataType::Link
    }

    /// The slot the target of a link from a holder's `slot` stores the mirror in.
    pub fn mirror_slot(&self, slot: PropId) -> PropId {
        if self.directed { slot.reverse() } else { slot.base() }
    }
}

/// A registered resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: ResourceTypeId,
    pub name: String,
    /// Properties joined (space separated, empty ones skipped) to form the display name.
    pub display_name_template: Vec<PropId>,
}

impl ResourceType {
    pub fn affects_display_name(&self, prop: PropId) -> bool {
        self.display_name_template.contains(&prop.base())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_slot() {
        let directed = PropType { id: PropId(2), name: "Parent".into(), data_type: PropDataType::Link, directed: true };
        assert_eq!(directed.mirror_slot(PropId(2)), PropId(-2));
        assert_eq!(directed.mirror_slot(PropId(-2)), PropId(2));

        let plain = PropType { directed: false, ..directed };
        assert_eq!(plain.mirror_slot(PropId(2)), PropId(2));
    }
}
