//! Rewrites applied once before a list is instantiated.
//!
//! - nested composites of the same kind are flattened
//! - structurally equal members are dropped
//! - absorption: `a ∧ (a ∨ b)` → `a`, `a ∨ (a ∧ b)` → `a`
//! - a type member of an intersection is dropped when a sibling already
//!   implies that type
//! - a composite with one member becomes that member
//!
//! A rewrite never changes the match set. When nothing applies the
//! original node is returned, so callers can use [`Predicate::is_same`] to
//! tell whether anything changed.

use super::{Node, Predicate};

impl Predicate {
    pub fn optimize(&self) -> Predicate {
        match self.node() {
            Node::Intersection(c) => optimize_composite(self, &c.members, true),
            Node::Union(c) => optimize_composite(self, &c.members, false),
            Node::Minus { include, exclude } => {
                let (i, e) = (include.optimize(), exclude.optimize());
                if i.is_same(include) && e.is_same(exclude) {
                    self.clone()
                } else {
                    Predicate::minus(i, e)
                }
            }
            _ => self.clone(),
        }
    }

    fn composite_members(&self, intersection: bool) -> Option<&[Predicate]> {
        match (self.node(), intersection) {
            (Node::Intersection(c), true) | (Node::Union(c), false) => Some(&c.members),
            _ => None,
        }
    }
}

fn optimize_composite(original: &Predicate, members: &[Predicate], intersection: bool) -> Predicate {
    let mut changed = false;

    let mut flat: Vec<Predicate> = Vec::with_capacity(members.len());
    for member in members {
        let optimized = member.optimize();
        changed |= !optimized.is_same(member);
        match optimized.composite_members(intersection) {
            Some(inner) => {
                changed = true;
                flat.extend(inner.iter().cloned());
            }
            None => flat.push(optimized),
        }
    }

    let mut unique: Vec<Predicate> = Vec::with_capacity(flat.len());
    for member in flat {
        if unique.contains(&member) {
            changed = true;
        } else {
            unique.push(member);
        }
    }

    // Absorption: a member of the dual kind that contains a sibling is
    // implied by (intersection) or implies (union) that sibling.
    let absorbed: Vec<bool> = unique
        .iter()
        .enumerate()
        .map(|(i, member)| {
            member.composite_members(!intersection).is_some_and(|dual| {
                unique
                    .iter()
                    .enumerate()
                    .any(|(j, sibling)| i != j && dual.contains(sibling))
            })
        })
        .collect();
    if absorbed.iter().any(|&a| a) {
        changed = true;
        unique = unique
            .into_iter()
            .zip(absorbed)
            .filter_map(|(m, a)| (!a).then_some(m))
            .collect();
    }

    if intersection {
        let implied: Vec<_> = unique
            .iter()
            .filter(|m| !matches!(m.node(), Node::Type(_)))
            .filter_map(Predicate::known_type)
            .collect();
        let before = unique.len();
        unique.retain(|m| !matches!(m.node(), Node::Type(t) if implied.contains(t)));
        changed |= unique.len() != before;
    }

    if unique.len() == 1 {
        return unique.pop().unwrap_or_else(|| original.clone());
    }
    if !changed {
        return original.clone();
    }
    if intersection {
        Predicate::intersection(unique)
    } else {
        Predicate::union(unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PropId, ResourceTypeId};
    use pretty_assertions::assert_eq;

    fn p(n: i32) -> Predicate {
        Predicate::has_prop(PropId(n))
    }

    #[test]
    fn test_flatten_nested_intersections() {
        let nested = p(1).and(&p(2).and(&p(3)));
        assert_eq!(nested.optimize(), Predicate::intersection(vec![p(1), p(2), p(3)]));
    }

    #[test]
    fn test_union_inside_intersection_not_flattened() {
        let mixed = p(1).and(&p(2).or(&p(3)));
        assert!(mixed.optimize().is_same(&mixed));
    }

    #[test]
    fn test_duplicates_removed() {
        let dup = Predicate::union(vec![p(1), p(2), p(1)]);
        assert_eq!(dup.optimize(), p(1).or(&p(2)));
    }

    #[test]
    fn test_absorption() {
        assert_eq!(p(1).and(&p(1).or(&p(2))).optimize(), p(1));
        assert_eq!(p(1).or(&p(1).and(&p(2))).optimize(), p(1));
    }

    #[test]
    fn test_redundant_type_dropped() {
        let t = Predicate::of_type(ResourceTypeId(3));
        let typed = t.and(&p(1));
        let q = Predicate::intersection(vec![t.clone(), typed.clone().except(&p(2))]);
        assert_eq!(q.optimize(), typed.except(&p(2)).optimize());
    }

    #[test]
    fn test_single_member_collapses() {
        assert_eq!(Predicate::union(vec![p(7)]).optimize(), p(7));
    }

    #[test]
    fn test_minus_optimizes_both_sides() {
        let q = p(1).and(&p(1)).except(&p(2).or(&p(2)));
        assert_eq!(q.optimize(), p(1).except(&p(2)));
    }

    #[test]
    fn test_untouched_returns_same_node() {
        let q = p(1).and(&p(2));
        assert!(q.optimize().is_same(&q));
        let leaf = p(4);
        assert!(leaf.optimize().is_same(&leaf));
    }
}
