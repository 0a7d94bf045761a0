use super::WireElementNode;

/// Explicit parent/child structure over a flattened element list, built once.
#[derive(Debug, Clone)]
pub struct ProfileIndex<'a> {
    nodes: &'a [WireElementNode],
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    mapped_below: Vec<bool>,
}

impl<'a> ProfileIndex<'a> {
    pub fn build(nodes: &'a [WireElementNode]) -> Self {
        let mut parents = vec![None; nodes.len()];
        let mut children = vec![Vec::new(); nodes.len()];
        let mut stack: Vec<usize> = Vec::new();

        for (index, node) in nodes.iter().enumerate() {
            while let Some(&top) = stack.last() {
                if nodes[top].is_ancestor_of(node) {
                    break;
                }
                stack.pop();
            }

            if let Some(&parent) = stack.last() {
                parents[index] = Some(parent);
                children[parent].push(index);
            }
            stack.push(index);
        }

        let mut mapped_below = vec![false; nodes.len()];
        for index in (0..nodes.len()).rev() {
            if !nodes[index].mappings.is_empty() || mapped_below[index] {
                if let Some(parent) = parents[index] {
                    mapped_below[parent] = true;
                }
            }
        }

        Self {
            nodes,
            parents,
            children,
            mapped_below,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &'a WireElementNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &'a [WireElementNode] {
        self.nodes
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.parents[index]
    }

    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    /// Nodes without a parent, in document order. Normally just the resource root.
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&index| self.parents[index].is_none())
    }

    /// Ancestors from the nearest outward.
    pub fn ancestors(&self, index: usize) -> Ancestors<'_, 'a> {
        Ancestors {
            index: self,
            current: self.parents[index],
        }
    }

    /// Whether some strict descendant carries a mapping.
    pub fn has_mapped_descendants(&self, index: usize) -> bool {
        self.mapped_below[index]
    }

    /// Strict descendants in document order.
    pub fn descendants(&self, index: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut pending: Vec<usize> = self.children[index].iter().rev().copied().collect();
        while let Some(next) = pending.pop() {
            out.push(next);
            pending.extend(self.children[next].iter().rev().copied());
        }
        out
    }

    /// Prohibited itself or below a prohibited ancestor.
    pub fn is_excluded(&self, index: usize) -> bool {
        self.nodes[index].is_prohibited()
            || self
                .ancestors(index)
                .any(|ancestor| self.nodes[ancestor].is_prohibited())
    }

    /// A slice entry shares its path with the sliced element it belongs to.
    pub fn is_slice_entry(&self, index: usize) -> bool {
        self.parents[index]
            .is_some_and(|parent| self.nodes[parent].path == self.nodes[index].path)
    }

    /// Nearest non-root ancestor whose own maximum is unbounded. First found walking outward wins.
    pub fn nearest_unbounded_ancestor(&self, index: usize) -> Option<usize> {
        self.ancestors(index)
            .filter(|&ancestor| self.parents[ancestor].is_some())
            .find(|&ancestor| self.nodes[ancestor].card.is_unbounded())
    }
}

pub struct Ancestors<'i, 'a> {
    index: &'i ProfileIndex<'a>,
    current: Option<usize>,
}

impl Iterator for Ancestors<'_, '_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.current?;
        self.current = self.index.parents[current];
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::MappingAnnotation;
    use crate::types::Cardinality;

    fn nodes() -> Vec<WireElementNode> {
        vec![
            WireElementNode::new("Observation", Cardinality::unbounded()),
            WireElementNode::new("Observation.component", Cardinality::unbounded())
                .with_slicing(vec!["code".to_string()]),
            WireElementNode::new("Observation.component", Cardinality::optional())
                .with_slice_name("systolic"),
            WireElementNode::new("Observation.component.code", Cardinality::required()),
            WireElementNode::new("Observation.component.value", Cardinality::optional())
                .with_mapping(MappingAnnotation::Value),
            WireElementNode::new("Observation.component", Cardinality::optional())
                .with_slice_name("diastolic"),
            WireElementNode::new("Observation.component.code", Cardinality::required()),
            WireElementNode::new("Observation.note", Cardinality::prohibited()),
            WireElementNode::new("Observation.note.text", Cardinality::optional()),
        ]
    }

    #[test]
    fn test_parent_links() {
        let nodes = nodes();
        let index = ProfileIndex::build(&nodes);

        assert_eq!(index.parent(0), None);
        assert_eq!(index.parent(1), Some(0));
        assert_eq!(index.parent(2), Some(1));
        assert_eq!(index.parent(3), Some(2));
        assert_eq!(index.parent(5), Some(1));
        assert_eq!(index.parent(6), Some(5));
        assert_eq!(index.parent(7), Some(0));
        assert_eq!(index.roots().collect::<Vec<_>>(), vec![0]);
        assert!(index.is_slice_entry(2));
        assert!(!index.is_slice_entry(1));
    }

    #[test]
    fn test_mapped_descendants_and_exclusion() {
        let nodes = nodes();
        let index = ProfileIndex::build(&nodes);

        assert!(index.has_mapped_descendants(0));
        assert!(index.has_mapped_descendants(2));
        assert!(!index.has_mapped_descendants(5));
        assert!(index.is_excluded(8));
        assert!(!index.is_excluded(4));
        assert_eq!(index.descendants(1), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_nearest_unbounded_ancestor_skips_root() {
        let nodes = nodes();
        let index = ProfileIndex::build(&nodes);

        assert_eq!(index.nearest_unbounded_ancestor(4), Some(1));
        assert_eq!(index.nearest_unbounded_ancestor(7), None);
    }
}
