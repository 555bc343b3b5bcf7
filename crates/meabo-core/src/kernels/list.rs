//! Phase 7: pointer-chasing traversal of index-linked lists.

use std::hint::black_box;

use crate::error::{Error, Result};
use crate::kernels::{Output, PhaseKernel, ShadowSet};
use crate::phase::PhaseId;
use crate::runner::{Partitioned, Region};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Node {
    value: f64,
    next: Option<u32>,
}

/// A singly linked list stored in an arena.
///
/// The `k`-th node in link order holds value `k`, so a full walk ends at
/// value `len - 1`. Arena slots follow a caller-chosen permutation, which
/// makes consecutive links land on unrelated cache lines.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedList {
    nodes: Vec<Node>,
    head: u32,
}

impl IndexedList {
    /// Link the arena so that the `k`-th node lives in slot `order[k]`.
    pub fn from_order(order: &[u32]) -> Result<Self> {
        let len = order.len();
        if len == 0 || len > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!("linked list length {len} is out of range")));
        }

        let mut nodes = vec![None; len];
        for (position, &slot) in order.iter().enumerate() {
            let entry = nodes
                .get_mut(slot as usize)
                .ok_or_else(|| Error::InvalidConfig(format!("list slot {slot} is out of range")))?;
            if entry.is_some() {
                return Err(Error::InvalidConfig(format!("list slot {slot} is used twice")));
            }
            *entry = Some(Node {
                value: position as f64,
                next: order.get(position + 1).copied(),
            });
        }

        let nodes = nodes.into_iter().flatten().collect::<Vec<_>>();
        Ok(Self { nodes, head: order[0] })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Value of the final node, reached by following every link.
    pub fn walk(&self) -> f64 {
        let mut node = &self.nodes[self.head as usize];
        while let Some(next) = node.next {
            node = &self.nodes[next as usize];
        }
        node.value
    }

    /// Value the final node must hold.
    pub fn expected_tail(&self) -> f64 {
        (self.len() - 1) as f64
    }
}

/// Worker `w` walks list `w mod lists` every iteration and records the tail
/// value it reached.
///
/// In reduced validation the shadow receives the tail the list must end on,
/// so a walk that stops early is reported as a mismatch.
#[derive(Clone, Debug)]
pub struct ListTraversal {
    pub lists: Vec<IndexedList>,
    pub last_values: Vec<f64>,
}

impl ListTraversal {
    pub fn new(lists: Vec<IndexedList>) -> Result<Self> {
        if lists.is_empty() {
            return Err(Error::InvalidConfig("list traversal needs at least one list".into()));
        }
        Ok(Self {
            lists,
            last_values: Vec::new(),
        })
    }
}

impl PhaseKernel for ListTraversal {
    fn phase(&self) -> PhaseId {
        PhaseId::ListTraversal
    }

    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()> {
        let workers = region.workers();
        let shadow = match shadow {
            Some(shadow) => Some(shadow.single_f64_mut()?),
            None => None,
        };
        self.last_values = vec![f64::NAN; workers];

        let lists = &self.lists;
        let last_iteration = region.iterations().saturating_sub(1);
        let last = Partitioned::new(&mut self.last_values, workers);
        let shadow = shadow.map(|shadow| Partitioned::new(shadow, workers));

        region.run(|ctx| {
            let list = &lists[ctx.index() % lists.len()];
            let tail = black_box(list.walk());
            if ctx.iteration() == last_iteration {
                last.lock(ctx.index()).data[0] = tail;
                if let Some(shadow) = shadow.as_ref() {
                    shadow.lock(ctx.index()).data[0] = list.expected_tail();
                }
            }
        })
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::f64("last_values", &self.last_values)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(None)
    }

    fn shadow_layout(&self, workers: usize) -> Result<Option<ShadowSet>> {
        ShadowSet::new().with_f64("last_values", workers).map(Some)
    }

    fn bytes_per_iteration(&self) -> u64 {
        self.lists.iter().map(|list| (list.len() * std::mem::size_of::<Node>()) as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{ValidationEngine, ValidationMode, ValidationOutcome};

    #[test]
    fn test_from_order_links_in_order() -> Result<()> {
        let list = IndexedList::from_order(&[3, 0, 2, 1])?;
        assert_eq!(list.len(), 4);
        assert_eq!(list.nodes[3].value, 0.0);
        assert_eq!(list.nodes[3].next, Some(0));
        assert_eq!(list.nodes[1].next, None);
        assert_eq!(list.walk(), 3.0);
        assert_eq!(list.expected_tail(), 3.0);
        Ok(())
    }

    #[test]
    fn test_from_order_rejects_non_permutations() {
        assert!(IndexedList::from_order(&[]).is_err());
        assert!(IndexedList::from_order(&[0, 0]).is_err());
        assert!(IndexedList::from_order(&[0, 5]).is_err());
    }

    #[test]
    fn test_traversal_records_tail() -> Result<()> {
        let mut kernel = ListTraversal::new(vec![IndexedList::from_order(&[1, 2, 0])?])?;
        let mut shadow = kernel
            .shadow_layout(1)?
            .ok_or_else(|| Error::InvalidConfig("missing shadow".into()))?;
        kernel.execute(&Region::serial(3), Some(&mut shadow))?;
        assert_eq!(kernel.last_values, vec![2.0]);
        assert_eq!(shadow.single_f64_mut()?.to_vec(), vec![2.0]);
        assert!(kernel.reference_copy()?.is_none());
        Ok(())
    }

    #[test]
    fn test_reduced_validation_catches_short_walk() -> Result<()> {
        let order: Vec<u32> = (0..8).collect();
        let mut broken = IndexedList::from_order(&order)?;
        broken.nodes[2].next = None;
        let mut kernel = ListTraversal::new(vec![broken])?;

        let engine = ValidationEngine::new(ValidationMode::Reduced);
        let mut prepared = engine.prepare(&kernel, 1)?;
        kernel.execute(&Region::serial(2), prepared.shadow_mut())?;
        let record = prepared.finish(&kernel, 2)?;

        assert_eq!(kernel.last_values, vec![2.0]);
        let mismatch = record
            .mismatch()
            .ok_or_else(|| Error::InvalidConfig("short walk was not reported".into()))?;
        assert_eq!(mismatch.buffer, "last_values");
        assert_eq!(mismatch.index, 0);
        assert!(matches!(record.outcome, ValidationOutcome::Failed(_)));
        Ok(())
    }
}
