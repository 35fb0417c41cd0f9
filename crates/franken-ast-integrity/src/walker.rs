//! Generic depth-first walker over any tree exposed through [`TreeModel`].
//!
//! The walker is iterative: pending nodes sit on an explicit stack together
//! with the node they were reached from, so visitors receive their traversal
//! context as a parameter instead of tracking it in mutable fields. Children
//! are visited in slot order (pre-order), and empty slots are counted but
//! never handed to the visitor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{NodeVariant, SourceSpan};

/// Capabilities a node store must expose to be walked and checked.
pub trait TreeModel {
    type NodeId: Copy + Eq + fmt::Debug;
    type Error: std::error::Error + 'static;

    /// Ordered child slots; `None` marks an empty slot.
    fn children(&self, node: Self::NodeId) -> Result<Vec<Option<Self::NodeId>>, Self::Error>;

    /// Recorded back-reference, `None` while unassigned.
    fn parent(&self, node: Self::NodeId) -> Result<Option<Self::NodeId>, Self::Error>;

    fn parent_initialized(&self, node: Self::NodeId) -> Result<bool, Self::Error> {
        Ok(self.parent(node)?.is_some())
    }

    fn variant(&self, node: Self::NodeId) -> Result<NodeVariant, Self::Error>;

    fn is_reference_variant(&self, node: Self::NodeId) -> Result<bool, Self::Error> {
        Ok(self.variant(node)?.is_reference())
    }

    fn display_identity(&self, node: Self::NodeId) -> Result<String, Self::Error>;

    fn short_representation(&self, node: Self::NodeId) -> Result<String, Self::Error> {
        self.display_identity(node)
    }

    fn position(&self, node: Self::NodeId) -> Result<Option<SourceSpan>, Self::Error>;

    fn variant_tag(&self, node: Self::NodeId) -> Result<&'static str, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkControl {
    Descend,
    SkipChildren,
}

/// Per-node hook invoked by [`walk`].
pub trait TreeVisitor<M: TreeModel + ?Sized> {
    type Error: From<M::Error>;

    /// Called once per non-empty slot, before any of the node's children.
    /// `descended_from` is `None` only for the walk root.
    fn enter(
        &mut self,
        model: &M,
        node: M::NodeId,
        descended_from: Option<M::NodeId>,
    ) -> Result<WalkControl, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalkStats {
    pub visited: u64,
    pub skipped_subtrees: u64,
    pub empty_slots: u64,
    pub max_depth: u64,
}

impl WalkStats {
    fn absorb(&mut self, other: WalkStats) {
        self.visited = self.visited.saturating_add(other.visited);
        self.skipped_subtrees = self.skipped_subtrees.saturating_add(other.skipped_subtrees);
        self.empty_slots = self.empty_slots.saturating_add(other.empty_slots);
        self.max_depth = self.max_depth.max(other.max_depth);
    }
}

struct Pending<Id> {
    node: Id,
    descended_from: Option<Id>,
    depth: u64,
}

/// Walks the subtree rooted at `root` in depth-first pre-order.
///
/// The first visitor error aborts the walk; nodes not yet entered are left
/// unvisited.
pub fn walk<M, V>(model: &M, root: Option<M::NodeId>, visitor: &mut V) -> Result<WalkStats, V::Error>
where
    M: TreeModel + ?Sized,
    V: TreeVisitor<M>,
{
    let mut stats = WalkStats::default();
    let Some(root) = root else {
        return Ok(stats);
    };

    let mut stack = vec![Pending {
        node: root,
        descended_from: None,
        depth: 0,
    }];

    while let Some(Pending {
        node,
        descended_from,
        depth,
    }) = stack.pop()
    {
        stats.visited += 1;
        stats.max_depth = stats.max_depth.max(depth);

        match visitor.enter(model, node, descended_from)? {
            WalkControl::SkipChildren => {
                stats.skipped_subtrees += 1;
                continue;
            }
            WalkControl::Descend => {}
        }

        let children = model.children(node)?;
        // Reverse push keeps slot order when popping.
        for slot in children.into_iter().rev() {
            match slot {
                Some(child) => stack.push(Pending {
                    node: child,
                    descended_from: Some(node),
                    depth: depth + 1,
                }),
                None => stats.empty_slots += 1,
            }
        }
    }

    Ok(stats)
}

/// Walks each root in turn, every one starting without a context.
pub fn walk_all<M, V>(model: &M, roots: &[M::NodeId], visitor: &mut V) -> Result<WalkStats, V::Error>
where
    M: TreeModel + ?Sized,
    V: TreeVisitor<M>,
{
    let mut stats = WalkStats::default();
    for root in roots {
        stats.absorb(walk(model, Some(*root), visitor)?);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    /// Minimal vector-backed model: node `i` has `children[i]` and `parents[i]`.
    struct VecTree {
        children: Vec<Vec<Option<usize>>>,
        parents: Vec<Option<usize>>,
        references: Vec<bool>,
    }

    impl VecTree {
        fn new(len: usize) -> Self {
            Self {
                children: vec![Vec::new(); len],
                parents: vec![None; len],
                references: vec![false; len],
            }
        }

        fn link(&mut self, parent: usize, child: usize) {
            self.children[parent].push(Some(child));
            self.parents[child] = Some(parent);
        }
    }

    impl TreeModel for VecTree {
        type NodeId = usize;
        type Error = Infallible;

        fn children(&self, node: usize) -> Result<Vec<Option<usize>>, Infallible> {
            Ok(self.children[node].clone())
        }

        fn parent(&self, node: usize) -> Result<Option<usize>, Infallible> {
            Ok(self.parents[node])
        }

        fn variant(&self, node: usize) -> Result<NodeVariant, Infallible> {
            Ok(if self.references[node] {
                NodeVariant::Reference
            } else {
                NodeVariant::Regular
            })
        }

        fn display_identity(&self, node: usize) -> Result<String, Infallible> {
            Ok(format!("n{node}"))
        }

        fn position(&self, _node: usize) -> Result<Option<SourceSpan>, Infallible> {
            Ok(None)
        }

        fn variant_tag(&self, _node: usize) -> Result<&'static str, Infallible> {
            Ok("vec_node")
        }
    }

    #[derive(Default)]
    struct Recorder {
        entered: Vec<(usize, Option<usize>)>,
        skip: Vec<usize>,
    }

    impl TreeVisitor<VecTree> for Recorder {
        type Error = Infallible;

        fn enter(
            &mut self,
            _model: &VecTree,
            node: usize,
            descended_from: Option<usize>,
        ) -> Result<WalkControl, Infallible> {
            self.entered.push((node, descended_from));
            if self.skip.contains(&node) {
                Ok(WalkControl::SkipChildren)
            } else {
                Ok(WalkControl::Descend)
            }
        }
    }

    fn sample() -> VecTree {
        // 0 -> [1 -> [3, 4], 2 -> [5]]
        let mut tree = VecTree::new(6);
        tree.link(0, 1);
        tree.link(0, 2);
        tree.link(1, 3);
        tree.link(1, 4);
        tree.link(2, 5);
        tree
    }

    #[test]
    fn visits_in_pre_order_with_context() {
        let tree = sample();
        let mut recorder = Recorder::default();
        let stats = walk(&tree, Some(0), &mut recorder).unwrap();
        assert_eq!(
            recorder.entered,
            vec![
                (0, None),
                (1, Some(0)),
                (3, Some(1)),
                (4, Some(1)),
                (2, Some(0)),
                (5, Some(2)),
            ]
        );
        assert_eq!(stats.visited, 6);
        assert_eq!(stats.max_depth, 2);
    }

    #[test]
    fn skip_children_prunes_subtree() {
        let tree = sample();
        let mut recorder = Recorder {
            skip: vec![1],
            ..Recorder::default()
        };
        let stats = walk(&tree, Some(0), &mut recorder).unwrap();
        let nodes: Vec<_> = recorder.entered.iter().map(|(n, _)| *n).collect();
        assert_eq!(nodes, vec![0, 1, 2, 5]);
        assert_eq!(stats.skipped_subtrees, 1);
    }

    #[test]
    fn empty_slots_are_counted_not_visited() {
        let mut tree = VecTree::new(2);
        tree.children[0].push(None);
        tree.link(0, 1);
        tree.children[0].push(None);
        let mut recorder = Recorder::default();
        let stats = walk(&tree, Some(0), &mut recorder).unwrap();
        assert_eq!(recorder.entered, vec![(0, None), (1, Some(0))]);
        assert_eq!(stats.empty_slots, 2);
    }

    #[test]
    fn empty_root_visits_nothing() {
        let tree = VecTree::new(0);
        let mut recorder = Recorder::default();
        let stats = walk(&tree, None, &mut recorder).unwrap();
        assert!(recorder.entered.is_empty());
        assert_eq!(stats.visited, 0);
    }

    #[test]
    fn walk_all_resets_context_per_root() {
        let tree = sample();
        let mut recorder = Recorder::default();
        let stats = walk_all(&tree, &[1, 2], &mut recorder).unwrap();
        assert_eq!(
            recorder.entered,
            vec![(1, None), (3, Some(1)), (4, Some(1)), (2, None), (5, Some(2))]
        );
        assert_eq!(stats.visited, 5);
        assert_eq!(stats.max_depth, 1);
    }

    #[test]
    fn reference_default_follows_variant() {
        let mut tree = VecTree::new(2);
        tree.references[1] = true;
        assert!(!tree.is_reference_variant(0).unwrap());
        assert!(tree.is_reference_variant(1).unwrap());
        assert_eq!(tree.short_representation(1).unwrap(), "n1");
        assert!(!tree.parent_initialized(1).unwrap());
    }
}
