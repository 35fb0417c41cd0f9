use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ast::{NodeKind, NodeVariant, ParentLink, SourceSpan};
use crate::parent_consistency::{ConsistencyError, ConsistencyReport, ParentConsistencyChecker};
use crate::walker::TreeModel;

const HANDLE_GENERATION: u32 = 1;
const SPAN_ESTIMATED_BYTES: u64 = 48;
const NODE_BASE_ESTIMATED_BYTES: u64 = 40;
const SLOT_ESTIMATED_BYTES: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    const fn new(index: u32) -> Self {
        Self {
            index,
            generation: HANDLE_GENERATION,
        }
    }

    pub const fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaBudgetKind {
    Nodes,
    ChildSlots,
    Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaBudget {
    pub max_nodes: u32,
    pub max_child_slots: u32,
    pub max_bytes: u64,
}

impl Default for ArenaBudget {
    fn default() -> Self {
        Self {
            max_nodes: 262_144,
            max_child_slots: 524_288,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("arena budget exceeded for {kind:?}: limit={limit}, attempted={attempted}")]
    BudgetExceeded {
        kind: ArenaBudgetKind,
        limit: u64,
        attempted: u64,
    },
    #[error("invalid node handle generation at index {index}: expected {expected}, got {actual}")]
    InvalidGeneration {
        expected: u32,
        actual: u32,
        index: u32,
    },
    #[error("node handle points to missing index {index}")]
    MissingNode { index: u32 },
    #[error("node {child} is not a child of node {parent}")]
    ChildNotFound { parent: u32, child: u32 },
    #[error("failed to serialize syntax arena audit entry")]
    AuditSerialization,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaNode {
    kind: NodeKind,
    label: String,
    span: Option<SourceSpan>,
    parent: ParentLink,
    children: Vec<Option<NodeHandle>>,
}

impl ArenaNode {
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    pub const fn variant(&self) -> NodeVariant {
        self.kind.variant()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn span(&self) -> Option<&SourceSpan> {
        self.span.as_ref()
    }

    pub const fn parent(&self) -> ParentLink {
        self.parent
    }

    pub fn child_slots(&self) -> &[Option<NodeHandle>] {
        &self.children
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAuditEntry {
    pub index: u32,
    pub generation: u32,
    pub kind: NodeKind,
    pub label: String,
    pub parent: Option<u32>,
    pub children: Vec<Option<u32>>,
    pub descriptor: String,
}

/// Budgeted node store with explicit parent back-references.
///
/// Child slots and back-references are kept independently: `attach_child`
/// keeps them in agreement, while the lower-level mutators
/// (`insert_child_unlinked`, `set_parent`, `replace_child`) let
/// transformation code update one side without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxArena {
    nodes: Vec<ArenaNode>,
    budget: ArenaBudget,
    bytes_used: u64,
    child_slots: u64,
}

impl Default for SyntaxArena {
    fn default() -> Self {
        Self::new(ArenaBudget::default())
    }
}

impl SyntaxArena {
    pub fn new(budget: ArenaBudget) -> Self {
        Self {
            nodes: Vec::new(),
            budget,
            bytes_used: 0,
            child_slots: 0,
        }
    }

    pub const fn budget(&self) -> ArenaBudget {
        self.budget
    }

    pub const fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        (0..self.nodes.len()).map(|index| NodeHandle::new(index as u32))
    }

    pub fn alloc(
        &mut self,
        kind: NodeKind,
        label: impl Into<String>,
        span: Option<SourceSpan>,
    ) -> Result<NodeHandle, ArenaError> {
        let label = label.into();
        ensure_capacity(
            ArenaBudgetKind::Nodes,
            self.nodes.len() as u64,
            u64::from(self.budget.max_nodes),
        )?;
        let index = usize_to_index(self.nodes.len())?;
        self.charge_bytes(NODE_BASE_ESTIMATED_BYTES)?;
        self.charge_bytes(string_bytes(&label))?;
        if span.is_some() {
            self.charge_bytes(SPAN_ESTIMATED_BYTES)?;
        }
        self.nodes.push(ArenaNode {
            kind,
            label,
            span,
            parent: ParentLink::Unset,
            children: Vec::new(),
        });
        Ok(NodeHandle::new(index))
    }

    pub fn node(&self, handle: NodeHandle) -> Result<&ArenaNode, ArenaError> {
        validate_generation(handle)?;
        self.nodes
            .get(index_to_usize(handle.index))
            .ok_or(ArenaError::MissingNode {
                index: handle.index,
            })
    }

    pub fn kind(&self, handle: NodeHandle) -> Result<NodeKind, ArenaError> {
        Ok(self.node(handle)?.kind)
    }

    pub fn label(&self, handle: NodeHandle) -> Result<&str, ArenaError> {
        Ok(&self.node(handle)?.label)
    }

    pub fn span(&self, handle: NodeHandle) -> Result<Option<&SourceSpan>, ArenaError> {
        Ok(self.node(handle)?.span.as_ref())
    }

    pub fn parent_link(&self, handle: NodeHandle) -> Result<ParentLink, ArenaError> {
        Ok(self.node(handle)?.parent)
    }

    pub fn child_slots(&self, handle: NodeHandle) -> Result<&[Option<NodeHandle>], ArenaError> {
        Ok(&self.node(handle)?.children)
    }

    /// Appends `child` under `parent` and points the child's back-reference
    /// at `parent`.
    pub fn attach_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<(), ArenaError> {
        self.node(child)?;
        self.push_slot(parent, Some(child))?;
        self.node_mut(child)?.parent = ParentLink::Set(parent);
        Ok(())
    }

    /// Appends an empty slot, e.g. an absent `else` branch.
    pub fn push_empty_slot(&mut self, parent: NodeHandle) -> Result<(), ArenaError> {
        self.push_slot(parent, None)
    }

    /// Appends `child` under `parent` without touching its back-reference.
    pub fn insert_child_unlinked(
        &mut self,
        parent: NodeHandle,
        child: NodeHandle,
    ) -> Result<(), ArenaError> {
        self.node(child)?;
        self.push_slot(parent, Some(child))
    }

    /// Overwrites the back-reference only; child slots are unchanged.
    pub fn set_parent(&mut self, node: NodeHandle, parent: NodeHandle) -> Result<(), ArenaError> {
        self.node(parent)?;
        self.node_mut(node)?.parent = ParentLink::Set(parent);
        Ok(())
    }

    pub fn clear_parent(&mut self, node: NodeHandle) -> Result<(), ArenaError> {
        self.node_mut(node)?.parent = ParentLink::Unset;
        Ok(())
    }

    /// Swaps the first slot holding `old` for `new` and links `new` to
    /// `parent`. The back-reference of `old` keeps whatever it held.
    pub fn replace_child(
        &mut self,
        parent: NodeHandle,
        old: NodeHandle,
        new: NodeHandle,
    ) -> Result<(), ArenaError> {
        self.node(new)?;
        let position = self.slot_position(parent, old)?;
        self.node_mut(parent)?.children[position] = Some(new);
        self.node_mut(new)?.parent = ParentLink::Set(parent);
        Ok(())
    }

    /// Removes the first slot holding `child`; the child's back-reference is
    /// cleared only when it still names `parent`.
    pub fn detach_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<(), ArenaError> {
        let position = self.slot_position(parent, child)?;
        self.node_mut(parent)?.children.remove(position);
        self.child_slots = self.child_slots.saturating_sub(1);
        let child_node = self.node_mut(child)?;
        if child_node.parent == ParentLink::Set(parent) {
            child_node.parent = ParentLink::Unset;
        }
        Ok(())
    }

    pub fn display_identity(&self, handle: NodeHandle) -> Result<String, ArenaError> {
        let node = self.node(handle)?;
        if node.label.is_empty() {
            Ok(format!("{} [node {}]", node.kind, handle.index))
        } else {
            Ok(format!("{} {} [node {}]", node.kind, node.label, handle.index))
        }
    }

    pub fn short_representation(&self, handle: NodeHandle) -> Result<String, ArenaError> {
        let node = self.node(handle)?;
        if node.label.is_empty() {
            Ok(node.kind.as_str().to_string())
        } else {
            Ok(node.label.clone())
        }
    }

    /// Runs the parent-consistency check with default correlation ids.
    pub fn check_parent_consistency(
        &self,
        root: NodeHandle,
    ) -> Result<ConsistencyReport, ConsistencyError<NodeHandle, ArenaError>> {
        ParentConsistencyChecker::default().check(self, Some(root))
    }

    pub fn audit_entries(&self) -> Vec<NodeAuditEntry> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| NodeAuditEntry {
                index: index as u32,
                generation: HANDLE_GENERATION,
                kind: node.kind,
                label: node.label.clone(),
                parent: node.parent.handle().map(NodeHandle::index),
                children: node
                    .children
                    .iter()
                    .map(|slot| slot.map(NodeHandle::index))
                    .collect(),
                descriptor: node_audit_descriptor(node),
            })
            .collect()
    }

    pub fn audit_jsonl(&self) -> Result<String, ArenaError> {
        let mut lines = Vec::with_capacity(self.nodes.len());
        for entry in self.audit_entries() {
            let line = serde_json::to_string(&entry).map_err(|_| ArenaError::AuditSerialization)?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Fingerprint over every node, slot, and back-reference.
    pub fn canonical_hash(&self) -> Result<String, ArenaError> {
        let digest = Sha256::digest(self.audit_jsonl()?.as_bytes());
        Ok(format!("sha256:{}", hex::encode(digest)))
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut ArenaNode, ArenaError> {
        validate_generation(handle)?;
        self.nodes
            .get_mut(index_to_usize(handle.index))
            .ok_or(ArenaError::MissingNode {
                index: handle.index,
            })
    }

    fn push_slot(&mut self, parent: NodeHandle, slot: Option<NodeHandle>) -> Result<(), ArenaError> {
        self.node(parent)?;
        ensure_capacity(
            ArenaBudgetKind::ChildSlots,
            self.child_slots,
            u64::from(self.budget.max_child_slots),
        )?;
        self.charge_bytes(SLOT_ESTIMATED_BYTES)?;
        self.node_mut(parent)?.children.push(slot);
        self.child_slots += 1;
        Ok(())
    }

    fn slot_position(&self, parent: NodeHandle, child: NodeHandle) -> Result<usize, ArenaError> {
        self.node(parent)?
            .children
            .iter()
            .position(|slot| *slot == Some(child))
            .ok_or(ArenaError::ChildNotFound {
                parent: parent.index,
                child: child.index,
            })
    }

    fn charge_bytes(&mut self, bytes: u64) -> Result<(), ArenaError> {
        let attempted = self.bytes_used.saturating_add(bytes);
        if attempted > self.budget.max_bytes {
            return Err(ArenaError::BudgetExceeded {
                kind: ArenaBudgetKind::Bytes,
                limit: self.budget.max_bytes,
                attempted,
            });
        }
        self.bytes_used = attempted;
        Ok(())
    }
}

impl TreeModel for SyntaxArena {
    type NodeId = NodeHandle;
    type Error = ArenaError;

    fn children(&self, node: NodeHandle) -> Result<Vec<Option<NodeHandle>>, ArenaError> {
        Ok(self.child_slots(node)?.to_vec())
    }

    fn parent(&self, node: NodeHandle) -> Result<Option<NodeHandle>, ArenaError> {
        Ok(self.parent_link(node)?.handle())
    }

    fn variant(&self, node: NodeHandle) -> Result<NodeVariant, ArenaError> {
        Ok(self.node(node)?.variant())
    }

    fn display_identity(&self, node: NodeHandle) -> Result<String, ArenaError> {
        SyntaxArena::display_identity(self, node)
    }

    fn short_representation(&self, node: NodeHandle) -> Result<String, ArenaError> {
        SyntaxArena::short_representation(self, node)
    }

    fn position(&self, node: NodeHandle) -> Result<Option<SourceSpan>, ArenaError> {
        Ok(self.span(node)?.cloned())
    }

    fn variant_tag(&self, node: NodeHandle) -> Result<&'static str, ArenaError> {
        Ok(self.kind(node)?.as_str())
    }
}

fn ensure_capacity(kind: ArenaBudgetKind, current: u64, limit: u64) -> Result<(), ArenaError> {
    let attempted = current.saturating_add(1);
    if attempted > limit {
        return Err(ArenaError::BudgetExceeded {
            kind,
            limit,
            attempted,
        });
    }
    Ok(())
}

fn validate_generation(handle: NodeHandle) -> Result<(), ArenaError> {
    if handle.generation != HANDLE_GENERATION {
        return Err(ArenaError::InvalidGeneration {
            expected: HANDLE_GENERATION,
            actual: handle.generation,
            index: handle.index,
        });
    }
    Ok(())
}

fn usize_to_index(value: usize) -> Result<u32, ArenaError> {
    u32::try_from(value).map_err(|_| ArenaError::BudgetExceeded {
        kind: ArenaBudgetKind::Nodes,
        limit: u64::from(u32::MAX),
        attempted: u64::MAX,
    })
}

const fn index_to_usize(value: u32) -> usize {
    value as usize
}

fn string_bytes(value: &str) -> u64 {
    u64::try_from(value.len()).unwrap_or(u64::MAX)
}

fn node_audit_descriptor(node: &ArenaNode) -> String {
    let parent = match node.parent {
        ParentLink::Unset => "_".to_string(),
        ParentLink::Set(handle) => handle.index().to_string(),
    };
    let span = node
        .span
        .as_ref()
        .map_or_else(|| "_".to_string(), ToString::to_string);
    format!(
        "{} {} label={} parent={} slots={} span={}",
        node.kind,
        node.kind.variant().as_str(),
        if node.label.is_empty() {
            "_"
        } else {
            node.label.as_str()
        },
        parent,
        node.children.len(),
        span
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(line: u64) -> Option<SourceSpan> {
        Some(SourceSpan::single_line(line, 1, 10, line * 100))
    }

    #[test]
    fn attach_child_sets_back_reference() {
        let mut arena = SyntaxArena::default();
        let class = arena.alloc(NodeKind::Class, "Foo", span(1)).unwrap();
        let method = arena.alloc(NodeKind::Method, "run", span(2)).unwrap();
        arena.attach_child(class, method).unwrap();

        assert_eq!(arena.parent_link(method).unwrap(), ParentLink::Set(class));
        assert_eq!(arena.parent_link(class).unwrap(), ParentLink::Unset);
        assert_eq!(arena.child_slots(class).unwrap(), &[Some(method)]);
    }

    #[test]
    fn insert_child_unlinked_leaves_back_reference_alone() {
        let mut arena = SyntaxArena::default();
        let block = arena.alloc(NodeKind::Block, "", None).unwrap();
        let stmt = arena.alloc(NodeKind::Return, "", None).unwrap();
        arena.insert_child_unlinked(block, stmt).unwrap();
        assert_eq!(arena.parent_link(stmt).unwrap(), ParentLink::Unset);
        assert_eq!(arena.child_slots(block).unwrap(), &[Some(stmt)]);
    }

    #[test]
    fn replace_child_keeps_old_back_reference() {
        let mut arena = SyntaxArena::default();
        let block = arena.alloc(NodeKind::Block, "", None).unwrap();
        let old = arena.alloc(NodeKind::Return, "old", None).unwrap();
        let new = arena.alloc(NodeKind::Return, "new", None).unwrap();
        arena.attach_child(block, old).unwrap();
        arena.replace_child(block, old, new).unwrap();

        assert_eq!(arena.child_slots(block).unwrap(), &[Some(new)]);
        assert_eq!(arena.parent_link(new).unwrap(), ParentLink::Set(block));
        assert_eq!(arena.parent_link(old).unwrap(), ParentLink::Set(block));
    }

    #[test]
    fn detach_child_clears_matching_back_reference_only() {
        let mut arena = SyntaxArena::default();
        let a = arena.alloc(NodeKind::Block, "a", None).unwrap();
        let b = arena.alloc(NodeKind::Block, "b", None).unwrap();
        let stmt = arena.alloc(NodeKind::Return, "", None).unwrap();
        arena.attach_child(a, stmt).unwrap();
        arena.insert_child_unlinked(b, stmt).unwrap();

        arena.detach_child(b, stmt).unwrap();
        assert_eq!(arena.parent_link(stmt).unwrap(), ParentLink::Set(a));
        arena.detach_child(a, stmt).unwrap();
        assert_eq!(arena.parent_link(stmt).unwrap(), ParentLink::Unset);
        assert!(arena.child_slots(a).unwrap().is_empty());
    }

    #[test]
    fn detach_missing_child_is_an_error() {
        let mut arena = SyntaxArena::default();
        let a = arena.alloc(NodeKind::Block, "", None).unwrap();
        let b = arena.alloc(NodeKind::Return, "", None).unwrap();
        assert_eq!(
            arena.detach_child(a, b),
            Err(ArenaError::ChildNotFound {
                parent: a.index(),
                child: b.index(),
            })
        );
    }

    #[test]
    fn stale_generation_is_rejected() {
        let mut arena = SyntaxArena::default();
        let node = arena.alloc(NodeKind::Literal, "1", None).unwrap();
        let stale = NodeHandle::from_parts(node.index(), node.generation() + 1);
        assert!(matches!(
            arena.node(stale),
            Err(ArenaError::InvalidGeneration { actual: 2, .. })
        ));
    }

    #[test]
    fn node_budget_is_enforced() {
        let mut arena = SyntaxArena::new(ArenaBudget {
            max_nodes: 1,
            ..ArenaBudget::default()
        });
        arena.alloc(NodeKind::Literal, "1", None).unwrap();
        let err = arena.alloc(NodeKind::Literal, "2", None).unwrap_err();
        assert_eq!(
            err,
            ArenaError::BudgetExceeded {
                kind: ArenaBudgetKind::Nodes,
                limit: 1,
                attempted: 2,
            }
        );
    }

    #[test]
    fn slot_budget_is_enforced() {
        let mut arena = SyntaxArena::new(ArenaBudget {
            max_child_slots: 1,
            ..ArenaBudget::default()
        });
        let block = arena.alloc(NodeKind::Block, "", None).unwrap();
        arena.push_empty_slot(block).unwrap();
        assert!(matches!(
            arena.push_empty_slot(block),
            Err(ArenaError::BudgetExceeded {
                kind: ArenaBudgetKind::ChildSlots,
                ..
            })
        ));
    }

    #[test]
    fn display_and_short_forms() {
        let mut arena = SyntaxArena::default();
        let class = arena.alloc(NodeKind::Class, "Foo", None).unwrap();
        let block = arena.alloc(NodeKind::Block, "", None).unwrap();
        assert_eq!(arena.display_identity(class).unwrap(), "class Foo [node 0]");
        assert_eq!(arena.display_identity(block).unwrap(), "block [node 1]");
        assert_eq!(arena.short_representation(class).unwrap(), "Foo");
        assert_eq!(arena.short_representation(block).unwrap(), "block");
    }

    #[test]
    fn audit_hash_tracks_back_references() {
        let mut arena = SyntaxArena::default();
        let a = arena.alloc(NodeKind::Block, "", None).unwrap();
        let b = arena.alloc(NodeKind::Return, "", None).unwrap();
        arena.insert_child_unlinked(a, b).unwrap();
        let before = arena.canonical_hash().unwrap();
        arena.set_parent(b, a).unwrap();
        let after = arena.canonical_hash().unwrap();
        assert_ne!(before, after);
        assert!(after.starts_with("sha256:"));
    }

    #[test]
    fn audit_jsonl_has_one_line_per_node() {
        let mut arena = SyntaxArena::default();
        let a = arena.alloc(NodeKind::Block, "", span(1)).unwrap();
        let b = arena.alloc(NodeKind::Return, "", None).unwrap();
        arena.attach_child(a, b).unwrap();
        let jsonl = arena.audit_jsonl().unwrap();
        assert_eq!(jsonl.lines().count(), 2);
        let entries = arena.audit_entries();
        assert_eq!(entries[1].parent, Some(0));
        assert_eq!(entries[0].children, vec![Some(1)]);
        assert_eq!(
            entries[0].descriptor,
            "block regular label=_ parent=_ slots=1 span=1:1-1:10"
        );
    }
}
