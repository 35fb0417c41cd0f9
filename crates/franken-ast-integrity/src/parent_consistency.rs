//! Parent back-reference consistency check for syntax trees.
//!
//! Every regular node reached by a depth-first walk must, once its parent
//! back-reference is assigned, point at the exact node the walk descended
//! from. Reference nodes (resolved type, field, executable links, ...) may
//! legitimately be shared by several parents, so they are neither checked
//! nor used as context for anything below them.
//!
//! The walk aborts at the first offending node in pre-order and reports it
//! as an [`InvariantViolation`]. Nothing in the tree is mutated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::SourceSpan;
use crate::walker::{self, TreeModel, TreeVisitor, WalkControl, WalkStats};

pub const PARENT_CONSISTENCY_COMPONENT: &str = "ast_parent_consistency";
pub const PARENT_CONSISTENCY_FAILURE_CODE: &str = "FE-ASTPC-0001";
pub const PARENT_CONSISTENCY_MODEL_ERROR_CODE: &str = "FE-ASTPC-0002";

/// Correlation ids stamped on every emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyCheckConfig {
    pub trace_id: String,
    pub decision_id: String,
    pub policy_id: String,
}

impl Default for ConsistencyCheckConfig {
    fn default() -> Self {
        Self {
            trace_id: "trace-ast-parent-consistency".to_string(),
            decision_id: "decision-ast-parent-consistency".to_string(),
            policy_id: "policy-ast-parent-consistency-v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyEvent {
    pub trace_id: String,
    pub decision_id: String,
    pub policy_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub nodes_checked: u64,
    pub references_skipped: u64,
    pub uninitialized_skipped: u64,
    pub empty_slots: u64,
    pub max_depth: u64,
    pub events: Vec<ConsistencyEvent>,
}

/// Diagnostic snapshot of one node, taken when a violation is raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDiagnostic<Id> {
    pub node: Id,
    pub display: String,
    pub signature: String,
    pub variant_tag: &'static str,
    pub position: Option<SourceSpan>,
}

impl<Id: Copy> NodeDiagnostic<Id> {
    pub fn capture<M>(model: &M, node: Id) -> Result<Self, M::Error>
    where
        M: TreeModel<NodeId = Id> + ?Sized,
    {
        Ok(Self {
            node,
            display: model.display_identity(node)?,
            signature: model.short_representation(node)?,
            variant_tag: model.variant_tag(node)?,
            position: model.position(node)?,
        })
    }
}

impl<Id> fmt::Display for NodeDiagnostic<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Element: {}", self.display)?;
        writeln!(f, "Signature: {}", self.signature)?;
        writeln!(f, "Class: {}", self.variant_tag)?;
        match &self.position {
            Some(span) => writeln!(f, "position: {span}"),
            None => writeln!(f, "position: (unknown)"),
        }
    }
}

/// A regular node whose recorded parent differs from the node it was
/// reached through.
///
/// `recorded_parent` is `None` only for models that report an initialized
/// back-reference without a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation<Id> {
    pub offending: NodeDiagnostic<Id>,
    pub recorded_parent: Option<NodeDiagnostic<Id>>,
    pub expected_parent: NodeDiagnostic<Id>,
}

impl<Id> fmt::Display for InvariantViolation<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}is set as child of", self.offending)?;
        match &self.recorded_parent {
            Some(parent) => write!(f, "{parent}")?,
            None => writeln!(f, "Element: (none)")?,
        }
        writeln!(f, "however it is visited as a child of")?;
        write!(f, "{}", self.expected_parent)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError<Id, E>
where
    Id: fmt::Debug,
    E: std::error::Error + 'static,
{
    #[error("{0}")]
    InvariantViolation(Box<InvariantViolation<Id>>),
    #[error("node model lookup failed during parent-consistency check: {0}")]
    Model(#[source] E),
}

impl<Id, E> From<E> for ConsistencyError<Id, E>
where
    Id: fmt::Debug,
    E: std::error::Error + 'static,
{
    fn from(error: E) -> Self {
        Self::Model(error)
    }
}

impl<Id, E> ConsistencyError<Id, E>
where
    Id: fmt::Debug,
    E: std::error::Error + 'static,
{
    pub fn violation(&self) -> Option<&InvariantViolation<Id>> {
        match self {
            Self::InvariantViolation(violation) => Some(violation),
            Self::Model(_) => None,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvariantViolation(_) => PARENT_CONSISTENCY_FAILURE_CODE,
            Self::Model(_) => PARENT_CONSISTENCY_MODEL_ERROR_CODE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParentConsistencyChecker {
    config: ConsistencyCheckConfig,
}

impl ParentConsistencyChecker {
    pub fn new(config: ConsistencyCheckConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsistencyCheckConfig {
        &self.config
    }

    /// Checks the subtree under `root`. The root itself is never compared
    /// against a parent; an empty root passes trivially.
    pub fn check<M>(
        &self,
        model: &M,
        root: Option<M::NodeId>,
    ) -> Result<ConsistencyReport, ConsistencyError<M::NodeId, M::Error>>
    where
        M: TreeModel + ?Sized,
    {
        let mut visitor = ParentCheckVisitor::default();
        let stats = walker::walk(model, root, &mut visitor)?;
        Ok(self.report(visitor, stats, "check"))
    }

    /// Checks several independent roots in order, stopping at the first
    /// violation.
    pub fn check_all<M>(
        &self,
        model: &M,
        roots: &[M::NodeId],
    ) -> Result<ConsistencyReport, ConsistencyError<M::NodeId, M::Error>>
    where
        M: TreeModel + ?Sized,
    {
        let mut visitor = ParentCheckVisitor::default();
        let stats = walker::walk_all(model, roots, &mut visitor)?;
        Ok(self.report(visitor, stats, "check_all"))
    }

    pub fn failure_event<Id, E>(&self, error: &ConsistencyError<Id, E>) -> ConsistencyEvent
    where
        Id: fmt::Debug,
        E: std::error::Error + 'static,
    {
        let event = match error {
            ConsistencyError::InvariantViolation(_) => "parent_mismatch",
            ConsistencyError::Model(_) => "model_lookup",
        };
        self.event(event, "fail", Some(error.error_code()))
    }

    fn report(&self, visitor: ParentCheckVisitor, stats: WalkStats, event: &str) -> ConsistencyReport {
        ConsistencyReport {
            nodes_checked: visitor.nodes_checked,
            references_skipped: visitor.references_skipped,
            uninitialized_skipped: visitor.uninitialized_skipped,
            empty_slots: stats.empty_slots,
            max_depth: stats.max_depth,
            events: vec![self.event(event, "pass", None)],
        }
    }

    fn event(&self, event: &str, outcome: &str, error_code: Option<&str>) -> ConsistencyEvent {
        ConsistencyEvent {
            trace_id: self.config.trace_id.clone(),
            decision_id: self.config.decision_id.clone(),
            policy_id: self.config.policy_id.clone(),
            component: PARENT_CONSISTENCY_COMPONENT.to_string(),
            event: event.to_string(),
            outcome: outcome.to_string(),
            error_code: error_code.map(str::to_string),
        }
    }
}

/// Checks `root` with default correlation ids.
pub fn check_parent_consistency<M>(
    model: &M,
    root: Option<M::NodeId>,
) -> Result<ConsistencyReport, ConsistencyError<M::NodeId, M::Error>>
where
    M: TreeModel + ?Sized,
{
    ParentConsistencyChecker::default().check(model, root)
}

#[derive(Debug, Default)]
struct ParentCheckVisitor {
    nodes_checked: u64,
    references_skipped: u64,
    uninitialized_skipped: u64,
}

impl<M> TreeVisitor<M> for ParentCheckVisitor
where
    M: TreeModel + ?Sized,
{
    type Error = ConsistencyError<M::NodeId, M::Error>;

    fn enter(
        &mut self,
        model: &M,
        node: M::NodeId,
        descended_from: Option<M::NodeId>,
    ) -> Result<WalkControl, Self::Error> {
        // Shared leaves: no check, and never a context for what lies below.
        if model.is_reference_variant(node)? {
            self.references_skipped += 1;
            return Ok(WalkControl::SkipChildren);
        }
        self.nodes_checked += 1;

        let Some(expected) = descended_from else {
            return Ok(WalkControl::Descend);
        };
        if !model.parent_initialized(node)? {
            self.uninitialized_skipped += 1;
            return Ok(WalkControl::Descend);
        }

        let recorded = model.parent(node)?;
        if recorded == Some(expected) {
            return Ok(WalkControl::Descend);
        }

        let recorded_parent = match recorded {
            Some(parent) => Some(NodeDiagnostic::capture(model, parent)?),
            None => None,
        };
        Err(ConsistencyError::InvariantViolation(Box::new(
            InvariantViolation {
                offending: NodeDiagnostic::capture(model, node)?,
                recorded_parent,
                expected_parent: NodeDiagnostic::capture(model, expected)?,
            },
        )))
    }
}
