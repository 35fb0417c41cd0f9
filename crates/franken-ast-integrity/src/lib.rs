#![forbid(unsafe_code)]

//! Structural integrity checks for in-memory syntax trees.
//!
//! [`syntax_arena::SyntaxArena`] stores nodes with explicit parent
//! back-references, [`walker`] provides a generic depth-first walk over any
//! [`walker::TreeModel`], and [`parent_consistency`] verifies that every
//! assigned back-reference names the node the walk actually descended from.

pub mod ast;
pub mod parent_consistency;
pub mod syntax_arena;
pub mod walker;

pub use parent_consistency::{
    ConsistencyCheckConfig, ConsistencyError, ConsistencyReport, InvariantViolation,
    ParentConsistencyChecker, check_parent_consistency,
};
