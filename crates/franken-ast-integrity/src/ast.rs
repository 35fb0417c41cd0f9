//! Node vocabulary shared by the syntax arena and the parent-consistency
//! checker.
//!
//! Kinds are split into two variants: `Regular` nodes own exactly one
//! structural position, while `Reference` nodes are pointer-like leaves
//! (resolved type, package, executable, field, or variable links) that the
//! same instance may fill under several parents.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::syntax_arena::NodeHandle;

/// Source-span with byte offsets and one-based line/column markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start_offset: u64,
    pub end_offset: u64,
    pub start_line: u64,
    pub start_column: u64,
    pub end_line: u64,
    pub end_column: u64,
}

impl SourceSpan {
    pub fn new(
        start_offset: u64,
        end_offset: u64,
        start_line: u64,
        start_column: u64,
        end_line: u64,
        end_column: u64,
    ) -> Self {
        Self {
            start_offset,
            end_offset,
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Span confined to a single line.
    pub fn single_line(line: u64, start_column: u64, end_column: u64, start_offset: u64) -> Self {
        let width = end_column.saturating_sub(start_column);
        Self::new(
            start_offset,
            start_offset.saturating_add(width),
            line,
            start_column,
            line,
            end_column,
        )
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start_line, self.start_column, self.end_line, self.end_column
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeVariant {
    Regular,
    Reference,
}

impl NodeVariant {
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::Reference)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Reference => "reference",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    CompilationUnit,
    Package,
    Class,
    Interface,
    Field,
    Method,
    Parameter,
    Block,
    LocalVariable,
    Return,
    If,
    Invocation,
    Literal,
    BinaryOperator,
    Assignment,
    VariableRead,
    TypeReference,
    PackageReference,
    ExecutableReference,
    FieldReference,
    VariableReference,
}

impl NodeKind {
    pub const ALL: [NodeKind; 21] = [
        Self::CompilationUnit,
        Self::Package,
        Self::Class,
        Self::Interface,
        Self::Field,
        Self::Method,
        Self::Parameter,
        Self::Block,
        Self::LocalVariable,
        Self::Return,
        Self::If,
        Self::Invocation,
        Self::Literal,
        Self::BinaryOperator,
        Self::Assignment,
        Self::VariableRead,
        Self::TypeReference,
        Self::PackageReference,
        Self::ExecutableReference,
        Self::FieldReference,
        Self::VariableReference,
    ];

    pub const fn variant(self) -> NodeVariant {
        match self {
            Self::TypeReference
            | Self::PackageReference
            | Self::ExecutableReference
            | Self::FieldReference
            | Self::VariableReference => NodeVariant::Reference,
            _ => NodeVariant::Regular,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CompilationUnit => "compilation_unit",
            Self::Package => "package",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Field => "field",
            Self::Method => "method",
            Self::Parameter => "parameter",
            Self::Block => "block",
            Self::LocalVariable => "local_variable",
            Self::Return => "return",
            Self::If => "if",
            Self::Invocation => "invocation",
            Self::Literal => "literal",
            Self::BinaryOperator => "binary_operator",
            Self::Assignment => "assignment",
            Self::VariableRead => "variable_read",
            Self::TypeReference => "type_reference",
            Self::PackageReference => "package_reference",
            Self::ExecutableReference => "executable_reference",
            Self::FieldReference => "field_reference",
            Self::VariableReference => "variable_reference",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Back-reference slot of a node. `Unset` until some construction or
/// transformation step assigns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentLink {
    #[default]
    Unset,
    Set(NodeHandle),
}

impl ParentLink {
    pub const fn is_set(self) -> bool {
        matches!(self, Self::Set(_))
    }

    pub const fn handle(self) -> Option<NodeHandle> {
        match self {
            Self::Unset => None,
            Self::Set(handle) => Some(handle),
        }
    }
}
