//! Compiled user restrictions.

use crate::expr::{Expr, RenderContext};
use crate::parameter::ParameterSpec;

/// A compiled restriction: SQL text plus its parameters in textual order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedWhereClause {
    fragment: String,
    parameters: Vec<ParameterSpec>,
}

impl ProcessedWhereClause {
    /// The empty restriction. Behaves exactly like an empty user fragment.
    pub const NO_WHERE_CLAUSE: ProcessedWhereClause = ProcessedWhereClause {
        fragment: String::new(),
        parameters: Vec::new(),
    };

    pub fn new(fragment: impl Into<String>, parameters: Vec<ParameterSpec>) -> Self {
        Self {
            fragment: fragment.into(),
            parameters,
        }
    }

    /// Compile an optional restriction; `None` yields [`Self::NO_WHERE_CLAUSE`].
    pub fn compile(predicate: Option<&Expr>, mut ctx: RenderContext<'_>) -> Self {
        match predicate {
            None => Self::NO_WHERE_CLAUSE,
            Some(expr) => {
                let fragment = expr.render(&mut ctx);
                Self::new(fragment, ctx.into_parameters())
            }
        }
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn is_empty(&self) -> bool {
        self.fragment.trim().is_empty()
    }
}

impl Default for ProcessedWhereClause {
    fn default() -> Self {
        Self::NO_WHERE_CLAUSE
    }
}
