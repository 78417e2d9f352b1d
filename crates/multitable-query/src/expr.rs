//! Restriction and assignment expressions of bulk statements.

use crate::parameter::ParameterSpec;
use multitable_core::Value;

/// Maps an unqualified column name to the alias of the table that holds it.
pub type ColumnQualifier<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Collects parameter specs while an expression tree is rendered.
pub struct RenderContext<'a> {
    parameters: Vec<ParameterSpec>,
    qualifier: Option<ColumnQualifier<'a>>,
}

impl<'a> RenderContext<'a> {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
            qualifier: None,
        }
    }

    /// Qualify unqualified columns with table aliases.
    pub fn qualified(qualifier: ColumnQualifier<'a>) -> Self {
        Self {
            parameters: Vec::new(),
            qualifier: Some(qualifier),
        }
    }

    pub fn push_parameter(&mut self, spec: ParameterSpec) -> &'static str {
        self.parameters.push(spec);
        "?"
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn into_parameters(self) -> Vec<ParameterSpec> {
        self.parameters
    }
}

impl Default for RenderContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// An SQL expression used in WHERE clauses and SET assignments.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name or alias
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Literal value, inlined when it has a portable literal form
    Literal(Value),

    /// Bound parameter
    Parameter(ParameterSpec),

    /// Binary operation (e.g., a = b, a > b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// Unary operation (e.g., NOT a, -a)
    Unary { op: UnaryOp, expr: Box<Expr> },

    /// Function call (e.g., UPPER(name))
    Function { name: String, args: Vec<Expr> },

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// BETWEEN expression
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// LIKE / NOT LIKE pattern
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },

    /// Raw SQL fragment without parameter markers
    Raw(String),

    /// Parenthesized expression
    Paren(Box<Expr>),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Concat => "||",
        }
    }

    /// Get the precedence of this operator (higher = binds tighter).
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Concat => 4,
            BinaryOp::Mul | BinaryOp::Div => 5,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl Expr {
    /// Create a column reference.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a qualified column reference (alias.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a literal value.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Positional query parameter (1-based).
    pub fn param(index: usize) -> Self {
        Expr::Parameter(ParameterSpec::Ordinal(index))
    }

    /// Named query parameter.
    pub fn named(name: impl Into<String>) -> Self {
        Expr::Parameter(ParameterSpec::Named(name.into()))
    }

    /// Create a raw SQL expression.
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    pub fn add(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn mul(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn concat(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Concat, other)
    }

    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn like(self, pattern: impl Into<Expr>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern.into()),
            negated: false,
        }
    }

    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: false,
        }
    }

    /// IN list; an empty list never matches.
    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        if values.is_empty() {
            return Expr::raw("1 = 0");
        }
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn paren(self) -> Self {
        Expr::Paren(Box::new(self))
    }

    /// Render to SQL with `?` markers, recording parameters in textual order.
    pub fn render(&self, ctx: &mut RenderContext<'_>) -> String {
        match self {
            Expr::Column { table, name } => match table {
                Some(t) => format!("{t}.{name}"),
                None => match ctx.qualifier.and_then(|q| q(name)) {
                    Some(alias) => format!("{alias}.{name}"),
                    None => name.clone(),
                },
            },

            Expr::Literal(value) => match value.to_sql_literal() {
                Some(literal) => literal,
                None => ctx
                    .push_parameter(ParameterSpec::Literal(value.clone()))
                    .to_string(),
            },

            Expr::Parameter(spec) => ctx.push_parameter(spec.clone()).to_string(),

            Expr::Binary { left, op, right } => {
                let left_sql = render_operand(left, *op, ctx);
                let right_sql = render_operand(right, *op, ctx);
                format!("{left_sql} {} {right_sql}", op.as_str())
            }

            Expr::Unary { op, expr } => {
                let inner = expr.render(ctx);
                let inner = if matches!(**expr, Expr::Binary { .. }) {
                    format!("({inner})")
                } else {
                    inner
                };
                match op {
                    UnaryOp::Not => format!("not {inner}"),
                    UnaryOp::Neg => format!("-{inner}"),
                }
            }

            Expr::Function { name, args } => {
                let args: Vec<_> = args.iter().map(|a| a.render(ctx)).collect();
                format!("{name}({})", args.join(", "))
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                let expr_sql = expr.render(ctx);
                let values: Vec<_> = values.iter().map(|v| v.render(ctx)).collect();
                let not_str = if *negated { "not " } else { "" };
                format!("{expr_sql} {not_str}in ({})", values.join(", "))
            }

            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let expr_sql = expr.render(ctx);
                let low_sql = low.render(ctx);
                let high_sql = high.render(ctx);
                let not_str = if *negated { "not " } else { "" };
                format!("{expr_sql} {not_str}between {low_sql} and {high_sql}")
            }

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.render(ctx);
                let not_str = if *negated { " not" } else { "" };
                format!("{expr_sql} is{not_str} null")
            }

            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let expr_sql = expr.render(ctx);
                let pattern_sql = pattern.render(ctx);
                let not_str = if *negated { "not " } else { "" };
                format!("{expr_sql} {not_str}like {pattern_sql}")
            }

            Expr::Raw(sql) => sql.clone(),

            Expr::Paren(inner) => format!("({})", inner.render(ctx)),
        }
    }

    /// Unqualified column names referenced by this expression.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'e>(&'e self, out: &mut Vec<&'e str>) {
        match self {
            Expr::Column { table: None, name } => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } | Expr::Paren(expr) => {
                expr.collect_columns(out);
            }
            Expr::Function { args, .. } => args.iter().for_each(|a| a.collect_columns(out)),
            Expr::In { expr, values, .. } => {
                expr.collect_columns(out);
                values.iter().for_each(|v| v.collect_columns(out));
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.collect_columns(out);
                low.collect_columns(out);
                high.collect_columns(out);
            }
            Expr::Like { expr, pattern, .. } => {
                expr.collect_columns(out);
                pattern.collect_columns(out);
            }
            Expr::Column { .. } | Expr::Literal(_) | Expr::Parameter(_) | Expr::Raw(_) => {}
        }
    }
}

fn render_operand(operand: &Expr, parent: BinaryOp, ctx: &mut RenderContext<'_>) -> String {
    let sql = operand.render(ctx);
    match operand {
        Expr::Binary { op, .. } if op.precedence() < parent.precedence() => format!("({sql})"),
        _ => sql,
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::BigInt(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}
