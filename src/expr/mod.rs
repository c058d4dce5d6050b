//! Restricted expression language for task return values and conditions.
//!
//! Expressions are parsed once at load time and evaluated once per tick
//! against the variable bindings of an execution context. The language is
//! deliberately closed: the only names visible during evaluation are the
//! bound task values and a fixed whitelist of pure builtin functions. There
//! is no assignment, no user-defined functions, and no access to ambient
//! process state.
//!
//! Supported forms:
//! - literals: numbers, strings (single or double quoted), `true`, `false`,
//!   `null`
//! - free variables: task names bound from the execution context
//! - arithmetic `+ - * / %`, comparisons `== != < <= > >=`
//! - boolean `&& || !`, with `and` / `or` / `not` accepted as aliases
//! - indexing `ticker["last"]`, `book[0]`, field access `ticker.last`
//! - builtin calls: `abs`, `round`, `floor`, `ceil`, `min`, `max`, `len`

mod eval;
mod parser;
mod template;

pub use template::LogTemplate;

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// A parse failure with the character offset where it occurred.
#[derive(Debug, Clone, Error)]
#[error("parse error at offset {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

/// Runtime evaluation failure. All variants are task-scoped and recoverable:
/// the scheduler logs them and skips the tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// A referenced variable is missing from the context, either because the
    /// dependency's cached value went stale or was never computed.
    #[error("unbound variable '{0}'")]
    Unbound(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    /// A condition expression produced a non-boolean value.
    #[error("condition produced {0}, expected a boolean")]
    NotBoolean(String),
}

/// Binary operators, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
}

/// Abstract syntax tree for a parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Ast {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Var(String),
    Unary {
        op: UnaryOp,
        expr: Box<Ast>,
    },
    Binary {
        op: BinOp,
        left: Box<Ast>,
        right: Box<Ast>,
    },
    Call {
        function: String,
        args: Vec<Ast>,
    },
    Index {
        target: Box<Ast>,
        index: Box<Ast>,
    },
    Field {
        target: Box<Ast>,
        name: String,
    },
}

/// A compiled expression: source text plus its AST.
#[derive(Debug, Clone)]
pub struct Expr {
    source: String,
    ast: Ast,
}

impl Expr {
    /// Parse an expression. Called at load time so that malformed
    /// expressions are rejected before the first tick.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// Evaluate against a set of variable bindings.
    pub fn eval(&self, bindings: &HashMap<String, Value>) -> Result<Value, EvalError> {
        eval::eval(&self.ast, bindings)
    }

    /// Evaluate as a condition. Any non-boolean result is an error.
    pub fn eval_condition(&self, bindings: &HashMap<String, Value>) -> Result<bool, EvalError> {
        match eval::eval(&self.ast, bindings)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::NotBoolean(other.to_string())),
        }
    }

    /// The set of free variables referenced by this expression. Used at load
    /// time to verify that a task only references its dependency closure.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        collect_vars(&self.ast, &mut vars);
        vars
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn collect_vars(ast: &Ast, out: &mut BTreeSet<String>) {
    match ast {
        Ast::Var(name) => {
            out.insert(name.clone());
        }
        Ast::Unary { expr, .. } => collect_vars(expr, out),
        Ast::Binary { left, right, .. } => {
            collect_vars(left, out);
            collect_vars(right, out);
        }
        Ast::Call { args, .. } => {
            for arg in args {
                collect_vars(arg, out);
            }
        }
        Ast::Index { target, index } => {
            collect_vars(target, out);
            collect_vars(index, out);
        }
        Ast::Field { target, .. } => collect_vars(target, out),
        Ast::Number(_) | Ast::Str(_) | Ast::Bool(_) | Ast::Null => {}
    }
}
