//! AST evaluation over dynamically typed values.
//!
//! # Semantics
//!
//! - Arithmetic operates on numbers; `+` additionally concatenates strings
//! - `/` and `%` with a zero divisor are an error, not infinity
//! - `==` compares numbers within an epsilon, everything else structurally
//! - `&&` and `||` short-circuit and require boolean operands
//! - Ordering comparisons accept numbers or two strings (lexicographic)
//! - Indexing: maps by string key, sequences by integer (negative counts
//!   from the end)
//! - Integral results are produced as JSON integers so that downstream
//!   formatting and equality behave as configs expect

use super::{Ast, BinOp, EvalError, UnaryOp};
use serde_json::{Number, Value};
use std::collections::HashMap;

const EPSILON: f64 = 1e-9;

/// Whitelisted builtin functions. The parser rejects anything else, so a
/// typo'd or hostile function name never survives to runtime.
const BUILTINS: &[&str] = &["abs", "round", "floor", "ceil", "min", "max", "len"];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

pub(crate) fn eval(ast: &Ast, bindings: &HashMap<String, Value>) -> Result<Value, EvalError> {
    match ast {
        Ast::Number(n) => number(*n),
        Ast::Str(s) => Ok(Value::String(s.clone())),
        Ast::Bool(b) => Ok(Value::Bool(*b)),
        Ast::Null => Ok(Value::Null),
        Ast::Var(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::Unbound(name.clone())),
        Ast::Unary { op, expr } => eval_unary(*op, expr, bindings),
        Ast::Binary { op, left, right } => eval_binary(*op, left, right, bindings),
        Ast::Call { function, args } => eval_call(function, args, bindings),
        Ast::Index { target, index } => {
            let target = eval(target, bindings)?;
            let index = eval(index, bindings)?;
            eval_index(&target, &index)
        }
        Ast::Field { target, name } => {
            let target = eval(target, bindings)?;
            eval_index(&target, &Value::String(name.clone()))
        }
    }
}

fn eval_unary(op: UnaryOp, expr: &Ast, bindings: &HashMap<String, Value>) -> Result<Value, EvalError> {
    let value = eval(expr, bindings)?;
    match op {
        UnaryOp::Neg => number(-as_number(&value, "-")?),
        UnaryOp::Not => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::Type(format!(
                "'!' needs a boolean, got {}",
                kind(&other)
            ))),
        },
    }
}

fn eval_binary(
    op: BinOp,
    left: &Ast,
    right: &Ast,
    bindings: &HashMap<String, Value>,
) -> Result<Value, EvalError> {
    // Boolean operators short-circuit; everything else is strict.
    if matches!(op, BinOp::And | BinOp::Or) {
        let lhs = as_bool(&eval(left, bindings)?, op.symbol())?;
        return match (op, lhs) {
            (BinOp::And, false) => Ok(Value::Bool(false)),
            (BinOp::Or, true) => Ok(Value::Bool(true)),
            _ => {
                let rhs = as_bool(&eval(right, bindings)?, op.symbol())?;
                Ok(Value::Bool(rhs))
            }
        };
    }

    let lhs = eval(left, bindings)?;
    let rhs = eval(right, bindings)?;
    match op {
        BinOp::Add => match (&lhs, &rhs) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            _ => number(as_number(&lhs, "+")? + as_number(&rhs, "+")?),
        },
        BinOp::Sub => number(as_number(&lhs, "-")? - as_number(&rhs, "-")?),
        BinOp::Mul => number(as_number(&lhs, "*")? * as_number(&rhs, "*")?),
        BinOp::Div => {
            let divisor = as_number(&rhs, "/")?;
            if divisor == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            number(as_number(&lhs, "/")? / divisor)
        }
        BinOp::Rem => {
            let divisor = as_number(&rhs, "%")?;
            if divisor == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            number(as_number(&lhs, "%")? % divisor)
        }
        BinOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(&lhs, &rhs, op.symbol())?;
            let result = match op {
                BinOp::Lt => ordering == std::cmp::Ordering::Less,
                BinOp::Le => ordering != std::cmp::Ordering::Greater,
                BinOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn eval_call(
    function: &str,
    args: &[Ast],
    bindings: &HashMap<String, Value>,
) -> Result<Value, EvalError> {
    let values: Vec<Value> = args
        .iter()
        .map(|a| eval(a, bindings))
        .collect::<Result<_, _>>()?;
    match function {
        "abs" => {
            let x = single_number(&values, "abs")?;
            number(x.abs())
        }
        "floor" => {
            let x = single_number(&values, "floor")?;
            number(x.floor())
        }
        "ceil" => {
            let x = single_number(&values, "ceil")?;
            number(x.ceil())
        }
        "round" => match values.len() {
            1 => number(as_number(&values[0], "round")?.round()),
            2 => {
                let x = as_number(&values[0], "round")?;
                let digits = as_number(&values[1], "round")? as i32;
                let factor = 10f64.powi(digits);
                number((x * factor).round() / factor)
            }
            n => Err(EvalError::Type(format!(
                "round takes 1 or 2 arguments, got {}",
                n
            ))),
        },
        "min" | "max" => {
            let numbers = spread_numbers(&values, function)?;
            let folded = numbers
                .into_iter()
                .reduce(|a, b| {
                    if (function == "min") == (b < a) {
                        b
                    } else {
                        a
                    }
                })
                .ok_or_else(|| EvalError::Type(format!("{} needs at least one value", function)))?;
            number(folded)
        }
        "len" => {
            let len = match values.as_slice() {
                [Value::String(s)] => s.chars().count(),
                [Value::Array(a)] => a.len(),
                [Value::Object(o)] => o.len(),
                [other] => {
                    return Err(EvalError::Type(format!(
                        "len needs a string, sequence, or map, got {}",
                        kind(other)
                    )));
                }
                args => {
                    return Err(EvalError::Type(format!(
                        "len takes 1 argument, got {}",
                        args.len()
                    )));
                }
            };
            Ok(Value::Number(Number::from(len as u64)))
        }
        other => Err(EvalError::Type(format!("unknown function '{}'", other))),
    }
}

fn eval_index(target: &Value, index: &Value) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| EvalError::Type(format!("no key '{}' in map", key))),
        (Value::Array(seq), Value::Number(_)) => {
            let raw = as_number(index, "[]")?;
            if raw.fract() != 0.0 {
                return Err(EvalError::Type(format!("sequence index {} is not an integer", raw)));
            }
            let idx = if raw < 0.0 {
                seq.len() as i64 + raw as i64
            } else {
                raw as i64
            };
            if idx < 0 || idx as usize >= seq.len() {
                return Err(EvalError::Type(format!(
                    "index {} out of range for sequence of {}",
                    raw,
                    seq.len()
                )));
            }
            Ok(seq[idx as usize].clone())
        }
        (other, _) => Err(EvalError::Type(format!(
            "cannot index into {}",
            kind(other)
        ))),
    }
}

/// Produce a JSON number, preferring integers for integral results.
fn number(f: f64) -> Result<Value, EvalError> {
    if !f.is_finite() {
        return Err(EvalError::Type(format!("non-finite result: {}", f)));
    }
    const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0; // 2^53
    if f.fract() == 0.0 && f.abs() < MAX_EXACT_INT {
        Ok(Value::Number(Number::from(f as i64)))
    } else {
        Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| EvalError::Type(format!("unrepresentable number: {}", f)))
    }
}

fn as_number(value: &Value, op: &str) -> Result<f64, EvalError> {
    value
        .as_f64()
        .ok_or_else(|| EvalError::Type(format!("'{}' needs a number, got {}", op, kind(value))))
}

fn as_bool(value: &Value, op: &str) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(EvalError::Type(format!(
            "'{}' needs a boolean, got {}",
            op,
            kind(other)
        ))),
    }
}

fn single_number(values: &[Value], function: &str) -> Result<f64, EvalError> {
    match values {
        [v] => as_number(v, function),
        args => Err(EvalError::Type(format!(
            "{} takes 1 argument, got {}",
            function,
            args.len()
        ))),
    }
}

/// min/max accept either variadic numbers or a single sequence of numbers.
fn spread_numbers(values: &[Value], function: &str) -> Result<Vec<f64>, EvalError> {
    match values {
        [Value::Array(seq)] => seq.iter().map(|v| as_number(v, function)).collect(),
        _ => values.iter().map(|v| as_number(v, function)).collect(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < EPSILON,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value, op: &str) -> Result<std::cmp::Ordering, EvalError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => {
            let x = as_number(a, op)?;
            let y = as_number(b, op)?;
            x.partial_cmp(&y)
                .ok_or_else(|| EvalError::Type(format!("'{}' cannot order {} and {}", op, x, y)))
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "map",
    }
}
