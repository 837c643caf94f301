//! Tree walking interpreter.

use std::cmp::Ordering;

use tokio_util::sync::CancellationToken;

use super::functions::{call_global, call_method};
use super::parser::{BinaryOp, Expr, UnaryOp};
use super::value::{compare_numbers, Value};
use crate::context::ProbeContext;

/// Failure raised while interpreting, before the expression text is attached.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Fault {
    Undeclared(String),
    UnknownFunction(String),
    Type(String),
    Runtime(String),
    Cancelled,
}

pub(crate) struct Interpreter<'a> {
    ctx: &'a ProbeContext,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(ctx: &'a ProbeContext, cancel: Option<&'a CancellationToken>) -> Self {
        Self { ctx, cancel }
    }

    fn check_cancelled(&self) -> Result<(), Fault> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(Fault::Cancelled),
            _ => Ok(()),
        }
    }

    pub(crate) fn eval(&self, expr: &Expr) -> Result<Value, Fault> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Reference(key) => self
                .ctx
                .get(key)
                .and_then(|value| Value::try_from(value).ok())
                .ok_or_else(|| Fault::Undeclared(key.clone())),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|item| self.eval(item)).collect::<Result<_, _>>()?,
            )),
            Expr::Unary(op, inner) => unary(*op, self.eval(inner)?),
            Expr::Binary(op, left, right) => binary(*op, self.eval(left)?, self.eval(right)?),
            Expr::And(left, right) => {
                if !self.boolean(left, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.boolean(right, "&&")?))
            }
            Expr::Or(left, right) => {
                if self.boolean(left, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.boolean(right, "||")?))
            }
            Expr::Conditional(cond, then, otherwise) => {
                if self.boolean(cond, "?:")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { name, args } => {
                self.check_cancelled()?;
                let args = args.iter().map(|arg| self.eval(arg)).collect::<Result<Vec<_>, _>>()?;
                call_global(self.ctx, name, &args)
            }
            Expr::Method { target, name, args } => {
                self.check_cancelled()?;
                let target = self.eval(target)?;
                let args = args.iter().map(|arg| self.eval(arg)).collect::<Result<Vec<_>, _>>()?;
                call_method(&target, name, &args)
            }
            Expr::Index(target, index) => index_into(self.eval(target)?, self.eval(index)?),
        }
    }

    fn boolean(&self, expr: &Expr, operator: &str) -> Result<bool, Fault> {
        let value = self.eval(expr)?;
        value
            .as_bool()
            .ok_or_else(|| Fault::Type(format!("{operator} expects bool operands, got {}", value.kind())))
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, Fault> {
    match (op, value) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Negate, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| Fault::Runtime("integer overflow".to_string())),
        (UnaryOp::Negate, Value::Double(d)) => Ok(Value::Double(-d)),
        (UnaryOp::Negate, Value::Duration(d)) => Ok(Value::Duration(-d)),
        (op, value) => Err(Fault::Type(format!("no overload for {op:?} on {}", value.kind()))),
    }
}

fn overflow() -> Fault {
    Fault::Runtime("integer overflow".to_string())
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, Fault> {
    use Value::*;

    match op {
        BinaryOp::Eq => return Ok(Bool(left.loose_eq(&right))),
        BinaryOp::Ne => return Ok(Bool(!left.loose_eq(&right))),
        BinaryOp::In => {
            return match right {
                List(items) => Ok(Bool(items.iter().any(|item| item.loose_eq(&left)))),
                String(haystack) => match left {
                    String(needle) => Ok(Bool(haystack.contains(needle.as_str()))),
                    other => Err(Fault::Type(format!("cannot test {} in string", other.kind()))),
                },
                other => Err(Fault::Type(format!("'in' expects a list, got {}", other.kind()))),
            };
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right)?;
            return Ok(Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }));
        }
        _ => {}
    }

    let mismatch = |left: &Value, right: &Value| {
        Fault::Type(format!("no overload for {} {op:?} {}", left.kind(), right.kind()))
    };

    match (op, left, right) {
        (BinaryOp::Add, Int(l), Int(r)) => l.checked_add(r).map(Int).ok_or_else(overflow),
        (BinaryOp::Add, Uint(l), Uint(r)) => l.checked_add(r).map(Uint).ok_or_else(overflow),
        (BinaryOp::Add, Double(l), Double(r)) => Ok(Double(l + r)),
        (BinaryOp::Add, String(l), String(r)) => Ok(String(l + &r)),
        (BinaryOp::Add, List(mut l), List(r)) => {
            l.extend(r);
            Ok(List(l))
        }
        (BinaryOp::Add, Timestamp(t), Duration(d)) | (BinaryOp::Add, Duration(d), Timestamp(t)) => {
            t.checked_add_signed(d).map(Timestamp).ok_or_else(overflow)
        }
        (BinaryOp::Add, Duration(l), Duration(r)) => l.checked_add(&r).map(Duration).ok_or_else(overflow),

        (BinaryOp::Sub, Int(l), Int(r)) => l.checked_sub(r).map(Int).ok_or_else(overflow),
        (BinaryOp::Sub, Uint(l), Uint(r)) => l.checked_sub(r).map(Uint).ok_or_else(overflow),
        (BinaryOp::Sub, Double(l), Double(r)) => Ok(Double(l - r)),
        (BinaryOp::Sub, Timestamp(l), Timestamp(r)) => Ok(Duration(l - r)),
        (BinaryOp::Sub, Timestamp(t), Duration(d)) => t.checked_sub_signed(d).map(Timestamp).ok_or_else(overflow),
        (BinaryOp::Sub, Duration(l), Duration(r)) => l.checked_sub(&r).map(Duration).ok_or_else(overflow),

        (BinaryOp::Mul, Int(l), Int(r)) => l.checked_mul(r).map(Int).ok_or_else(overflow),
        (BinaryOp::Mul, Uint(l), Uint(r)) => l.checked_mul(r).map(Uint).ok_or_else(overflow),
        (BinaryOp::Mul, Double(l), Double(r)) => Ok(Double(l * r)),

        (BinaryOp::Div | BinaryOp::Rem, Int(_), Int(0)) | (BinaryOp::Div | BinaryOp::Rem, Uint(_), Uint(0)) => {
            Err(Fault::Runtime("division by zero".to_string()))
        }
        (BinaryOp::Div, Int(l), Int(r)) => l.checked_div(r).map(Int).ok_or_else(overflow),
        (BinaryOp::Div, Uint(l), Uint(r)) => Ok(Uint(l / r)),
        (BinaryOp::Div, Double(l), Double(r)) => Ok(Double(l / r)),
        (BinaryOp::Rem, Int(l), Int(r)) => l.checked_rem(r).map(Int).ok_or_else(overflow),
        (BinaryOp::Rem, Uint(l), Uint(r)) => Ok(Uint(l % r)),

        (_, left, right) => Err(mismatch(&left, &right)),
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, Fault> {
    let ordering = match (left, right) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Timestamp(l), Value::Timestamp(r)) => Some(l.cmp(r)),
        (Value::Duration(l), Value::Duration(r)) => Some(l.cmp(r)),
        _ if left.is_number() && right.is_number() => compare_numbers(left, right),
        _ => None,
    };
    ordering.ok_or_else(|| {
        Fault::Type(format!("cannot compare {} with {}", left.kind(), right.kind()))
    })
}

fn index_into(target: Value, index: Value) -> Result<Value, Fault> {
    let Value::List(items) = target else {
        return Err(Fault::Type(format!("cannot index into {}", target.kind())));
    };
    let position = match index {
        Value::Int(i) => usize::try_from(i).ok(),
        Value::Uint(u) => usize::try_from(u).ok(),
        other => return Err(Fault::Type(format!("list index must be int, got {}", other.kind()))),
    };
    let len = items.len();
    position
        .and_then(|position| items.into_iter().nth(position))
        .ok_or_else(|| Fault::Runtime(format!("index out of range for list of size {len}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;

    fn run(source: &str, ctx: &ProbeContext) -> Result<Value, Fault> {
        Interpreter::new(ctx, None).eval(&parse(source).unwrap())
    }

    #[test]
    fn test_arithmetic_and_overflow() {
        let ctx = ProbeContext::new();
        assert_eq!(run("1 + 2 * 3", &ctx), Ok(Value::Int(7)));
        assert_eq!(run("7 % 4", &ctx), Ok(Value::Int(3)));
        assert_eq!(run("'a' + 'b'", &ctx), Ok(Value::String("ab".into())));
        assert!(matches!(run("9223372036854775807 + 1", &ctx), Err(Fault::Runtime(_))));
        assert!(matches!(run("1 / 0", &ctx), Err(Fault::Runtime(_))));
        assert!(matches!(run("1 + 1u", &ctx), Err(Fault::Type(_))));
    }

    #[test]
    fn test_short_circuit() {
        let ctx = ProbeContext::new();
        // The right hand side would fail if it were evaluated.
        assert_eq!(run("false && (1 / 0 == 1)", &ctx), Ok(Value::Bool(false)));
        assert_eq!(run("true || (1 / 0 == 1)", &ctx), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_references_and_lists() {
        let mut ctx = ProbeContext::new();
        ctx.insert("probe.X.req.1.resp.code", 200i64);
        ctx.insert("probe.X.req.1.resp.header.Token", vec!["abc"]);
        assert_eq!(run("probe.X.req.1.resp.code == 200", &ctx), Ok(Value::Bool(true)));
        assert_eq!(run("probe.X.req.1.resp.code in [200, 201]", &ctx), Ok(Value::Bool(true)));
        assert_eq!(run("probe.X.req.1.resp.header.Token[0]", &ctx), Ok(Value::String("abc".into())));
        assert!(matches!(run("probe.X.req.1.resp.header.Token[3]", &ctx), Err(Fault::Runtime(_))));
        assert_eq!(run("probe.nothing", &ctx), Err(Fault::Undeclared("probe.nothing".into())));
    }

    #[test]
    fn test_cancellation_stops_calls() {
        let ctx = ProbeContext::new();
        let token = CancellationToken::new();
        token.cancel();
        let result = Interpreter::new(&ctx, Some(&token)).eval(&parse("size('abc')").unwrap());
        assert_eq!(result, Err(Fault::Cancelled));
    }
}
