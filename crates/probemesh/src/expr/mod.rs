//! Sandboxed expression language evaluated against a probe context.
//!
//! Expressions are user configuration. They are compiled against the set of
//! keys currently in the context, run on an immutable view of it, and every
//! failure (syntax, unknown names, type errors, overflow, even a panic inside
//! a builtin) comes back as an [`EvalError`] carrying the expression text.
//!
//! # Accessors
//!
//! - `IsDefined(key)`
//! - `GetString(key)`, `GetInt`, `GetUint`, `GetFloat`, `GetBool`, `GetTime`, `GetDuration`
//! - `GetLength(key)`
//! - `GetStringElem(key, index)`, `GetIntElem`, `GetUintElem`, `GetFloatElem`,
//!   `GetBoolElem`, `GetTimeElem`, `GetDurationElem`
//!
//! Absent keys and out of range indexes yield the zero value of the accessor's
//! type. A present key holding another type is an [`EvalError::Type`].
//!
//! Context keys can also be referenced directly, e.g.
//! `probe.Local.req.Login.resp.code == 200`.

mod eval;
mod functions;
mod lexer;
mod parser;
mod value;

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::context::ProbeContext;
use eval::{Fault, Interpreter};
use parser::Expr;

pub use value::{Value, ValueKind};

/// Compiled programs kept by a caching [`Evaluator`] before it starts over.
const PROGRAM_CACHE_LIMIT: usize = 1024;

/// Failure compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error in expression [{expression}]: {message}")]
    Syntax { expression: String, message: String },

    #[error("expression [{expression}] references undeclared key {name}")]
    UndeclaredReference { expression: String, name: String },

    #[error("expression [{expression}] calls unknown function {name}")]
    UnknownFunction { expression: String, name: String },

    #[error("expression [{expression}] calls {function} with {found} arguments, expected {expected}")]
    Arity { expression: String, function: String, expected: usize, found: usize },

    #[error("type error in expression [{expression}]: {message}")]
    Type { expression: String, message: String },

    #[error("runtime error in expression [{expression}]: {message}")]
    Runtime { expression: String, message: String },

    #[error("expression [{expression}] panicked: {message}")]
    Panicked { expression: String, message: String },

    #[error("expression [{expression}] returned {found}, expected {expected}")]
    ReturnKindInvalid { expression: String, expected: ValueKind, found: ValueKind },

    #[error("evaluation of expression [{expression}] was cancelled")]
    Cancelled { expression: String },
}

impl EvalError {
    /// The offending expression text.
    pub fn expression(&self) -> &str {
        match self {
            EvalError::Syntax { expression, .. }
            | EvalError::UndeclaredReference { expression, .. }
            | EvalError::UnknownFunction { expression, .. }
            | EvalError::Arity { expression, .. }
            | EvalError::Type { expression, .. }
            | EvalError::Runtime { expression, .. }
            | EvalError::Panicked { expression, .. }
            | EvalError::ReturnKindInvalid { expression, .. }
            | EvalError::Cancelled { expression } => expression,
        }
    }

    fn from_fault(expression: &str, fault: Fault) -> Self {
        let expression = expression.to_string();
        match fault {
            Fault::Undeclared(name) => EvalError::UndeclaredReference { expression, name },
            Fault::UnknownFunction(name) => EvalError::UnknownFunction { expression, name },
            Fault::Type(message) => EvalError::Type { expression, message },
            Fault::Runtime(message) => EvalError::Runtime { expression, message },
            Fault::Cancelled => EvalError::Cancelled { expression },
        }
    }
}

/// Declared kind of every context key an expression may reference.
///
/// Values expressions cannot see (recorded errors) are left out.
pub fn declarations(ctx: &ProbeContext) -> BTreeMap<&str, ValueKind> {
    ctx.iter()
        .filter_map(|(key, value)| value::declared_kind(value).map(|kind| (key, kind)))
        .collect()
}

fn signature(declarations: &BTreeMap<&str, ValueKind>) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (key, kind) in declarations {
        key.hash(&mut hasher);
        kind.hash(&mut hasher);
    }
    hasher.finish()
}

/// A parsed and checked expression.
#[derive(Debug)]
struct Program {
    root: Expr,
}

impl Program {
    fn compile(expression: &str, declarations: &BTreeMap<&str, ValueKind>) -> Result<Self, EvalError> {
        let root = parser::parse(expression).map_err(|message| EvalError::Syntax {
            expression: expression.to_string(),
            message,
        })?;

        let mut references = Vec::new();
        root.references(&mut references);
        if let Some(name) = references.into_iter().find(|name| !declarations.contains_key(name)) {
            return Err(EvalError::UndeclaredReference {
                expression: expression.to_string(),
                name: name.to_string(),
            });
        }

        check_calls(expression, &root)?;
        Ok(Self { root })
    }
}

fn check_calls(expression: &str, expr: &Expr) -> Result<(), EvalError> {
    let check = |name: &str, arity: Option<usize>, found: usize| match arity {
        None => Err(EvalError::UnknownFunction {
            expression: expression.to_string(),
            name: name.to_string(),
        }),
        Some(expected) if expected != found => Err(EvalError::Arity {
            expression: expression.to_string(),
            function: name.to_string(),
            expected,
            found,
        }),
        Some(_) => Ok(()),
    };

    match expr {
        Expr::Literal(_) | Expr::Reference(_) => Ok(()),
        Expr::Call { name, args } => {
            check(name, functions::global_arity(name), args.len())?;
            args.iter().try_for_each(|arg| check_calls(expression, arg))
        }
        Expr::Method { target, name, args } => {
            check(name, functions::method_arity(name), args.len())?;
            check_calls(expression, target)?;
            args.iter().try_for_each(|arg| check_calls(expression, arg))
        }
        Expr::List(items) => items.iter().try_for_each(|item| check_calls(expression, item)),
        Expr::Unary(_, inner) => check_calls(expression, inner),
        Expr::Binary(_, left, right)
        | Expr::And(left, right)
        | Expr::Or(left, right)
        | Expr::Index(left, right) => {
            check_calls(expression, left)?;
            check_calls(expression, right)
        }
        Expr::Conditional(cond, then, otherwise) => {
            check_calls(expression, cond)?;
            check_calls(expression, then)?;
            check_calls(expression, otherwise)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `body`, turning a panic into [`EvalError::Panicked`].
fn sandboxed<F>(expression: &str, body: F) -> Result<Value, EvalError>
where
    F: FnOnce() -> Result<Value, EvalError>,
{
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        Err(EvalError::Panicked {
            expression: expression.to_string(),
            message: panic_message(payload.as_ref()),
        })
    })
}

/// Compiles and runs expressions, optionally caching compiled programs.
///
/// The cache key is the expression text plus a hash of the declaration set,
/// so a program is recompiled whenever the context gains or retypes keys.
#[derive(Debug, Default)]
pub struct Evaluator {
    cache: Option<Mutex<HashMap<(String, u64), Arc<Program>>>>,
}

impl Evaluator {
    /// Evaluator compiling every expression from scratch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluator reusing compiled programs across calls.
    pub fn with_cache() -> Self {
        Self { cache: Some(Mutex::new(HashMap::new())) }
    }

    /// Number of compiled programs currently cached.
    pub fn cached_programs(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.lock().len())
    }

    /// Evaluate `expression` against `ctx`, requiring a result of kind `expected`.
    ///
    /// An empty (or blank) expression is a no-op and returns `Ok(None)`.
    pub fn evaluate(
        &self,
        expression: &str,
        ctx: &ProbeContext,
        expected: ValueKind,
    ) -> Result<Option<Value>, EvalError> {
        self.run(expression, ctx, expected, None)
    }

    /// Like [`Evaluator::evaluate`] but gives up once `cancel` fires.
    pub fn evaluate_cancellable(
        &self,
        expression: &str,
        ctx: &ProbeContext,
        expected: ValueKind,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, EvalError> {
        self.run(expression, ctx, expected, Some(cancel))
    }

    fn run(
        &self,
        expression: &str,
        ctx: &ProbeContext,
        expected: ValueKind,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Value>, EvalError> {
        if expression.trim().is_empty() {
            return Ok(None);
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(EvalError::Cancelled { expression: expression.to_string() });
        }

        let value = sandboxed(expression, || {
            let program = self.program(expression, ctx)?;
            Interpreter::new(ctx, cancel)
                .eval(&program.root)
                .map_err(|fault| EvalError::from_fault(expression, fault))
        })?;

        trace!(expression, result = %value, "expression evaluated");
        if value.kind() != expected {
            return Err(EvalError::ReturnKindInvalid {
                expression: expression.to_string(),
                expected,
                found: value.kind(),
            });
        }
        Ok(Some(value))
    }

    fn program(&self, expression: &str, ctx: &ProbeContext) -> Result<Arc<Program>, EvalError> {
        let declarations = declarations(ctx);
        let Some(cache) = &self.cache else {
            return Program::compile(expression, &declarations).map(Arc::new);
        };

        let key = (expression.to_string(), signature(&declarations));
        if let Some(program) = cache.lock().get(&key) {
            return Ok(Arc::clone(program));
        }

        let program = Arc::new(Program::compile(expression, &declarations)?);
        let mut cache = cache.lock();
        if cache.len() >= PROGRAM_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(key, Arc::clone(&program));
        Ok(program)
    }
}

/// Evaluate `expression` once against `ctx` without caching.
pub fn evaluate(
    expression: &str,
    ctx: &ProbeContext,
    expected: ValueKind,
) -> Result<Option<Value>, EvalError> {
    Evaluator::new().evaluate(expression, ctx, expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_expression_is_noop() {
        let ctx = ProbeContext::new();
        assert_eq!(evaluate("", &ctx, ValueKind::Bool), Ok(None));
        assert_eq!(evaluate("   ", &ctx, ValueKind::String), Ok(None));
    }

    #[test]
    fn test_return_kind_is_checked() {
        let ctx = ProbeContext::new();
        let err = evaluate("1 + 1", &ctx, ValueKind::String).unwrap_err();
        assert_eq!(
            err,
            EvalError::ReturnKindInvalid {
                expression: "1 + 1".to_string(),
                expected: ValueKind::String,
                found: ValueKind::Int,
            }
        );
    }

    #[test]
    fn test_undeclared_reference_fails_compilation() {
        let mut ctx = ProbeContext::new();
        ctx.insert("probe.X.req.1.error", crate::ContextValue::Error("boom".into()));
        let err = evaluate("probe.X.req.1.error == ''", &ctx, ValueKind::Bool).unwrap_err();
        assert!(matches!(err, EvalError::UndeclaredReference { ref name, .. } if name == "probe.X.req.1.error"));
    }

    #[test]
    fn test_unknown_function_and_arity() {
        let ctx = ProbeContext::new();
        assert!(matches!(
            evaluate("Nope('x')", &ctx, ValueKind::Bool),
            Err(EvalError::UnknownFunction { .. })
        ));
        assert!(matches!(
            evaluate("GetInt('a', 'b') == 0", &ctx, ValueKind::Bool),
            Err(EvalError::Arity { expected: 1, found: 2, .. })
        ));
    }

    #[test]
    fn test_cache_is_keyed_by_declarations() {
        let evaluator = Evaluator::with_cache();
        let mut ctx = ProbeContext::new();
        ctx.insert("a", 1i64);

        assert_eq!(evaluator.evaluate("a + 1", &ctx, ValueKind::Int), Ok(Some(Value::Int(2))));
        assert_eq!(evaluator.evaluate("a + 1", &ctx, ValueKind::Int), Ok(Some(Value::Int(2))));
        assert_eq!(evaluator.cached_programs(), 1);

        ctx.insert("b", true);
        assert_eq!(evaluator.evaluate("a + 1", &ctx, ValueKind::Int), Ok(Some(Value::Int(2))));
        assert_eq!(evaluator.cached_programs(), 2);
    }

    #[test]
    fn test_errors_carry_expression() {
        let ctx = ProbeContext::new();
        let err = evaluate("1 +", &ctx, ValueKind::Int).unwrap_err();
        assert_eq!(err.expression(), "1 +");
        assert!(matches!(err, EvalError::Syntax { .. }));
    }

    #[test]
    fn test_panic_inside_sandbox_becomes_error() {
        let evaluator = Evaluator::with_cache();
        let mut ctx = ProbeContext::new();
        ctx.insert("a", 1i64);

        let cached = evaluator.cache.as_ref().unwrap();
        let err = sandboxed("a + 1", || {
            let _held = cached.lock();
            panic!("builtin exploded")
        })
        .unwrap_err();
        assert_eq!(
            err,
            EvalError::Panicked {
                expression: "a + 1".to_string(),
                message: "builtin exploded".to_string(),
            }
        );

        let formatted = sandboxed("x", || panic!("index {} out of bounds", 7)).unwrap_err();
        assert!(matches!(formatted, EvalError::Panicked { ref message, .. } if message == "index 7 out of bounds"));

        assert_eq!(evaluator.evaluate("a + 1", &ctx, ValueKind::Int), Ok(Some(Value::Int(2))));
        assert_eq!(evaluator.cached_programs(), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload = panic::catch_unwind(|| panic!("kaboom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "kaboom");
    }
}
