//! Expression evaluation against realistic probe contexts.

use std::thread;

use chrono::{DateTime, TimeDelta, Utc};
use probemesh::{evaluate, EvalError, Evaluator, ProbeContext, Value, ValueKind};

fn login_context() -> ProbeContext {
    let mut ctx = ProbeContext::new();
    ctx.insert("probe", "Local");
    ctx.insert("probe.Local.req.login.resp.code", 200i64);
    ctx.insert("probe.Local.req.login.resp.header.Testtoken", vec!["abc", "def"]);
    ctx.insert("probe.Local.req.login.resp.body", r#"{"user":"probe"}"#);
    ctx.insert("probe.Local.req.login.duration", TimeDelta::milliseconds(350));
    ctx.insert("probe.Local.starttime", DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap());
    ctx
}

#[test]
fn test_missing_keys_fall_back_to_zero_values() {
    let ctx = ProbeContext::new();
    assert_eq!(evaluate(r#"GetInt("missing.key")"#, &ctx, ValueKind::Int), Ok(Some(Value::Int(0))));
    assert_eq!(evaluate(r#"IsDefined("missing.key")"#, &ctx, ValueKind::Bool), Ok(Some(Value::Bool(false))));
    assert_eq!(
        evaluate(r#"GetString("missing.key")"#, &ctx, ValueKind::String),
        Ok(Some(Value::String(String::new())))
    );
    assert_eq!(evaluate(r#"GetLength("missing.key")"#, &ctx, ValueKind::Int), Ok(Some(Value::Int(0))));
}

#[test]
fn test_indexed_accessors() {
    let ctx = login_context();
    let first = r#"GetStringElem("probe.Local.req.login.resp.header.Testtoken", 0)"#;
    assert_eq!(evaluate(first, &ctx, ValueKind::String), Ok(Some(Value::String("abc".into()))));

    let beyond = r#"GetStringElem("probe.Local.req.login.resp.header.Testtoken", 5)"#;
    assert_eq!(evaluate(beyond, &ctx, ValueKind::String), Ok(Some(Value::String(String::new()))));

    let length = r#"GetLength("probe.Local.req.login.resp.header.Testtoken")"#;
    assert_eq!(evaluate(length, &ctx, ValueKind::Int), Ok(Some(Value::Int(2))));
}

#[test]
fn test_wrong_type_is_an_error_and_evaluator_survives() {
    let ctx = login_context();
    let evaluator = Evaluator::new();

    let err = evaluator.evaluate(r#"GetInt("probe")"#, &ctx, ValueKind::Int).unwrap_err();
    assert!(matches!(err, EvalError::Type { .. }), "{err}");
    assert_eq!(err.expression(), r#"GetInt("probe")"#);

    let handle = thread::spawn(move || {
        let evaluator = Evaluator::new();
        evaluator.evaluate("1 / 0", &login_context(), ValueKind::Int)
    });
    assert!(matches!(handle.join().unwrap(), Err(EvalError::Runtime { .. })));

    let ok = evaluator.evaluate("probe.Local.req.login.resp.code == 200", &ctx, ValueKind::Bool);
    assert_eq!(ok, Ok(Some(Value::Bool(true))));
}

#[test]
fn test_decision_expressions() {
    let ctx = login_context();
    let cases = [
        ("probe.Local.req.login.resp.code >= 200 && probe.Local.req.login.resp.code < 300", true),
        (r#"probe.Local.req.login.resp.body.contains("probe")"#, true),
        (r#"probe.Local.req.login.resp.body.matches("^\\{.*\\}$")"#, true),
        (r#"probe.Local.req.login.duration < duration("1s")"#, true),
        (r#""abc" in probe.Local.req.login.resp.header.Testtoken"#, true),
        (r#"IsDefined("probe.Local.req.dashboard.resp.code") || false"#, false),
        ("probe.Local.starttime > timestamp('2020-01-01T00:00:00Z')", true),
    ];
    for (expression, expected) in cases {
        assert_eq!(
            evaluate(expression, &ctx, ValueKind::Bool),
            Ok(Some(Value::Bool(expected))),
            "{expression}"
        );
    }
}

#[test]
fn test_undeclared_reference_is_reported() {
    let ctx = login_context();
    let err = evaluate("probe.Local.req.dashboard.resp.code == 200", &ctx, ValueKind::Bool).unwrap_err();
    assert!(
        matches!(err, EvalError::UndeclaredReference { ref name, .. } if name == "probe.Local.req.dashboard.resp.code"),
        "{err}"
    );
}

#[test]
fn test_cache_recompiles_when_context_changes() {
    let evaluator = Evaluator::with_cache();
    let mut ctx = ProbeContext::new();
    let expression = r#"IsDefined("probe.Local.id")"#;

    assert_eq!(evaluator.evaluate(expression, &ctx, ValueKind::Bool), Ok(Some(Value::Bool(false))));
    assert_eq!(evaluator.evaluate(expression, &ctx, ValueKind::Bool), Ok(Some(Value::Bool(false))));
    assert_eq!(evaluator.cached_programs(), 1);

    ctx.insert("probe.Local.id", "local-1");
    assert_eq!(evaluator.evaluate(expression, &ctx, ValueKind::Bool), Ok(Some(Value::Bool(true))));
    assert_eq!(evaluator.cached_programs(), 2);
}

#[test]
fn test_deep_nesting_is_rejected() {
    let ctx = login_context();
    let header = "probe.Local.req.login.resp.header.Testtoken";
    let cases = [
        (format!("{}1{}", "(".repeat(500), ")".repeat(500)), ValueKind::Int),
        (format!("1{}", " + 1".repeat(200_000)), ValueKind::Int),
        (format!("2{}", " * 2".repeat(10_000)), ValueKind::Int),
        (format!("true{}", " && true".repeat(10_000)), ValueKind::Bool),
        (format!("{header}{}", "[0]".repeat(10_000)), ValueKind::String),
        (format!("'ok'{}", ".size()".repeat(10_000)), ValueKind::Int),
        (format!("{}1", "-".repeat(10_000)), ValueKind::Int),
    ];
    for (expression, kind) in &cases {
        let result = evaluate(expression, &ctx, *kind);
        assert!(matches!(result, Err(EvalError::Syntax { .. })), "{:.40}: {result:?}", expression);
    }

    let evaluator = Evaluator::new();
    let long_but_shallow = format!("1{}", " + 1".repeat(30));
    assert_eq!(evaluator.evaluate(&long_but_shallow, &ctx, ValueKind::Int), Ok(Some(Value::Int(31))));
    let indexed = format!("{header}[1]");
    assert_eq!(evaluator.evaluate(&indexed, &ctx, ValueKind::String), Ok(Some(Value::String("def".into()))));
}
