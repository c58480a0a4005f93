// tests/template_engine.rs
//
// Compile/evaluate contract of the template engine, exercised through the
// public API only.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use idmefv2_connectors::error::{CompileError, EvaluationError};
use idmefv2_connectors::template::{compile, evaluate, Template, Transform};
use idmefv2_connectors::Converter;

fn sev_to_text() -> Transform {
    Transform::lookup(
        "sev_to_text",
        [(1, "Info"), (2, "Low"), (3, "Medium"), (4, "High")].map(|(k, v)| (json!(k), json!(v))),
        None,
    )
}

#[test]
fn priority_lookup_scenario() {
    let t = Template::map([(
        "Priority",
        Template::call(sev_to_text(), ["$.alert.severity".into()]),
    )]);
    let out = evaluate(&compile(&t).unwrap(), &json!({"alert": {"severity": 3}})).unwrap();
    assert_eq!(out, json!({"Priority": "Medium"}));
}

#[test]
fn missing_path_fails_the_whole_object() {
    let t = Template::map([
        ("Description", "$.msg".into()),
        ("Source", Template::seq([Template::map([("IP", "$.src_ip".into())])])),
    ]);
    let compiled = compile(&t).unwrap();

    let ok = evaluate(&compiled, &json!({"msg": "m", "src_ip": "10.0.0.1"})).unwrap();
    assert_eq!(ok["Source"][0]["IP"], "10.0.0.1");

    let err = evaluate(&compiled, &json!({"msg": "m"})).unwrap_err();
    match err {
        EvaluationError::PathNotFound { path, excerpt } => {
            assert_eq!(path, "$.src_ip");
            assert!(excerpt.contains("\"msg\""));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn literals_are_returned_verbatim_for_any_source() {
    let t = Template::map([
        ("Version", Template::lit("2.D.V04")),
        ("Sigil", Template::lit("$.not.a.path")),
        ("Nested", Template::lit(json!({"a": [1, 2, null]}))),
    ]);
    let compiled = compile(&t).unwrap();
    for src in [json!(null), json!({}), json!([1, 2]), json!({"not": {"a": {"path": 1}}})] {
        let out = evaluate(&compiled, &src).unwrap();
        assert_eq!(out["Version"], "2.D.V04");
        assert_eq!(out["Sigil"], "$.not.a.path");
        assert_eq!(out["Nested"], json!({"a": [1, 2, null]}));
    }
}

#[test]
fn sequence_order_is_preserved() {
    let t = Template::seq(["$.c".into(), Template::lit("b"), "$.a".into()]);
    let out = evaluate(&compile(&t).unwrap(), &json!({"a": 1, "c": 3})).unwrap();
    assert_eq!(out, json!([3, "b", 1]));
}

#[test]
fn invocation_arguments_evaluate_left_to_right() {
    let order = Arc::new(Mutex::new(Vec::<String>::new()));
    let recorder = |tag: &'static str| {
        let order = order.clone();
        Transform::unary(tag, move |v| {
            order.lock().unwrap().push(tag.to_string());
            Ok(v.clone())
        })
    };
    let join = Transform::new("join", |args| {
        Ok(json!(args
            .iter()
            .map(|a| a.as_str().unwrap_or_default())
            .collect::<Vec<_>>()
            .join("-")))
    });
    let t = Template::call(
        join,
        [
            Template::call(recorder("p1"), ["$.first".into()]),
            Template::call(recorder("p2"), ["$.second".into()]),
        ],
    );
    let out = evaluate(&compile(&t).unwrap(), &json!({"first": "a", "second": "b"})).unwrap();
    assert_eq!(out, "a-b");
    assert_eq!(*order.lock().unwrap(), vec!["p1", "p2"]);
}

#[test]
fn nullary_transforms_run_on_every_evaluation() {
    let counter = Arc::new(Mutex::new(0u32));
    let c = counter.clone();
    let next = Transform::nullary("next", move || {
        let mut n = c.lock().unwrap();
        *n += 1;
        json!(*n)
    });
    let compiled = compile(&Template::map([("ID", next.into())])).unwrap();
    assert_eq!(evaluate(&compiled, &json!({})).unwrap()["ID"], 1);
    assert_eq!(evaluate(&compiled, &json!({})).unwrap()["ID"], 2);
}

#[test]
fn compiling_twice_evaluates_identically() {
    let t = Template::from_json(json!({
        "Description": "$.alert.signature",
        "Category": ["$.alert.category", "fixed"],
        "Count": 3
    }));
    let a = compile(&t).unwrap();
    let b = compile(&t).unwrap();
    let src = json!({"alert": {"signature": "ET SCAN", "category": "Recon"}});
    assert_eq!(evaluate(&a, &src).unwrap(), evaluate(&b, &src).unwrap());
}

#[test]
fn map_keys_are_never_paths() {
    let t = Template::map([("$.key", Template::lit(1))]);
    let out = evaluate(&compile(&t).unwrap(), &json!({"key": "x"})).unwrap();
    assert_eq!(out, json!({"$.key": 1}));
}

#[test]
fn malformed_path_reports_template_location() {
    let t = Template::map([(
        "Source",
        Template::seq([Template::map([("IP", "$.src_ip[".into())])]),
    )]);
    let CompileError::MalformedPath { path, at, .. } = compile(&t).unwrap_err();
    assert_eq!(path, "$.src_ip[");
    assert_eq!(at, "/Source/0/IP");
}

#[test]
fn transform_failure_names_the_transform() {
    let t = Template::map([(
        "Priority",
        Template::call(sev_to_text(), ["$.alert.severity".into()]),
    )]);
    let err = evaluate(&compile(&t).unwrap(), &json!({"alert": {"severity": 9}})).unwrap_err();
    assert_eq!(err.culprit(), "sev_to_text");
    assert!(err.to_string().contains("no mapping for 9"));
}

#[test]
fn rejected_source_is_returned_without_evaluation() {
    let calls = Arc::new(Mutex::new(0u32));
    let c = calls.clone();
    let probe = Transform::nullary("probe", move || {
        *c.lock().unwrap() += 1;
        Value::Null
    });
    let conv = Converter::new(&Template::map([("p", probe.into()), ("x", "$.x".into())]))
        .unwrap()
        .with_filter(|s| s.get("keep").is_some());

    let src = json!({"other": true});
    let (accepted, out) = conv.convert(&src).unwrap();
    assert!(!accepted);
    assert_eq!(out, src);
    assert_eq!(*calls.lock().unwrap(), 0);

    let (accepted, out) = conv.convert(&json!({"keep": 1, "x": 2})).unwrap();
    assert!(accepted);
    assert_eq!(out["x"], 2);
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn quoted_and_indexed_paths() {
    let src = json!({
        "kismet.alert.header": "DEAUTH",
        "hosts": [{"name": "a"}, {"name": "b"}],
        "deep": {"x": {"target": 7}}
    });
    let t = Template::seq([
        r#"$."kismet.alert.header""#.into(),
        "$['hosts'][-1].name".into(),
        "$..target".into(),
        "$.hosts[*].name".into(),
    ]);
    let out = evaluate(&compile(&t).unwrap(), &src).unwrap();
    assert_eq!(out, json!(["DEAUTH", "b", 7, "a"]));
}
