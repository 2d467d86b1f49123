mod common;

use common::fixture;
use contract_verifier::{bind, verify_file, Invocation, InvokeError, Policy, Verifier};
use serde_json::json;

fn bind_basic(request: &str) -> Result<contract_verifier::BoundCall, InvokeError> {
    common::init_logger();
    let schema = verify_file(fixture("ok_basic.py"), &Verifier::reference()).unwrap();
    let invocation = Invocation::from_json(request).unwrap();
    bind(&schema, &Policy::reference(), &invocation)
}

#[test]
fn plus_one_invocation() {
    let call = bind_basic(r#"{"method": "plus_one", "args": {"x": 1}}"#).unwrap();
    assert_eq!(call.method, "plus_one");
    assert_eq!(call.args.get("x"), Some(&json!(1)));
    assert!(call.inject.is_empty());
}

#[test]
fn storage_is_injected_not_supplied() {
    let call = bind_basic(r#"{"method": "get", "args": {"key": "a"}}"#).unwrap();
    assert_eq!(call.inject, vec!["_storage".to_string()]);

    let err = bind_basic(r#"{"method": "get", "args": {"key": "a", "_storage": {}}}"#).unwrap_err();
    assert_eq!(
        err,
        InvokeError::ReservedArgument { method: "get".to_string(), argument: "_storage".to_string() }
    );
}

#[test]
fn bound_call_serializes_in_declaration_order() {
    let call = bind_basic(r#"{"method": "set", "args": {"value": [1, 2], "key": "k"}}"#).unwrap();
    assert_eq!(
        serde_json::to_string(&call).unwrap(),
        r#"{"method":"set","args":{"key":"k","value":[1,2]},"inject":["_storage"]}"#
    );
}

#[test]
fn lifecycle_and_unknown_methods_refused() {
    assert!(matches!(bind_basic(r#"{"method": "init"}"#), Err(InvokeError::LifecycleNotCallable(_))));
    assert!(matches!(bind_basic(r#"{"method": "sqrt"}"#), Err(InvokeError::UnknownMethod(_))));
}

#[test]
fn argument_mismatches_refused() {
    let err = bind_basic(r#"{"method": "set", "args": {"key": "k"}}"#).unwrap_err();
    assert_eq!(err.to_string(), "missing required argument 'value' for 'set'");

    let err = bind_basic(r#"{"method": "hi", "args": {"x": 1}}"#).unwrap_err();
    assert_eq!(err.to_string(), "'hi' has no parameter named 'x'");
}

#[test]
fn malformed_request_is_json_error() {
    let err = Invocation::from_json(r#"{"args": {}}"#).unwrap_err();
    assert!(matches!(err, contract_verifier::Error::Json(_)));
}

#[test]
fn positional_only_parameter_not_named() {
    common::init_logger();
    let schema = Verifier::reference()
        .verify_and_extract("def scale(x, /, factor=2, **extra):\n    return x * factor\n")
        .unwrap();
    let invocation = Invocation::from_json(r#"{"method": "scale", "args": {"x": 3}}"#).unwrap();
    let err = bind(&schema, &Policy::reference(), &invocation).unwrap_err();
    assert_eq!(err.to_string(), "'scale' has no parameter named 'x'");
}
