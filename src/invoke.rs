//! Binding of host invocation requests against a module schema
//!
//! A request names a method and its caller-supplied arguments by name:
//!
//! ```json
//! {"method": "set", "args": {"key": "a", "value": 1}}
//! ```
//!
//! Binding checks the request against the schema and reports which
//! reserved parameters the host must inject before running the call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ast::ParamStyle;
use crate::config::Policy;
use crate::schema::{FunctionSchema, Schema};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("unknown method '{0}'")]
    UnknownMethod(String),
    #[error("lifecycle function '{0}' cannot be invoked externally")]
    LifecycleNotCallable(String),
    #[error("argument '{argument}' of '{method}' is reserved for the host")]
    ReservedArgument { method: String, argument: String },
    #[error("'{method}' has no parameter named '{argument}'")]
    UnexpectedArgument { method: String, argument: String },
    #[error("missing required argument '{argument}' for '{method}'")]
    MissingArgument { method: String, argument: String },
}

pub type InvokeResult<T> = Result<T, InvokeError>;

/// Invocation request as sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub method: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Invocation {
    pub fn new(method: impl Into<String>) -> Self {
        Self { method: method.into(), args: Map::new() }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A request that fits the schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundCall {
    pub method: String,
    /// Caller arguments in declaration order; extra `**kwargs` entries follow
    pub args: Map<String, Value>,
    /// Reserved parameters the host supplies, in declaration order
    pub inject: Vec<String>,
}

/// Check `invocation` against `schema` and order its arguments
pub fn bind(schema: &Schema, policy: &Policy, invocation: &Invocation) -> InvokeResult<BoundCall> {
    let method = invocation.method.as_str();
    let function = schema
        .get(method)
        .ok_or_else(|| InvokeError::UnknownMethod(method.to_string()))?;
    if policy.is_lifecycle_function(method) {
        return Err(InvokeError::LifecycleNotCallable(method.to_string()));
    }

    let accepts_extra = function.ordinary().any(|p| p.style == ParamStyle::VarKeyword);
    for argument in invocation.args.keys() {
        if policy.has_reserved_prefix(argument) || policy.is_reserved_parameter(argument) {
            return Err(InvokeError::ReservedArgument {
                method: method.to_string(),
                argument: argument.clone(),
            });
        }
        // Positional-only parameters cannot be named, even with `**kwargs`
        let (declared, positional_only) = match function.param(argument) {
            Some(param) => (!param.is_variadic(), param.style == ParamStyle::PositionalOnly),
            None => (false, false),
        };
        if positional_only || (!declared && !accepts_extra) {
            return Err(InvokeError::UnexpectedArgument {
                method: method.to_string(),
                argument: argument.clone(),
            });
        }
    }

    if let Some(missing) = function
        .params
        .iter()
        .find(|p| p.is_required() && !invocation.args.contains_key(&p.name))
    {
        return Err(InvokeError::MissingArgument {
            method: method.to_string(),
            argument: missing.name.clone(),
        });
    }

    let call = BoundCall {
        method: method.to_string(),
        args: ordered_args(function, &invocation.args),
        inject: function.reserved().map(|p| p.name.clone()).collect(),
    };
    log::debug!("bound '{}': {} argument(s), {} injected", call.method, call.args.len(), call.inject.len());
    Ok(call)
}

fn ordered_args(function: &FunctionSchema, supplied: &Map<String, Value>) -> Map<String, Value> {
    let mut args = Map::new();
    for param in function.ordinary().filter(|p| !p.is_variadic()) {
        if let Some(value) = supplied.get(&param.name) {
            args.insert(param.name.clone(), value.clone());
        }
    }
    for (name, value) in supplied {
        if !args.contains_key(name) {
            args.insert(name.clone(), value.clone());
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Verifier;
    use serde_json::json;

    const CONTRACT: &str = "\
def set(key, value, _storage):
    _storage[key] = value

def plus_one(x, step=1):
    return x + step

def log(message, **extra):
    return message

def scale(x, /, factor=2):
    return x * factor

def tag(label=None, /, **extra):
    return label

def init(_storage, _tx_context):
    pass
";

    fn schema() -> Schema {
        Verifier::reference().verify_and_extract(CONTRACT).expect("schema")
    }

    fn bind_ref(invocation: &Invocation) -> InvokeResult<BoundCall> {
        bind(&schema(), &Policy::reference(), invocation)
    }

    #[test]
    fn test_bind_orders_and_injects() {
        let invocation = Invocation::from_json(r#"{"method":"set","args":{"value":1,"key":"a"}}"#).expect("request");
        let call = bind_ref(&invocation).expect("bound");
        assert_eq!(call.args.keys().collect::<Vec<_>>(), vec!["key", "value"]);
        assert_eq!(call.inject, vec!["_storage".to_string()]);
    }

    #[test]
    fn test_defaults_may_be_omitted() {
        let call = bind_ref(&Invocation::new("plus_one").arg("x", 1)).expect("bound");
        assert_eq!(call.args.get("x"), Some(&json!(1)));
        assert!(call.inject.is_empty());
    }

    #[test]
    fn test_binding_errors() {
        assert_eq!(
            bind_ref(&Invocation::new("nope")),
            Err(InvokeError::UnknownMethod("nope".to_string()))
        );
        assert_eq!(
            bind_ref(&Invocation::new("init")),
            Err(InvokeError::LifecycleNotCallable("init".to_string()))
        );
        assert!(matches!(
            bind_ref(&Invocation::new("set").arg("key", "a").arg("value", 1).arg("_storage", json!({}))),
            Err(InvokeError::ReservedArgument { .. })
        ));
        assert!(matches!(
            bind_ref(&Invocation::new("plus_one").arg("x", 1).arg("y", 2)),
            Err(InvokeError::UnexpectedArgument { .. })
        ));
        assert_eq!(
            bind_ref(&Invocation::new("plus_one")),
            Err(InvokeError::MissingArgument { method: "plus_one".to_string(), argument: "x".to_string() })
        );
    }

    #[test]
    fn test_var_keyword_accepts_extra_arguments() {
        let call = bind_ref(&Invocation::new("log").arg("message", "hi").arg("level", 3)).expect("bound");
        assert_eq!(call.args.keys().collect::<Vec<_>>(), vec!["message", "level"]);
    }

    #[test]
    fn test_positional_only_cannot_be_named() {
        assert_eq!(
            bind_ref(&Invocation::new("scale").arg("x", 3)),
            Err(InvokeError::UnexpectedArgument { method: "scale".to_string(), argument: "x".to_string() })
        );
        assert_eq!(
            bind_ref(&Invocation::new("scale").arg("factor", 3)),
            Err(InvokeError::MissingArgument { method: "scale".to_string(), argument: "x".to_string() })
        );
        assert_eq!(
            bind_ref(&Invocation::new("tag").arg("label", "a")),
            Err(InvokeError::UnexpectedArgument { method: "tag".to_string(), argument: "label".to_string() })
        );
        let call = bind_ref(&Invocation::new("tag").arg("color", "red")).expect("bound");
        assert_eq!(call.args.keys().collect::<Vec<_>>(), vec!["color"]);
    }

    #[test]
    fn test_missing_args_field_defaults_to_empty() {
        let invocation = Invocation::from_json(r#"{"method":"nope"}"#).expect("request");
        assert!(invocation.args.is_empty());
    }
}
