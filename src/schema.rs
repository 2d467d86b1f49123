//! Calling interface of a verified contract module
//!
//! The schema lists every top-level function with its parameters in
//! declaration order. Each parameter is classified as ordinary (supplied by
//! the caller) or reserved (injected by the host). On the wire the
//! classification is dropped:
//!
//! ```json
//! {"get": ["key", "_storage"], "init": ["_storage", "_tx_context"]}
//! ```

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::ast::{FunctionDef, ParamStyle, Span, StmtKind};
use crate::config::Policy;
use crate::error::{Error, Result};
use crate::pipeline::VerifiedModule;
use crate::source::SourceModule;
use crate::verify::{Violation, VerifyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Supplied by the caller
    Ordinary,
    /// Injected by the host, never supplied by the caller
    Reserved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaParam {
    pub name: String,
    pub kind: ParamKind,
    pub style: ParamStyle,
    /// A default value was declared; it is never evaluated
    pub has_default: bool,
    pub span: Span,
}

impl SchemaParam {
    pub fn is_reserved(&self) -> bool {
        self.kind == ParamKind::Reserved
    }

    pub fn is_variadic(&self) -> bool {
        matches!(self.style, ParamStyle::VarPositional | ParamStyle::VarKeyword)
    }

    /// Whether a caller must supply this parameter
    pub fn is_required(&self) -> bool {
        self.kind == ParamKind::Ordinary && !self.has_default && !self.is_variadic()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSchema {
    pub name: String,
    pub params: Vec<SchemaParam>,
    pub span: Span,
}

impl FunctionSchema {
    pub fn param(&self, name: &str) -> Option<&SchemaParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn ordinary(&self) -> impl Iterator<Item = &SchemaParam> {
        self.params.iter().filter(|p| !p.is_reserved())
    }

    pub fn reserved(&self) -> impl Iterator<Item = &SchemaParam> {
        self.params.iter().filter(|p| p.is_reserved())
    }
}

/// Ordered mapping of function name to parameters. Insertion order is
/// first-declaration order; a later definition of the same name replaces
/// the earlier one in its original position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    functions: Vec<FunctionSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a function, overwriting an earlier one with the same name in place
    pub fn insert(&mut self, function: FunctionSchema) {
        match self.functions.iter_mut().find(|f| f.name == function.name) {
            Some(existing) => {
                log::debug!("schema: '{}' redeclared, keeping first position", function.name);
                *existing = function;
            }
            None => self.functions.push(function),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSchema> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn functions(&self) -> &[FunctionSchema] {
        &self.functions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Extract the schema of a verified module, then enforce the lifecycle
    /// function rule.
    pub fn extract(verified: &VerifiedModule) -> VerifyResult<Schema> {
        let policy = verified.policy();
        let source = verified.source();
        let mut schema = Schema::new();
        for stmt in &verified.module().body {
            if let StmtKind::FunctionDef(function) = &stmt.kind {
                schema.insert(classify_function(function, stmt.span, policy, source)?);
            }
        }
        check_init_func(&schema, policy, source)?;
        log::debug!("schema extracted: {} function(s)", schema.len());
        Ok(schema)
    }

    /// Wire form as compact JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Load a schema from its wire form, re-classifying parameter names
    /// against `policy`. Defaults and parameter styles are not carried on
    /// the wire and come back as plain, default-free parameters.
    pub fn from_json(text: &str, policy: &Policy) -> Result<Schema> {
        let wire: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut schema = Schema::new();
        for (name, params) in wire {
            let params: Vec<String> = serde_json::from_value(params)?;
            let params = params
                .into_iter()
                .map(|param| {
                    let kind = param_kind(&param, policy).ok_or_else(|| {
                        Error::config(format!(
                            "parameter '{}' of '{}' uses the reserved prefix but is not reserved",
                            param, name
                        ))
                    })?;
                    Ok(SchemaParam {
                        name: param,
                        kind,
                        style: ParamStyle::Regular,
                        has_default: false,
                        span: Span::default(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            schema.insert(FunctionSchema {
                name,
                params,
                span: Span::default(),
            });
        }
        Ok(schema)
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.functions.len()))?;
        for function in &self.functions {
            let names: Vec<&str> = function.param_names().collect();
            map.serialize_entry(&function.name, &names)?;
        }
        map.end()
    }
}

/// `None` when the name uses the reserved prefix without being reserved
fn param_kind(name: &str, policy: &Policy) -> Option<ParamKind> {
    if !policy.has_reserved_prefix(name) {
        Some(ParamKind::Ordinary)
    } else if policy.is_reserved_parameter(name) {
        Some(ParamKind::Reserved)
    } else {
        None
    }
}

fn classify_function(
    function: &FunctionDef,
    span: Span,
    policy: &Policy,
    source: &SourceModule,
) -> VerifyResult<FunctionSchema> {
    let mut params = Vec::with_capacity(function.params.len());
    for param in function.params.iter() {
        let kind = match param_kind(&param.name.name, policy) {
            Some(kind) => kind,
            None => {
                return Err(Violation::ArgumentNaming {
                    function: function.name.name.clone(),
                    parameter: param.name.name.clone(),
                    prefix: policy.reserved_prefix.clone(),
                    excerpt: source.excerpt("arg", param.name.span),
                })
            }
        };
        params.push(SchemaParam {
            name: param.name.name.clone(),
            kind,
            style: param.style,
            has_default: param.default.is_some(),
            span: param.name.span,
        });
    }
    Ok(FunctionSchema {
        name: function.name.name.clone(),
        params,
        span,
    })
}

/// The lifecycle function, when present, may only declare reserved parameters.
pub fn check_init_func(schema: &Schema, policy: &Policy, source: &SourceModule) -> VerifyResult<()> {
    let Some(init) = schema.get(&policy.lifecycle_function) else {
        return Ok(());
    };
    match init.ordinary().next() {
        Some(param) => Err(Violation::InitSignature {
            function: init.name.clone(),
            parameter: param.name.clone(),
            excerpt: source.excerpt("arg", param.span),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Verifier;

    fn extract(text: &str) -> VerifyResult<Schema> {
        Verifier::reference().verify_and_extract(text)
    }

    #[test]
    fn test_schema_ordering_and_classification() {
        let schema = extract("def get(key: str, _storage):\n    return _storage[key]\n\ndef hi() -> str:\n    return 'hi'\n")
            .expect("schema");
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["get", "hi"]);
        let get = schema.get("get").expect("get");
        assert_eq!(get.param_names().collect::<Vec<_>>(), vec!["key", "_storage"]);
        assert_eq!(get.params[0].kind, ParamKind::Ordinary);
        assert_eq!(get.params[1].kind, ParamKind::Reserved);
        assert_eq!(schema.to_json().expect("json"), r#"{"get":["key","_storage"],"hi":[]}"#);
    }

    #[test]
    fn test_redeclaration_overwrites_in_place() {
        let schema = extract("def a(x):\n    pass\ndef b():\n    pass\ndef a(y, z):\n    pass\n").expect("schema");
        assert_eq!(schema.to_json().expect("json"), r#"{"a":["y","z"],"b":[]}"#);
    }

    #[test]
    fn test_parameter_styles_in_declaration_order() {
        let schema = extract("def f(a, /, b, *args, c=1, **kw):\n    pass\n").expect("schema");
        let f = schema.get("f").expect("f");
        let styles: Vec<ParamStyle> = f.params.iter().map(|p| p.style).collect();
        assert_eq!(
            styles,
            vec![
                ParamStyle::PositionalOnly,
                ParamStyle::Regular,
                ParamStyle::VarPositional,
                ParamStyle::KeywordOnly,
                ParamStyle::VarKeyword,
            ]
        );
        assert!(f.param("c").expect("c").has_default);
        let required: Vec<&str> = f.params.iter().filter(|p| p.is_required()).map(|p| p.name.as_str()).collect();
        assert_eq!(required, vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_reserved_name_rejected() {
        match extract("def f(_secret):\n    pass\n") {
            Err(Violation::ArgumentNaming { function, parameter, prefix, excerpt }) => {
                assert_eq!(function, "f");
                assert_eq!(parameter, "_secret");
                assert_eq!(prefix, "_");
                assert_eq!(excerpt.column(), 7);
            }
            other => panic!("expected argument naming violation, got {:?}", other),
        }
    }

    #[test]
    fn test_init_signature() {
        extract("def init(_storage, _tx_context):\n    pass\n").expect("reserved only");
        extract("def init():\n    pass\n").expect("no parameters");
        match extract("def init(_storage, x):\n    pass\n") {
            Err(Violation::InitSignature { function, parameter, .. }) => {
                assert_eq!(function, "init");
                assert_eq!(parameter, "x");
            }
            other => panic!("expected init signature violation, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_functions_not_in_schema() {
        let schema = extract("def outer():\n    def inner(_anything):\n        pass\n    return inner\n").expect("schema");
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["outer"]);
    }

    #[test]
    fn test_wire_form_loads_back() {
        let text = r#"{"set":["key","value","_storage"],"init":["_storage","_tx_context"]}"#;
        let schema = Schema::from_json(text, &Policy::reference()).expect("load");
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["set", "init"]);
        assert_eq!(schema.get("set").expect("set").reserved().count(), 1);
        assert_eq!(schema.to_json().expect("json"), text);

        let err = Schema::from_json(r#"{"f":["_x"]}"#, &Policy::reference()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
