mod common;

use common::{ok, rejected};
use contract_verifier::ast::IdentifierRole;
use contract_verifier::{ImportForm, Policy, Verifier, Violation};

#[test]
fn hello_function_verifies() {
    let schema = ok("def hi() -> str: return \"hi\"\n");
    assert_eq!(schema.to_json().unwrap(), r#"{"hi":[]}"#);
}

#[test]
fn comments_and_docstrings_allowed() {
    ok(r#"
# I am a comment
""" This is a doc string """
def f(x:int, y:int) -> int:
    return x + y
"#);
}

#[test]
fn module_level_assignment_rejected() {
    let v = rejected("x = 1\n");
    assert!(matches!(v, Violation::TopLevel { ref kind, .. } if kind == "Assign"));
    assert!(v.to_string().starts_with("top-level:"));
}

#[test]
fn assignment_after_function_rejected() {
    let v = rejected(r#"
def hi() -> str:
    return "hi"

x = 1
    "#);
    assert_eq!(v.code(), "top_level");
    assert_eq!(v.line(), 5);
}

#[test]
fn import_sys_rejected_import_math_allowed() {
    let v = rejected("import sys\n");
    assert!(matches!(v, Violation::Import { ref module, form: ImportForm::Import, .. } if module == "sys"));
    ok("import math\n");
}

#[test]
fn nested_allowed_import() {
    ok(r#"
import math

def hi() -> str:
    from math import sin
    return sin(1.0)
"#);
}

#[test]
fn nested_disallowed_import() {
    let v = rejected(r#"
import math

def hi() -> str:
    from sys import api_version
    return str(api_version)
"#);
    assert!(matches!(v, Violation::Import { ref module, form: ImportForm::ImportFrom, .. } if module == "sys"));
}

#[test]
fn open_call_rejected() {
    let v = rejected("def hi(): open('f'); return 1\n");
    assert!(matches!(v, Violation::Identifier { ref name, role: IdentifierRole::Load, .. } if name == "open"));
}

#[test]
fn open_call_in_body_rejected() {
    let v = rejected(r#"
def hi() -> str:
    x = open('hi.txt', 'r')
    s = x.read()
    x.close()
    return s
"#);
    assert_eq!(v.code(), "identifier");
    assert_eq!(v.line(), 3);
}

#[test]
fn shadowing_denied_name_rejected() {
    let v = rejected(r#"
def hi() -> str:
    open = 'hi'
    return open
"#);
    assert!(matches!(v, Violation::Identifier { role: IdentifierRole::Store, .. }));
}

#[test]
fn denied_name_in_default_rejected() {
    let v = rejected(r#"
def hi(f=open('hi.txt')):
    return f
"#);
    assert!(matches!(v, Violation::Identifier { ref name, .. } if name == "open"));
}

#[test]
fn every_reference_denied_identifier_rejected() {
    for name in Policy::reference().denied_identifiers.iter() {
        let src = format!("def f():\n    return {}\n", name);
        let v = rejected(&src);
        assert!(
            matches!(v, Violation::Identifier { name: ref found, .. } if found == name),
            "{} should be rejected",
            name
        );
    }
}

#[test]
fn attribute_chain_not_blocked() {
    // attribute traversal is outside what the identifier filter sees
    ok("def f(x):\n    return x.__class__.__bases__\n");
}

#[test]
fn malformed_source_reported() {
    let v = rejected("def f(:\n    pass\n");
    assert!(matches!(v, Violation::MalformedSource(_)));
    assert!(v.to_string().starts_with("malformed source:"));
}

#[test]
fn match_statement_unsupported() {
    let v = rejected("def f(x):\n    match x:\n        case 1:\n            pass\n");
    assert_eq!(v.code(), "malformed_source");
}

#[test]
fn verification_is_idempotent() {
    let src = "import math\ndef f(a, _storage):\n    return math.sqrt(a)\n";
    let first = ok(src).to_json().unwrap();
    let second = ok(src).to_json().unwrap();
    assert_eq!(first, second);

    let v1 = rejected("import os\n");
    let v2 = rejected("import os\n");
    assert_eq!(v1, v2);
}

#[test]
fn stricter_policy_coexists_with_reference() {
    let strict = Verifier::new(Policy::default().without_allowed_module("hashlib").with_denied_identifier("getattr"));
    let src = "import hashlib\ndef f(x):\n    return getattr(x, 'y')\n";
    assert!(strict.verify(src).is_err());
    assert!(Verifier::reference().verify(src).is_ok());

    let src = "def f(x):\n    return getattr(x, 'y')\n";
    assert!(matches!(strict.verify(src), Err(Violation::Identifier { .. })));
}

#[test]
fn verifier_shared_across_threads() {
    let verifier = Verifier::reference();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let verifier = verifier.clone();
            std::thread::spawn(move || {
                let src = format!("def f{}(x):\n    return x + {}\n", i, i);
                verifier.verify_and_extract(&src).map(|s| s.to_json().unwrap())
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let json = handle.join().unwrap().unwrap();
        assert_eq!(json, format!(r#"{{"f{}":["x"]}}"#, i));
    }
}

#[test]
fn pathological_nesting_is_malformed_source() {
    let sources = [
        format!("def f():\n    return 1{}\n", "+1".repeat(10_000)),
        format!("def f(x):\n    return x{}\n", ".a".repeat(200_000)),
        format!("def f(x):\n    return x{}\n", "()".repeat(200_000)),
        format!("def f():\n    return {}1{}\n", "(".repeat(99), ")".repeat(99)),
        format!("def f():\n    return {}1{}\n", "[".repeat(5000), "]".repeat(5000)),
    ];
    for source in &sources {
        match rejected(source) {
            Violation::MalformedSource(error) => assert_eq!(error.location().line, 2),
            other => panic!("expected malformed source, got {:?}", other),
        }
    }
}

#[test]
fn moderately_nested_module_verifies() {
    let source = format!(
        "def f(x):\n    return {}x{}{}\n",
        "(".repeat(20),
        ")".repeat(20),
        "+x".repeat(30)
    );
    let schema = ok(&source);
    assert_eq!(schema.to_json().unwrap(), r#"{"f":["x"]}"#);
}
