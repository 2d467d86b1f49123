mod common;

use std::fs;

use contract_verifier::ast::{dump, Constant, ExprKind, ParamStyle, StmtKind};
use contract_verifier::parser::{parse_module, ParseError};

#[test]
fn parse_basic_contract() {
    common::init_logger();
    let source = fs::read_to_string(common::fixture("ok_basic.py")).unwrap();
    let module = parse_module(&source).expect("Failed to parse");

    let functions: Vec<&str> = module
        .body
        .iter()
        .filter_map(|stmt| match &stmt.kind {
            StmtKind::FunctionDef(function) => Some(function.name.name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(functions, vec!["hi", "plus_one", "set", "get", "init"]);
    assert_eq!(module.body.len(), 9);
    assert!(matches!(
        &module.body[1].kind,
        StmtKind::ImportFrom { module: Some(name), level: 0, .. } if name == "typing"
    ));
}

#[test]
fn parse_function_signature() {
    let module = parse_module("def f(a, /, b: int = 2, *rest, c, d=4, **opts) -> None:\n    pass\n")
        .expect("Failed to parse");
    let function = match &module.body[0].kind {
        StmtKind::FunctionDef(function) => function,
        other => panic!("expected function, got {:?}", other),
    };
    let styles: Vec<(&str, ParamStyle)> = function
        .params
        .iter()
        .map(|p| (p.name.name.as_str(), p.style))
        .collect();
    assert_eq!(
        styles,
        vec![
            ("a", ParamStyle::PositionalOnly),
            ("b", ParamStyle::Regular),
            ("rest", ParamStyle::VarPositional),
            ("c", ParamStyle::KeywordOnly),
            ("d", ParamStyle::KeywordOnly),
            ("opts", ParamStyle::VarKeyword),
        ]
    );
    assert!(function.returns.is_some());
    assert!(function.params.args[0].annotation.is_some());
}

#[test]
fn parse_module_docstring_is_constant() {
    let module = parse_module("\"\"\"doc\"\"\"\n").expect("Failed to parse");
    match &module.body[0].kind {
        StmtKind::Expr(expr) => {
            assert!(expr.is_constant());
            assert!(matches!(&expr.kind, ExprKind::Constant(Constant::Str(s)) if s == "doc"));
        }
        other => panic!("expected expression, got {:?}", other),
    }
}

#[test]
fn parse_control_flow() {
    let source = r#"
def f(items, _storage):
    total = 0
    for i, item in enumerate(items):
        if item is None:
            continue
        elif item > 10:
            break
        total += item
    else:
        total = -1
    while total > 100:
        total //= 2
    try:
        _storage["t"] = total
    except (KeyError, ValueError) as e:
        raise RuntimeError("bad") from e
    finally:
        pass
    with lock() as held, other():
        pass
    return [x * 2 for x in items if x], {k: v for k, v in _storage.items()}
"#;
    let module = parse_module(source).expect("Failed to parse");
    let printed = dump(&module);
    for node in ["For", "If", "AugAssign", "While", "Try", "Raise", "With", "Return", "ListComp", "DictComp"] {
        assert!(printed.contains(node), "missing {} in\n{}", node, printed);
    }
}

#[test]
fn parse_class_and_decorators() {
    let source = "@decorate(1)\nclass Token(Base, metaclass=Meta):\n    name: str = 'x'\n    def total(self):\n        return self.name\n";
    let module = parse_module(source).expect("Failed to parse");
    match &module.body[0].kind {
        StmtKind::ClassDef(class) => {
            assert_eq!(class.name.name, "Token");
            assert_eq!(class.decorators.len(), 1);
            assert_eq!(class.bases.len(), 1);
            assert_eq!(class.keywords.len(), 1);
            assert_eq!(class.body.len(), 2);
        }
        other => panic!("expected class, got {:?}", other),
    }
}

#[test]
fn parse_errors_carry_locations() {
    let err = parse_module("def f(:\n    pass\n").unwrap_err();
    assert_eq!(err.location().line, 1);

    let err = parse_module("def f():\nreturn 1\n").unwrap_err();
    assert_eq!(err.location().line, 2);

    assert!(matches!(parse_module("x = (1 +"), Err(ParseError::UnexpectedEndOfInput { .. })));
    assert!(matches!(parse_module("1 = x\n"), Err(ParseError::InvalidSyntax { .. })));
}

#[test]
fn parse_deep_nesting_rejected() {
    let source = format!("x = {}1{}\n", "[".repeat(500), "]".repeat(500));
    assert!(matches!(parse_module(&source), Err(ParseError::NestingTooDeep { .. })));

    let source = format!("x = {}1{}\n", "(".repeat(20), ")".repeat(20));
    assert!(parse_module(&source).is_ok());
}

fn nested_ifs(levels: usize) -> String {
    let mut source = String::from("def f(x):\n");
    for level in 1..=levels {
        source.push_str(&"    ".repeat(level));
        source.push_str("if x:\n");
    }
    source.push_str(&"    ".repeat(levels + 1));
    source.push_str("pass\n");
    source
}

fn too_deep(source: &str) -> bool {
    matches!(parse_module(source), Err(ParseError::NestingTooDeep { .. }))
}

#[test]
fn parse_long_flat_chains_rejected() {
    common::init_logger();
    assert!(too_deep(&format!("def f():\n    return 1{}\n", "+1".repeat(10_000))));
    assert!(too_deep(&format!("def f():\n    return 2{}\n", "**2".repeat(10_000))));
    assert!(too_deep(&format!("def f(x):\n    return x{}\n", ".a".repeat(200_000))));
    assert!(too_deep(&format!("def f(x):\n    return x{}\n", "()".repeat(200_000))));
    assert!(too_deep(&format!("def f(x):\n    return x{}\n", "[0]".repeat(200_000))));
    assert!(too_deep(&format!("def f(x):\n    return {}x\n", "not ".repeat(10_000))));
    assert!(too_deep(&format!("def f(x):\n    return ({}1{})\n", "(".repeat(99), ")".repeat(99))));
}

#[test]
fn parse_moderate_chains_accepted() {
    parse_module(&format!("def f():\n    return 1{}\n", "+1".repeat(50))).expect("sum");
    parse_module(&format!("def f(x):\n    return x{}\n", ".a".repeat(50))).expect("attributes");
    parse_module(&format!("def f(x):\n    return x{}\n", "()".repeat(50))).expect("calls");
    parse_module("def f(x):\n    return 1 + 2 * 3 - x | 4 & 5 ^ 6 << 7 >> 8 // 9 % 10 @ x\n").expect("mixed");
}

#[test]
fn parse_deep_indentation_rejected() {
    common::init_logger();
    assert!(too_deep(&nested_ifs(2000)));
    parse_module(&nested_ifs(20)).expect("shallow");

    let mut source = String::from("def f(x):\n    if x:\n        pass\n");
    source.push_str(&"    elif x:\n        pass\n".repeat(5000));
    assert!(too_deep(&source));
}
