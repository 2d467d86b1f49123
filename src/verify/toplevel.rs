use super::{Violation, VerifyResult};
use crate::ast::{ExprKind, Module, Stmt, StmtKind};
use crate::source::SourceModule;

/// Classification of a module-level statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopLevelKind {
    Import,
    ImportFrom,
    FunctionDef,
    /// Bare literal such as a docstring
    ConstantExpression,
    /// Anything else, by node kind name
    Other(&'static str),
}

impl TopLevelKind {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, TopLevelKind::Other(_))
    }
}

pub fn classify(stmt: &Stmt) -> TopLevelKind {
    match &stmt.kind {
        StmtKind::Import(_) => TopLevelKind::Import,
        StmtKind::ImportFrom { .. } => TopLevelKind::ImportFrom,
        StmtKind::FunctionDef(function) if !function.is_async => TopLevelKind::FunctionDef,
        StmtKind::Expr(expr) if matches!(expr.kind, ExprKind::Constant(_)) => {
            TopLevelKind::ConstantExpression
        }
        _ => TopLevelKind::Other(stmt.kind.name()),
    }
}

pub fn check_top_level(module: &Module, source: &SourceModule) -> VerifyResult<()> {
    for stmt in &module.body {
        let kind = classify(stmt);
        log::trace!("top-level {} at line {}: {:?}", stmt.kind.name(), stmt.span.start.line, kind);
        if let TopLevelKind::Other(name) = kind {
            return Err(Violation::TopLevel {
                kind: name.to_string(),
                excerpt: source.excerpt(name, stmt.span),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check(text: &str) -> VerifyResult<()> {
        let module = parse(text).expect("parse");
        check_top_level(&module, &SourceModule::new(text))
    }

    fn rejected_kind(text: &str) -> String {
        match check(text) {
            Err(Violation::TopLevel { kind, .. }) => kind,
            other => panic!("expected top-level violation, got {:?}", other),
        }
    }

    #[test]
    fn test_declarations_and_constants_allowed() {
        let text = "\"\"\"Module docstring\"\"\"\n\
                    import math\n\
                    from typing import List\n\
                    'a' 'b'\n\
                    42\n\
                    None\n\
                    ...\n\
                    @decorated\n\
                    def f(x):\n    return x\n";
        check(text).expect("accepted");
    }

    #[test]
    fn test_statements_rejected() {
        assert_eq!(rejected_kind("x = 1\n"), "Assign");
        assert_eq!(rejected_kind("x: int = 1\n"), "AnnAssign");
        assert_eq!(rejected_kind("x += 1\n"), "AugAssign");
        assert_eq!(rejected_kind("for i in range(3):\n    pass\n"), "For");
        assert_eq!(rejected_kind("while True:\n    pass\n"), "While");
        assert_eq!(rejected_kind("if True:\n    pass\n"), "If");
        assert_eq!(rejected_kind("class C:\n    pass\n"), "ClassDef");
        assert_eq!(rejected_kind("with a:\n    pass\n"), "With");
        assert_eq!(rejected_kind("try:\n    pass\nfinally:\n    pass\n"), "Try");
        assert_eq!(rejected_kind("pass\n"), "Pass");
        assert_eq!(rejected_kind("del x\n"), "Delete");
        assert_eq!(rejected_kind("global x\n"), "Global");
        assert_eq!(rejected_kind("async def g():\n    pass\n"), "AsyncFunctionDef");
    }

    #[test]
    fn test_nested_async_def_not_top_level() {
        check("def f():\n    async def g():\n        pass\n    return g\n").expect("accepted");
    }

    #[test]
    fn test_non_constant_expressions_rejected() {
        assert_eq!(rejected_kind("print('hi')\n"), "Expr");
        assert_eq!(rejected_kind("f'{x}'\n"), "Expr");
        assert_eq!(rejected_kind("-1\n"), "Expr");
        assert_eq!(rejected_kind("[1, 2]\n"), "Expr");
    }

    #[test]
    fn test_first_violation_wins() {
        let err = check("def f():\n    pass\nx = 1\ny = 2\n").unwrap_err();
        match err {
            Violation::TopLevel { excerpt, .. } => {
                assert_eq!(excerpt.line(), 3);
                assert_eq!(excerpt.lines, vec![(3, "x = 1".to_string())]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_excerpt_spans_whole_compound_statement() {
        let err = check("for i in x:\n    a = i\n    b = i\n\ndef f():\n    pass\n").unwrap_err();
        let excerpt = err.excerpt().expect("excerpt").clone();
        let numbers: Vec<usize> = excerpt.lines.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
