use super::{Violation, VerifyResult};
use crate::ast::{IdentifierOccurrence, IdentifierRole, Module, Visitor};
use crate::config::Policy;
use crate::source::SourceModule;

struct IdentifierChecker<'a> {
    source: &'a SourceModule,
    policy: &'a Policy,
    seen: usize,
}

impl Visitor for IdentifierChecker<'_> {
    type Error = Violation;

    fn visit_identifier(&mut self, occurrence: IdentifierOccurrence<'_>) -> VerifyResult<()> {
        self.seen += 1;
        if !self.policy.is_identifier_denied(occurrence.name) {
            return Ok(());
        }
        log::debug!(
            "identifier rejected: '{}' {} at line {}",
            occurrence.name,
            occurrence.role.describe(),
            occurrence.span.start.line
        );
        let node = match occurrence.role {
            IdentifierRole::Load | IdentifierRole::Store | IdentifierRole::Delete => "Name",
            IdentifierRole::FunctionName => "FunctionDef",
            IdentifierRole::ClassName => "ClassDef",
            IdentifierRole::Parameter => "arg",
            IdentifierRole::ImportAlias => "alias",
            IdentifierRole::ExceptName => "ExceptHandler",
            IdentifierRole::ScopeDeclaration => "Global",
        };
        Err(Violation::Identifier {
            name: occurrence.name.to_string(),
            role: occurrence.role,
            excerpt: self.source.excerpt(node, occurrence.span),
        })
    }
}

pub fn check_identifiers(module: &Module, source: &SourceModule, policy: &Policy) -> VerifyResult<()> {
    let mut checker = IdentifierChecker { source, policy, seen: 0 };
    checker.visit_module(module)?;
    log::debug!("identifiers ok: {} occurrences", checker.seen);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check(text: &str) -> VerifyResult<()> {
        let module = parse(text).expect("parse");
        check_identifiers(&module, &SourceModule::new(text), &Policy::reference())
    }

    fn rejected(text: &str) -> (String, IdentifierRole) {
        match check(text) {
            Err(Violation::Identifier { name, role, .. }) => (name, role),
            other => panic!("expected identifier violation, got {:?}", other),
        }
    }

    #[test]
    fn test_clean_module_accepted() {
        check("import math\ndef f(x, _storage):\n    y = [i * 2 for i in range(x)]\n    return {k: v for k, v in _storage.items()}\n")
            .expect("accepted");
    }

    #[test]
    fn test_references_rejected() {
        assert_eq!(rejected("def hi():\n    open('f'); return 1\n"), ("open".to_string(), IdentifierRole::Load));
        assert_eq!(rejected("def f():\n    return eval\n").0, "eval");
        assert_eq!(rejected("def f():\n    del globals\n"), ("globals".to_string(), IdentifierRole::Delete));
    }

    #[test]
    fn test_binding_sites_rejected() {
        assert_eq!(rejected("open = 'hi'\n"), ("open".to_string(), IdentifierRole::Store));
        assert_eq!(rejected("def exec():\n    pass\n"), ("exec".to_string(), IdentifierRole::FunctionName));
        assert_eq!(rejected("def f(input):\n    pass\n"), ("input".to_string(), IdentifierRole::Parameter));
        assert_eq!(rejected("def f(*vars):\n    pass\n"), ("vars".to_string(), IdentifierRole::Parameter));
        assert_eq!(rejected("import math as id\n"), ("id".to_string(), IdentifierRole::ImportAlias));
        assert_eq!(rejected("from math import exit\n"), ("exit".to_string(), IdentifierRole::ImportAlias));
        assert_eq!(
            rejected("def f():\n    try:\n        pass\n    except E as help:\n        pass\n"),
            ("help".to_string(), IdentifierRole::ExceptName)
        );
        assert_eq!(
            rejected("def f():\n    global quit\n"),
            ("quit".to_string(), IdentifierRole::ScopeDeclaration)
        );
        assert_eq!(rejected("class compile:\n    pass\n"), ("compile".to_string(), IdentifierRole::ClassName));
    }

    #[test]
    fn test_nested_expression_sites_rejected() {
        assert_eq!(rejected("def f(f=open('hi.txt')):\n    pass\n").0, "open");
        assert_eq!(rejected("@breakpoint\ndef f():\n    pass\n").0, "breakpoint");
        assert_eq!(rejected("def f(x: memoryview):\n    pass\n").0, "memoryview");
        assert_eq!(rejected("def f():\n    return f'{vars()}'\n").0, "vars");
        assert_eq!(rejected("def f():\n    g = lambda: __import__('os')\n").0, "__import__");
        assert_eq!(rejected("def f():\n    for runfile in x:\n        pass\n"), ("runfile".to_string(), IdentifierRole::Store));
        assert_eq!(rejected("def f():\n    if (execfile := 1):\n        pass\n").0, "execfile");
        assert_eq!(rejected("def f():\n    return [get_ipython for _ in x]\n").0, "get_ipython");
    }

    #[test]
    fn test_attributes_and_keywords_not_checked() {
        check("import math\ndef f(x):\n    return x.open(eval=1).exec\n").expect("accepted");
    }

    #[test]
    fn test_case_sensitive() {
        check("def f(Open, EVAL):\n    return Open\n").expect("accepted");
    }

    #[test]
    fn test_fstring_identifier_excerpt_points_at_literal() {
        let err = check("def f():\n    return f'{open}'\n").unwrap_err();
        let excerpt = err.excerpt().expect("excerpt");
        assert_eq!(excerpt.line(), 2);
        assert_eq!(excerpt.column(), 12);
    }
}
