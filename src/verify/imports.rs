use super::{ImportForm, Violation, VerifyResult};
use crate::ast::{walk_stmt, Module, Stmt, StmtKind, Visitor};
use crate::config::Policy;
use crate::source::SourceModule;

/// Walks the whole tree; imports nested in functions, branches and
/// handlers are checked like module-level ones.
struct ImportChecker<'a> {
    source: &'a SourceModule,
    policy: &'a Policy,
    checked: usize,
}

impl ImportChecker<'_> {
    fn reject(&self, stmt: &Stmt, module: String, form: ImportForm) -> Violation {
        log::debug!("import rejected: {} '{}' at line {}", form, module, stmt.span.start.line);
        Violation::Import {
            module,
            form,
            excerpt: self.source.excerpt(stmt.kind.name(), stmt.span),
        }
    }
}

impl Visitor for ImportChecker<'_> {
    type Error = Violation;

    fn visit_stmt(&mut self, stmt: &Stmt) -> VerifyResult<()> {
        match &stmt.kind {
            StmtKind::Import(names) => {
                for alias in names {
                    self.checked += 1;
                    if !self.policy.is_module_allowed(&alias.name) {
                        return Err(self.reject(stmt, alias.name.clone(), ImportForm::Import));
                    }
                }
                Ok(())
            }
            StmtKind::ImportFrom { module, level, .. } => {
                self.checked += 1;
                match module {
                    Some(name) if *level == 0 => {
                        if self.policy.is_module_allowed(name) {
                            Ok(())
                        } else {
                            Err(self.reject(stmt, name.clone(), ImportForm::ImportFrom))
                        }
                    }
                    // relative imports have no absolute module to check
                    _ => {
                        let written = format!("{}{}", ".".repeat(*level), module.as_deref().unwrap_or(""));
                        Err(self.reject(stmt, written, ImportForm::RelativeImport))
                    }
                }
            }
            _ => walk_stmt(self, stmt),
        }
    }
}

pub fn check_imports(module: &Module, source: &SourceModule, policy: &Policy) -> VerifyResult<()> {
    let mut checker = ImportChecker { source, policy, checked: 0 };
    checker.visit_module(module)?;
    log::debug!("imports ok: {} checked", checker.checked);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check_with(text: &str, policy: &Policy) -> VerifyResult<()> {
        let module = parse(text).expect("parse");
        check_imports(&module, &SourceModule::new(text), policy)
    }

    fn check(text: &str) -> VerifyResult<()> {
        check_with(text, &Policy::reference())
    }

    fn rejected(text: &str) -> (String, ImportForm) {
        match check(text) {
            Err(Violation::Import { module, form, .. }) => (module, form),
            other => panic!("expected import violation, got {:?}", other),
        }
    }

    #[test]
    fn test_allowed_modules() {
        check("import math\nimport cmath, typing\nimport hashlib as h\nfrom hmac import new\n").expect("accepted");
        check("from typing import (List,\n    Dict,)\nfrom math import *\n").expect("accepted");
    }

    #[test]
    fn test_disallowed_plain_import() {
        assert_eq!(rejected("import sys\n"), ("sys".to_string(), ImportForm::Import));
        assert_eq!(rejected("import math, os\n"), ("os".to_string(), ImportForm::Import));
    }

    #[test]
    fn test_dotted_names_compared_verbatim() {
        assert_eq!(rejected("import math.x\n"), ("math.x".to_string(), ImportForm::Import));
        assert_eq!(rejected("from os.path import join\n"), ("os.path".to_string(), ImportForm::ImportFrom));
    }

    #[test]
    fn test_relative_import_rejected() {
        assert_eq!(rejected("from . import math\n"), (".".to_string(), ImportForm::RelativeImport));
        assert_eq!(rejected("from ..math import pi\n"), ("..math".to_string(), ImportForm::RelativeImport));
    }

    #[test]
    fn test_nested_imports_found() {
        assert_eq!(
            rejected("def f():\n    from sys import api_version\n    return api_version\n").0,
            "sys"
        );
        assert_eq!(
            rejected("def f():\n    try:\n        pass\n    except E:\n        if x:\n            import socket\n").0,
            "socket"
        );
        assert_eq!(rejected("class C:\n    def m(self):\n        import os\n").0, "os");
    }

    #[test]
    fn test_policy_controls_allowlist() {
        let policy = Policy::default().with_allowed_module("json").without_allowed_module("math");
        check_with("import json\n", &policy).expect("json allowed");
        assert!(check_with("import math\n", &policy).is_err());
    }

    #[test]
    fn test_violation_points_at_import() {
        let err = check("import math\n\ndef f():\n    import os\n").unwrap_err();
        let excerpt = err.excerpt().expect("excerpt");
        assert_eq!(excerpt.node, "Import");
        assert_eq!(excerpt.line(), 4);
        assert_eq!(excerpt.column(), 5);
    }
}
