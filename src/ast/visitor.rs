use super::*;

/// Role an identifier plays at the site where it was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierRole {
    /// Name read in an expression
    Load,
    /// Name assigned to (assignment, loop, `with ... as`, walrus target)
    Store,
    /// Name deleted with `del`
    Delete,
    FunctionName,
    ClassName,
    Parameter,
    /// Name bound by `import x` / `import x as y` / `from m import x as y`
    ImportAlias,
    /// Name bound by `except E as name`
    ExceptName,
    /// Name listed in `global` / `nonlocal`
    ScopeDeclaration,
}

impl IdentifierRole {
    pub fn describe(&self) -> &'static str {
        match self {
            IdentifierRole::Load => "referenced",
            IdentifierRole::Store => "assigned",
            IdentifierRole::Delete => "deleted",
            IdentifierRole::FunctionName => "declared as a function",
            IdentifierRole::ClassName => "declared as a class",
            IdentifierRole::Parameter => "declared as a parameter",
            IdentifierRole::ImportAlias => "bound by an import",
            IdentifierRole::ExceptName => "bound by an exception handler",
            IdentifierRole::ScopeDeclaration => "declared global or nonlocal",
        }
    }
}

impl From<NameContext> for IdentifierRole {
    fn from(ctx: NameContext) -> Self {
        match ctx {
            NameContext::Load => IdentifierRole::Load,
            NameContext::Store => IdentifierRole::Store,
            NameContext::Del => IdentifierRole::Delete,
        }
    }
}

/// An identifier found anywhere in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierOccurrence<'a> {
    pub name: &'a str,
    pub role: IdentifierRole,
    pub span: Span,
}

/// Fallible tree visitor. Every hook defaults to the matching `walk_*`
/// function, so implementors override only the nodes they care about and
/// the first `Err` stops the whole walk.
pub trait Visitor {
    type Error;

    fn visit_module(&mut self, module: &Module) -> Result<(), Self::Error> {
        walk_module(self, module)
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), Self::Error> {
        walk_stmt(self, stmt)
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<(), Self::Error> {
        walk_expr(self, expr)
    }

    fn visit_parameters(&mut self, params: &Parameters) -> Result<(), Self::Error> {
        walk_parameters(self, params)
    }

    fn visit_identifier(&mut self, occurrence: IdentifierOccurrence<'_>) -> Result<(), Self::Error> {
        let _ = occurrence;
        Ok(())
    }
}

fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt]) -> Result<(), V::Error> {
    for stmt in body {
        visitor.visit_stmt(stmt)?;
    }
    Ok(())
}

fn walk_exprs<V: Visitor + ?Sized>(visitor: &mut V, exprs: &[Expr]) -> Result<(), V::Error> {
    for expr in exprs {
        visitor.visit_expr(expr)?;
    }
    Ok(())
}

fn walk_opt<V: Visitor + ?Sized>(visitor: &mut V, expr: Option<&Expr>) -> Result<(), V::Error> {
    match expr {
        Some(expr) => visitor.visit_expr(expr),
        None => Ok(()),
    }
}

fn identifier<V: Visitor + ?Sized>(
    visitor: &mut V,
    ident: &Identifier,
    role: IdentifierRole,
) -> Result<(), V::Error> {
    visitor.visit_identifier(IdentifierOccurrence {
        name: &ident.name,
        role,
        span: ident.span,
    })
}

fn walk_comprehensions<V: Visitor + ?Sized>(
    visitor: &mut V,
    generators: &[Comprehension],
) -> Result<(), V::Error> {
    for generator in generators {
        visitor.visit_expr(&generator.target)?;
        visitor.visit_expr(&generator.iter)?;
        walk_exprs(visitor, &generator.ifs)?;
    }
    Ok(())
}

pub fn walk_module<V: Visitor + ?Sized>(visitor: &mut V, module: &Module) -> Result<(), V::Error> {
    walk_body(visitor, &module.body)
}

pub fn walk_parameters<V: Visitor + ?Sized>(visitor: &mut V, params: &Parameters) -> Result<(), V::Error> {
    for param in params.iter() {
        identifier(visitor, &param.name, IdentifierRole::Parameter)?;
        walk_opt(visitor, param.annotation.as_ref())?;
        walk_opt(visitor, param.default.as_ref())?;
    }
    Ok(())
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) -> Result<(), V::Error> {
    match &stmt.kind {
        StmtKind::FunctionDef(function) => {
            walk_exprs(visitor, &function.decorators)?;
            identifier(visitor, &function.name, IdentifierRole::FunctionName)?;
            visitor.visit_parameters(&function.params)?;
            walk_opt(visitor, function.returns.as_ref())?;
            walk_body(visitor, &function.body)
        }
        StmtKind::ClassDef(class) => {
            walk_exprs(visitor, &class.decorators)?;
            identifier(visitor, &class.name, IdentifierRole::ClassName)?;
            walk_exprs(visitor, &class.bases)?;
            for keyword in &class.keywords {
                visitor.visit_expr(&keyword.value)?;
            }
            walk_body(visitor, &class.body)
        }
        StmtKind::Return(value) => walk_opt(visitor, value.as_ref()),
        StmtKind::Delete(targets) => walk_exprs(visitor, targets),
        StmtKind::Assign { targets, value } => {
            walk_exprs(visitor, targets)?;
            visitor.visit_expr(value)
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr(target)?;
            visitor.visit_expr(value)
        }
        StmtKind::AnnAssign { target, annotation, value } => {
            visitor.visit_expr(target)?;
            visitor.visit_expr(annotation)?;
            walk_opt(visitor, value.as_ref())
        }
        StmtKind::For { target, iter, body, orelse, .. } => {
            visitor.visit_expr(target)?;
            visitor.visit_expr(iter)?;
            walk_body(visitor, body)?;
            walk_body(visitor, orelse)
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            visitor.visit_expr(test)?;
            walk_body(visitor, body)?;
            walk_body(visitor, orelse)
        }
        StmtKind::With { items, body, .. } => {
            for item in items {
                visitor.visit_expr(&item.context_expr)?;
                walk_opt(visitor, item.optional_vars.as_ref())?;
            }
            walk_body(visitor, body)
        }
        StmtKind::Raise { exc, cause } => {
            walk_opt(visitor, exc.as_ref())?;
            walk_opt(visitor, cause.as_ref())
        }
        StmtKind::Try { body, handlers, orelse, finalbody } => {
            walk_body(visitor, body)?;
            for handler in handlers {
                walk_opt(visitor, handler.type_.as_ref())?;
                if let Some(name) = &handler.name {
                    identifier(visitor, name, IdentifierRole::ExceptName)?;
                }
                walk_body(visitor, &handler.body)?;
            }
            walk_body(visitor, orelse)?;
            walk_body(visitor, finalbody)
        }
        StmtKind::Assert { test, msg } => {
            visitor.visit_expr(test)?;
            walk_opt(visitor, msg.as_ref())
        }
        StmtKind::Import(names) => {
            for alias in names {
                visitor.visit_identifier(IdentifierOccurrence {
                    name: alias.bound_name(false),
                    role: IdentifierRole::ImportAlias,
                    span: alias.span,
                })?;
            }
            Ok(())
        }
        StmtKind::ImportFrom { names, .. } => {
            for alias in names.iter().filter(|alias| alias.name != "*") {
                visitor.visit_identifier(IdentifierOccurrence {
                    name: alias.bound_name(true),
                    role: IdentifierRole::ImportAlias,
                    span: alias.span,
                })?;
            }
            Ok(())
        }
        StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
            for name in names {
                identifier(visitor, name, IdentifierRole::ScopeDeclaration)?;
            }
            Ok(())
        }
        StmtKind::Expr(value) => visitor.visit_expr(value),
        StmtKind::Pass | StmtKind::Break | StmtKind::Continue => Ok(()),
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) -> Result<(), V::Error> {
    match &expr.kind {
        ExprKind::BoolOp { values, .. } => walk_exprs(visitor, values),
        ExprKind::NamedExpr { target, value } => {
            visitor.visit_expr(target)?;
            visitor.visit_expr(value)
        }
        ExprKind::BinOp { left, right, .. } => {
            visitor.visit_expr(left)?;
            visitor.visit_expr(right)
        }
        ExprKind::UnaryOp { operand, .. } => visitor.visit_expr(operand),
        ExprKind::Lambda { params, body } => {
            visitor.visit_parameters(params)?;
            visitor.visit_expr(body)
        }
        ExprKind::IfExp { test, body, orelse } => {
            visitor.visit_expr(test)?;
            visitor.visit_expr(body)?;
            visitor.visit_expr(orelse)
        }
        ExprKind::Dict { keys, values } => {
            for (key, value) in keys.iter().zip(values) {
                walk_opt(visitor, key.as_ref())?;
                visitor.visit_expr(value)?;
            }
            Ok(())
        }
        ExprKind::Set(elts) | ExprKind::List(elts) | ExprKind::Tuple(elts) => walk_exprs(visitor, elts),
        ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators }
        | ExprKind::GeneratorExp { elt, generators } => {
            visitor.visit_expr(elt)?;
            walk_comprehensions(visitor, generators)
        }
        ExprKind::DictComp { key, value, generators } => {
            visitor.visit_expr(key)?;
            visitor.visit_expr(value)?;
            walk_comprehensions(visitor, generators)
        }
        ExprKind::Await(value) | ExprKind::YieldFrom(value) | ExprKind::Starred(value) => {
            visitor.visit_expr(value)
        }
        ExprKind::Yield(value) => walk_opt(visitor, value.as_deref()),
        ExprKind::Compare { left, comparators, .. } => {
            visitor.visit_expr(left)?;
            walk_exprs(visitor, comparators)
        }
        ExprKind::Call { func, args, keywords } => {
            visitor.visit_expr(func)?;
            walk_exprs(visitor, args)?;
            for keyword in keywords {
                visitor.visit_expr(&keyword.value)?;
            }
            Ok(())
        }
        ExprKind::FormattedString(values) => walk_exprs(visitor, values),
        ExprKind::Constant(_) => Ok(()),
        ExprKind::Attribute { value, .. } => visitor.visit_expr(value),
        ExprKind::Subscript { value, slice } => {
            visitor.visit_expr(value)?;
            visitor.visit_expr(slice)
        }
        ExprKind::Name { id, ctx } => visitor.visit_identifier(IdentifierOccurrence {
            name: id,
            role: (*ctx).into(),
            span: expr.span,
        }),
        ExprKind::Slice { lower, upper, step } => {
            walk_opt(visitor, lower.as_deref())?;
            walk_opt(visitor, upper.as_deref())?;
            walk_opt(visitor, step.as_deref())
        }
    }
}
