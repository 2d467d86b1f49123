use super::nodes::*;

/// Indented structural dump of a syntax tree, used for debug logging and
/// the `parse` command.
pub struct AstPrinter {
    indent_level: usize,
    output: String,
}

impl Default for AstPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl AstPrinter {
    pub fn new() -> Self {
        Self {
            indent_level: 0,
            output: String::new(),
        }
    }

    pub fn print(&mut self, module: &Module) -> String {
        self.output.clear();
        self.indent_level = 0;
        self.writeln("Module");
        self.indent();
        for stmt in &module.body {
            self.print_stmt(stmt);
        }
        self.dedent();
        self.output.clone()
    }

    fn indent(&mut self) {
        self.indent_level += 2;
    }

    fn dedent(&mut self) {
        if self.indent_level >= 2 {
            self.indent_level -= 2;
        }
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent_level {
            self.output.push(' ');
        }
    }

    fn writeln(&mut self, s: &str) {
        self.write_indent();
        self.output.push_str(s);
        self.output.push('\n');
    }

    fn section(&mut self, label: &str, body: &[Stmt]) {
        if body.is_empty() {
            return;
        }
        self.writeln(&format!("{}:", label));
        self.indent();
        for stmt in body {
            self.print_stmt(stmt);
        }
        self.dedent();
    }

    fn field(&mut self, label: &str, expr: &Expr) {
        self.writeln(&format!("{}:", label));
        self.indent();
        self.print_expr(expr);
        self.dedent();
    }

    fn opt_field(&mut self, label: &str, expr: Option<&Expr>) {
        if let Some(expr) = expr {
            self.field(label, expr);
        }
    }

    fn list_field(&mut self, label: &str, exprs: &[Expr]) {
        if exprs.is_empty() {
            return;
        }
        self.writeln(&format!("{}:", label));
        self.indent();
        for expr in exprs {
            self.print_expr(expr);
        }
        self.dedent();
    }

    fn print_params(&mut self, params: &Parameters) {
        for param in params.iter() {
            let marker = match param.style {
                ParamStyle::VarPositional => "*",
                ParamStyle::VarKeyword => "**",
                _ => "",
            };
            self.writeln(&format!("arg {}{} ({:?})", marker, param.name.name, param.style));
            self.indent();
            self.opt_field("annotation", param.annotation.as_ref());
            self.opt_field("default", param.default.as_ref());
            self.dedent();
        }
    }

    fn print_aliases(&mut self, names: &[Alias]) {
        for alias in names {
            match &alias.asname {
                Some(asname) => self.writeln(&format!("alias {} as {}", alias.name, asname.name)),
                None => self.writeln(&format!("alias {}", alias.name)),
            }
        }
    }

    fn print_stmt(&mut self, stmt: &Stmt) {
        let header = format!("{} @{}", stmt.kind.name(), stmt.span.start);
        match &stmt.kind {
            StmtKind::FunctionDef(function) => {
                self.writeln(&format!("{} {}", header, function.name.name));
                self.indent();
                self.list_field("decorators", &function.decorators);
                self.print_params(&function.params);
                self.opt_field("returns", function.returns.as_ref());
                self.section("body", &function.body);
                self.dedent();
            }
            StmtKind::ClassDef(class) => {
                self.writeln(&format!("{} {}", header, class.name.name));
                self.indent();
                self.list_field("decorators", &class.decorators);
                self.list_field("bases", &class.bases);
                for keyword in &class.keywords {
                    self.print_keyword(keyword);
                }
                self.section("body", &class.body);
                self.dedent();
            }
            StmtKind::Return(value) => {
                self.writeln(&header);
                self.indent();
                if let Some(value) = value {
                    self.print_expr(value);
                }
                self.dedent();
            }
            StmtKind::Delete(targets) => {
                self.writeln(&header);
                self.indent();
                self.list_field("targets", targets);
                self.dedent();
            }
            StmtKind::Assign { targets, value } => {
                self.writeln(&header);
                self.indent();
                self.list_field("targets", targets);
                self.field("value", value);
                self.dedent();
            }
            StmtKind::AugAssign { target, op, value } => {
                self.writeln(&format!("{} {:?}", header, op));
                self.indent();
                self.field("target", target);
                self.field("value", value);
                self.dedent();
            }
            StmtKind::AnnAssign { target, annotation, value } => {
                self.writeln(&header);
                self.indent();
                self.field("target", target);
                self.field("annotation", annotation);
                self.opt_field("value", value.as_ref());
                self.dedent();
            }
            StmtKind::For { target, iter, body, orelse, .. } => {
                self.writeln(&header);
                self.indent();
                self.field("target", target);
                self.field("iter", iter);
                self.section("body", body);
                self.section("orelse", orelse);
                self.dedent();
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                self.writeln(&header);
                self.indent();
                self.field("test", test);
                self.section("body", body);
                self.section("orelse", orelse);
                self.dedent();
            }
            StmtKind::With { items, body, .. } => {
                self.writeln(&header);
                self.indent();
                for item in items {
                    self.field("item", &item.context_expr);
                    self.opt_field("as", item.optional_vars.as_ref());
                }
                self.section("body", body);
                self.dedent();
            }
            StmtKind::Raise { exc, cause } => {
                self.writeln(&header);
                self.indent();
                self.opt_field("exc", exc.as_ref());
                self.opt_field("cause", cause.as_ref());
                self.dedent();
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                self.writeln(&header);
                self.indent();
                self.section("body", body);
                for handler in handlers {
                    match &handler.name {
                        Some(name) => self.writeln(&format!("ExceptHandler as {}", name.name)),
                        None => self.writeln("ExceptHandler"),
                    }
                    self.indent();
                    self.opt_field("type", handler.type_.as_ref());
                    self.section("body", &handler.body);
                    self.dedent();
                }
                self.section("orelse", orelse);
                self.section("finalbody", finalbody);
                self.dedent();
            }
            StmtKind::Assert { test, msg } => {
                self.writeln(&header);
                self.indent();
                self.field("test", test);
                self.opt_field("msg", msg.as_ref());
                self.dedent();
            }
            StmtKind::Import(names) => {
                self.writeln(&header);
                self.indent();
                self.print_aliases(names);
                self.dedent();
            }
            StmtKind::ImportFrom { module, names, level } => {
                let dots = ".".repeat(*level);
                self.writeln(&format!("{} {}{}", header, dots, module.as_deref().unwrap_or("")));
                self.indent();
                self.print_aliases(names);
                self.dedent();
            }
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                let names: Vec<&str> = names.iter().map(|n| n.name.as_str()).collect();
                self.writeln(&format!("{} {}", header, names.join(", ")));
            }
            StmtKind::Expr(value) => {
                self.writeln(&header);
                self.indent();
                self.print_expr(value);
                self.dedent();
            }
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => self.writeln(&header),
        }
    }

    fn print_keyword(&mut self, keyword: &Keyword) {
        match &keyword.arg {
            Some(arg) => self.field(&format!("keyword {}", arg), &keyword.value),
            None => self.field("keyword **", &keyword.value),
        }
    }

    fn print_generators(&mut self, generators: &[Comprehension]) {
        for generator in generators {
            self.writeln("comprehension");
            self.indent();
            self.field("target", &generator.target);
            self.field("iter", &generator.iter);
            self.list_field("ifs", &generator.ifs);
            self.dedent();
        }
    }

    fn print_expr(&mut self, expr: &Expr) {
        let name = expr.kind.name();
        match &expr.kind {
            ExprKind::Name { id, ctx } => self.writeln(&format!("Name {} ({:?})", id, ctx)),
            ExprKind::Constant(constant) => self.writeln(&format!("Constant {}", render_constant(constant))),
            ExprKind::Attribute { value, attr } => {
                self.writeln(&format!("Attribute .{}", attr));
                self.indent();
                self.print_expr(value);
                self.dedent();
            }
            ExprKind::BoolOp { op, values } => {
                self.writeln(&format!("{} {:?}", name, op));
                self.indent();
                for value in values {
                    self.print_expr(value);
                }
                self.dedent();
            }
            ExprKind::BinOp { left, op, right } => {
                self.writeln(&format!("{} {:?}", name, op));
                self.indent();
                self.print_expr(left);
                self.print_expr(right);
                self.dedent();
            }
            ExprKind::UnaryOp { op, operand } => {
                self.writeln(&format!("{} {:?}", name, op));
                self.indent();
                self.print_expr(operand);
                self.dedent();
            }
            ExprKind::Compare { left, ops, comparators } => {
                self.writeln(&format!("{} {:?}", name, ops));
                self.indent();
                self.print_expr(left);
                for comparator in comparators {
                    self.print_expr(comparator);
                }
                self.dedent();
            }
            ExprKind::NamedExpr { target, value } => {
                self.writeln(name);
                self.indent();
                self.field("target", target);
                self.field("value", value);
                self.dedent();
            }
            ExprKind::Lambda { params, body } => {
                self.writeln(name);
                self.indent();
                self.print_params(params);
                self.field("body", body);
                self.dedent();
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.writeln(name);
                self.indent();
                self.field("test", test);
                self.field("body", body);
                self.field("orelse", orelse);
                self.dedent();
            }
            ExprKind::Dict { keys, values } => {
                self.writeln(name);
                self.indent();
                for (key, value) in keys.iter().zip(values) {
                    match key {
                        Some(key) => self.field("key", key),
                        None => self.writeln("key: **"),
                    }
                    self.field("value", value);
                }
                self.dedent();
            }
            ExprKind::Set(elts) | ExprKind::List(elts) | ExprKind::Tuple(elts) | ExprKind::FormattedString(elts) => {
                self.writeln(name);
                self.indent();
                for elt in elts {
                    self.print_expr(elt);
                }
                self.dedent();
            }
            ExprKind::ListComp { elt, generators }
            | ExprKind::SetComp { elt, generators }
            | ExprKind::GeneratorExp { elt, generators } => {
                self.writeln(name);
                self.indent();
                self.field("elt", elt);
                self.print_generators(generators);
                self.dedent();
            }
            ExprKind::DictComp { key, value, generators } => {
                self.writeln(name);
                self.indent();
                self.field("key", key);
                self.field("value", value);
                self.print_generators(generators);
                self.dedent();
            }
            ExprKind::Await(value) | ExprKind::YieldFrom(value) | ExprKind::Starred(value) => {
                self.writeln(name);
                self.indent();
                self.print_expr(value);
                self.dedent();
            }
            ExprKind::Yield(value) => {
                self.writeln(name);
                self.indent();
                if let Some(value) = value {
                    self.print_expr(value);
                }
                self.dedent();
            }
            ExprKind::Call { func, args, keywords } => {
                self.writeln(name);
                self.indent();
                self.field("func", func);
                self.list_field("args", args);
                for keyword in keywords {
                    self.print_keyword(keyword);
                }
                self.dedent();
            }
            ExprKind::Subscript { value, slice } => {
                self.writeln(name);
                self.indent();
                self.field("value", value);
                self.field("slice", slice);
                self.dedent();
            }
            ExprKind::Slice { lower, upper, step } => {
                self.writeln(name);
                self.indent();
                self.opt_field("lower", lower.as_deref());
                self.opt_field("upper", upper.as_deref());
                self.opt_field("step", step.as_deref());
                self.dedent();
            }
        }
    }
}

fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::None => "None".to_string(),
        Constant::Bool(value) => if *value { "True" } else { "False" }.to_string(),
        Constant::Str(value) => format!("{:?}", value),
        Constant::Bytes(value) => format!("b{:?}", value),
        Constant::Number(text) => text.clone(),
        Constant::Ellipsis => "...".to_string(),
    }
}

/// Convenience wrapper around [`AstPrinter::print`]
pub fn dump(module: &Module) -> String {
    AstPrinter::new().print(module)
}
