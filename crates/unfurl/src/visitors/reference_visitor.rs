//! Free-variable collection visitor
//!
//! Walks the AST of a function, class or expression tracking lexical scope,
//! and reports the names it reads that are not bound within its own scopes.
//! These are the candidates for "must be imported or copied into the
//! generated module".
//!
//! This is a syntactic approximation, not full scope resolution: closures
//! capturing variables from an intermediate function scope, walruses crossing
//! comprehension boundaries, and match-statement bindings are not modelled.

use ruff_python_ast::{
    Expr, ExceptHandler, Stmt,
    visitor::{Visitor, walk_expr, walk_stmt},
};

use crate::types::{FxIndexMap, FxIndexSet};

/// Names bound by the Python interpreter itself; never reported as external
/// references
const PYTHON_BUILTINS: &[&str] = &[
    "abs",
    "all",
    "any",
    "bool",
    "bytearray",
    "bytes",
    "callable",
    "chr",
    "classmethod",
    "dict",
    "dir",
    "divmod",
    "enumerate",
    "filter",
    "float",
    "format",
    "frozenset",
    "getattr",
    "hasattr",
    "hash",
    "id",
    "input",
    "int",
    "isinstance",
    "issubclass",
    "iter",
    "len",
    "list",
    "map",
    "max",
    "min",
    "next",
    "object",
    "open",
    "ord",
    "pow",
    "print",
    "property",
    "range",
    "repr",
    "reversed",
    "round",
    "set",
    "setattr",
    "slice",
    "sorted",
    "staticmethod",
    "str",
    "sum",
    "super",
    "tuple",
    "type",
    "vars",
    "zip",
    "ArithmeticError",
    "AttributeError",
    "BaseException",
    "Exception",
    "ImportError",
    "IndexError",
    "KeyError",
    "KeyboardInterrupt",
    "LookupError",
    "ModuleNotFoundError",
    "NameError",
    "NotImplementedError",
    "OSError",
    "RuntimeError",
    "StopAsyncIteration",
    "StopIteration",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
    "__name__",
    "__file__",
    "__doc__",
];

fn is_builtin(name: &str) -> bool {
    PYTHON_BUILTINS.contains(&name)
}

/// One recorded use of an external name
#[derive(Debug, Clone)]
pub struct RefSite {
    /// The attribute accessed on the name, when the name is the base of an
    /// attribute expression (`app` in `app.render(...)` records `render`)
    pub attr: Option<String>,
}

/// Visitor that traverses the AST of a class or function, looking for
/// references to objects outside its scope
pub struct ReferenceVisitor {
    /// One binding set per lexical scope; each inherits a copy of its parent
    locals_stack: Vec<FxIndexSet<String>>,
    /// External names referenced, in first-use order
    pub globals_ref: FxIndexSet<String>,
    /// Reference sites per external name, used by structural rewrites
    pub globals_lookup: FxIndexMap<String, Vec<RefSite>>,
}

impl Default for ReferenceVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceVisitor {
    pub fn new() -> Self {
        Self {
            locals_stack: vec![FxIndexSet::default()],
            globals_ref: FxIndexSet::default(),
            globals_lookup: FxIndexMap::default(),
        }
    }

    /// All recorded sites for an external name
    pub fn sites(&self, name: &str) -> &[RefSite] {
        self.globals_lookup
            .get(name)
            .map_or(&[], |sites| sites.as_slice())
    }

    fn push_scope(&mut self) {
        let inherited = self
            .locals_stack
            .last()
            .cloned()
            .unwrap_or_default();
        self.locals_stack.push(inherited);
    }

    fn pop_scope(&mut self) {
        self.locals_stack.pop();
    }

    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.locals_stack.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals_stack
            .iter()
            .any(|scope| scope.contains(name))
    }

    fn found_reference(&mut self, name: &str, attr: Option<&str>) {
        if is_builtin(name) || self.is_local(name) {
            return;
        }
        self.globals_ref.insert(name.to_string());
        self.globals_lookup
            .entry(name.to_string())
            .or_default()
            .push(RefSite {
                attr: attr.map(str::to_string),
            });
    }

    /// Add the names bound by an assignment/loop target, unpacking tuples
    /// and lists
    fn bind_target(&mut self, target: &Expr) {
        match target {
            Expr::Name(name) => self.bind(&name.id),
            Expr::Tuple(tuple) => {
                for elt in &tuple.elts {
                    self.bind_target(elt);
                }
            }
            Expr::List(list) => {
                for elt in &list.elts {
                    self.bind_target(elt);
                }
            }
            Expr::Starred(starred) => self.bind_target(&starred.value),
            // Subscript/attribute targets read their base object
            other => self.visit_expr(other),
        }
    }

    fn bind_parameters(&mut self, parameters: &ruff_python_ast::Parameters) {
        for param in parameters.iter_non_variadic_params() {
            self.bind(param.parameter.name.as_str());
        }
        if let Some(param) = &parameters.vararg {
            self.bind(param.name.as_str());
        }
        if let Some(param) = &parameters.kwarg {
            self.bind(param.name.as_str());
        }
    }

    fn visit_comprehension_scope(&mut self, generators: &[ruff_python_ast::Comprehension], body: &[&Expr]) {
        self.push_scope();
        for comp in generators {
            self.visit_expr(&comp.iter);
            self.bind_target(&comp.target);
            for if_expr in &comp.ifs {
                self.visit_expr(if_expr);
            }
        }
        for expr in body {
            self.visit_expr(expr);
        }
        self.pop_scope();
    }
}

impl<'a> Visitor<'a> for ReferenceVisitor {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::FunctionDef(func) => {
                self.bind(func.name.as_str());

                // Decorators, defaults and annotations execute before the
                // function scope exists
                for decorator in &func.decorator_list {
                    self.visit_expr(&decorator.expression);
                }
                for param in func.parameters.iter_non_variadic_params() {
                    if let Some(annotation) = &param.parameter.annotation {
                        self.visit_expr(annotation);
                    }
                    if let Some(default) = &param.default {
                        self.visit_expr(default);
                    }
                }
                if let Some(returns) = &func.returns {
                    self.visit_expr(returns);
                }

                self.push_scope();
                self.bind_parameters(&func.parameters);
                self.visit_body(&func.body);
                self.pop_scope();
            }
            Stmt::ClassDef(class) => {
                self.bind(class.name.as_str());

                for decorator in &class.decorator_list {
                    self.visit_expr(&decorator.expression);
                }
                for base in class.bases() {
                    self.visit_expr(base);
                }
                for keyword in class.keywords() {
                    self.visit_expr(&keyword.value);
                }

                self.push_scope();
                self.visit_body(&class.body);
                self.pop_scope();
            }
            Stmt::Assign(assign) => {
                // Bind targets before visiting the value so self-referential
                // patterns resolve
                for target in &assign.targets {
                    self.bind_target(target);
                }
                self.visit_expr(&assign.value);
            }
            Stmt::AnnAssign(ann_assign) => {
                self.visit_expr(&ann_assign.annotation);
                self.bind_target(&ann_assign.target);
                if let Some(value) = &ann_assign.value {
                    self.visit_expr(value);
                }
            }
            Stmt::AugAssign(aug_assign) => {
                if let Expr::Name(name) = &*aug_assign.target {
                    self.found_reference(&name.id, None);
                    self.bind(&name.id);
                } else {
                    self.visit_expr(&aug_assign.target);
                }
                self.visit_expr(&aug_assign.value);
            }
            Stmt::For(for_stmt) => {
                self.visit_expr(&for_stmt.iter);
                self.bind_target(&for_stmt.target);
                self.visit_body(&for_stmt.body);
                self.visit_body(&for_stmt.orelse);
            }
            Stmt::With(with_stmt) => {
                for item in &with_stmt.items {
                    self.visit_expr(&item.context_expr);
                    if let Some(optional_vars) = &item.optional_vars {
                        self.bind_target(optional_vars);
                    }
                }
                self.visit_body(&with_stmt.body);
            }
            Stmt::Try(try_stmt) => {
                self.visit_body(&try_stmt.body);
                for handler in &try_stmt.handlers {
                    let ExceptHandler::ExceptHandler(handler) = handler;
                    if let Some(type_) = &handler.type_ {
                        self.visit_expr(type_);
                    }
                    if let Some(name) = &handler.name {
                        self.bind(name.as_str());
                    }
                    self.visit_body(&handler.body);
                }
                self.visit_body(&try_stmt.orelse);
                self.visit_body(&try_stmt.finalbody);
            }
            Stmt::Import(import) => {
                for alias in &import.names {
                    match &alias.asname {
                        Some(asname) => self.bind(asname.as_str()),
                        // `import a.b` binds the root package name
                        None => {
                            let root = alias.name.split('.').next().unwrap_or(&alias.name);
                            self.bind(root);
                        }
                    }
                }
            }
            Stmt::ImportFrom(import) => {
                for alias in &import.names {
                    let bound = alias.asname.as_ref().unwrap_or(&alias.name);
                    self.bind(bound.as_str());
                }
            }
            Stmt::Global(global_stmt) => {
                // Forced external references regardless of local shadowing
                for name in &global_stmt.names {
                    self.globals_ref.insert(name.to_string());
                    self.globals_lookup
                        .entry(name.to_string())
                        .or_default()
                        .push(RefSite { attr: None });
                }
            }
            Stmt::Nonlocal(_) => {}
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Name(name) => {
                if name.ctx.is_load() {
                    self.found_reference(&name.id, None);
                }
            }
            Expr::Attribute(attr) => {
                if let Expr::Name(base) = &*attr.value {
                    if base.ctx.is_load() {
                        self.found_reference(&base.id, Some(attr.attr.as_str()));
                    }
                } else {
                    self.visit_expr(&attr.value);
                }
            }
            Expr::Named(named) => {
                if let Expr::Name(target) = &*named.target {
                    self.bind(&target.id);
                }
                self.visit_expr(&named.value);
            }
            Expr::Lambda(lambda) => {
                if let Some(parameters) = &lambda.parameters {
                    for param in parameters.iter_non_variadic_params() {
                        if let Some(default) = &param.default {
                            self.visit_expr(default);
                        }
                    }
                }
                self.push_scope();
                if let Some(parameters) = &lambda.parameters {
                    self.bind_parameters(parameters);
                }
                self.visit_expr(&lambda.body);
                self.pop_scope();
            }
            Expr::ListComp(comp) => {
                self.visit_comprehension_scope(&comp.generators, &[&comp.elt]);
            }
            Expr::SetComp(comp) => {
                self.visit_comprehension_scope(&comp.generators, &[&comp.elt]);
            }
            Expr::Generator(comp) => {
                self.visit_comprehension_scope(&comp.generators, &[&comp.elt]);
            }
            Expr::DictComp(comp) => {
                if let Some(key) = &comp.key {
                    self.visit_comprehension_scope(&comp.generators, &[key, &comp.value]);
                } else {
                    self.visit_comprehension_scope(&comp.generators, &[&comp.value]);
                }
            }
            _ => walk_expr(self, expr),
        }
    }
}

/// Compute the external references of a single statement
pub fn collect_references(stmt: &Stmt) -> FxIndexSet<String> {
    let mut visitor = ReferenceVisitor::new();
    visitor.visit_stmt(stmt);
    visitor.globals_ref
}

/// Compute the external references of an expression
pub fn collect_expr_references(expr: &Expr) -> FxIndexSet<String> {
    let mut visitor = ReferenceVisitor::new();
    visitor.visit_expr(expr);
    visitor.globals_ref
}

#[cfg(test)]
mod tests {
    use ruff_python_parser::parse_module;

    use super::*;

    fn refs(code: &str) -> FxIndexSet<String> {
        let module = parse_module(code).unwrap().into_syntax();
        let mut visitor = ReferenceVisitor::new();
        for stmt in &module.body {
            visitor.visit_stmt(stmt);
        }
        visitor.globals_ref
    }

    #[test]
    fn test_free_variables_of_function() {
        let collected = refs("\
def f(x):
    y = x + g()
    return y
");
        assert!(collected.contains("g"));
        assert!(!collected.contains("x"));
        assert!(!collected.contains("y"));
        assert!(!collected.contains("f"));
    }

    #[test]
    fn test_builtins_excluded() {
        let collected = refs("\
def f(items):
    return print(len(items))
");
        assert!(collected.is_empty());
    }

    #[test]
    fn test_comprehension_scope_does_not_leak() {
        let collected = refs("\
def f(rows):
    cells = [cell for row in rows for cell in row]
    return cell_style(cells)
");
        assert!(collected.contains("cell_style"));
        assert!(!collected.contains("cell"));
        assert!(!collected.contains("row"));
    }

    #[test]
    fn test_comprehension_shadowing_not_reported() {
        // `n` is rebound inside the comprehension; the outer function must
        // not report it as a free reference
        let collected = refs("\
def f(values):
    total = sum(n * n for n in values)
    return total
");
        assert!(collected.is_empty());
    }

    #[test]
    fn test_class_bases_and_body() {
        let collected = refs("\
class Book(models.Model):
    title = models.CharField(max_length=100)

    def summary(self):
        return helper(self.title)
");
        assert!(collected.contains("models"));
        assert!(collected.contains("helper"));
        assert!(!collected.contains("title"));
        assert!(!collected.contains("self"));
    }

    #[test]
    fn test_decorator_visited_in_enclosing_scope() {
        let collected = refs("\
@registry.register
def task():
    pass
");
        assert!(collected.contains("registry"));
    }

    #[test]
    fn test_attribute_site_records_attr() {
        let module = parse_module("\
def view(request):
    return app.render(request, 'index.html')
")
        .unwrap()
        .into_syntax();
        let mut visitor = ReferenceVisitor::new();
        visitor.visit_stmt(&module.body[0]);

        assert!(visitor.globals_ref.contains("app"));
        let sites = visitor.sites("app");
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].attr.as_deref(), Some("render"));
    }

    #[test]
    fn test_global_statement_forces_reference() {
        let collected = refs("\
def bump():
    global counter
    counter = counter + 1
");
        assert!(collected.contains("counter"));
    }

    #[test]
    fn test_walrus_binds() {
        let collected = refs("\
def f(data):
    if (n := len(data)) > 10:
        return n
    return 0
");
        assert!(collected.is_empty());
    }

    #[test]
    fn test_with_and_except_bindings() {
        let collected = refs("\
def f(path):
    try:
        with open(path) as fh:
            return fh.read()
    except OSError as exc:
        return str(exc)
");
        assert!(collected.is_empty());
    }

    #[test]
    fn test_import_binds_root() {
        let collected = refs("\
def f():
    import os.path
    return os.path.join('a', 'b')
");
        assert!(collected.is_empty());
    }

    #[test]
    fn test_recursive_function() {
        let collected = refs("\
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)
");
        assert!(collected.is_empty());
    }
}
