//! Converter object model
//!
//! Wrappers around the definitions extracted from the script: views, models
//! and API views. Each wrapper owns its definition's syntax tree and keeps
//! the rendered source and external-reference set in lockstep with it as the
//! tree is rewritten.

use std::cell::Cell;

use log::warn;
use ruff_python_ast::{
    Decorator, Expr, Stmt, StmtClassDef,
    visitor::{
        Visitor,
        transformer::{Transformer, walk_expr},
    },
};

use crate::{
    ast_builder,
    discovery::{Route, RouteConfig},
    emit::{unparse_expr, unparse_stmt},
    errors::{ConversionError, ConvertResult},
    types::{FxIndexMap, FxIndexSet},
    visitors::{ReferenceVisitor, reference_visitor::RefSite},
};

/// The view wrapper spliced onto converted views; strings become responses
pub const ENSURE_HTTP_RESPONSE_SRC: &str = r#"def ensure_http_response(view_fn):
    """
    If a view returns a plain string value, convert it into an HttpResponse
    """
    if inspect.iscoroutinefunction(view_fn):

        @wraps(view_fn)
        async def wrapped(*args, **kwargs):
            response = await view_fn(*args, **kwargs)
            if isinstance(response, HttpResponse):
                return response
            return HttpResponse(response)

    else:

        @wraps(view_fn)
        def wrapped(*args, **kwargs):
            response = view_fn(*args, **kwargs)
            if isinstance(response, HttpResponse):
                return response
            return HttpResponse(response)

    return wrapped
"#;

/// Imports the wrapper source needs, as `(bound name, import statement)`
pub const ENSURE_HTTP_RESPONSE_IMPORTS: &[(&str, &str)] = &[
    ("inspect", "import inspect"),
    ("wraps", "from functools import wraps"),
    ("HttpResponse", "from django.http import HttpResponse"),
];

/// Match a decorator expression against `app.<attr>` by rendered source.
///
/// Matching by string avoids dealing with the tree shapes caused by calls
/// (`@app.route(...)`) and nested attributes (`@app.api.get(...)`): the
/// rendered text must be exactly the prefix, or continue with `.` or `(`.
pub fn is_app_decorator(expr: &Expr, app_name: &str, attr: &str) -> bool {
    let src = unparse_expr(expr);
    let seek = format!("{app_name}.{attr}");
    match src.strip_prefix(&seek) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || rest.starts_with('('),
        None => false,
    }
}

/// Whether a class definition looks like a model
pub fn is_model_class(class: &StmtClassDef) -> bool {
    class.bases().iter().any(|base| {
        let src = unparse_expr(base);
        src == "models.Model" || src == "Model"
    })
}

/// A definition lifted out of the script, tracked alongside its rendered
/// source and external references
#[derive(Debug)]
pub struct ScriptObject {
    pub name: String,
    pub def: Stmt,
    pub src: String,
    pub references: FxIndexSet<String>,
    sites: FxIndexMap<String, Vec<RefSite>>,
}

impl ScriptObject {
    pub fn new(name: impl Into<String>, def: Stmt) -> Self {
        let mut object = Self {
            name: name.into(),
            def,
            src: String::new(),
            references: FxIndexSet::default(),
            sites: FxIndexMap::default(),
        };
        object.refresh();
        object
    }

    /// Re-render the source and re-collect references after a tree mutation
    fn refresh(&mut self) {
        self.src = unparse_stmt(&self.def);
        let mut visitor = ReferenceVisitor::new();
        visitor.visit_stmt(&self.def);
        self.references = visitor.globals_ref;
        self.sites = visitor.globals_lookup;
    }

    /// Recorded reference sites for an external name
    pub fn sites(&self, name: &str) -> &[RefSite] {
        self.sites.get(name).map_or(&[], |sites| sites.as_slice())
    }

    fn decorator_list_mut(&mut self) -> Option<&mut thin_vec::ThinVec<Decorator>> {
        match &mut self.def {
            Stmt::FunctionDef(func) => Some(&mut func.decorator_list),
            Stmt::ClassDef(class) => Some(&mut class.decorator_list),
            _ => None,
        }
    }

    /// Remove the decorators matching `app.<attr>` and return them
    pub fn remove_decorators(&mut self, app_name: &str, attr: &str) -> Vec<Decorator> {
        let Some(decorators) = self.decorator_list_mut() else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        decorators.retain_mut(|decorator| {
            if is_app_decorator(&decorator.expression, app_name, attr) {
                removed.push(ast_builder::decorator(std::mem::replace(
                    &mut decorator.expression,
                    ast_builder::name("_"),
                )));
                false
            } else {
                true
            }
        });
        self.refresh();
        removed
    }
}

/// Rewrites `app.render(...)` calls into plain `render(...)` calls
struct RenderCallRewriter<'a> {
    app_name: &'a str,
    rewrote: Cell<bool>,
}

impl Transformer for RenderCallRewriter<'_> {
    fn visit_expr(&self, expr: &mut Expr) {
        walk_expr(self, expr);
        if let Expr::Call(call) = expr {
            if let Expr::Attribute(attr) = &*call.func {
                let is_app_render = attr.attr.as_str() == "render"
                    && matches!(&*attr.value, Expr::Name(base) if base.id.as_str() == self.app_name);
                if is_app_render {
                    *call.func = ast_builder::name("render");
                    self.rewrote.set(true);
                }
            }
        }
    }
}

/// A route target: strips route decorators, guarantees an `HttpResponse`
/// return, and rewrites template render calls
#[derive(Debug)]
pub struct ScriptView {
    pub object: ScriptObject,
    /// At least one `app.render` call was rewritten to `render`
    pub has_render: bool,
}

impl ScriptView {
    pub fn new(name: impl Into<String>, def: Stmt, app_name: &str) -> Self {
        let mut view = Self {
            object: ScriptObject::new(name, def),
            has_render: false,
        };
        view.object.remove_decorators(app_name, "route");
        view.fix_return_value();
        view.rewrite_app_render(app_name);
        view
    }

    /// The script allows plain string return values; splice in the
    /// `ensure_http_response` wrapper unless the view already declares a
    /// response return type. Class-based views are left alone.
    fn fix_return_value(&mut self) {
        let Stmt::FunctionDef(func) = &mut self.object.def else {
            return;
        };
        if let Some(returns) = &func.returns {
            if unparse_expr(returns).ends_with("Response") {
                return;
            }
        }
        // Last in the list means innermost, so it wraps the view itself
        func.decorator_list
            .push(ast_builder::decorator(ast_builder::name(
                "ensure_http_response",
            )));
        self.object.refresh();
    }

    /// Replace `app.render(...)` with django's `render(...)`. If the view
    /// uses the app object for anything else the rewrite is abandoned; the
    /// stray reference surfaces later as an undetermined symbol.
    fn rewrite_app_render(&mut self, app_name: &str) {
        let sites = self.object.sites(app_name);
        if sites.is_empty() {
            return;
        }
        if sites
            .iter()
            .any(|site| site.attr.as_deref() != Some("render"))
        {
            warn!(
                "unexpected reference to `{app_name}` in view {}",
                self.object.name
            );
            return;
        }

        let rewriter = RenderCallRewriter {
            app_name,
            rewrote: Cell::new(false),
        };
        rewriter.visit_stmt(&mut self.object.def);
        if rewriter.rewrote.get() {
            self.has_render = true;
            self.object.refresh();
        }
    }

    /// Render this view's `urlpatterns` entry
    pub fn make_url(&self, route: &Route) -> String {
        let mut target = format!("views.{}", self.object.name);
        if matches!(self.object.def, Stmt::ClassDef(_)) {
            target.push_str(".as_view()");
        }
        make_url_line(&route.pattern, &target, &route.config)
    }
}

/// Render a single `urlpatterns` entry
pub fn make_url_line(pattern: &str, target: &str, config: &RouteConfig) -> String {
    let (path_fn, raw) = if config.regex {
        ("re_path", "r")
    } else {
        ("path", "")
    };
    let name_arg = match &config.name {
        Some(name) => format!(", name=\"{name}\""),
        None => String::new(),
    };
    format!("    {path_fn}({raw}\"{pattern}\", {target}{name_arg}),")
}

/// A model definition; owns its admin registration options when the script
/// decorated it for the admin site
#[derive(Debug)]
pub struct ScriptModel {
    pub object: ScriptObject,
    /// `Some` when the model carried an admin decorator; the map holds the
    /// decorator's keyword arguments as rendered source
    pub admin: Option<FxIndexMap<String, String>>,
}

impl ScriptModel {
    pub fn new(name: impl Into<String>, def: Stmt, app_name: &str) -> ConvertResult<Self> {
        let mut object = ScriptObject::new(name, def);
        let mut admin_decorators = object.remove_decorators(app_name, "admin");
        if admin_decorators.len() > 1 {
            return Err(ConversionError::MultipleAdminDecorators(object.name));
        }

        let admin = match admin_decorators.pop() {
            Some(decorator) => Some(parse_admin_options(&decorator.expression, app_name)?),
            None => None,
        };
        Ok(Self { object, admin })
    }

    /// Render the admin registration: a plain `register` call for an
    /// option-less decorator, a `ModelAdmin` subclass otherwise
    pub fn make_model_admin(&self) -> Option<String> {
        let options = self.admin.as_ref()?;
        if options.is_empty() {
            return Some(format!("admin.site.register({})", self.object.name));
        }

        let mut lines = vec![
            format!("@admin.register({})", self.object.name),
            format!("class {}Admin(admin.ModelAdmin):", self.object.name),
        ];
        for (key, value) in options {
            lines.push(format!("    {key} = {value}"));
        }
        Some(lines.join("\n"))
    }
}

fn parse_admin_options(expr: &Expr, app_name: &str) -> ConvertResult<FxIndexMap<String, String>> {
    let mut options = FxIndexMap::default();
    if let Expr::Call(call) = expr {
        for keyword in &*call.arguments.keywords {
            let Some(arg) = &keyword.arg else {
                return Err(ConversionError::BadAdminArgument {
                    app: app_name.to_string(),
                    src: unparse_expr(&keyword.value),
                });
            };
            options.insert(arg.to_string(), unparse_expr(&keyword.value));
        }
    }
    Ok(options)
}

/// An API endpoint; its decorators are rebound from the app instance to the
/// module-level `api` object
#[derive(Debug)]
pub struct ScriptApiView {
    pub object: ScriptObject,
}

impl ScriptApiView {
    pub fn new(name: impl Into<String>, def: Stmt, app_name: &str) -> Self {
        let mut object = ScriptObject::new(name, def);
        rewrite_api_decorators(&mut object.def, app_name);
        object.refresh();
        Self { object }
    }
}

/// Rewrite `@app.api.<method>(...)` decorators to `@api.<method>(...)`
fn rewrite_api_decorators(def: &mut Stmt, app_name: &str) {
    let decorators = match def {
        Stmt::FunctionDef(func) => &mut func.decorator_list,
        Stmt::ClassDef(class) => &mut class.decorator_list,
        _ => return,
    };
    for decorator in decorators {
        if is_app_decorator(&decorator.expression, app_name, "api") {
            strip_api_prefix(&mut decorator.expression, app_name);
        }
    }
}

fn strip_api_prefix(expr: &mut Expr, app_name: &str) {
    match expr {
        Expr::Call(call) => strip_api_prefix(&mut call.func, app_name),
        Expr::Attribute(attr) => {
            let is_api_base = matches!(&*attr.value, Expr::Attribute(inner)
                if inner.attr.as_str() == "api"
                    && matches!(&*inner.value, Expr::Name(base) if base.id.as_str() == app_name));
            if is_api_base {
                *attr.value = ast_builder::name("api");
            } else {
                strip_api_prefix(&mut attr.value, app_name);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ruff_python_parser::parse_module;

    use super::*;
    use crate::discovery::RouteConfig;

    fn first_stmt(code: &str) -> Stmt {
        let module = parse_module(code).unwrap().into_syntax();
        module.body.into_iter().next().unwrap()
    }

    fn first_expr(code: &str) -> Expr {
        match first_stmt(code) {
            Stmt::Expr(expr) => *expr.value,
            _ => panic!("Expected expression statement"),
        }
    }

    fn route(pattern: &str, regex: bool, name: Option<&str>) -> Route {
        Route {
            pattern: pattern.to_string(),
            target: crate::discovery::RouteTarget::View("ignored".to_string()),
            config: RouteConfig {
                regex,
                name: name.map(str::to_string),
                extras: FxIndexMap::default(),
            },
        }
    }

    #[test]
    fn test_decorator_matching() {
        let app = "app";
        assert!(is_app_decorator(&first_expr("app.route('/')"), app, "route"));
        assert!(is_app_decorator(&first_expr("app.api.get('/add')"), app, "api"));
        assert!(is_app_decorator(&first_expr("app.admin"), app, "admin"));
        // `app.routes` must not match `route`
        assert!(!is_app_decorator(&first_expr("app.routes('/')"), app, "route"));
        assert!(!is_app_decorator(&first_expr("other.route('/')"), app, "route"));
    }

    #[test]
    fn test_model_class_detection() {
        let class = first_stmt("class Book(models.Model):\n    pass\n");
        let Stmt::ClassDef(class) = &class else {
            panic!("Expected class");
        };
        assert!(is_model_class(class));

        let plain = first_stmt("class Helper:\n    pass\n");
        let Stmt::ClassDef(plain) = &plain else {
            panic!("Expected class");
        };
        assert!(!is_model_class(plain));
    }

    #[test]
    fn test_view_strips_route_decorator_and_wraps_return() {
        let def = first_stmt(
            "@app.route('/')\ndef count(request):\n    return 'hello'\n",
        );
        let view = ScriptView::new("count", def, "app");
        assert!(!view.object.src.contains("app.route"));
        assert!(view.object.src.contains("@ensure_http_response"));
        assert!(view.object.references.contains("ensure_http_response"));
    }

    #[test]
    fn test_view_with_response_annotation_not_wrapped() {
        let def = first_stmt(
            "def count(request) -> HttpResponse:\n    return HttpResponse('hi')\n",
        );
        let view = ScriptView::new("count", def, "app");
        assert!(!view.object.src.contains("ensure_http_response"));
    }

    #[test]
    fn test_class_based_view_not_wrapped() {
        let def = first_stmt(
            "@app.route('/')\nclass Count(View):\n    pass\n",
        );
        let view = ScriptView::new("Count", def, "app");
        assert!(!view.object.src.contains("ensure_http_response"));
    }

    #[test]
    fn test_render_rewrite() {
        let def = first_stmt(
            "def home(request) -> HttpResponse:\n    return app.render(request, 'home.html')\n",
        );
        let view = ScriptView::new("home", def, "app");
        assert!(view.has_render);
        assert!(view.object.src.contains("return render(request, "));
        assert!(!view.object.src.contains("app.render"));
        assert!(!view.object.references.contains("app"));
        assert!(view.object.references.contains("render"));
    }

    #[test]
    fn test_render_rewrite_abandoned_on_other_app_use() {
        let def = first_stmt(
            "def home(request) -> HttpResponse:\n    app.settings\n    return app.render(request, 'home.html')\n",
        );
        let view = ScriptView::new("home", def, "app");
        assert!(!view.has_render);
        assert!(view.object.src.contains("app.render"));
        assert!(view.object.references.contains("app"));
    }

    #[test]
    fn test_make_url() {
        let def = first_stmt("def count(request) -> HttpResponse:\n    return x\n");
        let view = ScriptView::new("count", def, "app");
        assert_eq!(
            view.make_url(&route("", false, None)),
            "    path(\"\", views.count),"
        );
        assert_eq!(
            view.make_url(&route("archive/([0-9]{4})/", true, Some("archive"))),
            "    re_path(r\"archive/([0-9]{4})/\", views.count, name=\"archive\"),"
        );
    }

    #[test]
    fn test_make_url_class_based() {
        let def = first_stmt("class Count(View):\n    pass\n");
        let view = ScriptView::new("Count", def, "app");
        assert_eq!(
            view.make_url(&route("count/", false, None)),
            "    path(\"count/\", views.Count.as_view()),"
        );
    }

    #[test]
    fn test_model_plain_admin_registration() {
        let def = first_stmt(
            "@app.admin\nclass CountLog(models.Model):\n    pass\n",
        );
        let model = ScriptModel::new("CountLog", def, "app").unwrap();
        assert_eq!(
            model.make_model_admin().as_deref(),
            Some("admin.site.register(CountLog)")
        );
        assert!(!model.object.src.contains("app.admin"));
    }

    #[test]
    fn test_model_admin_with_options() {
        let def = first_stmt(
            "@app.admin(list_display=[\"id\", \"timestamp\"])\nclass CountLog(models.Model):\n    pass\n",
        );
        let model = ScriptModel::new("CountLog", def, "app").unwrap();
        let admin = model.make_model_admin().unwrap();
        let lines: Vec<&str> = admin.lines().collect();
        assert_eq!(lines[0], "@admin.register(CountLog)");
        assert_eq!(lines[1], "class CountLogAdmin(admin.ModelAdmin):");
        assert!(lines[2].starts_with("    list_display = ["));
        assert!(lines[2].contains("timestamp"));
    }

    #[test]
    fn test_model_without_admin_decorator() {
        let def = first_stmt("class CountLog(models.Model):\n    pass\n");
        let model = ScriptModel::new("CountLog", def, "app").unwrap();
        assert!(model.admin.is_none());
        assert!(model.make_model_admin().is_none());
    }

    #[test]
    fn test_multiple_admin_decorators_rejected() {
        let def = first_stmt(
            "@app.admin\n@app.admin(list_display=[\"id\"])\nclass CountLog(models.Model):\n    pass\n",
        );
        assert!(matches!(
            ScriptModel::new("CountLog", def, "app"),
            Err(ConversionError::MultipleAdminDecorators(_))
        ));
    }

    #[test]
    fn test_api_decorator_rewrite() {
        let def = first_stmt(
            "@app.api.get(\"/add\")\ndef add(request, a: int, b: int):\n    return {\"result\": a + b}\n",
        );
        let api_view = ScriptApiView::new("add", def, "app");
        assert!(api_view.object.src.contains("@api.get("));
        assert!(!api_view.object.src.contains("app.api"));
        assert!(api_view.object.references.contains("api"));
        assert!(!api_view.object.references.contains("app"));
    }
}
