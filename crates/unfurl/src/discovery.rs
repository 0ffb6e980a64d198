//! Script analysis: locate the app instance and its registrations
//!
//! A single-file application declares everything through one app object:
//! `app = Django(...)` carries the settings, `@app.route(...)` registers
//! views, `app.route(pattern, include=...)` mounts sub-urlconfs, and
//! `app.templates[...]` registers in-memory templates. This module walks the
//! parsed script once and captures all of that, in registration order, as an
//! explicit context object the converter stages read from.

use std::path::{Path, PathBuf};

use log::debug;
use ruff_python_ast::{Expr, ExprCall, ModModule, Stmt, StmtAssign};

use crate::{
    emit::{parse_python, unparse_expr},
    errors::{ConversionError, ConvertResult},
    objects::{is_app_decorator, is_model_class},
    types::{FxIndexMap, FxIndexSet},
};

/// The original script: path, source text and syntax tree
#[derive(Debug)]
pub struct ScriptSource {
    pub path: PathBuf,
    pub src: String,
    pub module: ModModule,
}

impl ScriptSource {
    pub fn load(path: &Path) -> ConvertResult<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_source(path, src)
    }

    pub fn from_source(path: &Path, src: String) -> ConvertResult<Self> {
        let module = parse_python(&src)?;
        Ok(Self {
            path: path.to_path_buf(),
            src,
            module,
        })
    }

    /// Directory the script lives in; static assets are found relative to it
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// Find a top-level function or class definition by name
    pub fn find_def(&self, name: &str) -> Option<&Stmt> {
        self.module.body.iter().find(|stmt| match stmt {
            Stmt::FunctionDef(func) => func.name.as_str() == name,
            Stmt::ClassDef(class) => class.name.as_str() == name,
            _ => false,
        })
    }

    /// Find a top-level (possibly annotated) assignment binding `name`
    pub fn find_assign(&self, name: &str) -> Option<&Stmt> {
        self.module.body.iter().find(|stmt| match stmt {
            Stmt::Assign(assign) => assign
                .targets
                .iter()
                .any(|target| matches!(target, Expr::Name(target) if target.id.as_str() == name)),
            Stmt::AnnAssign(ann_assign) => {
                matches!(&*ann_assign.target, Expr::Name(target) if target.id.as_str() == name)
            }
            _ => false,
        })
    }

    /// All names bound in the module's top-level scope, in declaration order
    pub fn top_level_names(&self) -> FxIndexSet<String> {
        let mut names = FxIndexSet::default();
        for stmt in &self.module.body {
            match stmt {
                Stmt::FunctionDef(func) => {
                    names.insert(func.name.to_string());
                }
                Stmt::ClassDef(class) => {
                    names.insert(class.name.to_string());
                }
                Stmt::Assign(assign) => {
                    for target in &assign.targets {
                        if let Expr::Name(target) = target {
                            names.insert(target.id.to_string());
                        }
                    }
                }
                Stmt::AnnAssign(ann_assign) => {
                    if let Expr::Name(target) = &*ann_assign.target {
                        names.insert(target.id.to_string());
                    }
                }
                Stmt::Import(import) => {
                    for alias in &import.names {
                        match &alias.asname {
                            Some(asname) => {
                                names.insert(asname.to_string());
                            }
                            None => {
                                let root = alias.name.split('.').next().unwrap_or(&alias.name);
                                names.insert(root.to_string());
                            }
                        }
                    }
                }
                Stmt::ImportFrom(import) => {
                    for alias in &import.names {
                        let bound = alias.asname.as_ref().unwrap_or(&alias.name);
                        names.insert(bound.to_string());
                    }
                }
                _ => {}
            }
        }
        names
    }
}

/// URL options recorded with a route registration
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    /// Use `re_path` instead of `path`
    pub regex: bool,
    /// Reverse-lookup name
    pub name: Option<String>,
    /// Unrecognised keyword arguments, kept as unparsed source for plugins
    pub extras: FxIndexMap<String, String>,
}

/// What a route pattern maps to
#[derive(Debug, Clone)]
pub enum RouteTarget {
    /// An ordinary single-function (or class-based) view
    View(String),
    /// A raw urlconf include; the registration call is kept as a syntax-tree
    /// snapshot because the include expression cannot be re-derived later
    Include(ExprCall),
}

#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: String,
    pub target: RouteTarget,
    pub config: RouteConfig,
}

/// Everything the script declared through its app instance
#[derive(Debug)]
pub struct ScriptApp {
    /// The variable name the script bound the app object to
    pub instance_name: String,
    /// Upper-case keyword arguments passed to the constructor
    pub settings: FxIndexMap<String, Expr>,
    /// Route registrations in original declaration order
    pub routes: Vec<Route>,
    /// In-memory template registrations (`app.templates[...] = "..."`)
    pub templates: FxIndexMap<String, String>,
    pub has_admin: bool,
    pub has_api: bool,
}

impl ScriptApp {
    /// Walk the script and capture the app instance and its registrations
    pub fn discover(script: &ScriptSource) -> ConvertResult<Self> {
        let (instance_name, settings) = find_app_instance(&script.module)?;
        debug!("found app instance `{instance_name}`");

        let mut app = Self {
            instance_name,
            settings,
            routes: Vec::new(),
            templates: FxIndexMap::default(),
            has_admin: false,
            has_api: false,
        };

        for stmt in &script.module.body {
            match stmt {
                Stmt::FunctionDef(func) => {
                    for decorator in &func.decorator_list {
                        if is_app_decorator(&decorator.expression, &app.instance_name, "route") {
                            let (pattern, config) = parse_route_call(&decorator.expression)?;
                            app.routes.push(Route {
                                pattern,
                                target: RouteTarget::View(func.name.to_string()),
                                config,
                            });
                        } else if is_app_decorator(&decorator.expression, &app.instance_name, "api")
                        {
                            app.has_api = true;
                        }
                    }
                }
                Stmt::ClassDef(class) => {
                    for decorator in &class.decorator_list {
                        if is_app_decorator(&decorator.expression, &app.instance_name, "route") {
                            let (pattern, config) = parse_route_call(&decorator.expression)?;
                            app.routes.push(Route {
                                pattern,
                                target: RouteTarget::View(class.name.to_string()),
                                config,
                            });
                        }
                    }
                    if is_model_class(class)
                        && class.decorator_list.iter().any(|decorator| {
                            is_app_decorator(&decorator.expression, &app.instance_name, "admin")
                        })
                    {
                        app.has_admin = true;
                    }
                }
                Stmt::Expr(expr_stmt) => {
                    if let Expr::Call(call) = &*expr_stmt.value {
                        let func_src = unparse_expr(&call.func);
                        if func_src == format!("{}.route", app.instance_name) {
                            let (pattern, config) = parse_route_call(&expr_stmt.value)?;
                            app.routes.push(Route {
                                pattern,
                                target: RouteTarget::Include(call.clone()),
                                config,
                            });
                        }
                    }
                }
                Stmt::Assign(assign) => {
                    collect_template_registration(assign, &app.instance_name, &mut app.templates);
                }
                _ => {}
            }
        }

        debug!(
            "discovered {} routes, {} templates, admin={}, api={}",
            app.routes.len(),
            app.templates.len(),
            app.has_admin,
            app.has_api
        );
        Ok(app)
    }

    /// A constructor setting, when it is a plain string literal
    pub fn setting_str(&self, key: &str) -> Option<String> {
        match self.settings.get(key) {
            Some(Expr::StringLiteral(value)) => Some(value.value.to_str().to_string()),
            _ => None,
        }
    }

    /// A constructor setting, when it is a list of string literals
    pub fn setting_str_list(&self, key: &str) -> Option<Vec<String>> {
        let Some(Expr::List(list)) = self.settings.get(key) else {
            return None;
        };
        let mut values = Vec::new();
        for elt in &list.elts {
            if let Expr::StringLiteral(value) = elt {
                values.push(value.value.to_str().to_string());
            }
        }
        Some(values)
    }
}

/// Python's `str.isupper`: all cased characters upper, at least one of them
fn is_upper_name(name: &str) -> bool {
    name.chars().any(|c| c.is_uppercase()) && !name.chars().any(|c| c.is_lowercase())
}

fn find_app_instance(module: &ModModule) -> ConvertResult<(String, FxIndexMap<String, Expr>)> {
    for stmt in &module.body {
        let Stmt::Assign(assign) = stmt else {
            continue;
        };
        let Expr::Call(call) = &*assign.value else {
            continue;
        };
        let Expr::Name(func) = &*call.func else {
            continue;
        };
        if func.id.as_str() != "Django" {
            continue;
        }
        let Some(Expr::Name(target)) = assign.targets.first() else {
            continue;
        };

        let mut settings = FxIndexMap::default();
        for keyword in &*call.arguments.keywords {
            if let Some(arg) = &keyword.arg {
                if is_upper_name(arg.as_str()) {
                    settings.insert(arg.to_string(), keyword.value.clone());
                }
            }
        }
        return Ok((target.id.to_string(), settings));
    }
    Err(ConversionError::AppNotFound)
}

/// Extract (pattern, config) from a `app.route(...)` call or decorator.
/// Leading slashes are ignored; patterns are relative to the root URL.
fn parse_route_call(expr: &Expr) -> ConvertResult<(String, RouteConfig)> {
    let Expr::Call(call) = expr else {
        return Err(ConversionError::UnparseableRoute(unparse_expr(expr)));
    };
    let Some(Expr::StringLiteral(pattern)) = call.arguments.args.first() else {
        return Err(ConversionError::UnparseableRoute(unparse_expr(expr)));
    };
    let pattern = pattern.value.to_str().trim_start_matches('/').to_string();

    let mut config = RouteConfig::default();
    for keyword in &*call.arguments.keywords {
        let Some(arg) = &keyword.arg else {
            continue;
        };
        match arg.as_str() {
            "re" => {
                config.regex = matches!(&keyword.value, Expr::BooleanLiteral(lit) if lit.value);
            }
            "name" => {
                if let Expr::StringLiteral(name) = &keyword.value {
                    config.name = Some(name.value.to_str().to_string());
                }
            }
            // `include` is consumed from the captured call snapshot later
            "include" => {}
            other => {
                config
                    .extras
                    .insert(other.to_string(), unparse_expr(&keyword.value));
            }
        }
    }
    Ok((pattern, config))
}

fn collect_template_registration(
    assign: &StmtAssign,
    app_name: &str,
    templates: &mut FxIndexMap<String, String>,
) {
    let Some(target) = assign.targets.first() else {
        return;
    };
    match target {
        // app.templates["name.html"] = "..."
        Expr::Subscript(subscript) => {
            let Expr::Attribute(attr) = &*subscript.value else {
                return;
            };
            let is_templates = attr.attr.as_str() == "templates"
                && matches!(&*attr.value, Expr::Name(base) if base.id.as_str() == app_name);
            if !is_templates {
                return;
            }
            if let (Expr::StringLiteral(key), Expr::StringLiteral(value)) =
                (&*subscript.slice, &*assign.value)
            {
                templates.insert(
                    key.value.to_str().to_string(),
                    value.value.to_str().to_string(),
                );
            }
        }
        // app.templates = {"name.html": "...", ...}
        Expr::Attribute(attr) => {
            let is_templates = attr.attr.as_str() == "templates"
                && matches!(&*attr.value, Expr::Name(base) if base.id.as_str() == app_name);
            if !is_templates {
                return;
            }
            if let Expr::Dict(dict) = &*assign.value {
                for item in &dict.items {
                    if let (Some(Expr::StringLiteral(key)), Expr::StringLiteral(value)) =
                        (item.key.as_ref(), &item.value)
                    {
                        templates.insert(
                            key.value.to_str().to_string(),
                            value.value.to_str().to_string(),
                        );
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn script(src: &str) -> ScriptSource {
        ScriptSource::from_source(Path::new("counter.py"), src.to_string()).unwrap()
    }

    const BASIC_APP: &str = r#"
from django.db import models

app = Django(ADMIN_URL="secret/", SECRET_KEY="not-very", EXTRA_APPS=["sims"])


@app.admin(list_display=["id", "timestamp"])
class CountLog(models.Model):
    timestamp = models.DateTimeField(auto_now_add=True)


@app.route("/")
def count(request):
    CountLog.objects.create()
    return f"<p>Number of page loads: {CountLog.objects.count()}</p>"


app.route("/polls/", include="polls.urls")
"#;

    #[test]
    fn test_discover_instance_and_settings() {
        let script = script(BASIC_APP);
        let app = ScriptApp::discover(&script).unwrap();
        assert_eq!(app.instance_name, "app");
        assert_eq!(app.setting_str("ADMIN_URL").as_deref(), Some("secret/"));
        assert_eq!(
            app.setting_str_list("EXTRA_APPS"),
            Some(vec!["sims".to_string()])
        );
        assert!(app.settings.contains_key("SECRET_KEY"));
    }

    #[test]
    fn test_discover_routes_in_order() {
        let script = script(BASIC_APP);
        let app = ScriptApp::discover(&script).unwrap();
        assert_eq!(app.routes.len(), 2);

        assert_eq!(app.routes[0].pattern, "");
        assert!(matches!(&app.routes[0].target, RouteTarget::View(name) if name == "count"));

        assert_eq!(app.routes[1].pattern, "polls/");
        assert!(matches!(&app.routes[1].target, RouteTarget::Include(_)));
    }

    #[test]
    fn test_discover_admin_flag() {
        let script = script(BASIC_APP);
        let app = ScriptApp::discover(&script).unwrap();
        assert!(app.has_admin);
        assert!(!app.has_api);
    }

    #[test]
    fn test_route_config_options() {
        let script = script(
            r#"
app = Django()

@app.route("/archive/(?P<year>[0-9]{4})/", re=True, name="archive")
def archive(request, year):
    return year
"#,
        );
        let app = ScriptApp::discover(&script).unwrap();
        assert!(app.routes[0].config.regex);
        assert_eq!(app.routes[0].config.name.as_deref(), Some("archive"));
    }

    #[test]
    fn test_missing_app_is_an_error() {
        let script = script("x = 1\n");
        assert!(matches!(
            ScriptApp::discover(&script),
            Err(ConversionError::AppNotFound)
        ));
    }

    #[test]
    fn test_template_registrations() {
        let script = script(
            r#"
app = Django()
app.templates["base.html"] = "<html>{% block content %}{% endblock %}</html>"
"#,
        );
        let app = ScriptApp::discover(&script).unwrap();
        assert_eq!(app.templates.len(), 1);
        assert!(app.templates.contains_key("base.html"));
    }

    #[test]
    fn test_instance_name_is_not_hardcoded() {
        let script = script(
            r#"
site = Django(DEBUG=True)

@site.route("/")
def home(request):
    return "ok"
"#,
        );
        let app = ScriptApp::discover(&script).unwrap();
        assert_eq!(app.instance_name, "site");
        assert_eq!(app.routes.len(), 1);
    }

    #[test]
    fn test_lowercase_constructor_kwargs_ignored() {
        let script = script("app = Django(DEBUG=True, unrelated=1)\n");
        let app = ScriptApp::discover(&script).unwrap();
        assert!(app.settings.contains_key("DEBUG"));
        assert!(!app.settings.contains_key("unrelated"));
    }
}
