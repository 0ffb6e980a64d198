//! The conversion pipeline
//!
//! Scaffolds a conventional project with `django-admin startproject`, then
//! moves the script's definitions into their conventional homes: settings
//! into `project/settings.py`, models into `app/models.py`, views into
//! `app/views.py`, API endpoints into `app/api.py`, plus the url
//! configuration, admin registrations, and a final sweep of anything left
//! over into `app/unused.py`.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use log::{debug, info};
use ruff_python_ast::{Expr, Stmt};
use walkdir::WalkDir;

use crate::{
    ast_builder,
    discovery::{RouteConfig, RouteTarget, ScriptApp, ScriptSource},
    emit::{parse_python, unparse_expr, unparse_stmt, write_file, write_file_with_banner},
    errors::{ConversionError, ConvertResult},
    objects::{
        ScriptApiView, ScriptModel, ScriptView, is_app_decorator, is_model_class, make_url_line,
    },
    plugins::PluginManager,
    resolver::{ConvertContext, Resolver, collect_definition},
    types::FxIndexMap,
    visitors::reference_visitor::collect_expr_references,
};

/// Constructor settings consumed by the converter itself; they configure the
/// conversion and must not leak into the generated settings module
const CONVERTER_SETTINGS: &[&str] = &[
    "ADMIN_URL",
    "EXTRA_APPS",
    "SQLITE_DATABASE",
    "MIGRATIONS_DIR",
];

pub struct Converter {
    pub script: ScriptSource,
    pub app: ScriptApp,

    /// Root path the project is built in
    pub root_path: PathBuf,
    pub project_name: String,
    pub app_name: String,

    /// Models moved to `app/models.py`
    pub models: Vec<ScriptModel>,
    /// Views moved to `app/views.py`
    pub views: Vec<ScriptView>,
    /// API endpoints moved to `app/api.py`
    pub api_views: Vec<ScriptApiView>,
    /// Extra `urlpatterns` entries, contributed by plugins
    pub extra_urls: Vec<String>,

    pub ctx: ConvertContext,
    plugins: PluginManager,
    app_has_urls: bool,
}

impl Converter {
    pub fn new(
        script: ScriptSource,
        root_path: &Path,
        project_name: &str,
        app_name: Option<&str>,
    ) -> ConvertResult<Self> {
        let app = ScriptApp::discover(&script)?;
        let app_name = match app_name {
            Some(name) => name.to_string(),
            None => default_app_name(&script.path),
        };
        Ok(Self {
            script,
            app,
            root_path: root_path.to_path_buf(),
            project_name: project_name.to_string(),
            app_name,
            models: Vec::new(),
            views: Vec::new(),
            api_views: Vec::new(),
            extra_urls: Vec::new(),
            ctx: ConvertContext::default(),
            plugins: PluginManager::default(),
            app_has_urls: false,
        })
    }

    pub fn register_plugin(&mut self, mut plugin: Box<dyn crate::plugins::ConverterPlugin>) {
        plugin.init(self);
        self.plugins.register(plugin);
    }

    pub fn project_path(&self) -> PathBuf {
        self.root_path.join(&self.project_name)
    }

    pub fn app_path(&self) -> PathBuf {
        self.project_path().join(&self.app_name)
    }

    /// Run each hook through the manager without fighting the borrow on
    /// `self`; the manager is moved out for the duration of the dispatch
    fn with_plugins(&mut self, f: impl FnOnce(&mut PluginManager, &mut Self)) {
        let mut plugins = std::mem::take(&mut self.plugins);
        f(&mut plugins, self);
        self.plugins = plugins;
    }

    /// Create the project and build the files for the project and app
    pub fn build(&mut self) -> ConvertResult<()> {
        self.with_plugins(|plugins, converter| plugins.build_start(converter));
        self.collect_imports();

        self.build_project()?;
        self.with_plugins(|plugins, converter| plugins.build_project_done(converter));

        self.build_settings()?;
        self.with_plugins(|plugins, converter| plugins.build_settings_done(converter));

        self.copy_assets()?;
        self.build_app_templates()?;

        self.build_app_models()?;
        self.with_plugins(|plugins, converter| plugins.build_app_models_done(converter));

        self.build_app_views()?;
        self.with_plugins(|plugins, converter| plugins.build_app_views_done(converter));

        self.build_app_api()?;
        self.with_plugins(|plugins, converter| plugins.build_app_api_done(converter));

        self.build_app_urls()?;
        self.with_plugins(|plugins, converter| plugins.build_app_urls_done(converter));

        self.build_urls()?;
        self.with_plugins(|plugins, converter| plugins.build_urls_done(converter));

        self.build_app_admin()?;
        self.with_plugins(|plugins, converter| plugins.build_app_admin_done(converter));

        self.build_app_unused()?;

        self.with_plugins(|plugins, converter| plugins.build_end(converter));
        Ok(())
    }

    /// Seed the symbol table from the script's top-level imports
    pub fn collect_imports(&mut self) {
        self.ctx.collect_imports(&self.script);
        self.with_plugins(|plugins, converter| plugins.collect_imports(converter));
    }

    /// Run `django-admin startproject` and create the app dir
    pub fn build_project(&mut self) -> ConvertResult<()> {
        if self.root_path.exists() {
            return Err(ConversionError::DestinationExists(self.root_path.clone()));
        }
        std::fs::create_dir_all(&self.root_path)?;

        // Keep the caller's env so any active venv still applies, but the
        // scaffold must not pick up a settings module from the environment
        let output = Command::new("django-admin")
            .arg("startproject")
            .arg(&self.project_name)
            .arg(&self.root_path)
            .env_remove("DJANGO_SETTINGS_MODULE")
            .output()
            .map_err(|err| ConversionError::Scaffold(err.to_string()))?;

        if !output.status.success() {
            return Err(ConversionError::ScaffoldFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        let app_dir = self.app_path();
        std::fs::create_dir(&app_dir)?;
        std::fs::write(app_dir.join("__init__.py"), "")?;
        Ok(())
    }

    /// Merge the app constructor settings into the scaffolded settings module
    pub fn build_settings(&mut self) -> ConvertResult<()> {
        let mut resolver = Resolver::new(format!("{}.settings", self.project_name));

        let mut app_settings: FxIndexMap<String, Expr> = FxIndexMap::default();
        for (name, value) in &self.app.settings {
            if CONVERTER_SETTINGS.contains(&name.as_str()) {
                continue;
            }
            let references = collect_expr_references(value);
            resolver.add_references(&self.ctx, references.iter().map(String::as_str));
            app_settings.insert(name.clone(), value.clone());
        }

        let filename = self.project_path().join("settings.py");
        let settings_src = std::fs::read_to_string(&filename)?;
        let mut settings = parse_python(&settings_src)?;

        // Replace scaffolded values with the script's
        for stmt in &mut settings.body {
            let Stmt::Assign(assign) = stmt else {
                continue;
            };
            let Some(Expr::Name(target)) = assign.targets.first() else {
                continue;
            };
            let target = target.id.to_string();
            if let Some(value) = app_settings.shift_remove(&target) {
                assign.value = Box::new(value);
            }

            if target == "INSTALLED_APPS" {
                if let Expr::List(list) = &mut *assign.value {
                    list.elts.push(ast_builder::string_literal(&format!(
                        "{}.{}",
                        self.project_name, self.app_name
                    )));
                    if let Some(extra_apps) = self.app.setting_str_list("EXTRA_APPS") {
                        for extra_app in extra_apps {
                            list.elts.push(ast_builder::string_literal(&extra_app));
                        }
                    }
                }
            }
        }

        // Settings the scaffold doesn't know about are appended
        for (name, value) in app_settings {
            settings.body.push(ast_builder::assign(&name, value));
        }

        let mut plugins = std::mem::take(&mut self.plugins);
        plugins.build_settings(self, &mut resolver, &mut settings);
        self.plugins = plugins;

        // Resolve references from setting values - usually imports, but any
        // copied definitions must land before the assignments that use them
        let ref_src = resolver.gen_src(&self.script, &mut self.ctx)?;
        if !ref_src.is_empty() {
            let ref_module = parse_python(&ref_src)?;
            let (ref_imports, ref_others): (Vec<Stmt>, Vec<Stmt>) = ref_module
                .body
                .into_iter()
                .partition(|stmt| matches!(stmt, Stmt::Import(_) | Stmt::ImportFrom(_)));

            let starts_with_docstring = matches!(
                settings.body.first(),
                Some(Stmt::Expr(expr)) if matches!(&*expr.value, Expr::StringLiteral(_))
            );
            if !starts_with_docstring {
                return Err(ConversionError::UnexpectedSettings);
            }
            settings.body.splice(1..1, ref_imports);

            let mut index = 0;
            for stmt in &settings.body {
                if matches!(
                    stmt,
                    Stmt::Expr(_) | Stmt::Import(_) | Stmt::ImportFrom(_)
                ) {
                    index += 1;
                } else {
                    break;
                }
            }
            settings.body.splice(index..index, ref_others);
        }

        let src = settings
            .body
            .iter()
            .map(unparse_stmt)
            .collect::<Vec<_>>()
            .join("\n");
        write_file(&filename, &[&src])
    }

    /// Copy static, templates and migrations into the app, and the sqlite
    /// database if it exists
    pub fn copy_assets(&mut self) -> ConvertResult<()> {
        let script_dir = self.script.dir().to_path_buf();

        let db_name = self
            .app
            .setting_str("SQLITE_DATABASE")
            .unwrap_or_else(|| "db.sqlite3".to_string());
        let db_file = script_dir.join(&db_name);
        if db_file.exists() {
            std::fs::copy(&db_file, self.root_path.join("db.sqlite3"))?;
        }

        let migrations_dir = self
            .app
            .setting_str("MIGRATIONS_DIR")
            .unwrap_or_else(|| "migrations".to_string());
        let dir_names = [
            ("static".to_string(), "static"),
            ("templates".to_string(), "templates"),
            (migrations_dir, "migrations"),
        ];
        for (source_name, dest_name) in dir_names {
            let src_dir = script_dir.join(&source_name);
            if src_dir.is_dir() {
                copy_tree(&src_dir, &self.app_path().join(dest_name))?;
            }
        }

        self.with_plugins(|plugins, converter| plugins.copy_assets(converter));
        Ok(())
    }

    /// Write the in-memory template registrations as template files
    pub fn build_app_templates(&mut self) -> ConvertResult<()> {
        let dest_dir = self.app_path().join("templates");
        for (template_name, template_str) in &self.app.templates {
            let path = dest_dir.join(template_name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            debug!("writing template {}", path.display());
            std::fs::write(path, template_str)?;
        }

        self.with_plugins(|plugins, converter| plugins.build_app_templates(converter));
        Ok(())
    }

    /// Build `app/models.py` from the script's model classes
    pub fn build_app_models(&mut self) -> ConvertResult<()> {
        self.models.clear();
        let mut resolver = Resolver::new(".models");

        for stmt in &self.script.module.body {
            let Stmt::ClassDef(class) = stmt else {
                continue;
            };
            if !is_model_class(class) {
                continue;
            }
            let model =
                ScriptModel::new(class.name.as_str(), stmt.clone(), &self.app.instance_name)?;
            resolver.add(&mut self.ctx, &model.object.name, &model.object.references);
            self.models.push(model);
        }

        let mut extra_src = Vec::new();
        let mut plugins = std::mem::take(&mut self.plugins);
        plugins.build_app_models(self, &mut resolver, &mut extra_src);
        self.plugins = plugins;

        if self.models.is_empty() && extra_src.is_empty() {
            return Ok(());
        }

        let ref_src = resolver.gen_src(&self.script, &mut self.ctx)?;
        let models_src = self
            .models
            .iter()
            .map(|model| model.object.src.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let extra = extra_src.join("\n");
        write_file(
            &self.app_path().join("models.py"),
            &[&ref_src, &models_src, &extra],
        )
    }

    /// Build `app/views.py` from the script's routed views
    pub fn build_app_views(&mut self) -> ConvertResult<()> {
        self.views.clear();
        let mut resolver = Resolver::new(".views");

        for route in &self.app.routes {
            let RouteTarget::View(name) = &route.target else {
                continue;
            };
            // A view routed at several patterns is only moved once
            if self.views.iter().any(|view| view.object.name == *name) {
                continue;
            }
            let def = self
                .script
                .find_def(name)
                .ok_or_else(|| ConversionError::UndeterminedSymbol(name.clone()))?
                .clone();
            self.ctx.used.insert(name.clone());
            let view = ScriptView::new(name.clone(), def, &self.app.instance_name);
            resolver.add(&mut self.ctx, &view.object.name, &view.object.references);
            self.views.push(view);
        }

        let mut extra_src = Vec::new();
        let mut plugins = std::mem::take(&mut self.plugins);
        plugins.build_app_views(self, &mut resolver, &mut extra_src);
        self.plugins = plugins;

        if self.views.is_empty() && extra_src.is_empty() {
            return Ok(());
        }

        let mut extra_imports = "";
        if self.views.iter().any(|view| view.has_render) {
            // Rewritten render calls resolve to django's render shortcut
            extra_imports = "from django.shortcuts import render";
            resolver.global_refs.shift_remove("render");
        }

        let ref_src = resolver.gen_src(&self.script, &mut self.ctx)?;
        let views_src = self
            .views
            .iter()
            .map(|view| view.object.src.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let extra = extra_src.join("\n");
        write_file(
            &self.app_path().join("views.py"),
            &[extra_imports, &ref_src, &views_src, &extra],
        )
    }

    /// Build `app/api.py` from `@app.api` decorated functions
    pub fn build_app_api(&mut self) -> ConvertResult<()> {
        self.api_views.clear();
        let mut resolver = Resolver::new(".api");

        // API decorators are rewritten from @app.api to @api, and the api
        // object itself is hard-coded below, so the resolver knows it already
        resolver.add_object(&mut self.ctx, "api");

        for stmt in &self.script.module.body {
            let Stmt::FunctionDef(func) = stmt else {
                continue;
            };
            let is_api = func.decorator_list.iter().any(|decorator| {
                is_app_decorator(&decorator.expression, &self.app.instance_name, "api")
            });
            if !is_api {
                continue;
            }
            self.ctx.used.insert(func.name.to_string());
            let api_view =
                ScriptApiView::new(func.name.as_str(), stmt.clone(), &self.app.instance_name);
            resolver.add(
                &mut self.ctx,
                &api_view.object.name,
                &api_view.object.references,
            );
            self.api_views.push(api_view);
        }

        let mut extra_src = Vec::new();
        let mut plugins = std::mem::take(&mut self.plugins);
        plugins.build_app_api(self, &mut resolver, &mut extra_src);
        self.plugins = plugins;

        if self.api_views.is_empty() && extra_src.is_empty() {
            return Ok(());
        }

        let ref_src = resolver.gen_src(&self.script, &mut self.ctx)?;
        let api_src = self
            .api_views
            .iter()
            .map(|api_view| api_view.object.src.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let extra = extra_src.join("\n");
        write_file(
            &self.app_path().join("api.py"),
            &[
                "from ninja import NinjaAPI",
                &ref_src,
                "api = NinjaAPI()",
                &api_src,
                &extra,
            ],
        )
    }

    /// Build `app/urls.py` from the registered routes
    pub fn build_app_urls(&mut self) -> ConvertResult<()> {
        let mut url_imports: Vec<&str> = Vec::new();
        let mut urls: Vec<String> = Vec::new();
        let mut resolver = Resolver::new(".urls");

        // The API url is a special case which never appears in the routes
        if !self.api_views.is_empty() {
            let api_url = self
                .app
                .setting_str("API_URL")
                .unwrap_or_else(|| "api/".to_string());
            urls.push(make_url_line(
                api_url.trim_start_matches('/'),
                "api.urls",
                &RouteConfig::default(),
            ));
            resolver.add_references(&self.ctx, ["api"]);
            url_imports.push("path");
        }

        for route in &self.app.routes {
            match &route.target {
                RouteTarget::View(name) => {
                    let view = self
                        .views
                        .iter()
                        .find(|view| view.object.name == *name)
                        .ok_or_else(|| ConversionError::UndeterminedSymbol(name.clone()))?;
                    urls.push(view.make_url(route));
                }
                RouteTarget::Include(call) => {
                    let include = call
                        .arguments
                        .keywords
                        .iter()
                        .find(|keyword| keyword.arg.as_deref() == Some("include"))
                        .ok_or_else(|| {
                            ConversionError::UnparseableRoute(unparse_expr(&Expr::Call(
                                call.clone(),
                            )))
                        })?;
                    let include_src = unparse_expr(&include.value);
                    let references = collect_expr_references(&include.value);
                    urls.push(make_url_line(&route.pattern, &include_src, &route.config));
                    resolver.add_references(&self.ctx, references.iter().map(String::as_str));
                }
            }
            let import = if route.config.regex { "re_path" } else { "path" };
            if !url_imports.contains(&import) {
                url_imports.push(import);
            }
        }

        let mut extra_src = Vec::new();
        let mut plugins = std::mem::take(&mut self.plugins);
        plugins.build_app_urls(self, &mut resolver, &mut extra_src);
        self.plugins = plugins;

        if urls.is_empty() && self.extra_urls.is_empty() && extra_src.is_empty() {
            return Ok(());
        }

        // Register that we found URLs so build_urls() links to app.urls
        self.app_has_urls = true;

        // Every route pulls in path or re_path; plugin-only urls may need
        // neither
        let django_import = if url_imports.is_empty() {
            String::new()
        } else {
            format!("from django.urls import {}", url_imports.join(", "))
        };
        // A urls.py without views can happen when a plugin contributed all
        // the urls
        let views_import = if self.views.is_empty() {
            ""
        } else {
            "from . import views"
        };

        let ref_src = resolver.gen_src(&self.script, &mut self.ctx)?;
        let mut pattern_lines = vec!["urlpatterns = [".to_string()];
        pattern_lines.extend(self.extra_urls.iter().cloned());
        pattern_lines.extend(urls);
        pattern_lines.push("]".to_string());
        let patterns = pattern_lines.join("\n");
        let extra = extra_src.join("\n");

        write_file(
            &self.app_path().join("urls.py"),
            &[&django_import, views_import, &ref_src, &patterns, &extra],
        )
    }

    /// Patch the scaffolded `project/urls.py`
    pub fn build_urls(&mut self) -> ConvertResult<()> {
        let filename = self.project_path().join("urls.py");
        let mut src = std::fs::read_to_string(&filename)?;

        let pattern = "urlpatterns = [";
        if !src.contains(pattern) {
            return Err(ConversionError::UrlconfPatternMissing(
                "urlpatterns".to_string(),
            ));
        }

        if self.app_has_urls {
            src = src
                .replace(
                    "from django.urls import path",
                    "from django.urls import include, path",
                )
                .replace(
                    pattern,
                    &format!(
                        "{pattern}\n    path(\"\", include(\"{}.{}.urls\")),",
                        self.project_name, self.app_name
                    ),
                );
        }

        if let Some(admin_url) = self.app.setting_str("ADMIN_URL") {
            let admin_pattern = "\"admin/\"";
            if !src.contains(admin_pattern) {
                return Err(ConversionError::UrlconfPatternMissing(
                    "the admin path".to_string(),
                ));
            }
            src = src.replace(admin_pattern, &format!("\"{admin_url}\""));
        }

        let mut src_lines: Vec<String> = src.lines().map(str::to_string).collect();
        let mut plugins = std::mem::take(&mut self.plugins);
        plugins.build_urls(self, &mut src_lines);
        self.plugins = plugins;

        write_file(&filename, &[&src_lines.join("\n")])
    }

    /// Write discovered model admin registrations to `app/admin.py`
    pub fn build_app_admin(&mut self) -> ConvertResult<()> {
        let mut admins: Vec<String> = Vec::new();
        let mut resolver = Resolver::new(".admin");

        for model in &self.models {
            let Some(admin_src) = model.make_model_admin() else {
                continue;
            };
            resolver.add_references(&self.ctx, [model.object.name.as_str()]);
            admins.push(admin_src);
        }

        let mut extra_src = Vec::new();
        let mut plugins = std::mem::take(&mut self.plugins);
        plugins.build_app_admin(self, &mut resolver, &mut extra_src);
        self.plugins = plugins;

        if admins.is_empty() {
            return Ok(());
        }

        let ref_src = resolver.gen_src(&self.script, &mut self.ctx)?;
        let admins_src = admins.join("\n");
        let extra = extra_src.join("\n");
        write_file(
            &self.app_path().join("admin.py"),
            &["from django.contrib import admin", &ref_src, &admins_src, &extra],
        )
    }

    /// Sweep unconverted definitions into `app/unused.py` for manual review
    pub fn build_app_unused(&mut self) -> ConvertResult<()> {
        let mut resolver = Resolver::new(".unused");

        // Imports aren't worth reporting, and the app instance is consumed
        // by the conversion itself
        let mut used = self.ctx.used.clone();
        used.extend(self.ctx.imports.keys().cloned());
        used.insert(self.app.instance_name.clone());

        let unused: Vec<String> = self
            .script
            .top_level_names()
            .into_iter()
            .filter(|name| !used.contains(name) && !name.starts_with('_'))
            .collect();

        let mut all_src = Vec::new();
        for name in &unused {
            let (src, references) = collect_definition(&self.script, &mut self.ctx, name)?;
            resolver.add(&mut self.ctx, name, &references);
            all_src.push(src);
        }

        let mut extra_src = Vec::new();
        let mut plugins = std::mem::take(&mut self.plugins);
        plugins.build_app_unused(self, &mut resolver, &mut extra_src);
        self.plugins = plugins;

        if all_src.is_empty() && extra_src.is_empty() {
            return Ok(());
        }

        let ref_src = resolver.gen_src(&self.script, &mut self.ctx)?;
        let unused_src = all_src.join("\n");
        let extra = extra_src.join("\n");
        write_file_with_banner(
            &self.app_path().join("unused.py"),
            &[
                "# Definitions that were not used by the unfurl converter",
                "# These will need to be merged into the rest of the app manually",
            ],
            &[&ref_src, &unused_src, &extra],
        )?;

        info!("unused code detected, see {}/unused.py", self.app_name);
        Ok(())
    }
}

/// Derive an importable app name from the script filename
pub fn default_app_name(script_path: &Path) -> String {
    let stem = script_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("app");
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name
        .chars()
        .next()
        .is_none_or(|c| !c.is_ascii_alphabetic() && c != '_')
    {
        name.insert(0, '_');
    }
    name.to_lowercase()
}

fn copy_tree(src: &Path, dest: &Path) -> ConvertResult<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    const SCRIPT: &str = r#"
from django.db import models

MEANING = 42


def leftover(x):
    return x + MEANING


app = Django(ADMIN_URL="secret/", DEBUG=True, EXTRA_APPS=["sims"])


@app.admin(list_display=["id", "timestamp"])
class CountLog(models.Model):
    timestamp = models.DateTimeField(auto_now_add=True)


@app.route("/")
def count(request):
    CountLog.objects.create()
    return f"<p>Number of page loads: {CountLog.objects.count()}</p>"


app.route("/polls/", include="polls.urls")
"#;

    fn converter(root: &Path) -> Converter {
        let script =
            ScriptSource::from_source(Path::new("counter.py"), SCRIPT.to_string()).unwrap();
        let mut converter =
            Converter::new(script, &root.join("project"), "myproject", None).unwrap();
        converter.ctx.collect_imports(&converter.script);
        converter
    }

    fn prepare_dirs(converter: &Converter) {
        std::fs::create_dir_all(converter.app_path()).unwrap();
    }

    #[test]
    fn test_default_app_name() {
        assert_eq!(default_app_name(Path::new("counter.py")), "counter");
        assert_eq!(default_app_name(Path::new("my-script.py")), "my_script");
        assert_eq!(default_app_name(Path::new("1app.py")), "_1app");
    }

    #[test]
    fn test_destination_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        std::fs::create_dir_all(&converter.root_path).unwrap();
        assert!(matches!(
            converter.build_project(),
            Err(ConversionError::DestinationExists(_))
        ));
    }

    #[test]
    fn test_build_settings_merges_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        prepare_dirs(&converter);
        std::fs::write(
            converter.project_path().join("settings.py"),
            "\
\"\"\"Django settings\"\"\"
DEBUG = False
INSTALLED_APPS = [
    \"django.contrib.admin\",
]
",
        )
        .unwrap();

        converter.build_settings().unwrap();
        let written =
            std::fs::read_to_string(converter.project_path().join("settings.py")).unwrap();

        assert!(written.contains("DEBUG = True"));
        assert!(written.contains("myproject.counter"));
        assert!(written.contains("sims"));
        // Converter-only settings must not leak into settings.py
        assert!(!written.contains("ADMIN_URL"));
        assert!(!written.contains("EXTRA_APPS"));
    }

    #[test]
    fn test_build_settings_requires_docstring() {
        let dir = tempfile::tempdir().unwrap();
        // SECRET references a helper, so the resolver has source to insert
        // and the missing docstring is detected
        let script = ScriptSource::from_source(
            Path::new("counter.py"),
            "def helper():\n    return 1\n\n\napp = Django(SECRET=helper())\n".to_string(),
        )
        .unwrap();
        let mut converter =
            Converter::new(script, &dir.path().join("project"), "myproject", None).unwrap();
        prepare_dirs(&converter);
        std::fs::write(converter.project_path().join("settings.py"), "DEBUG = False\n").unwrap();

        assert!(matches!(
            converter.build_settings(),
            Err(ConversionError::UnexpectedSettings)
        ));
    }

    #[test]
    fn test_build_app_views_and_urls() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        prepare_dirs(&converter);

        converter.build_app_models().unwrap();
        converter.build_app_views().unwrap();
        converter.build_app_urls().unwrap();

        let models = std::fs::read_to_string(converter.app_path().join("models.py")).unwrap();
        assert!(models.contains("class CountLog(models.Model):"));
        assert!(models.contains("from django.db import models"));
        assert!(!models.contains("@app.admin"));

        let views = std::fs::read_to_string(converter.app_path().join("views.py")).unwrap();
        assert!(views.contains("def count(request):"));
        assert!(views.contains("@ensure_http_response"));
        assert!(views.contains("def ensure_http_response"));
        assert!(views.contains("from .models import CountLog"));

        let urls = std::fs::read_to_string(converter.app_path().join("urls.py")).unwrap();
        assert!(urls.contains("from django.urls import path"));
        assert!(urls.contains("from . import views"));
        assert!(urls.contains("path(\"\", views.count),"));
        assert!(urls.contains("path(\"polls/\", 'polls.urls'),") || urls.contains("path(\"polls/\", \"polls.urls\"),"));
    }

    #[test]
    fn test_build_urls_patches_project_urlconf() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        prepare_dirs(&converter);
        converter.app_has_urls = true;
        std::fs::write(
            converter.project_path().join("urls.py"),
            "\
from django.contrib import admin
from django.urls import path

urlpatterns = [
    path(\"admin/\", admin.site.urls),
]
",
        )
        .unwrap();

        converter.build_urls().unwrap();
        let written = std::fs::read_to_string(converter.project_path().join("urls.py")).unwrap();
        assert!(written.contains("from django.urls import include, path"));
        assert!(written.contains("include(\"myproject.counter.urls\")"));
        // ADMIN_URL from the constructor replaces the default admin path
        assert!(written.contains("path(\"secret/\", admin.site.urls)"));
        assert!(!written.contains("\"admin/\""));
    }

    #[test]
    fn test_build_app_admin() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        prepare_dirs(&converter);

        converter.build_app_models().unwrap();
        converter.build_app_admin().unwrap();

        let admin = std::fs::read_to_string(converter.app_path().join("admin.py")).unwrap();
        assert!(admin.contains("from django.contrib import admin"));
        assert!(admin.contains("@admin.register(CountLog)"));
        assert!(admin.contains("class CountLogAdmin(admin.ModelAdmin):"));
        assert!(admin.contains("from .models import CountLog"));
    }

    #[test]
    fn test_build_app_unused() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        prepare_dirs(&converter);

        converter.build_app_models().unwrap();
        converter.build_app_views().unwrap();
        converter.build_app_unused().unwrap();

        let unused = std::fs::read_to_string(converter.app_path().join("unused.py")).unwrap();
        assert!(unused.starts_with("# Definitions that were not used by the unfurl converter"));
        assert!(unused.contains("def leftover"));
        assert!(unused.contains("MEANING = 42"));
        // Converted definitions must not be swept up again
        assert!(!unused.contains("def count"));
        assert!(!unused.contains("class CountLog"));
    }

    #[test]
    fn test_unused_annotated_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let script = ScriptSource::from_source(
            Path::new("counter.py"),
            "app = Django()\n\nRETRIES: int = 3\n".to_string(),
        )
        .unwrap();
        let mut converter =
            Converter::new(script, &dir.path().join("project"), "myproject", None).unwrap();
        prepare_dirs(&converter);

        converter.build_app_unused().unwrap();
        let unused = std::fs::read_to_string(converter.app_path().join("unused.py")).unwrap();
        assert!(unused.contains("RETRIES: int = 3"));
    }

    #[test]
    fn test_no_unused_file_when_everything_converted() {
        let dir = tempfile::tempdir().unwrap();
        let script = ScriptSource::from_source(
            Path::new("counter.py"),
            "\
app = Django()


@app.route(\"/\")
def count(request):
    return \"hi\"
"
            .to_string(),
        )
        .unwrap();
        let mut converter =
            Converter::new(script, &dir.path().join("project"), "myproject", None).unwrap();
        prepare_dirs(&converter);

        converter.build_app_views().unwrap();
        converter.build_app_unused().unwrap();
        assert!(!converter.app_path().join("unused.py").exists());
    }

    #[test]
    fn test_missing_include_kwarg_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = ScriptSource::from_source(
            Path::new("counter.py"),
            "app = Django()\napp.route(\"/polls/\")\n".to_string(),
        )
        .unwrap();
        let mut converter =
            Converter::new(script, &dir.path().join("project"), "myproject", None).unwrap();
        prepare_dirs(&converter);

        assert!(matches!(
            converter.build_app_urls(),
            Err(ConversionError::UnparseableRoute(_))
        ));
    }

    #[test]
    fn test_plugin_extra_src() {
        struct ExtraViews;
        impl crate::plugins::ConverterPlugin for ExtraViews {
            fn name(&self) -> &str {
                "extra-views"
            }

            fn build_app_views(
                &mut self,
                _converter: &mut Converter,
                _resolver: &mut Resolver,
                extra_src: &mut Vec<String>,
            ) {
                extra_src.push("def healthcheck(request):\n    return HttpResponse()".to_string());
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let script =
            ScriptSource::from_source(Path::new("counter.py"), "app = Django()\n".to_string())
                .unwrap();
        let mut converter =
            Converter::new(script, &dir.path().join("project"), "myproject", None).unwrap();
        prepare_dirs(&converter);
        converter.register_plugin(Box::new(ExtraViews));

        // The script has no views of its own; the plugin's content still
        // produces a views.py
        converter.build_app_views().unwrap();
        let views = std::fs::read_to_string(converter.app_path().join("views.py")).unwrap();
        assert!(views.contains("def healthcheck"));
    }

    #[test]
    fn test_plugin_urls_without_routes() {
        let dir = tempfile::tempdir().unwrap();
        let script =
            ScriptSource::from_source(Path::new("counter.py"), "app = Django()\n".to_string())
                .unwrap();
        let mut converter =
            Converter::new(script, &dir.path().join("project"), "myproject", None).unwrap();
        prepare_dirs(&converter);

        // No routes of its own; the urlpatterns come entirely from a plugin
        converter
            .extra_urls
            .push("    *status_patterns,".to_string());
        converter.build_app_urls().unwrap();

        let urls = std::fs::read_to_string(converter.app_path().join("urls.py")).unwrap();
        assert!(urls.contains("*status_patterns"));
        // Nothing needs path/re_path, so the django import is omitted
        assert!(!urls.contains("from django.urls"));
    }

    #[test]
    fn test_build_app_templates() {
        let dir = tempfile::tempdir().unwrap();
        let script = ScriptSource::from_source(
            Path::new("counter.py"),
            "\
app = Django()
app.templates[\"counter/index.html\"] = \"<html></html>\"
"
            .to_string(),
        )
        .unwrap();
        let mut converter =
            Converter::new(script, &dir.path().join("project"), "myproject", None).unwrap();
        prepare_dirs(&converter);

        converter.build_app_templates().unwrap();
        let template = converter
            .app_path()
            .join("templates")
            .join("counter/index.html");
        assert_eq!(std::fs::read_to_string(template).unwrap(), "<html></html>");
    }
}
