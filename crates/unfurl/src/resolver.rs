//! Name resolution across generated modules
//!
//! Each generated module gets its own [`Resolver`]; the shared
//! [`ConvertContext`] carries the conversion-wide symbol table mapping every
//! known name to the import statement that provides it. When a module's
//! definitions reference symbols that live elsewhere, the resolver either
//! emits the import or copies the referenced definition in, chasing
//! transitive references to a fixed point.

use log::debug;

use crate::{
    discovery::ScriptSource,
    emit::{stmt_text, unparse_stmt},
    errors::{ConversionError, ConvertResult},
    objects::{ENSURE_HTTP_RESPONSE_IMPORTS, ENSURE_HTTP_RESPONSE_SRC},
    types::{FxIndexMap, FxIndexSet},
    visitors::collect_references,
};

/// Conversion-wide resolution state, shared by every module resolver
#[derive(Debug, Default)]
pub struct ConvertContext {
    /// Import statement providing each known name: script imports, plus
    /// every definition placed in a generated module so far
    pub imports: FxIndexMap<String, String>,
    /// Script top-level names that have been copied into generated modules
    pub used: FxIndexSet<String>,
}

impl ConvertContext {
    /// Seed the symbol table from the script's own top-level imports
    pub fn collect_imports(&mut self, script: &ScriptSource) {
        use ruff_python_ast::Stmt;
        for stmt in &script.module.body {
            match stmt {
                Stmt::Import(import) => {
                    for alias in &import.names {
                        match &alias.asname {
                            Some(asname) => {
                                self.imports.insert(
                                    asname.to_string(),
                                    format!("import {} as {asname}", alias.name),
                                );
                            }
                            None => {
                                self.imports
                                    .insert(alias.name.to_string(), format!("import {}", alias.name));
                            }
                        }
                    }
                }
                Stmt::ImportFrom(import) => {
                    let Some(module) = &import.module else {
                        continue;
                    };
                    for alias in &import.names {
                        match &alias.asname {
                            Some(asname) => {
                                self.imports.insert(
                                    asname.to_string(),
                                    format!("from {module} import {} as {asname}", alias.name),
                                );
                            }
                            None => {
                                self.imports.insert(
                                    alias.name.to_string(),
                                    format!("from {module} import {}", alias.name),
                                );
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Resolve names and references within the scope of one generated module
#[derive(Debug)]
pub struct Resolver {
    /// Import path of the module being generated, e.g. `.views`
    module_name: String,
    /// Import statements this module needs
    pub imports: FxIndexSet<String>,
    /// Names defined in this module
    pub local_refs: FxIndexSet<String>,
    /// Names referenced but not yet defined or imported
    pub global_refs: FxIndexSet<String>,
}

impl Resolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            imports: FxIndexSet::default(),
            local_refs: FxIndexSet::default(),
            global_refs: FxIndexSet::default(),
        }
    }

    /// Register an object definition and the objects it references
    pub fn add(
        &mut self,
        ctx: &mut ConvertContext,
        name: &str,
        references: &FxIndexSet<String>,
    ) {
        self.add_object(ctx, name);
        self.add_references(ctx, references.iter().map(String::as_str));
    }

    /// Register an object defined in this module, and tell other modules
    /// where to find it
    pub fn add_object(&mut self, ctx: &mut ConvertContext, name: &str) {
        ctx.imports.insert(
            name.to_string(),
            format!("from {} import {name}", self.module_name),
        );
        self.local_refs.insert(name.to_string());
    }

    /// Register references to symbols this module needs: each will either be
    /// imported from another module, or have its source copied in
    pub fn add_references<'a>(
        &mut self,
        ctx: &ConvertContext,
        references: impl IntoIterator<Item = &'a str>,
    ) {
        for reference in references {
            // Usually a plain name, but could be dotted, e.g. admin.site.urls
            let base = reference.split('.').next().unwrap_or(reference);
            if self.local_refs.contains(base) {
                continue;
            }
            if let Some(import) = ctx.imports.get(base) {
                self.imports.insert(import.clone());
            } else {
                self.global_refs.insert(base.to_string());
            }
        }
    }

    /// Generate the source needed to resolve the discovered references,
    /// copying in referenced definitions and chasing their own references
    /// until none remain
    pub fn gen_src(
        &mut self,
        script: &ScriptSource,
        ctx: &mut ConvertContext,
    ) -> ConvertResult<String> {
        let snapshot = self.global_refs.clone();
        let mut copied: FxIndexMap<String, (String, FxIndexSet<String>)> = FxIndexMap::default();

        while let Some(global_ref) = self.global_refs.shift_remove_index(0) {
            debug!("resolving `{global_ref}` into {}", self.module_name);
            let (src, references) = collect_definition(script, ctx, &global_ref)?;

            self.add_references(ctx, references.iter().map(String::as_str));

            // References to definitions already copied in are no longer global
            let local_refs = &self.local_refs;
            self.global_refs
                .retain(|reference| !local_refs.contains(reference));

            self.local_refs.insert(global_ref.clone());
            ctx.imports.insert(
                global_ref.clone(),
                format!("from {} import {global_ref}", self.module_name),
            );
            copied.insert(global_ref, (src, references));
        }

        self.global_refs = snapshot;

        // Assignments execute at import time, so a copied definition must
        // land after the definitions it references
        let mut ordered: Vec<&str> = Vec::new();
        let mut emitted = FxIndexSet::default();
        for name in copied.keys() {
            emit_dependencies_first(name, &copied, &mut emitted, &mut ordered);
        }

        let mut blocks: Vec<&str> = self.imports.iter().map(String::as_str).collect();
        blocks.extend(ordered);
        Ok(blocks.join("\n"))
    }
}

/// Depth-first emission of a copied definition, its in-module dependencies
/// first. Cycles (mutually recursive functions) fall back to discovery order.
fn emit_dependencies_first<'a>(
    name: &str,
    copied: &'a FxIndexMap<String, (String, FxIndexSet<String>)>,
    emitted: &mut FxIndexSet<String>,
    out: &mut Vec<&'a str>,
) {
    if !emitted.insert(name.to_string()) {
        return;
    }
    let Some((src, references)) = copied.get(name) else {
        return;
    };
    for reference in references {
        if copied.contains_key(reference) {
            emit_dependencies_first(reference, copied, emitted, out);
        }
    }
    out.push(src.as_str());
}

/// Collect the source of a script top-level definition and the names it
/// references
pub fn collect_definition(
    script: &ScriptSource,
    ctx: &mut ConvertContext,
    name: &str,
) -> ConvertResult<(String, FxIndexSet<String>)> {
    // The response wrapper is ours, not the script's
    if name == "ensure_http_response" {
        for (bound, import) in ENSURE_HTTP_RESPONSE_IMPORTS {
            ctx.imports.insert((*bound).to_string(), (*import).to_string());
        }
        let module = crate::emit::parse_python(ENSURE_HTTP_RESPONSE_SRC)?;
        let references = collect_references(&module.body[0]);
        return Ok((ENSURE_HTTP_RESPONSE_SRC.to_string(), references));
    }

    if let Some(def) = script.find_def(name) {
        ctx.used.insert(name.to_string());
        let src = stmt_text(&script.src, def).to_string();
        let references = collect_references(def);
        return Ok((src, references));
    }

    if let Some(assign) = script.find_assign(name) {
        ctx.used.insert(name.to_string());
        let src = unparse_stmt(assign);
        let references = collect_references(assign);
        return Ok((src, references));
    }

    Err(ConversionError::UndeterminedSymbol(name.to_string()))
}
