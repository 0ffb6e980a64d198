//! Deterministic source emission
//!
//! Every generated file is re-parsed, its imports deduplicated, hoisted and
//! grouped (stdlib, third-party, project-relative), and statements re-spaced,
//! so the output is stable across runs and pleasant to review. This is the
//! formatter/import-sorter boundary described by the conversion pipeline.

use std::path::Path;

use log::debug;
use ruff_python_ast::{Expr, ModModule, Stmt};
use ruff_python_codegen::{Generator, Stylist};
use ruff_python_parser::parse_module;
use ruff_python_stdlib::sys;
use ruff_text_size::Ranged;

use crate::{
    errors::{ConversionError, ConvertResult},
    types::PYTHON_MINOR_VERSION,
};

/// Parse Python source into a module AST
pub fn parse_python(source: &str) -> ConvertResult<ModModule> {
    let parsed = parse_module(source).map_err(|err| ConversionError::Parse(err.to_string()))?;
    Ok(parsed.into_syntax())
}

/// Check if a module path is part of the Python standard library
pub fn is_stdlib_module(module_name: &str) -> bool {
    let root = module_name.split('.').next().unwrap_or(module_name);
    sys::is_known_standard_library(PYTHON_MINOR_VERSION, root)
}

// Style source for rendering synthetic trees; four-space indent, LF endings.
const STYLE_SOURCE: &str = "pass\n";

fn with_generator<R>(f: impl FnOnce(Generator<'_>) -> R) -> R {
    let parsed = parse_module(STYLE_SOURCE).expect("static style source parses");
    let stylist = Stylist::from_tokens(parsed.tokens(), STYLE_SOURCE);
    f(Generator::from(&stylist))
}

/// Render a statement to source text
pub fn unparse_stmt(stmt: &Stmt) -> String {
    with_generator(|generator| generator.stmt(stmt))
}

/// Render an expression to source text
pub fn unparse_expr(expr: &Expr) -> String {
    with_generator(|generator| generator.expr(expr))
}

/// Slice a statement's original text out of its source, including any
/// decorators preceding it
pub fn stmt_text<'a>(source: &'a str, stmt: &Stmt) -> &'a str {
    let mut start = stmt.range().start();
    let decorators = match stmt {
        Stmt::FunctionDef(func) => func.decorator_list.as_slice(),
        Stmt::ClassDef(class) => class.decorator_list.as_slice(),
        _ => &[],
    };
    if let Some(first) = decorators.first() {
        start = start.min(first.range.start());
    }
    source[start.to_usize()..stmt.range().end().to_usize()].trim_end()
}

/// Import group ordering: future, stdlib, third-party, then project-relative
fn import_rank(stmt: &Stmt) -> u8 {
    match stmt {
        Stmt::ImportFrom(import) => {
            if import.level > 0 {
                return 3;
            }
            match import.module.as_deref() {
                Some("__future__") => 0,
                Some(module) if is_stdlib_module(module) => 1,
                _ => 2,
            }
        }
        Stmt::Import(import) => {
            let Some(alias) = import.names.first() else {
                return 2;
            };
            if is_stdlib_module(&alias.name) { 1 } else { 2 }
        }
        _ => 2,
    }
}

/// Normalize a chunk of generated source: hoist, dedupe and group imports,
/// keep the module docstring first, and re-space top-level definitions.
pub fn format_module(source: &str) -> ConvertResult<String> {
    let module = parse_python(source)?;

    let mut docstring: Option<&Stmt> = None;
    let mut imports: Vec<&Stmt> = Vec::new();
    let mut body: Vec<&Stmt> = Vec::new();

    for (index, stmt) in module.body.iter().enumerate() {
        match stmt {
            Stmt::Expr(expr) if index == 0 && matches!(*expr.value, Expr::StringLiteral(_)) => {
                docstring = Some(stmt);
            }
            Stmt::Import(_) | Stmt::ImportFrom(_) => imports.push(stmt),
            _ => body.push(stmt),
        }
    }

    // Dedupe by rendered text, then order by group and text
    let mut rendered_imports: Vec<(u8, String)> = Vec::new();
    for stmt in imports {
        let rank = import_rank(stmt);
        let text = unparse_stmt(stmt);
        if !rendered_imports.iter().any(|(_, seen)| *seen == text) {
            rendered_imports.push((rank, text));
        }
    }
    rendered_imports.sort();

    let mut out = String::new();
    if let Some(stmt) = docstring {
        out.push_str(stmt_text(source, stmt));
        out.push('\n');
    }

    let mut last_rank = None;
    for (rank, text) in &rendered_imports {
        if !out.is_empty() && last_rank != Some(*rank) {
            out.push('\n');
        }
        out.push_str(text);
        out.push('\n');
        last_rank = Some(*rank);
    }

    for stmt in body {
        let is_definition = matches!(stmt, Stmt::FunctionDef(_) | Stmt::ClassDef(_));
        if !out.is_empty() {
            if is_definition {
                out.push_str("\n\n");
            } else if last_rank.is_some() {
                out.push('\n');
            }
        }
        last_rank = None;
        out.push_str(stmt_text(source, stmt));
        out.push('\n');
    }

    Ok(out)
}

/// Join content blocks, normalize, and write to disk
pub fn write_file(path: &Path, content: &[&str]) -> ConvertResult<()> {
    write_file_with_banner(path, &[], content)
}

/// Like [`write_file`], but prefix the formatted output with raw comment
/// lines (normalization would otherwise drop them)
pub fn write_file_with_banner(path: &Path, banner: &[&str], content: &[&str]) -> ConvertResult<()> {
    let joined = content
        .iter()
        .filter(|block| !block.trim().is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    let mut formatted = format_module(&joined)?;
    if !banner.is_empty() {
        formatted = format!("{}\n{formatted}", banner.join("\n"));
    }
    debug!("writing {}", path.display());
    std::fs::write(path, formatted)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_stdlib_classification() {
        assert!(is_stdlib_module("os"));
        assert!(is_stdlib_module("os.path"));
        assert!(!is_stdlib_module("django"));
    }

    #[test]
    fn test_imports_hoisted_and_grouped() {
        let source = "\
from django.db import models
x = 1
import os
from . import views
import os
";
        let formatted = format_module(source).unwrap();
        assert_eq!(
            formatted,
            "\
import os

from django.db import models

from . import views

x = 1
"
        );
    }

    #[test]
    fn test_docstring_stays_first() {
        let source = "\
\"\"\"Module docs\"\"\"
import sys
DEBUG = True
";
        let formatted = format_module(source).unwrap();
        assert!(formatted.starts_with("\"\"\"Module docs\"\"\"\n"));
        let docstring_pos = formatted.find("Module docs").unwrap();
        let import_pos = formatted.find("import sys").unwrap();
        assert!(docstring_pos < import_pos);
    }

    #[test]
    fn test_definitions_spaced() {
        let source = "\
import os


def first():
    pass
def second():
    pass
";
        let formatted = format_module(source).unwrap();
        assert!(formatted.contains("import os\n\n\ndef first"));
        assert!(formatted.contains("pass\n\n\ndef second"));
    }

    #[test]
    fn test_unparse_stmt_round_trip() {
        let module = parse_python("result = value + 1").unwrap();
        assert_eq!(unparse_stmt(&module.body[0]), "result = value + 1");
    }

    #[test]
    fn test_write_file_with_banner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unused.py");
        write_file_with_banner(&path, &["# needs manual review"], &["x = 1"]).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "# needs manual review\nx = 1\n");
    }
}
