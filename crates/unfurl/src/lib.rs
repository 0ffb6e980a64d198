//! unfurl converts a single-file Django script into a conventional
//! multi-file Django project.
//!
//! The script is parsed, its app instance and registrations discovered
//! statically, and each definition moved to its conventional home - models to
//! `models.py`, views to `views.py`, settings merged into the scaffolded
//! `settings.py`, and so on - with cross-module references resolved into
//! imports. Anything that can't be classified lands in `unused.py` for
//! manual review.

pub mod ast_builder;
pub mod config;
pub mod converter;
pub mod defer;
pub mod discovery;
pub mod emit;
pub mod errors;
pub mod objects;
pub mod plugins;
pub mod resolver;
pub mod types;
pub mod visitors;
