//! Factory functions for synthetic AST nodes
//!
//! Nodes created here don't originate from source files; they all carry
//! default ranges to make that explicit.

use ruff_python_ast::{
    AtomicNodeIndex, Decorator, Expr, ExprContext, ExprName, ExprStringLiteral, Stmt, StmtAssign,
    StringLiteral, StringLiteralFlags, StringLiteralValue, name::Name,
};
use ruff_text_size::TextRange;

fn synthetic_range() -> TextRange {
    TextRange::default()
}

/// Create a name expression: `name`
pub fn name(id: &str) -> Expr {
    Expr::Name(ExprName {
        id: Name::new(id),
        ctx: ExprContext::Load,
        range: synthetic_range(),
        node_index: AtomicNodeIndex::NONE,
    })
}

/// Create a string literal expression: `"value"`
pub fn string_literal(value: &str) -> Expr {
    Expr::StringLiteral(ExprStringLiteral {
        value: StringLiteralValue::single(StringLiteral {
            value: value.into(),
            flags: StringLiteralFlags::empty(),
            range: synthetic_range(),
            node_index: AtomicNodeIndex::NONE,
        }),
        range: synthetic_range(),
        node_index: AtomicNodeIndex::NONE,
    })
}

/// Create a simple assignment: `target = value`
pub fn assign(target: &str, value: Expr) -> Stmt {
    Stmt::Assign(StmtAssign {
        targets: vec![Expr::Name(ExprName {
            id: Name::new(target),
            ctx: ExprContext::Store,
            range: synthetic_range(),
            node_index: AtomicNodeIndex::NONE,
        })],
        value: Box::new(value),
        range: synthetic_range(),
        node_index: AtomicNodeIndex::NONE,
    })
}

/// Wrap an expression as a decorator
pub fn decorator(expression: Expr) -> Decorator {
    Decorator {
        expression,
        range: synthetic_range(),
        node_index: AtomicNodeIndex::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        match name("render") {
            Expr::Name(n) => assert_eq!(n.id.as_str(), "render"),
            _ => panic!("Expected Name expression"),
        }
    }

    #[test]
    fn test_string_literal() {
        match string_literal("project.app") {
            Expr::StringLiteral(s) => assert_eq!(s.value.to_str(), "project.app"),
            _ => panic!("Expected StringLiteral expression"),
        }
    }

    #[test]
    fn test_assign() {
        match assign("ADMIN_URL", string_literal("admin/")) {
            Stmt::Assign(assign) => {
                assert_eq!(assign.targets.len(), 1);
                match &assign.targets[0] {
                    Expr::Name(n) => assert_eq!(n.id.as_str(), "ADMIN_URL"),
                    _ => panic!("Expected Name target"),
                }
            }
            _ => panic!("Expected Assign statement"),
        }
    }
}
