use crate::ast::Expr;
use crate::token::TokenType;

/// Converts an expression to the parenthesized prefix form emitted by
/// the `parse` command.
pub struct AstPrinter;

impl AstPrinter {
    pub fn print(expr: &Expr) -> String {
        match expr {
            // ── literals ────────────────────────────────────────────────
            Expr::Literal(token) => match &token.token_type {
                TokenType::NUMBER(n) => {
                    if n.fract() == 0.0 {
                        // 3 → 3.0
                        format!("{:.1}", n)
                    } else {
                        n.to_string()
                    }
                }

                TokenType::STRING(s) => s.clone(),

                TokenType::TRUE => "true".to_string(),

                TokenType::FALSE => "false".to_string(),

                TokenType::NIL => "nil".to_string(),

                _ => token.lexeme.clone(),
            },

            // ── grouping ────────────────────────────────────────────────
            Expr::Grouping(inner) => format!("(group {})", Self::print(inner)),

            // ── unary operator ──────────────────────────────────────────
            Expr::Unary { op, right } => {
                format!("({} {})", op.lexeme, Self::print(right))
            }

            // ── binary / logical / path operator ────────────────────────
            Expr::Binary { op, left, right } => format!(
                "({} {} {})",
                op.lexeme,
                Self::print(left),
                Self::print(right)
            ),

            // ── variable / assign / call ────────────────────────────────
            Expr::Variable { name, .. } => name.lexeme.clone(),

            Expr::Assign { target, value, .. } => {
                format!("(= {} {})", Self::print(target), Self::print(value))
            }

            Expr::Call { callee, args, .. } => {
                let mut s = format!("(call {}", Self::print(callee));

                for arg in args {
                    s.push(' ');
                    s.push_str(&Self::print(arg));
                }

                s.push(')');
                s
            }
        }
    }
}
