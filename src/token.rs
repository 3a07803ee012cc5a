use std::fmt;
use std::mem;

use log::debug;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone)]
pub enum TokenType {
    // Single-character tokens.
    LEFT_PAREN,
    RIGHT_PAREN,
    LEFT_BRACE,
    RIGHT_BRACE,
    COMMA,
    DOT,
    MINUS,
    PLUS,
    SEMICOLON,
    SLASH,
    STAR,

    // One or two character tokens.
    BANG,
    BANG_EQUAL,
    EQUAL,
    EQUAL_EQUAL,
    GREATER,
    GREATER_EQUAL,
    LESS,
    LESS_EQUAL,

    // Literals.
    IDENTIFIER,
    STRING(String),
    NUMBER(f64),

    // Keywords.
    AND,
    CLASS,
    ELSE,
    FALSE,
    FUN,
    FOR,
    IF,
    NIL,
    OR,
    PRINT,
    RETURN,
    SUPER,
    THIS,
    TRUE,
    VAR,
    WHILE,

    // Special Characters
    EOF,
}

/// Kind-only comparison: two `NUMBER`s (or two `STRING`s) are equal
/// regardless of payload, so the parser can match against sentinels.
impl PartialEq for TokenType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TokenType::NUMBER(_), TokenType::NUMBER(_)) => true,

            (TokenType::STRING(_), TokenType::STRING(_)) => true,

            _ => mem::discriminant(self) == mem::discriminant(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: String, line: usize, column: usize) -> Self {
        debug!(
            "Creating token: type={:?}, lexeme={}, line={}, column={}",
            token_type, lexeme, line, column
        );

        Self {
            token_type,
            lexeme,
            line,
            column,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tmp: String = format!("{:?}", self.token_type);
        let type_name: &str = tmp.split('(').next().unwrap_or(&tmp);

        match &self.token_type {
            TokenType::STRING(literal) => {
                write!(f, "{} {} {}", type_name, self.lexeme, literal)
            }

            TokenType::NUMBER(num_literal) => {
                if num_literal.fract() == 0.0 {
                    write!(f, "{} {} {:.1}", type_name, self.lexeme, num_literal)
                } else {
                    write!(f, "{} {} {}", type_name, self.lexeme, num_literal)
                }
            }

            _ => write!(f, "{} {} null", type_name, self.lexeme),
        }
    }
}
