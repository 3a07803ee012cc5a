use std::cell::Cell;
use std::iter::Peekable;
use std::rc::Rc;

use log::debug;

use crate::ast::{Expr, FunctionDecl, Stmt};
use crate::error::{LoxError, Result};
use crate::scanner::Scanner;
use crate::token::{Token, TokenType};

/// Recursive-descent parser over the lazy token stream.
///
/// Two entry points: [`Parser::parse_expression`] for the `parse` and
/// `evaluate` commands, [`Parser::parse_program`] for `run`.  Both
/// require the whole input to be consumed up to `EOF`.
pub struct Parser {
    tokens: Peekable<Scanner>,
    previous: Option<Token>,
}

impl Parser {
    pub fn new(scanner: Scanner) -> Self {
        Parser {
            tokens: scanner.peekable(),
            previous: None,
        }
    }

    /// Parse a single expression; trailing tokens are an error.
    pub fn parse_expression(&mut self) -> Result<Expr> {
        let expr = self.expression()?;

        if !self.is_at_end()? {
            let line = self.peek()?.line;

            return Err(LoxError::parse(line, "Expect end of expression."));
        }

        Ok(expr)
    }

    /// Parse a full program: declarations up to `EOF`.
    pub fn parse_program(&mut self) -> Result<Vec<Stmt>> {
        let mut statements: Vec<Stmt> = Vec::new();

        while !self.is_at_end()? {
            statements.push(self.declaration()?);
        }

        debug!("Parsed program with {} statement(s)", statements.len());

        Ok(statements)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Declarations and statements
    // ─────────────────────────────────────────────────────────────────────

    fn declaration(&mut self) -> Result<Stmt> {
        if self.match_tokens(&[TokenType::VAR])? {
            return self.var_declaration();
        }

        if self.match_tokens(&[TokenType::FUN])? {
            let decl = self.function("function")?;

            return Ok(Stmt::Function(Rc::new(decl)));
        }

        if self.match_tokens(&[TokenType::CLASS])? {
            return self.class_declaration();
        }

        self.statement()
    }

    fn var_declaration(&mut self) -> Result<Stmt> {
        let name = self.consume(TokenType::IDENTIFIER, "Expect variable name.")?;

        let initializer = if self.match_tokens(&[TokenType::EQUAL])? {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(
            TokenType::SEMICOLON,
            "Expect ';' after variable declaration.",
        )?;

        Ok(Stmt::Var { name, initializer })
    }

    /// Parses a function or method body after the leading keyword (for
    /// methods there is none) has been consumed.
    fn function(&mut self, kind: &str) -> Result<FunctionDecl> {
        let name = self.consume(TokenType::IDENTIFIER, &format!("Expect {} name.", kind))?;

        self.consume(
            TokenType::LEFT_PAREN,
            &format!("Expect '(' after {} name.", kind),
        )?;

        let mut params: Vec<Token> = Vec::new();

        if !self.check(&TokenType::RIGHT_PAREN)? {
            loop {
                params.push(self.consume(TokenType::IDENTIFIER, "Expect parameter name.")?);

                if !self.match_tokens(&[TokenType::COMMA])? {
                    break;
                }
            }
        }

        self.consume(TokenType::RIGHT_PAREN, "Expect ')' after parameters.")?;

        self.consume(
            TokenType::LEFT_BRACE,
            &format!("Expect '{{' before {} body.", kind),
        )?;

        let body = self.block_statements()?;

        Ok(FunctionDecl { name, params, body })
    }

    fn class_declaration(&mut self) -> Result<Stmt> {
        let name = self.consume(TokenType::IDENTIFIER, "Expect class name.")?;

        let superclass = if self.match_tokens(&[TokenType::LESS])? {
            let super_name = self.consume(TokenType::IDENTIFIER, "Expect superclass name.")?;

            Some(Expr::Variable {
                name: super_name,
                depth: Cell::new(None),
            })
        } else {
            None
        };

        self.consume(TokenType::LEFT_BRACE, "Expect '{' before class body.")?;

        let mut methods: Vec<Rc<FunctionDecl>> = Vec::new();

        while !self.check(&TokenType::RIGHT_BRACE)? && !self.is_at_end()? {
            methods.push(Rc::new(self.function("method")?));
        }

        self.consume(TokenType::RIGHT_BRACE, "Expect '}' after class body.")?;

        Ok(Stmt::Class {
            name,
            superclass,
            methods,
        })
    }

    fn statement(&mut self) -> Result<Stmt> {
        if self.match_tokens(&[TokenType::PRINT])? {
            return self.print_statement();
        }

        if self.match_tokens(&[TokenType::RETURN])? {
            return self.return_statement();
        }

        if self.match_tokens(&[TokenType::IF])? {
            return self.if_statement();
        }

        if self.match_tokens(&[TokenType::WHILE])? {
            return self.while_statement();
        }

        if self.match_tokens(&[TokenType::FOR])? {
            return self.for_statement();
        }

        if self.match_tokens(&[TokenType::LEFT_BRACE])? {
            return Ok(Stmt::Block(self.block_statements()?));
        }

        self.expression_statement()
    }

    fn print_statement(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;

        self.consume(TokenType::SEMICOLON, "Expect ';' after value.")?;

        Ok(Stmt::Print(expr))
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        let keyword = self.previous().clone();

        let value = if self.check(&TokenType::SEMICOLON)? {
            None
        } else {
            Some(self.expression()?)
        };

        self.consume(TokenType::SEMICOLON, "Expect ';' after return value.")?;

        Ok(Stmt::Return { keyword, value })
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenType::LEFT_PAREN, "Expect '(' after 'if'.")?;

        let condition = self.expression()?;

        self.consume(TokenType::RIGHT_PAREN, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);

        let else_branch = if self.match_tokens(&[TokenType::ELSE])? {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenType::LEFT_PAREN, "Expect '(' after 'while'.")?;

        let condition = self.expression()?;

        self.consume(TokenType::RIGHT_PAREN, "Expect ')' after condition.")?;

        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenType::LEFT_PAREN, "Expect '(' after 'for'.")?;

        let initializer = if self.match_tokens(&[TokenType::SEMICOLON])? {
            None
        } else if self.match_tokens(&[TokenType::VAR])? {
            Some(Box::new(self.var_declaration()?))
        } else {
            Some(Box::new(self.expression_statement()?))
        };

        let condition = if self.check(&TokenType::SEMICOLON)? {
            None
        } else {
            Some(self.expression()?)
        };

        self.consume(TokenType::SEMICOLON, "Expect ';' after loop condition.")?;

        let increment = if self.check(&TokenType::RIGHT_PAREN)? {
            None
        } else {
            Some(self.expression()?)
        };

        self.consume(TokenType::RIGHT_PAREN, "Expect ')' after for clauses.")?;

        let body = Box::new(self.statement()?);

        Ok(Stmt::For {
            initializer,
            condition,
            increment,
            body,
        })
    }

    /// Declarations up to the closing brace; the opening brace has
    /// already been consumed.
    fn block_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut statements: Vec<Stmt> = Vec::new();

        while !self.check(&TokenType::RIGHT_BRACE)? && !self.is_at_end()? {
            statements.push(self.declaration()?);
        }

        self.consume(TokenType::RIGHT_BRACE, "Expect '}' after block.")?;

        Ok(statements)
    }

    fn expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;

        self.consume(TokenType::SEMICOLON, "Expect ';' after expression.")?;

        Ok(Stmt::Expression(expr))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expressions, lowest precedence first
    // ─────────────────────────────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr> {
        let expr = self.logic_or()?;

        if self.match_tokens(&[TokenType::EQUAL])? {
            let equals = self.previous().clone();
            let value = self.assignment()?;

            if !Self::is_assign_target(&expr) {
                return Err(LoxError::parse(equals.line, "Invalid assignment target."));
            }

            return Ok(Expr::Assign {
                target: Box::new(expr),
                value: Box::new(value),
                depth: Cell::new(None),
            });
        }

        Ok(expr)
    }

    /// A valid target is an identifier or a dot path whose final
    /// segment is an identifier.
    fn is_assign_target(expr: &Expr) -> bool {
        match expr {
            Expr::Variable { name, .. } => {
                name.lexeme != "this" && name.lexeme != "super"
            }

            Expr::Binary { op, right, .. } if op.token_type == TokenType::DOT => {
                Self::is_path_target(right)
            }

            _ => false,
        }
    }

    fn is_path_target(expr: &Expr) -> bool {
        match expr {
            Expr::Variable { .. } => true,

            Expr::Binary { op, right, .. } if op.token_type == TokenType::DOT => {
                Self::is_path_target(right)
            }

            _ => false,
        }
    }

    fn logic_or(&mut self) -> Result<Expr> {
        let mut expr = self.logic_and()?;

        while self.match_tokens(&[TokenType::OR])? {
            let op = self.previous().clone();
            let right = self.logic_and()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn logic_and(&mut self) -> Result<Expr> {
        let mut expr = self.equality()?;

        while self.match_tokens(&[TokenType::AND])? {
            let op = self.previous().clone();
            let right = self.equality()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut expr = self.comparison()?;

        while self.match_tokens(&[TokenType::BANG_EQUAL, TokenType::EQUAL_EQUAL])? {
            let op = self.previous().clone();
            let right = self.comparison()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut expr = self.term()?;

        while self.match_tokens(&[
            TokenType::GREATER,
            TokenType::GREATER_EQUAL,
            TokenType::LESS,
            TokenType::LESS_EQUAL,
        ])? {
            let op = self.previous().clone();
            let right = self.term()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut expr = self.factor()?;

        while self.match_tokens(&[TokenType::MINUS, TokenType::PLUS])? {
            let op = self.previous().clone();
            let right = self.factor()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;

        while self.match_tokens(&[TokenType::SLASH, TokenType::STAR])? {
            let op = self.previous().clone();
            let right = self.unary()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.match_tokens(&[TokenType::BANG, TokenType::MINUS])? {
            let op = self.previous().clone();
            let right = self.unary()?;

            return Ok(Expr::Unary {
                op,
                right: Box::new(right),
            });
        }

        self.call()
    }

    /// Postfix chains: calls, and dot paths nesting to the right.
    fn call(&mut self) -> Result<Expr> {
        if self.match_tokens(&[TokenType::SUPER])? {
            return self.super_path();
        }

        let mut expr = self.call_chain()?;

        if self.match_tokens(&[TokenType::DOT])? {
            let op = self.previous().clone();
            let right = self.path_segment()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    /// `super` is only legal as the head of a property path.
    fn super_path(&mut self) -> Result<Expr> {
        let keyword = self.previous().clone();

        let head = Expr::Variable {
            name: keyword,
            depth: Cell::new(None),
        };

        self.consume(TokenType::DOT, "Expect '.' after 'super'.")?;

        let op = self.previous().clone();
        let right = self.path_segment()?;

        Ok(Expr::Binary {
            op,
            left: Box::new(head),
            right: Box::new(right),
        })
    }

    /// The remainder of a path after a dot: a property name, possibly
    /// called, possibly followed by deeper segments.
    fn path_segment(&mut self) -> Result<Expr> {
        if !self.check(&TokenType::IDENTIFIER)? {
            let line = self.peek()?.line;

            return Err(LoxError::parse(line, "Expect property name after '.'."));
        }

        self.call()
    }

    /// A primary expression with any number of trailing call suffixes,
    /// e.g. `f`, `f()`, `f()(x)`.
    fn call_chain(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        while self.check(&TokenType::LEFT_PAREN)? {
            self.advance()?;

            expr = self.finish_call(expr)?;
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr> {
        let mut args: Vec<Expr> = Vec::new();

        if !self.check(&TokenType::RIGHT_PAREN)? {
            loop {
                args.push(self.expression()?);

                if !self.match_tokens(&[TokenType::COMMA])? {
                    break;
                }
            }
        }

        let paren = self.consume(TokenType::RIGHT_PAREN, "Expect ')' after arguments.")?;

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            args,
        })
    }

    fn primary(&mut self) -> Result<Expr> {
        if self.match_tokens(&[
            TokenType::NUMBER(0.0),
            TokenType::STRING(String::new()),
            TokenType::TRUE,
            TokenType::FALSE,
            TokenType::NIL,
        ])? {
            return Ok(Expr::Literal(self.previous().clone()));
        }

        if self.match_tokens(&[TokenType::IDENTIFIER, TokenType::THIS])? {
            return Ok(Expr::Variable {
                name: self.previous().clone(),
                depth: Cell::new(None),
            });
        }

        if self.match_tokens(&[TokenType::LEFT_PAREN])? {
            let expr = self.expression()?;

            self.consume(TokenType::RIGHT_PAREN, "Expect ')' after expression.")?;

            return Ok(Expr::Grouping(Box::new(expr)));
        }

        let line = self.peek()?.line;

        Err(LoxError::parse(line, "Expect expression."))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Token stream helpers
    // ─────────────────────────────────────────────────────────────────────

    fn match_tokens(&mut self, types: &[TokenType]) -> Result<bool> {
        for token_type in types {
            if self.check(token_type)? {
                self.advance()?;

                return Ok(true);
            }
        }

        Ok(false)
    }

    fn check(&mut self, token_type: &TokenType) -> Result<bool> {
        if self.is_at_end()? {
            return Ok(false);
        }

        Ok(&self.peek()?.token_type == token_type)
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<Token> {
        if self.check(&token_type)? {
            self.advance()?;

            return Ok(self.previous().clone());
        }

        let line = self.peek()?.line;

        Err(LoxError::parse(line, message))
    }

    fn advance(&mut self) -> Result<&Token> {
        self.previous = self.tokens.next().transpose()?;

        self.previous.as_ref().ok_or_else(|| {
            LoxError::parse(0, "Unexpected end of input.")
        })
    }

    fn is_at_end(&mut self) -> Result<bool> {
        Ok(self.peek()?.token_type == TokenType::EOF)
    }

    fn peek(&mut self) -> Result<&Token> {
        match self.tokens.peek() {
            Some(Ok(token)) => Ok(token),

            // Re-materialize the in-stream lexical error so it can be
            // returned by value while the stream keeps ownership.
            Some(Err(LoxError::Lex { message, line })) => {
                Err(LoxError::lex(*line, message.clone()))
            }

            Some(Err(_)) | None => {
                let line = self.previous.as_ref().map(|t| t.line).unwrap_or(1);

                Err(LoxError::parse(line, "Unexpected end of input."))
            }
        }
    }

    fn previous(&self) -> &Token {
        self.previous.as_ref().expect("No previous token")
    }
}
