//! Static resolution pass.
//!
//! A single walk over the parsed program that:
//!
//! 1. **Builds lexical scopes**: a stack of maps tracking declared
//!    (false) and fully defined (true) names per block, function, or
//!    class body.  Global code runs with an empty stack, so globals are
//!    late-bound: redeclaration and `var a = a;` stay legal there.
//! 2. **Enforces static rules**: redeclaration in a local scope,
//!    reading a variable in its own initializer, `return` outside a
//!    function, returning a value from `init`, `this` outside a method,
//!    `super` outside a derived-class method, self-inheritance.
//! 3. **Records binding depths**: every resolved `Variable` or
//!    identifier `Assign` gets the number of frames to ascend at
//!    evaluation time, written into the node's depth cell.  Unresolved
//!    names stay `None` and fall back to a dynamic chain walk.
//!
//! The scope layout around methods mirrors the evaluator's frame chain
//! exactly: class scratch scope (method names) → bind scope (`this`,
//! `super`) → parameter scope (parameters and body locals).  Getting
//! this wrong desynchronizes every depth the pass hands out.
//!
//! Resolution halts on the first static error with `LoxError::Resolve`.

use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, info};

use crate::ast::{Expr, FunctionDecl, Stmt};
use crate::error::{LoxError, Result};
use crate::token::{Token, TokenType};

/// Are we inside a user function?  Used to validate `return`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Initializer,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ClassType {
    /// Not inside any class
    None,

    /// Inside a class declaration _without_ a superclass
    Class,

    /// Inside a class declaration _with_ a superclass
    Subclass,
}

/// What a scope belongs to; `Params` participates in the
/// parameter-collision rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ScopeKind {
    Block,
    Params,
    ClassBody,
    Bind,
}

struct Scope {
    names: HashMap<String, bool>, // false=declared, true=defined
    kind: ScopeKind,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Scope {
            names: HashMap::new(),
            kind,
        }
    }
}

pub struct Resolver {
    scopes: Vec<Scope>,
    current_function: FunctionType,
    current_class: ClassType,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        info!("Resolver instantiated");

        Resolver {
            scopes: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
        }
    }

    /// Walk all top-level statements.
    pub fn resolve(&mut self, statements: &[Stmt]) -> Result<()> {
        info!(
            "Beginning resolve pass over {} statement(s)",
            statements.len()
        );

        for stmt in statements {
            self.resolve_stmt(stmt)?;
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Statement resolution
    // ─────────────────────────────────────────────────────────────────────

    fn resolve_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expression(expr) | Stmt::Print(expr) => {
                self.resolve_expr(expr)?;
            }

            Stmt::Var { name, initializer } => {
                // The initializer is resolved before the name exists in
                // the new scope, so `var a = a + 1;` reads the outer
                // binding.  Only the bare self-reference is rejected,
                // and only locally: at global scope it reads the
                // previous binding or fails at evaluation time.
                if let Some(Expr::Variable {
                    name: init_name, ..
                }) = initializer
                {
                    if !self.scopes.is_empty() && init_name.lexeme == name.lexeme {
                        return Err(LoxError::resolve(
                            init_name.line,
                            "Can't read local variable in its own initializer.",
                        ));
                    }
                }

                if let Some(expr) = initializer {
                    self.resolve_expr(expr)?;
                }

                self.declare(name)?;
                self.define(name);
            }

            Stmt::Block(statements) => {
                self.begin_scope(ScopeKind::Block);

                let result = self.resolve_all(statements);

                self.end_scope();

                result?;
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition)?;
                self.resolve_stmt(then_branch)?;

                if let Some(eb) = else_branch.as_deref() {
                    self.resolve_stmt(eb)?;
                }
            }

            Stmt::While { condition, body } => {
                self.resolve_expr(condition)?;
                self.resolve_stmt(body)?;
            }

            Stmt::For {
                initializer,
                condition,
                increment,
                body,
            } => {
                // The header gets its own scope; the body statement
                // opens its own block scope if it is one.
                self.begin_scope(ScopeKind::Block);

                let result = (|| {
                    if let Some(init) = initializer {
                        self.resolve_stmt(init)?;
                    }

                    if let Some(cond) = condition {
                        self.resolve_expr(cond)?;
                    }

                    if let Some(inc) = increment {
                        self.resolve_expr(inc)?;
                    }

                    self.resolve_stmt(body)
                })();

                self.end_scope();

                result?;
            }

            Stmt::Function(decl) => {
                // Declare and define eagerly so the function can recurse.
                self.declare(&decl.name)?;
                self.define(&decl.name);

                self.resolve_function(FunctionType::Function, decl)?;
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                self.resolve_class(name, superclass.as_ref(), methods)?;
            }

            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    return Err(LoxError::resolve(
                        keyword.line,
                        "Can't return from top-level code.",
                    ));
                }

                if let Some(expr) = value {
                    if self.current_function == FunctionType::Initializer {
                        return Err(LoxError::resolve(
                            keyword.line,
                            "Can't return a value from an initializer.",
                        ));
                    }

                    self.resolve_expr(expr)?;
                }
            }
        }

        Ok(())
    }

    fn resolve_all(&mut self, statements: &[Stmt]) -> Result<()> {
        for stmt in statements {
            self.resolve_stmt(stmt)?;
        }

        Ok(())
    }

    fn resolve_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<()> {
        if let Some(Expr::Variable {
            name: super_name, ..
        }) = superclass
        {
            if super_name.lexeme == name.lexeme {
                return Err(LoxError::resolve(
                    super_name.line,
                    "A class can't inherit from itself.",
                ));
            }
        }

        self.declare(name)?;
        self.define(name);

        let enclosing_class = self.current_class;

        self.current_class = if superclass.is_some() {
            ClassType::Subclass
        } else {
            ClassType::Class
        };

        // The superclass name is read in the declaring scope, before
        // any of the class's own scopes open.
        if let Some(super_expr) = superclass {
            if let Err(e) = self.resolve_expr(super_expr) {
                self.current_class = enclosing_class;

                return Err(e);
            }
        }

        let result = (|| {
            // Scratch scope: the evaluator binds each method lambda
            // here by name while the class body executes.
            self.begin_scope(ScopeKind::ClassBody);

            for method in methods {
                self.declare(&method.name)?;
                self.define(&method.name);
            }

            // Bind scope: filled in at method-binding time with `this`
            // (and `super` under a superclass).
            self.begin_scope(ScopeKind::Bind);

            self.scopes
                .last_mut()
                .expect("bind scope just pushed")
                .names
                .insert("this".to_string(), true);

            if superclass.is_some() {
                self.scopes
                    .last_mut()
                    .expect("bind scope just pushed")
                    .names
                    .insert("super".to_string(), true);
            }

            let result = (|| {
                for method in methods {
                    let kind = if method.name.lexeme == "init" {
                        FunctionType::Initializer
                    } else {
                        FunctionType::Function
                    };

                    self.resolve_function(kind, method)?;
                }

                Ok(())
            })();

            self.end_scope();
            self.end_scope();

            result
        })();

        self.current_class = enclosing_class;

        result
    }

    /// Enter a fresh scope for a function's parameters and body.  Body
    /// statements share the parameter scope, matching the single call
    /// frame the evaluator builds per invocation.
    fn resolve_function(&mut self, kind: FunctionType, decl: &FunctionDecl) -> Result<()> {
        let enclosing = self.current_function;

        self.current_function = kind;

        self.begin_scope(ScopeKind::Params);

        let result = (|| {
            for param in &decl.params {
                self.declare(param)?;
                self.define(param);
            }

            self.resolve_all(&decl.body)
        })();

        self.end_scope();

        self.current_function = enclosing;

        result
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expression resolution
    // ─────────────────────────────────────────────────────────────────────

    fn resolve_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal(_) => {}

            Expr::Grouping(inner) => {
                self.resolve_expr(inner)?;
            }

            Expr::Unary { right, .. } => {
                self.resolve_expr(right)?;
            }

            Expr::Binary { op, left, right } if op.token_type == TokenType::DOT => {
                self.resolve_expr(left)?;
                self.resolve_path_segment(right)?;
            }

            Expr::Binary { left, right, .. } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)?;
            }

            Expr::Variable { name, depth } => {
                self.check_special_name(name)?;

                depth.set(self.resolve_name_depth(name));
            }

            Expr::Assign {
                target,
                value,
                depth,
            } => {
                self.resolve_expr(value)?;

                match target.as_ref() {
                    Expr::Variable { name, .. } => {
                        depth.set(self.resolve_name_depth(name));
                    }

                    // Property path: only the base and any call
                    // arguments name variables.
                    Expr::Binary { left, right, .. } => {
                        self.resolve_expr(left)?;
                        self.resolve_path_segment(right)?;
                    }

                    _ => {}
                }
            }

            Expr::Call { callee, args, .. } => {
                self.resolve_expr(callee)?;

                for arg in args {
                    self.resolve_expr(arg)?;
                }
            }
        }

        Ok(())
    }

    /// The right side of a dot: property names are not variables, but
    /// call arguments inside the path are resolved normally.
    fn resolve_path_segment(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Variable { .. } => {}

            Expr::Call { callee, args, .. } => {
                self.resolve_path_segment(callee)?;

                for arg in args {
                    self.resolve_expr(arg)?;
                }
            }

            Expr::Binary { left, right, .. } => {
                self.resolve_path_segment(left)?;
                self.resolve_path_segment(right)?;
            }

            _ => {
                self.resolve_expr(expr)?;
            }
        }

        Ok(())
    }

    /// Context rules for `this` and `super`.
    fn check_special_name(&self, name: &Token) -> Result<()> {
        if name.lexeme == "this" && self.current_class == ClassType::None {
            return Err(LoxError::resolve(
                name.line,
                "Can't use 'this' outside of a class.",
            ));
        }

        if name.lexeme == "super" {
            if self.current_class == ClassType::None {
                return Err(LoxError::resolve(
                    name.line,
                    "Can't use 'super' outside of a class.",
                ));
            }

            if self.current_class != ClassType::Subclass {
                return Err(LoxError::resolve(
                    name.line,
                    "Can't use 'super' in a class with no superclass.",
                ));
            }
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scope management
    // ─────────────────────────────────────────────────────────────────────

    #[inline]
    fn begin_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
    }

    #[inline]
    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Token) -> Result<()> {
        let collides_with_param = self.param_collision(name);

        if let Some(scope) = self.scopes.last_mut() {
            if scope.names.contains_key(&name.lexeme) {
                return Err(LoxError::resolve(
                    name.line,
                    "Already a variable with this name in this scope.",
                ));
            }

            if collides_with_param {
                return Err(LoxError::resolve(
                    name.line,
                    "Already a parameter with this name.",
                ));
            }

            scope.names.insert(name.lexeme.clone(), false);
        }

        Ok(())
    }

    /// A declaration shadowing a parameter of the immediately enclosing
    /// function scope is rejected.
    fn param_collision(&self, name: &Token) -> bool {
        if self.scopes.len() < 2 {
            return false;
        }

        let parent = &self.scopes[self.scopes.len() - 2];

        parent.kind == ScopeKind::Params && parent.names.contains_key(&name.lexeme)
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.lexeme.clone(), true);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Binding-depth helper
    // ─────────────────────────────────────────────────────────────────────

    /// Innermost-out search; `None` means global, resolved dynamically
    /// at evaluation time.
    fn resolve_name_depth(&self, name: &Token) -> Option<usize> {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.names.contains_key(&name.lexeme) {
                debug!("Resolved '{}' at depth {}", name.lexeme, depth);

                return Some(depth);
            }
        }

        debug!("Resolved '{}' as global", name.lexeme);

        None
    }
}
