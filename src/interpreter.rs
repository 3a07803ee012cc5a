use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::ast::{Expr, FunctionDecl, Stmt};
use crate::environment::Environment;
use crate::error::{LoxError, Result};
use crate::token::{Token, TokenType};
use crate::value::{Class, Instance, Lambda, Value};

/// Tree-walking evaluator.
///
/// Carries the current environment frame, swapped on scope entry and
/// restored on every exit path.  `return` is a pending-result slot plus
/// a flag: blocks and loops stop executing while the flag is raised,
/// and the function-call boundary consumes both.
///
/// Generic over the output sink so tests can capture what `print`
/// writes; the CLI uses stdout.
pub struct Interpreter<W: Write> {
    environment: Rc<RefCell<Environment>>,
    output: W,
    return_value: Option<Value>,
    returning: bool,
}

impl Default for Interpreter<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter<io::Stdout> {
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }
}

impl<W: Write> Interpreter<W> {
    pub fn with_output(output: W) -> Self {
        let environment = Rc::new(RefCell::new(Environment::new()));

        environment.borrow_mut().define(
            "clock",
            Value::NativeFunction {
                name: "clock".to_string(),
                arity: 0,
                func: clock_native,
            },
        );

        Interpreter {
            environment,
            output,
            return_value: None,
            returning: false,
        }
    }

    /// Execute a resolved program.
    pub fn run(&mut self, statements: &[Stmt]) -> Result<()> {
        for stmt in statements {
            self.execute(stmt)?;
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────

    pub fn execute(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;

                Ok(())
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;

                writeln!(self.output, "{}", value)?;

                Ok(())
            }

            Stmt::Var { name, initializer } => {
                let value: Value = if let Some(expr) = initializer {
                    self.evaluate(expr)?
                } else {
                    Value::Nil
                };

                self.environment.borrow_mut().define(&name.lexeme, value);

                Ok(())
            }

            Stmt::Block(statements) => {
                let block_env = Rc::new(RefCell::new(Environment::with_enclosing(
                    self.environment.clone(),
                )));

                self.execute_block(statements, block_env)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)?;
                }

                Ok(())
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    self.execute(body)?;

                    if self.returning {
                        break;
                    }
                }

                Ok(())
            }

            Stmt::For {
                initializer,
                condition,
                increment,
                body,
            } => {
                // One fresh frame encloses header and body alike.
                let previous: Rc<RefCell<Environment>> = self.environment.clone();

                self.environment = Rc::new(RefCell::new(Environment::with_enclosing(
                    previous.clone(),
                )));

                let result = self.run_for_loop(
                    initializer.as_deref(),
                    condition.as_ref(),
                    increment.as_ref(),
                    body,
                );

                self.environment = previous;

                result
            }

            Stmt::Function(decl) => {
                let lambda = Rc::new(Lambda::new(
                    decl.clone(),
                    self.environment.clone(),
                    false,
                ));

                self.environment
                    .borrow_mut()
                    .define(&decl.name.lexeme, Value::Lambda(lambda));

                Ok(())
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods),

            Stmt::Return { keyword: _, value } => {
                let result = if let Some(expr) = value {
                    self.evaluate(expr)?
                } else {
                    Value::Nil
                };

                debug!("Return raised with value {}", result);

                self.return_value = Some(result);
                self.returning = true;

                Ok(())
            }
        }
    }

    /// Run statements in the given frame, restoring the previous frame
    /// on success, error, and pending return alike.
    fn execute_block(&mut self, statements: &[Stmt], env: Rc<RefCell<Environment>>) -> Result<()> {
        let previous = std::mem::replace(&mut self.environment, env);

        for stmt in statements {
            match self.execute(stmt) {
                Ok(()) => {
                    if self.returning {
                        break;
                    }
                }

                Err(e) => {
                    self.environment = previous;

                    return Err(e);
                }
            }
        }

        self.environment = previous;

        Ok(())
    }

    fn run_for_loop(
        &mut self,
        initializer: Option<&Stmt>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Stmt,
    ) -> Result<()> {
        if let Some(init) = initializer {
            self.execute(init)?;
        }

        loop {
            if let Some(cond) = condition {
                if !self.evaluate(cond)?.is_truthy() {
                    break;
                }
            }

            self.execute(body)?;

            if self.returning {
                break;
            }

            if let Some(inc) = increment {
                self.evaluate(inc)?;
            }
        }

        Ok(())
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<()> {
        let superclass_value: Option<Rc<Class>> = match superclass {
            Some(expr) => {
                let line = match expr {
                    Expr::Variable { name, .. } => name.line,
                    _ => name.line,
                };

                match self.evaluate(expr)? {
                    Value::Class(parent) => Some(parent),

                    _ => {
                        return Err(LoxError::runtime(line, "Superclass must be a class."));
                    }
                }
            }

            None => None,
        };

        // Methods are constructed inside a scratch frame so sibling
        // closures stay visible to each other by name.
        let previous: Rc<RefCell<Environment>> = self.environment.clone();

        self.environment = Rc::new(RefCell::new(Environment::with_enclosing(previous.clone())));

        let mut method_values: Vec<Rc<Lambda>> = Vec::new();

        for decl in methods {
            let is_constructor = decl.name.lexeme == "init";

            let lambda = Rc::new(Lambda::new(
                decl.clone(),
                self.environment.clone(),
                is_constructor,
            ));

            self.environment
                .borrow_mut()
                .define(&decl.name.lexeme, Value::Lambda(lambda.clone()));

            method_values.push(lambda);
        }

        self.environment = previous;

        let class = Rc::new(Class::new(
            name.lexeme.clone(),
            superclass_value,
            method_values,
        ));

        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Class(class));

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(token) => self.evaluate_literal(token),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { op, right } => self.evaluate_unary(op, right),

            Expr::Binary { op, left, right } => self.evaluate_binary(op, left, right),

            Expr::Variable { name, depth } => self.evaluate_variable(name, depth.get()),

            Expr::Assign {
                target,
                value,
                depth,
            } => self.evaluate_assign(target, value, depth.get()),

            Expr::Call {
                callee,
                paren,
                args,
            } => {
                let callee_value = self.evaluate(callee)?;
                let arg_values = self.evaluate_args(args)?;

                self.call_value(callee_value, arg_values, paren.line)
            }
        }
    }

    fn evaluate_literal(&self, token: &Token) -> Result<Value> {
        match &token.token_type {
            TokenType::NUMBER(n) => Ok(Value::Number(*n)),

            TokenType::STRING(s) => Ok(Value::String(s.clone())),

            TokenType::TRUE => Ok(Value::Bool(true)),

            TokenType::FALSE => Ok(Value::Bool(false)),

            TokenType::NIL => Ok(Value::Nil),

            _ => Err(LoxError::runtime(token.line, "Invalid literal.")),
        }
    }

    fn evaluate_unary(&mut self, op: &Token, right: &Expr) -> Result<Value> {
        let value: Value = self.evaluate(right)?;

        match op.token_type {
            TokenType::MINUS => match value {
                Value::Number(n) => Ok(Value::Number(-n)),

                _ => Err(LoxError::runtime(op.line, "Operand must be a number.")),
            },

            TokenType::BANG => Ok(Value::Bool(!value.is_truthy())),

            _ => Err(LoxError::runtime(op.line, "Invalid unary operator.")),
        }
    }

    fn evaluate_binary(&mut self, op: &Token, left: &Expr, right: &Expr) -> Result<Value> {
        match op.token_type {
            // Short-circuit logicals return the deciding operand as-is.
            TokenType::OR => {
                let left_val: Value = self.evaluate(left)?;

                if left_val.is_truthy() {
                    Ok(left_val)
                } else {
                    self.evaluate(right)
                }
            }

            TokenType::AND => {
                let left_val: Value = self.evaluate(left)?;

                if !left_val.is_truthy() {
                    Ok(left_val)
                } else {
                    self.evaluate(right)
                }
            }

            TokenType::DOT => self.evaluate_path_expr(op, left, right),

            _ => {
                let left_val: Value = self.evaluate(left)?;
                let right_val: Value = self.evaluate(right)?;

                match op.token_type {
                    TokenType::PLUS => match (left_val, right_val) {
                        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),

                        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),

                        _ => Err(LoxError::runtime(
                            op.line,
                            "Operands must be two numbers or two strings.",
                        )),
                    },

                    TokenType::MINUS => match (left_val, right_val) {
                        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),

                        _ => Err(LoxError::runtime(op.line, "Operands must be numbers.")),
                    },

                    TokenType::STAR => match (left_val, right_val) {
                        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),

                        _ => Err(LoxError::runtime(op.line, "Operands must be numbers.")),
                    },

                    // Division by zero follows IEEE-754.
                    TokenType::SLASH => match (left_val, right_val) {
                        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),

                        _ => Err(LoxError::runtime(op.line, "Operands must be numbers.")),
                    },

                    TokenType::EQUAL_EQUAL => Ok(Value::Bool(left_val.equals(&right_val))),

                    TokenType::BANG_EQUAL => Ok(Value::Bool(!left_val.equals(&right_val))),

                    TokenType::LESS => match (left_val, right_val) {
                        (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a < b)),

                        _ => Err(LoxError::runtime(op.line, "Operands must be numbers.")),
                    },

                    TokenType::LESS_EQUAL => match (left_val, right_val) {
                        (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a <= b)),

                        _ => Err(LoxError::runtime(op.line, "Operands must be numbers.")),
                    },

                    TokenType::GREATER => match (left_val, right_val) {
                        (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a > b)),

                        _ => Err(LoxError::runtime(op.line, "Operands must be numbers.")),
                    },

                    TokenType::GREATER_EQUAL => match (left_val, right_val) {
                        (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a >= b)),

                        _ => Err(LoxError::runtime(op.line, "Operands must be numbers.")),
                    },

                    _ => Err(LoxError::runtime(op.line, "Invalid binary operator.")),
                }
            }
        }
    }

    fn evaluate_variable(&self, name: &Token, depth: Option<usize>) -> Result<Value> {
        match depth {
            Some(d) => self.environment.borrow().get_at(&name.lexeme, d, name.line),

            None => self.environment.borrow().get(&name.lexeme, name.line),
        }
    }

    fn evaluate_assign(
        &mut self,
        target: &Expr,
        value_expr: &Expr,
        depth: Option<usize>,
    ) -> Result<Value> {
        let value = self.evaluate(value_expr)?;

        match target {
            Expr::Variable { name, .. } => {
                match depth {
                    Some(d) => self.environment.borrow_mut().assign_at(
                        &name.lexeme,
                        value.clone(),
                        d,
                        name.line,
                    )?,

                    None => self
                        .environment
                        .borrow_mut()
                        .assign(&name.lexeme, value.clone(), name.line)?,
                }

                Ok(value)
            }

            Expr::Binary { op, left, right } if op.token_type == TokenType::DOT => {
                let base = self.evaluate(left)?;
                let instance = as_instance(base, op.line)?;

                let (target_instance, property) = self.walk_path_lhs(instance, right, op.line)?;

                target_instance.set_property(&property, value.clone());

                Ok(value)
            }

            _ => Err(LoxError::runtime(0, "Invalid assignment target.")),
        }
    }

    /// Walk a dot path down to its final segment, returning the owning
    /// instance and the property name to write.
    fn walk_path_lhs(
        &mut self,
        instance: Rc<Instance>,
        expr: &Expr,
        line: usize,
    ) -> Result<(Rc<Instance>, String)> {
        match expr {
            Expr::Variable { name, .. } => Ok((instance, name.lexeme.clone())),

            Expr::Binary { op, left, right } if op.token_type == TokenType::DOT => {
                let next = self.eval_path(&instance, left, op.line)?;
                let next_instance = as_instance(next, op.line)?;

                self.walk_path_lhs(next_instance, right, op.line)
            }

            _ => Err(LoxError::runtime(line, "Invalid assignment target.")),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Property paths
    // ─────────────────────────────────────────────────────────────────────

    fn evaluate_path_expr(&mut self, op: &Token, left: &Expr, right: &Expr) -> Result<Value> {
        // `super.m` dispatches on the superclass bound at method
        // binding time, against the current `this`.
        if let Expr::Variable { name, depth } = left {
            if name.lexeme == "super" {
                return self.evaluate_super_path(name, depth.get(), right);
            }
        }

        let base = self.evaluate(left)?;
        let instance = as_instance(base, op.line)?;

        self.eval_path(&instance, right, op.line)
    }

    /// Evaluate a path segment against an instance: a property read, a
    /// method call, or a nested path.
    fn eval_path(&mut self, instance: &Rc<Instance>, expr: &Expr, line: usize) -> Result<Value> {
        match expr {
            Expr::Variable { name, .. } => instance.get_member(&name.lexeme, name.line),

            Expr::Call {
                callee,
                paren,
                args,
            } => {
                let method = self.eval_method(instance, callee)?;
                let arg_values = self.evaluate_args(args)?;

                self.call_value(method, arg_values, paren.line)
            }

            Expr::Binary { op, left, right } if op.token_type == TokenType::DOT => {
                let next = self.eval_path(instance, left, op.line)?;
                let next_instance = as_instance(next, op.line)?;

                self.eval_path(&next_instance, right, op.line)
            }

            _ => Err(LoxError::runtime(line, "Only instances have properties.")),
        }
    }

    /// Resolve the callee of a method call within a path, e.g. the `b`
    /// of `a.b(1)` or the inner call of `a.b()(1)`.
    fn eval_method(&mut self, instance: &Rc<Instance>, callee: &Expr) -> Result<Value> {
        match callee {
            Expr::Variable { name, .. } => instance.get_member(&name.lexeme, name.line),

            Expr::Call {
                callee: inner,
                paren,
                args,
            } => {
                let method = self.eval_method(instance, inner)?;
                let arg_values = self.evaluate_args(args)?;

                self.call_value(method, arg_values, paren.line)
            }

            _ => Err(LoxError::runtime(0, "Only instances have properties.")),
        }
    }

    fn evaluate_super_path(
        &mut self,
        keyword: &Token,
        depth: Option<usize>,
        right: &Expr,
    ) -> Result<Value> {
        let superclass = match self.evaluate_variable(keyword, depth)? {
            Value::Class(parent) => parent,

            _ => {
                return Err(LoxError::runtime(
                    keyword.line,
                    "Can't use 'super' in a class with no superclass.",
                ));
            }
        };

        // `this` lives in the same bind frame as `super`.
        let this_token = Token::new(
            TokenType::THIS,
            "this".to_string(),
            keyword.line,
            keyword.column,
        );

        let instance = as_instance(self.evaluate_variable(&this_token, depth)?, keyword.line)?;

        match right {
            Expr::Variable { name, .. } => self.super_member(&superclass, &instance, name),

            Expr::Call {
                callee,
                paren,
                args,
            } => {
                let method = self.eval_super_method(&superclass, &instance, callee)?;
                let arg_values = self.evaluate_args(args)?;

                self.call_value(method, arg_values, paren.line)
            }

            Expr::Binary { op, left, right } if op.token_type == TokenType::DOT => {
                let first = self.eval_super_method(&superclass, &instance, left)?;
                let next_instance = as_instance(first, op.line)?;

                self.eval_path(&next_instance, right, op.line)
            }

            _ => Err(LoxError::runtime(
                keyword.line,
                "Expect superclass method name.",
            )),
        }
    }

    fn super_member(
        &self,
        superclass: &Rc<Class>,
        instance: &Rc<Instance>,
        name: &Token,
    ) -> Result<Value> {
        match superclass.find_method(&name.lexeme) {
            Some((method, defining)) => Ok(Value::Lambda(
                method.bind(defining.superclass.as_ref(), instance),
            )),

            None => Err(LoxError::runtime(
                name.line,
                format!("Undefined property '{}'.", name.lexeme),
            )),
        }
    }

    fn eval_super_method(
        &mut self,
        superclass: &Rc<Class>,
        instance: &Rc<Instance>,
        callee: &Expr,
    ) -> Result<Value> {
        match callee {
            Expr::Variable { name, .. } => self.super_member(superclass, instance, name),

            Expr::Call {
                callee: inner,
                paren,
                args,
            } => {
                let method = self.eval_super_method(superclass, instance, inner)?;
                let arg_values = self.evaluate_args(args)?;

                self.call_value(method, arg_values, paren.line)
            }

            _ => Err(LoxError::runtime(0, "Expect superclass method name.")),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────

    fn evaluate_args(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        let mut arg_values: Vec<Value> = Vec::new();

        for arg in args {
            arg_values.push(self.evaluate(arg)?);
        }

        Ok(arg_values)
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, line: usize) -> Result<Value> {
        match callee {
            Value::NativeFunction { arity, func, .. } => {
                if args.len() != arity {
                    return Err(LoxError::runtime(
                        line,
                        format!("Expected {} arguments but got {}.", arity, args.len()),
                    ));
                }

                func(&args)
            }

            Value::Lambda(lambda) => self.call_lambda(&lambda, args, line),

            Value::Class(class) => self.instantiate(&class, args, line),

            _ => Err(LoxError::runtime(
                line,
                "Can only call functions and classes.",
            )),
        }
    }

    fn call_lambda(&mut self, lambda: &Rc<Lambda>, args: Vec<Value>, line: usize) -> Result<Value> {
        if args.len() != lambda.decl.params.len() {
            return Err(LoxError::runtime(
                line,
                format!(
                    "Expected {} arguments but got {}.",
                    lambda.decl.params.len(),
                    args.len()
                ),
            ));
        }

        debug!("Calling <fn {}> with {} arg(s)", lambda.name, args.len());

        // Parameters and body locals share one frame, a child of the
        // closure's captured chain; the caller's frame plays no part.
        let mut call_env = Environment::with_enclosing(lambda.env.clone());

        for (param, arg) in lambda.decl.params.iter().zip(args) {
            call_env.define(&param.lexeme, arg);
        }

        let result = self.execute_block(&lambda.decl.body, Rc::new(RefCell::new(call_env)));

        // The call boundary consumes the pending return, errors included.
        let returned = self.return_value.take();
        self.returning = false;

        result?;

        if lambda.is_constructor {
            return lambda.env.borrow().get("this", line);
        }

        Ok(returned.unwrap_or(Value::Nil))
    }

    fn instantiate(&mut self, class: &Rc<Class>, args: Vec<Value>, line: usize) -> Result<Value> {
        let instance = Rc::new(Instance::new(class.clone()));

        if let Some((init, defining)) = class.find_method("init") {
            let bound = init.bind(defining.superclass.as_ref(), &instance);

            self.call_lambda(&bound, args, line)?;
        } else if !args.is_empty() {
            return Err(LoxError::runtime(
                line,
                format!("Expected 0 arguments but got {}.", args.len()),
            ));
        }

        Ok(Value::Instance(instance))
    }
}

fn as_instance(value: Value, line: usize) -> Result<Rc<Instance>> {
    match value {
        Value::Instance(instance) => Ok(instance),

        _ => Err(LoxError::runtime(line, "Only instances have properties.")),
    }
}

fn clock_native(_args: &[Value]) -> Result<Value> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| LoxError::runtime(0, format!("Clock error: {}", e)))?
        .as_secs_f64();

    Ok(Value::Number(timestamp))
}
