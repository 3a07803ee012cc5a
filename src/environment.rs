use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{LoxError, Result};
use crate::value::Value;

/// One frame of the lexical scope chain.  Frames are shared through
/// `Rc<RefCell<..>>` handles: closures keep the frames they captured
/// alive, and writes through one handle are visible through all others.
#[derive(Debug)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Unconditionally (re-)binds `name` in this frame.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Dynamic lookup: this frame, else the chain upward.
    pub fn get(&self, name: &str, line: usize) -> Result<Value> {
        if let Some(value) = self.values.get(name) {
            Ok(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name, line)
        } else {
            Err(LoxError::runtime(
                line,
                format!("Undefined variable '{}'.", name),
            ))
        }
    }

    /// Read from the frame exactly `depth` parents up.  Used for names
    /// the resolver annotated; keeps closures correct under shadowing.
    pub fn get_at(&self, name: &str, depth: usize, line: usize) -> Result<Value> {
        if depth == 0 {
            self.values.get(name).cloned().ok_or_else(|| {
                LoxError::runtime(line, format!("Undefined variable '{}'.", name))
            })
        } else {
            match &self.enclosing {
                Some(enclosing) => enclosing.borrow().get_at(name, depth - 1, line),

                None => Err(LoxError::runtime(
                    line,
                    format!("Undefined variable '{}'.", name),
                )),
            }
        }
    }

    /// Rebind in the nearest frame that already defines `name`.
    pub fn assign(&mut self, name: &str, value: Value, line: usize) -> Result<()> {
        if self.values.contains_key(name) {
            self.values.insert(name.to_string(), value);

            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value, line)
        } else {
            Err(LoxError::runtime(
                line,
                format!("Undefined variable '{}'.", name),
            ))
        }
    }

    /// Rebind in the frame exactly `depth` parents up.
    pub fn assign_at(&mut self, name: &str, value: Value, depth: usize, line: usize) -> Result<()> {
        if depth == 0 {
            if self.values.contains_key(name) {
                self.values.insert(name.to_string(), value);

                Ok(())
            } else {
                Err(LoxError::runtime(
                    line,
                    format!("Undefined variable '{}'.", name),
                ))
            }
        } else {
            match &self.enclosing {
                Some(enclosing) => enclosing.borrow_mut().assign_at(name, value, depth - 1, line),

                None => Err(LoxError::runtime(
                    line,
                    format!("Undefined variable '{}'.", name),
                )),
            }
        }
    }
}
