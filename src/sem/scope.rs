use super::types::{FuncType, ValueType, BOOL, INT, OBJECT, STR};
use std::collections::HashMap;

/// What a name refers to during type checking.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A variable that can be assigned in the scope it is bound in.
    Variable(ValueType),
    Function(FuncType),
    Class(String),
}

/// A stack of lexical scopes. The outermost frame holds the builtin functions and the one
/// above it the global declarations.
#[derive(Debug)]
pub struct Environment {
    frames: Vec<HashMap<String, Binding>>,
}

const GLOBALS: usize = 1;

impl Environment {
    pub fn prelude() -> Environment {
        let mut builtins = HashMap::new();

        // print
        builtins.insert(
            "print".to_string(),
            Binding::Function(FuncType::new(vec![ValueType::object()], ValueType::none())),
        );
        builtins.insert(
            "input".to_string(),
            Binding::Function(FuncType::new(vec![], ValueType::str())),
        );
        builtins.insert(
            "len".to_string(),
            Binding::Function(FuncType::new(vec![ValueType::object()], ValueType::int())),
        );
        builtins.insert(
            "__assert__".to_string(),
            Binding::Function(FuncType::new(vec![ValueType::bool()], ValueType::none())),
        );

        // constructors of builtin classes
        for class in &[OBJECT, INT, BOOL, STR] {
            builtins.insert(class.to_string(), Binding::Class(class.to_string()));
        }

        Environment {
            frames: vec![builtins, HashMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > GLOBALS + 1 {
            self.frames.pop();
        }
    }

    /// Binds `name` in the innermost scope. Returns `false` if it is already bound there.
    pub fn insert<S: Into<String>>(&mut self, name: S, binding: Binding) -> bool {
        let name = name.into();

        match self.frames.last_mut() {
            Some(frame) if !frame.contains_key(&name) => {
                frame.insert(name, binding);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn get_local(&self, name: &str) -> Option<&Binding> {
        self.frames.last().and_then(|frame| frame.get(name))
    }

    pub fn get_global(&self, name: &str) -> Option<&Binding> {
        self.frames[GLOBALS].get(name)
    }

    /// Looks `name` up in the scopes of the enclosing functions, skipping the innermost scope
    /// and the global one.
    pub fn get_enclosing(&self, name: &str) -> Option<&Binding> {
        let n = self.frames.len();

        if n <= GLOBALS + 2 {
            return None;
        }
        self.frames[GLOBALS + 1..n - 1]
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn shadowing() {
        let mut env = Environment::prelude();

        assert!(env.insert("x", Binding::Variable(ValueType::int())));
        assert!(!env.insert("x", Binding::Variable(ValueType::str())));

        env.push();
        assert!(env.insert("x", Binding::Variable(ValueType::bool())));
        assert_matches!(env.get("x"), Some(Binding::Variable(ty)) if ty.is_bool());
        assert_matches!(env.get_global("x"), Some(Binding::Variable(ty)) if ty.is_int());
        env.pop();

        assert_matches!(env.get("x"), Some(Binding::Variable(ty)) if ty.is_int());
        assert_matches!(env.get("print"), Some(Binding::Function(_)));
    }

    #[test]
    fn enclosing() {
        let mut env = Environment::prelude();

        env.insert("g", Binding::Variable(ValueType::int()));
        env.push();
        env.insert("a", Binding::Variable(ValueType::int()));
        assert!(env.get_enclosing("a").is_none());

        env.push();
        assert_matches!(env.get_enclosing("a"), Some(Binding::Variable(_)));
        assert!(env.get_enclosing("g").is_none());
    }
}
