//! Textual code generators for targets assembled by external tools.
//!
//! All of them consume the closure converted program: functions are top level, variables
//! captured with `nonlocal` live in one element cells and the vtable order comes from
//! [`TypeSystem::ordered_methods`](crate::sem::TypeSystem::ordered_methods).
pub mod cil;
pub mod jvm;
pub mod llvm;
pub mod python;

use crate::syntax::{Expr, ExprKind, VarId, VarInstances};

/// One output file of a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub contents: String,
}

impl Artifact {
    pub fn new<S: Into<String>, T: Into<String>>(file_name: S, contents: T) -> Self {
        Self {
            file_name: file_name.into(),
            contents: contents.into(),
        }
    }
}

/// Line oriented output buffer with indentation.
#[derive(Debug)]
pub struct CodeBuilder {
    buffer: String,
    level: usize,
    indent: &'static str,
}

impl CodeBuilder {
    pub fn new(indent: &'static str) -> Self {
        Self {
            buffer: String::new(),
            level: 0,
            indent,
        }
    }

    pub fn line<S: AsRef<str>>(&mut self, line: S) -> &mut Self {
        for _ in 0..self.level {
            self.buffer.push_str(self.indent);
        }
        self.buffer.push_str(line.as_ref());
        self.buffer.push('\n');
        self
    }

    /// A line one level to the left, e.g. a label.
    pub fn outdented<S: AsRef<str>>(&mut self, line: S) -> &mut Self {
        let level = self.level;
        self.level = level.saturating_sub(1);
        self.line(line);
        self.level = level;
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.buffer.push('\n');
        self
    }

    pub fn indent(&mut self) -> &mut Self {
        self.level += 1;
        self
    }

    pub fn dedent(&mut self) -> &mut Self {
        self.level = self.level.saturating_sub(1);
        self
    }

    /// Appends text produced by another builder, re-indented to the current level.
    pub fn append(&mut self, other: &str) -> &mut Self {
        for line in other.lines() {
            if line.is_empty() {
                self.blank();
            } else {
                self.line(line);
            }
        }
        self
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

/// Hoisted names are dotted paths (`C.f.g`); targets without dots in identifiers get `C__f__g`.
pub fn mangle(name: &str) -> String {
    name.replace('.', "__")
}

/// A double quoted literal with backslash escapes.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);

    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Whether an argument passed for a reference parameter already is the cell the parameter
/// was created for.
pub fn passes_own_cell(instances: &VarInstances, cell: VarId, arg: &Expr) -> bool {
    match &arg.kind {
        ExprKind::Identifier {
            var_instance: Some(id),
            ..
        } => *id == cell && instances.get(*id).is_nonlocal,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Location;

    #[test]
    fn code_builder() {
        let mut code = CodeBuilder::new("    ");

        code.line("def f():").indent().line("pass").outdented("# label").dedent().line("f()");

        assert_eq!(code.finish(), "def f():\n    pass\n# label\nf()\n");
    }

    #[test]
    fn append_reindents() {
        let mut code = CodeBuilder::new("  ");

        code.indent().append("a\n\nb\n");

        assert_eq!(code.as_str(), "  a\n\n  b\n");
    }

    #[test]
    fn names_and_literals() {
        assert_eq!(mangle("C.f.g"), "C__f__g");
        assert_eq!(mangle("main"), "main");
        assert_eq!(quote("a\"b\\\n"), "\"a\\\"b\\\\\\n\"");
    }

    #[test]
    fn own_cell() {
        let mut instances = VarInstances::default();
        let a = instances.new_instance();
        let b = instances.new_instance();
        instances.get_mut(a).is_nonlocal = true;

        let arg = |id| Expr::identifier("v", Location::none(), Some(id));

        assert!(passes_own_cell(&instances, a, &arg(a)));
        assert!(!passes_own_cell(&instances, a, &arg(b)));
        assert!(!passes_own_cell(&instances, b, &arg(b)));
    }
}
