//! Lifts nested functions to the top level.
//!
//! A function `g` declared in method `C.f` becomes the top-level function `C.f.g`; a function
//! `h` declared in `g` becomes `C.f.g.h`. Call sites are renamed through the enclosing scopes.
use super::SemanticAnalyzer;
use crate::syntax::traverse::{walk_expr_mut, VisitorMut};
use crate::syntax::*;
use log::debug;
use std::collections::HashMap;
use std::mem;

#[derive(Debug, Clone)]
struct Renamed {
    name: String,
    freevars: Vec<Identifier>,
}

#[derive(Debug, Default)]
pub struct Hoister {
    /// Old name to new name and free variables, one frame per enclosing function.
    scopes: Vec<HashMap<String, Renamed>>,
    /// Original names of the enclosing class and functions.
    path: Vec<String>,
    hoisted: Vec<FuncDef>,
}

impl SemanticAnalyzer for Hoister {
    fn analyze(&mut self, program: &mut Program) {
        for decl in &mut program.declarations {
            match decl {
                Declaration::FuncDef(func) => self.hoist_function(func),
                Declaration::ClassDef(class) => {
                    self.path.push(class.name.name.clone());
                    for decl in &mut class.declarations {
                        if let Declaration::FuncDef(method) = decl {
                            self.hoist_function(method);
                        }
                    }
                    self.path.pop();
                }
                _ => {}
            }
        }

        debug!("hoisted {} nested functions", self.hoisted.len());
        program
            .declarations
            .extend(self.hoisted.drain(..).map(Declaration::FuncDef));
    }
}

impl Hoister {
    pub fn new() -> Self {
        Self::default()
    }

    fn hoist_function(&mut self, func: &mut FuncDef) {
        self.path.push(func.name.name.clone());

        let prefix = self.path.join(".");
        let mut renames = HashMap::new();
        for nested in func.nested_func_defs() {
            renames.insert(
                nested.name.name.clone(),
                Renamed {
                    name: format!("{}.{}", prefix, nested.name.name),
                    freevars: nested.freevars.clone(),
                },
            );
        }
        self.scopes.push(renames);

        // Nested functions see the renames of this scope, so visit them before leaving it.
        let (nested, declarations): (Vec<_>, Vec<_>) = mem::take(&mut func.declarations)
            .into_iter()
            .partition(|decl| matches!(decl, Declaration::FuncDef(_)));
        func.declarations = declarations;

        for decl in nested {
            if let Declaration::FuncDef(mut nested) = decl {
                self.hoist_function(&mut nested);
                if let Some(name) = self.rename(&nested.name.name) {
                    nested.name.name = name;
                }
                self.hoisted.push(nested);
            }
        }

        let mut renamer = CallRenamer {
            scopes: &self.scopes,
        };
        for stmt in &mut func.statements {
            renamer.visit_stmt_mut(stmt);
        }

        self.scopes.pop();
        self.path.pop();
    }

    fn rename(&self, name: &str) -> Option<String> {
        self.scopes
            .last()
            .and_then(|scope| scope.get(name))
            .map(|renamed| renamed.name.clone())
    }
}

struct CallRenamer<'a> {
    scopes: &'a [HashMap<String, Renamed>],
}

impl VisitorMut for CallRenamer<'_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if let ExprKind::CallExpr {
            function, freevars, ..
        } = &mut expr.kind
        {
            let renamed = self
                .scopes
                .iter()
                .rev()
                .find_map(|scope| scope.get(&function.name));
            if let Some(renamed) = renamed {
                function.name = renamed.name.clone();
                *freevars = renamed.freevars.clone();
            }
        }
        walk_expr_mut(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sem::{Binder, TypeChecker};
    use crate::syntax::parse_string;
    use assert_matches::assert_matches;

    fn hoist(src: &str) -> Program {
        let mut program = parse_string(src).unwrap();

        TypeChecker::new().analyze(&mut program);
        assert!(!program.has_errors(), "{:?}", program.errors.errors);
        Binder::new().analyze(&mut program);
        Hoister::new().analyze(&mut program);
        program
    }

    fn names(program: &Program) -> Vec<String> {
        program.func_defs().map(|f| f.name.name.clone()).collect()
    }

    fn callee(stmt: &Stmt) -> &str {
        match stmt {
            Stmt::ExprStmt(ExprStmt {
                expr:
                    Expr {
                        kind: ExprKind::CallExpr { function, .. },
                        ..
                    },
                ..
            }) => &function.name,
            Stmt::ReturnStmt(ReturnStmt {
                value:
                    Some(Expr {
                        kind: ExprKind::CallExpr { function, .. },
                        ..
                    }),
                ..
            }) => &function.name,
            stmt => panic!("unexpected {:?}", stmt),
        }
    }

    #[test]
    fn call_sites_capture_freevars() {
        let src = "
def f(a: int) -> int:
    def g() -> int:
        return a
    return g()
";
        let program = hoist(src);
        let f = program.func_defs().find(|f| f.name.name == "f").unwrap();

        assert_matches!(&f.statements[0], Stmt::ReturnStmt(ReturnStmt { value: Some(call), .. }) => {
            assert_matches!(&call.kind, ExprKind::CallExpr { freevars, .. } => {
                assert_eq!(freevars.len(), 1);
                assert_eq!(freevars[0].name, "a");
            });
        });
    }

    #[test]
    fn dotted_names() {
        let src = "
class C(object):
    def f(self: C):
        def g():
            def g2():
                pass
            g2()
        g()
def top():
    def inner():
        pass
    inner()
top()
";
        let program = hoist(src);

        assert_eq!(names(&program), vec!["top", "C.f.g.g2", "C.f.g", "top.inner"]);

        let class = program.class_defs().next().unwrap();
        let method = class.methods().next().unwrap();
        assert!(method.declarations.is_empty());
        assert_eq!(callee(&method.statements[0]), "C.f.g");

        let g = program.func_defs().find(|f| f.name.name == "C.f.g").unwrap();
        assert_eq!(callee(&g.statements[0]), "C.f.g.g2");

        // top-level calls keep their names
        assert_eq!(callee(&program.statements[0]), "top");
    }

    #[test]
    fn sibling_calls_resolve_through_parent_scope() {
        let src = "
def f() -> int:
    def a() -> int:
        return b()
    def b() -> int:
        return 1
    return a()
";
        let program = hoist(src);
        let a = program.func_defs().find(|f| f.name.name == "f.a").unwrap();

        assert_eq!(callee(&a.statements[0]), "f.b");
        assert_matches!(program.func_defs().find(|f| f.name.name == "f.b"), Some(_));
    }
}
