use super::SemanticAnalyzer;
use crate::syntax::traverse::{walk_expr_mut, walk_stmt_mut, VisitorMut};
use crate::syntax::*;
use log::debug;
use std::collections::{HashMap, HashSet};

/// Resolves every variable reference to the instance of its declaration and computes the
/// free variables of each function.
///
/// Declarations that already carry an instance keep it, so running the binder again over a
/// transformed program preserves variable identities.
#[derive(Debug, Default)]
pub struct Binder {
    /// Keep the free variables computed by an earlier run.
    rebinding: bool,
    errors: Vec<SemanticError>,
}

type Frame = HashMap<String, VarId>;

impl SemanticAnalyzer for Binder {
    fn analyze(&mut self, program: &mut Program) {
        let instances = &mut program.instances;
        let mut globals = Frame::new();

        // Register globals first so functions can import them.
        for decl in &mut program.declarations {
            if let Declaration::VarDef(def) = decl {
                let id = declare(instances, &mut def.var);

                instances.get_mut(id).is_global = true;
                globals.insert(def.var.name().to_string(), id);
            }
        }

        let mut frames = vec![];
        for decl in &mut program.declarations {
            match decl {
                Declaration::FuncDef(func) => {
                    self.bind_function(func, false, &mut frames, &globals, instances);
                }
                Declaration::ClassDef(class) => {
                    for decl in &mut class.declarations {
                        match decl {
                            Declaration::VarDef(attr) => {
                                declare(instances, &mut attr.var);
                            }
                            Declaration::FuncDef(method) => {
                                self.bind_function(method, true, &mut frames, &globals, instances);
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        let mut resolver = Resolver::new(&frames, &globals);
        for stmt in &mut program.statements {
            resolver.visit_stmt_mut(stmt);
        }
        for ident in resolver.uses {
            if let Some(id) = ident.var_instance {
                instances.get_mut(id).is_global = true;
            }
        }

        debug!("bound {} variable instances", instances.len());
        program.errors.errors.append(&mut self.errors);
    }
}

impl Binder {
    pub fn new() -> Self {
        Binder::default()
    }

    /// A binder for a program that has already been bound once.
    pub fn rebinding() -> Self {
        Binder {
            rebinding: true,
            errors: vec![],
        }
    }

    fn report(&mut self, ident: &mut Identifier, message: String) {
        if ident.error_msg.is_some() {
            return;
        }
        ident.error_msg = Some(message.clone());
        self.errors.push(SemanticError {
            location: ident.location,
            message,
        });
    }

    /// Binds `func` and the functions nested in it. Returns the free variables of `func`.
    fn bind_function(
        &mut self,
        func: &mut FuncDef,
        is_method: bool,
        frames: &mut Vec<Frame>,
        globals: &Frame,
        instances: &mut VarInstances,
    ) -> Vec<Identifier> {
        let mut locals = Frame::new();
        let mut own = HashSet::new();

        for (i, param) in func.params.iter_mut().enumerate() {
            let id = declare(instances, param);

            if is_method && i == 0 {
                instances.get_mut(id).is_self = true;
            }
            locals.insert(param.name().to_string(), id);
            own.insert(id);
        }

        for decl in &mut func.declarations {
            match decl {
                Declaration::VarDef(def) => {
                    let id = declare(instances, &mut def.var);

                    locals.insert(def.var.name().to_string(), id);
                    own.insert(id);
                }
                Declaration::GlobalDecl(decl) => {
                    let name = decl.variable.name.clone();

                    match globals.get(&name) {
                        Some(&id) => {
                            decl.variable.var_instance = Some(id);
                            locals.insert(name, id);
                        }
                        None => {
                            self.report(
                                &mut decl.variable,
                                format!("Unknown global variable: {}", name),
                            );
                        }
                    }
                }
                Declaration::NonLocalDecl(decl) => {
                    let name = decl.variable.name.clone();

                    match frames.iter().rev().find_map(|frame| frame.get(&name)) {
                        Some(&id) if instances.get(id).is_self => {
                            self.report(&mut decl.variable, "Cannot declare self as nonlocal".to_string());
                        }
                        Some(&id) => {
                            instances.get_mut(id).is_nonlocal = true;
                            decl.variable.var_instance = Some(id);
                            locals.insert(name, id);
                        }
                        None => {
                            self.report(
                                &mut decl.variable,
                                format!("Not a nonlocal variable: {}", name),
                            );
                        }
                    }
                }
                Declaration::FuncDef(_) | Declaration::ClassDef(_) => {}
            }
        }

        frames.push(locals);

        let mut freevars = FreeVars::default();
        for decl in &mut func.declarations {
            if let Declaration::FuncDef(nested) = decl {
                for ident in self.bind_function(nested, false, frames, globals, instances) {
                    freevars.add(ident, &own, instances);
                }
            }
        }

        let mut resolver = Resolver::new(frames.as_slice(), globals);
        for stmt in &mut func.statements {
            resolver.visit_stmt_mut(stmt);
        }
        for ident in resolver.uses {
            freevars.add(ident, &own, instances);
        }

        frames.pop();

        if !self.rebinding {
            func.declarations
                .retain(|decl| !matches!(decl, Declaration::NonLocalDecl(_)));
            func.freevars = freevars.vars.clone();
        }
        freevars.vars
    }
}

/// Gives `var` an instance unless it already has one.
fn declare(instances: &mut VarInstances, var: &mut TypedVar) -> VarId {
    match var.var_instance {
        Some(id) => id,
        None => {
            let id = instances.new_instance();

            var.var_instance = Some(id);
            var.identifier.var_instance = Some(id);
            id
        }
    }
}

#[derive(Debug, Default)]
struct FreeVars {
    vars: Vec<Identifier>,
}

impl FreeVars {
    fn add(&mut self, ident: Identifier, own: &HashSet<VarId>, instances: &VarInstances) {
        let id = match ident.var_instance {
            Some(id) => id,
            None => return,
        };
        if own.contains(&id) || instances.get(id).is_global {
            return;
        }
        if self.vars.iter().any(|v| v.name == ident.name) {
            return;
        }
        self.vars.push(ident);
    }
}

/// Resolves identifier uses in statements against a stack of scopes.
struct Resolver<'a> {
    frames: &'a [Frame],
    globals: &'a Frame,
    uses: Vec<Identifier>,
}

impl<'a> Resolver<'a> {
    fn new(frames: &'a [Frame], globals: &'a Frame) -> Self {
        Self {
            frames,
            globals,
            uses: vec![],
        }
    }

    fn resolve(&self, name: &str) -> Option<VarId> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| self.globals.get(name))
            .copied()
    }

    fn record(&mut self, mut ident: Identifier) {
        ident.error_msg = None;
        self.uses.push(ident);
    }
}

impl VisitorMut for Resolver<'_> {
    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) {
        if let Stmt::ForStmt(stmt) = stmt {
            let id = self.resolve(&stmt.identifier.name);

            stmt.identifier.var_instance = id;
            self.record(stmt.identifier.clone());
        }
        walk_stmt_mut(self, stmt);
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if let ExprKind::Identifier { name, var_instance } = &mut expr.kind {
            let id = self.resolve(name);
            *var_instance = id;

            let mut ident = Identifier::new(name.clone(), expr.location);
            ident.var_instance = id;
            ident.inferred_type = expr.inferred_type.clone().map(Into::into);
            self.record(ident);
        }
        walk_expr_mut(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sem::TypeChecker;
    use crate::syntax::parse_string;
    use assert_matches::assert_matches;

    fn analyze(src: &str) -> Program {
        let mut program = parse_string(src).unwrap();

        TypeChecker::new().analyze(&mut program);
        assert!(!program.has_errors(), "{:?}", program.errors.errors);
        Binder::new().analyze(&mut program);
        program
    }

    fn func<'a>(program: &'a Program, name: &str) -> &'a FuncDef {
        program
            .func_defs()
            .find(|f| f.name.name == name)
            .unwrap_or_else(|| panic!("no function {}", name))
    }

    fn expr_instance(stmt: &Stmt) -> VarId {
        match stmt {
            Stmt::ExprStmt(ExprStmt {
                expr:
                    Expr {
                        kind: ExprKind::CallExpr { args, .. },
                        ..
                    },
                ..
            }) => match &args[0].kind {
                ExprKind::Identifier {
                    var_instance: Some(id),
                    ..
                } => *id,
                kind => panic!("unexpected {:?}", kind),
            },
            stmt => panic!("unexpected {:?}", stmt),
        }
    }

    #[test]
    fn globals() {
        let program = analyze("x: int = 0\ndef f():\n    global x\n    x = 1\nprint(x)\n");

        let id = expr_instance(&program.statements[0]);
        assert!(program.instances.get(id).is_global);

        let f = func(&program, "f");
        assert_matches!(&f.statements[0], Stmt::AssignStmt(stmt) => {
            assert_matches!(stmt.targets[0].kind, ExprKind::Identifier { var_instance: Some(target), .. } if target == id);
        });
        assert!(f.freevars.is_empty());
    }

    #[test]
    fn nonlocal_shares_instance() {
        let src = "
def f() -> int:
    x: int = 0
    def g():
        nonlocal x
        x = 1
    g()
    return x
";
        let program = analyze(src);
        let f = func(&program, "f");
        let x = f.var_defs().next().unwrap().var.instance();

        assert!(program.instances.get(x).is_nonlocal);
        assert!(!program.instances.get(x).is_global);

        let g = f.nested_func_defs().next().unwrap();
        assert_eq!(g.freevars.len(), 1);
        assert_eq!(g.freevars[0].name, "x");
        assert_eq!(g.freevars[0].var_instance, Some(x));
        // nonlocal declarations are dropped once bound.
        assert!(g.declarations.is_empty());
        assert!(f.freevars.is_empty());
    }

    #[test]
    fn freevars_propagate_through_nesting() {
        let src = "
def f(a: int) -> int:
    def g() -> int:
        def h() -> int:
            return a + a
        return h()
    return g()
";
        let program = analyze(src);
        let f = func(&program, "f");
        let g = f.nested_func_defs().next().unwrap();
        let h = g.nested_func_defs().next().unwrap();

        assert_eq!(h.freevars.len(), 1);
        assert_eq!(g.freevars.len(), 1);
        assert_eq!(g.freevars[0].name, "a");
        assert_eq!(g.freevars[0].var_instance, f.params[0].var_instance);
        assert!(!program.instances.get(f.params[0].instance()).is_nonlocal);
    }

    #[test]
    fn method_receiver_is_self() {
        let src = "
class A(object):
    def f(self: A) -> A:
        return self
";
        let program = analyze(src);
        let class = program.class_defs().next().unwrap();
        let method = class.methods().next().unwrap();

        assert!(program.instances.get(method.params[0].instance()).is_self);
    }

    #[test]
    fn self_cannot_be_nonlocal() {
        let src = "
class A(object):
    def f(self: A):
        def g():
            nonlocal self
            self = None
        g()
";
        let mut program = parse_string(src).unwrap();
        TypeChecker::new().analyze(&mut program);
        Binder::new().analyze(&mut program);

        let messages: Vec<_> = program.errors.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["Cannot declare self as nonlocal"]);
    }

    #[test]
    fn rebinding_keeps_instances() {
        let mut program = analyze("x: int = 0\ndef f(a: int) -> int:\n    return a + x\n");
        let before = func(&program, "f").params[0].instance();
        let count = program.instances.len();

        Binder::rebinding().analyze(&mut program);

        assert_eq!(func(&program, "f").params[0].instance(), before);
        assert_eq!(program.instances.len(), count);
    }
}
