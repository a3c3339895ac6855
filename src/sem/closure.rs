//! Closure conversion of hoisted functions.
//!
//! Every free variable of a function becomes an extra trailing parameter that shares the
//! variable's instance, and every call site passes the variable along. Parameters whose
//! instance is captured by a `nonlocal` declaration are recorded as reference parameters.
use super::SemanticAnalyzer;
use crate::syntax::traverse::{
    walk_declaration_mut, walk_expr_mut, walk_func_def_mut, walk_stmt_mut, VisitorMut,
};
use crate::syntax::*;
use log::{debug, trace};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct ClosureTransformer {
    lifted: usize,
}

impl SemanticAnalyzer for ClosureTransformer {
    fn analyze(&mut self, program: &mut Program) {
        let freevars = self.propagate_freevars(program);

        for decl in &mut program.declarations {
            match decl {
                Declaration::FuncDef(func) => self.transform_function(func, &freevars, &program.instances),
                Declaration::ClassDef(class) => {
                    for decl in &mut class.declarations {
                        if let Declaration::FuncDef(method) = decl {
                            self.transform_function(method, &freevars, &program.instances);
                        }
                    }
                }
                _ => {}
            }
        }

        let mut calls = CallSites { freevars: &freevars };
        for stmt in &mut program.statements {
            calls.visit_stmt_mut(stmt);
        }

        debug!("lifted {} free variables into parameters", self.lifted);
    }
}

impl ClosureTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A function that calls a function with free variables must be able to pass them, so
    /// those variables are free in the caller too unless the caller declares them.
    fn propagate_freevars(&self, program: &mut Program) -> HashMap<String, Vec<Identifier>> {
        let instances = &program.instances;
        let mut funcs: Vec<&mut FuncDef> = vec![];

        for decl in &mut program.declarations {
            match decl {
                Declaration::FuncDef(func) => funcs.push(func),
                Declaration::ClassDef(class) => {
                    for decl in &mut class.declarations {
                        if let Declaration::FuncDef(method) = decl {
                            funcs.push(method);
                        }
                    }
                }
                _ => {}
            }
        }

        let owned: Vec<HashSet<VarId>> = funcs.iter().map(|func| owned_instances(func)).collect();
        let callees: Vec<Vec<String>> = funcs
            .iter_mut()
            .map(|func| {
                let mut collector = CalleeCollector::default();
                for stmt in &mut func.statements {
                    collector.visit_stmt_mut(stmt);
                }
                collector.names
            })
            .collect();

        let mut changed = true;
        while changed {
            changed = false;

            let current: HashMap<String, Vec<Identifier>> = funcs
                .iter()
                .map(|func| (func.name.name.clone(), func.freevars.clone()))
                .collect();

            for (i, func) in funcs.iter_mut().enumerate() {
                for callee in &callees[i] {
                    let vars = match current.get(callee) {
                        Some(vars) => vars,
                        None => continue,
                    };
                    for var in vars {
                        let id = match var.var_instance {
                            Some(id) => id,
                            None => continue,
                        };
                        if owned[i].contains(&id)
                            || instances.get(id).is_global
                            || func.freevars.iter().any(|v| v.name == var.name)
                        {
                            continue;
                        }
                        trace!("{} passes {} on to {}", func.name.name, var.name, callee);
                        func.freevars.push(var.clone());
                        changed = true;
                    }
                }
            }
        }

        funcs
            .iter()
            .map(|func| (func.name.name.clone(), func.freevars.clone()))
            .collect()
    }

    fn transform_function(
        &mut self,
        func: &mut FuncDef,
        freevars: &HashMap<String, Vec<Identifier>>,
        instances: &VarInstances,
    ) {
        for var in &func.freevars {
            let ty = var.value_type().cloned().unwrap_or_else(|| {
                panic!("Internal compiler error: untyped free variable {}", var.name)
            });

            let mut param = TypedVar {
                location: var.location,
                error_msg: None,
                identifier: Identifier::new(var.name.clone(), var.location),
                type_annotation: TypeAnnotation::from_value_type(&ty, var.location),
                t: None,
                var_instance: var.var_instance,
            };
            param.identifier.var_instance = var.var_instance;
            func.params.push(param);
            self.lifted += 1;
        }

        func.ref_params.clear();
        for (i, param) in func.params.iter().enumerate() {
            if let Some(id) = param.var_instance {
                if instances.get(id).is_nonlocal {
                    func.ref_params.insert(i, id);
                }
            }
        }

        let mut calls = CallSites { freevars };
        for stmt in &mut func.statements {
            calls.visit_stmt_mut(stmt);
        }
    }
}

/// Instances declared by `func` itself.
fn owned_instances(func: &FuncDef) -> HashSet<VarId> {
    func.params
        .iter()
        .filter_map(|param| param.var_instance)
        .chain(func.var_defs().filter_map(|def| def.var.var_instance))
        .collect()
}

#[derive(Default)]
struct CalleeCollector {
    names: Vec<String>,
}

impl VisitorMut for CalleeCollector {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if let ExprKind::CallExpr { function, .. } = &expr.kind {
            if !self.names.contains(&function.name) {
                self.names.push(function.name.clone());
            }
        }
        walk_expr_mut(self, expr);
    }
}

/// Appends the free variables of the callee to every call.
struct CallSites<'a> {
    freevars: &'a HashMap<String, Vec<Identifier>>,
}

impl VisitorMut for CallSites<'_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);

        if let ExprKind::CallExpr {
            function,
            args,
            freevars,
            ..
        } = &mut expr.kind
        {
            if let Some(vars) = self.freevars.get(&function.name) {
                *freevars = vars.clone();
            }
            for var in freevars.iter() {
                args.push(Expr::identifier(
                    var.name.clone(),
                    expr.location,
                    var.var_instance,
                ));
            }
        }
    }
}

/// Clears every type annotation so that the program can be checked again.
///
/// Variable instances, free variables and reference parameters are kept.
#[derive(Debug, Default)]
pub struct TypeEraser;

impl SemanticAnalyzer for TypeEraser {
    fn analyze(&mut self, program: &mut Program) {
        program.errors.errors.clear();
        self.visit_program_mut(program);
    }
}

impl TypeEraser {
    pub fn new() -> Self {
        TypeEraser
    }
}

impl VisitorMut for TypeEraser {
    fn visit_declaration_mut(&mut self, decl: &mut Declaration) {
        match decl {
            Declaration::VarDef(def) => def.error_msg = None,
            Declaration::ClassDef(def) => def.error_msg = None,
            Declaration::GlobalDecl(decl) => decl.error_msg = None,
            Declaration::NonLocalDecl(decl) => decl.error_msg = None,
            Declaration::FuncDef(_) => {}
        }
        walk_declaration_mut(self, decl);
    }

    fn visit_func_def_mut(&mut self, func: &mut FuncDef) {
        func.error_msg = None;
        func.func_type = None;
        walk_func_def_mut(self, func);
    }

    fn visit_typed_var_mut(&mut self, var: &mut TypedVar) {
        var.error_msg = None;
        var.t = None;
        self.visit_identifier_mut(&mut var.identifier);
    }

    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::AssignStmt(stmt) => stmt.error_msg = None,
            Stmt::IfStmt(stmt) => stmt.error_msg = None,
            Stmt::WhileStmt(stmt) => stmt.error_msg = None,
            Stmt::ForStmt(stmt) => stmt.error_msg = None,
            Stmt::ReturnStmt(stmt) => stmt.error_msg = None,
            Stmt::ExprStmt(stmt) => stmt.error_msg = None,
        }
        walk_stmt_mut(self, stmt);
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        expr.error_msg = None;
        expr.inferred_type = None;

        match &mut expr.kind {
            ExprKind::CallExpr { is_constructor, .. } => *is_constructor = false,
            ExprKind::ListExpr { empty_list_type, .. } => *empty_list_type = None,
            ExprKind::MethodCallExpr { method, .. } => {
                method.error_msg = None;
                method.inferred_type = None;
            }
            _ => {}
        }
        walk_expr_mut(self, expr);
    }

    fn visit_identifier_mut(&mut self, ident: &mut Identifier) {
        ident.error_msg = None;
        ident.inferred_type = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sem::{Binder, Hoister, TypeChecker};
    use crate::syntax::parse_string;
    use assert_matches::assert_matches;

    fn transform(src: &str) -> Program {
        let mut program = parse_string(src).unwrap();

        TypeChecker::new().analyze(&mut program);
        assert!(!program.has_errors(), "{:?}", program.errors.errors);
        Binder::new().analyze(&mut program);
        Hoister::new().analyze(&mut program);
        ClosureTransformer::new().analyze(&mut program);
        TypeEraser::new().analyze(&mut program);
        TypeChecker::new().analyze(&mut program);
        assert!(!program.has_errors(), "{:?}", program.errors.errors);
        Binder::rebinding().analyze(&mut program);
        program
    }

    fn func<'a>(program: &'a Program, name: &str) -> &'a FuncDef {
        program
            .func_defs()
            .find(|f| f.name.name == name)
            .unwrap_or_else(|| panic!("no function {}", name))
    }

    fn call_args(expr: &Expr) -> &[Expr] {
        match &expr.kind {
            ExprKind::CallExpr { args, .. } => args,
            kind => panic!("unexpected {:?}", kind),
        }
    }

    const EXP: &str = "
def exp(x: int, y: int) -> int:
    a: int = 0
    def f(i: int) -> int:
        nonlocal a
        if i <= 0:
            return a
        else:
            a = a * x
            return f(i - 1)
    a = 1
    return f(y)
__assert__(exp(2, 10) == 1024)
";

    #[test]
    fn nonlocal_becomes_reference_parameter() {
        let program = transform(EXP);
        let exp = func(&program, "exp");
        let f = func(&program, "exp.f");

        let names: Vec<_> = f.params.iter().map(TypedVar::name).collect();
        assert_eq!(names, vec!["i", "a", "x"]);

        let a = exp.var_defs().next().unwrap().var.instance();
        assert_eq!(f.params[1].var_instance, Some(a));
        assert_eq!(f.ref_params.get(&1), Some(&a));
        assert!(!f.ref_params.contains_key(&2));
        assert!(exp.ref_params.is_empty());
        assert_eq!(f.signature().params.len(), 3);
        assert_eq!(f.signature().ref_params.len(), 1);
    }

    #[test]
    fn call_sites_pass_freevars() {
        let program = transform(EXP);
        let exp = func(&program, "exp");
        let f = func(&program, "exp.f");

        assert_matches!(&exp.statements[1], Stmt::ReturnStmt(ReturnStmt { value: Some(call), .. }) => {
            let args = call_args(call);
            assert_eq!(args.len(), 3);
            assert_matches!(&args[1].kind, ExprKind::Identifier { name, var_instance: Some(_) } if name == "a");
        });

        // the recursive call passes the parameters it received.
        assert_matches!(&f.statements[0], Stmt::IfStmt(stmt) => {
            assert_matches!(&stmt.else_body[1], Stmt::ReturnStmt(ReturnStmt { value: Some(call), .. }) => {
                let args = call_args(call);
                assert_eq!(args.len(), 3);
                assert_matches!(&args[2].kind, ExprKind::Identifier { var_instance, .. } if *var_instance == f.params[2].var_instance);
            });
        });
    }

    #[test]
    fn no_nested_functions_remain() {
        let program = transform(EXP);

        for func in program.func_defs() {
            assert_eq!(func.nested_func_defs().count(), 0);
        }
    }

    #[test]
    fn sibling_calls_forward_freevars() {
        let src = "
def f(a: int) -> int:
    def g() -> int:
        return h()
    def h() -> int:
        return a
    return g()
";
        let program = transform(src);
        let g = func(&program, "f.g");

        assert_eq!(g.params.len(), 1);
        assert_eq!(g.params[0].name(), "a");
        assert_matches!(&g.statements[0], Stmt::ReturnStmt(ReturnStmt { value: Some(call), .. }) => {
            assert_eq!(call_args(call).len(), 1);
        });
    }

    #[test]
    fn method_receiver_captured_by_value() {
        let src = "
class A(object):
    n: int = 3
    def f(self: A) -> int:
        def g() -> int:
            return self.n
        return g()
__assert__(A().f() == 3)
";
        let program = transform(src);
        let g = func(&program, "A.f.g");

        assert_eq!(g.params.len(), 1);
        assert!(g.ref_params.is_empty());
        assert!(program.instances.get(g.params[0].instance()).is_self);
    }

    #[test]
    fn eraser_clears_types() {
        let mut program = parse_string("x: int = 1\nprint(x + 1)\n").unwrap();

        TypeChecker::new().analyze(&mut program);
        TypeEraser::new().analyze(&mut program);

        assert!(program.var_defs().next().unwrap().var.t.is_none());
        assert_matches!(&program.statements[0], Stmt::ExprStmt(stmt) => {
            assert!(stmt.expr.inferred_type.is_none());
        });
    }
}
