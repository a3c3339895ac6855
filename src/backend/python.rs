//! Prints the transformed program back as Python.
//!
//! Running the output checks the closure conversion: every function is top level and each
//! `nonlocal` variable is a one element list shared by reference.
use super::{mangle, passes_own_cell, quote, CodeBuilder};
use crate::asm::EmitError;
use crate::sem::FuncType;
use crate::syntax::*;
use log::debug;

/// Temporary of multiple assignments and loop targets in cells.
const TEMP: &str = "__x";

pub fn emit(program: &Program) -> Result<String, EmitError> {
    let mut emitter = PythonEmitter::new(&program.instances);

    emitter.program(program);
    debug!("emitted {} python lines", emitter.code.as_str().lines().count());
    Ok(emitter.code.finish())
}

#[derive(Debug)]
struct PythonEmitter<'a> {
    instances: &'a VarInstances,
    code: CodeBuilder,
}

impl<'a> PythonEmitter<'a> {
    fn new(instances: &'a VarInstances) -> Self {
        Self {
            instances,
            code: CodeBuilder::new("    "),
        }
    }

    fn is_boxed(&self, id: Option<VarId>) -> bool {
        id.map_or(false, |id| self.instances.get(id).is_nonlocal)
    }

    fn program(&mut self, program: &Program) {
        self.code
            .line("def __assert__(value):")
            .indent()
            .line("assert value")
            .dedent()
            .blank();

        for def in program.var_defs() {
            let value = self.expr(&def.value);
            self.code.line(format!("{} = {}", def.var.name(), value));
        }
        for class in program.class_defs() {
            self.class(class);
        }
        for func in program.func_defs() {
            self.function(&mangle(&func.name.name), func);
        }
        self.stmts(&program.statements);
    }

    fn class(&mut self, class: &ClassDef) {
        self.code
            .blank()
            .line(format!("class {}({}):", class.name.name, class.superclass.name))
            .indent();

        let mut empty = true;
        for attr in class.attributes() {
            let value = self.expr(&attr.value);
            self.code.line(format!("{} = {}", attr.var.name(), value));
            empty = false;
        }
        for method in class.methods() {
            self.function(&method.name.name, method);
            empty = false;
        }
        if empty {
            self.code.line("pass");
        }
        self.code.dedent();
    }

    fn function(&mut self, name: &str, func: &FuncDef) {
        let params: Vec<&str> = func.params.iter().map(TypedVar::name).collect();
        self.code
            .blank()
            .line(format!("def {}({}):", name, params.join(", ")))
            .indent();

        for decl in &func.declarations {
            if let Declaration::GlobalDecl(decl) = decl {
                self.code.line(format!("global {}", decl.variable.name));
            }
        }
        for (i, param) in func.params.iter().enumerate() {
            if !func.ref_params.contains_key(&i) && self.is_boxed(param.var_instance) {
                self.code.line(format!("{0} = [{0}]", param.name()));
            }
        }
        for def in func.var_defs() {
            let value = self.expr(&def.value);
            if self.is_boxed(def.var.var_instance) {
                self.code.line(format!("{} = [{}]", def.var.name(), value));
            } else {
                self.code.line(format!("{} = {}", def.var.name(), value));
            }
        }

        if func.statements.is_empty() {
            self.code.line("pass");
        }
        self.stmts(&func.statements);
        self.code.dedent();
    }

    fn block(&mut self, stmts: &[Stmt]) {
        self.code.indent();
        if stmts.is_empty() {
            self.code.line("pass");
        }
        self.stmts(stmts);
        self.code.dedent();
    }

    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::ExprStmt(stmt) => match &stmt.expr.kind {
                ExprKind::CallExpr { function, args, .. } if function.name == "__assert__" => {
                    let condition = self.expr(&args[0]);
                    self.code.line(format!("assert {}", condition));
                }
                _ => {
                    let expr = self.expr(&stmt.expr);
                    self.code.line(expr);
                }
            },
            Stmt::AssignStmt(stmt) => {
                let value = self.expr(&stmt.value);
                if let [target] = stmt.targets.as_slice() {
                    let target = self.target(target);
                    self.code.line(format!("{} = {}", target, value));
                } else {
                    self.code.line(format!("{} = {}", TEMP, value));
                    for target in &stmt.targets {
                        let target = self.target(target);
                        self.code.line(format!("{} = {}", target, TEMP));
                    }
                }
            }
            Stmt::IfStmt(stmt) => self.if_stmt(stmt, "if"),
            Stmt::WhileStmt(stmt) => {
                let condition = self.expr(&stmt.condition);
                self.code.line(format!("while {}:", condition));
                self.block(&stmt.body);
            }
            Stmt::ForStmt(stmt) => {
                let iterable = self.expr(&stmt.iterable);
                if self.is_boxed(stmt.identifier.var_instance) {
                    self.code
                        .line(format!("for {} in {}:", TEMP, iterable))
                        .indent()
                        .line(format!("{}[0] = {}", stmt.identifier.name, TEMP))
                        .dedent();
                } else {
                    self.code
                        .line(format!("for {} in {}:", stmt.identifier.name, iterable));
                }
                self.block(&stmt.body);
            }
            Stmt::ReturnStmt(stmt) => match &stmt.value {
                Some(value) => {
                    let value = self.expr(value);
                    self.code.line(format!("return {}", value));
                }
                None => {
                    self.code.line("return");
                }
            },
        }
    }

    fn if_stmt(&mut self, stmt: &IfStmt, keyword: &str) {
        let condition = self.expr(&stmt.condition);
        self.code.line(format!("{} {}:", keyword, condition));
        self.block(&stmt.then_body);

        match stmt.else_body.as_slice() {
            [] => {}
            [Stmt::IfStmt(elif)] => self.if_stmt(elif, "elif"),
            body => {
                self.code.line("else:");
                self.block(body);
            }
        }
    }

    fn target(&self, target: &Expr) -> String {
        match &target.kind {
            ExprKind::Identifier { name, var_instance } if self.is_boxed(*var_instance) => {
                format!("{}[0]", name)
            }
            _ => self.expr(target),
        }
    }

    fn expr(&self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::IntegerLiteral { value } => value.to_string(),
            ExprKind::BooleanLiteral { value } => {
                if *value { "True" } else { "False" }.to_string()
            }
            ExprKind::NoneLiteral => "None".to_string(),
            ExprKind::StringLiteral { value } => quote(value),
            ExprKind::Identifier { name, var_instance } => {
                if self.is_boxed(*var_instance) {
                    format!("{}[0]", name)
                } else {
                    name.clone()
                }
            }
            ExprKind::ListExpr { elements, .. } => {
                let elements: Vec<String> = elements.iter().map(|e| self.expr(e)).collect();
                format!("[{}]", elements.join(", "))
            }
            ExprKind::BinaryExpr {
                left,
                operator,
                right,
            } => format!("({} {} {})", self.expr(left), operator, self.expr(right)),
            ExprKind::UnaryExpr { operator, operand } => match operator {
                UnaryOperator::Neg => format!("(-{})", self.expr(operand)),
                UnaryOperator::Not => format!("(not {})", self.expr(operand)),
            },
            ExprKind::IfExpr {
                condition,
                then_expr,
                else_expr,
            } => format!(
                "({} if {} else {})",
                self.expr(then_expr),
                self.expr(condition),
                self.expr(else_expr)
            ),
            ExprKind::IndexExpr { list, index } => {
                format!("{}[{}]", self.expr(list), self.expr(index))
            }
            ExprKind::MemberExpr { object, member } => {
                format!("{}.{}", self.expr(object), member.name)
            }
            ExprKind::CallExpr {
                function,
                args,
                is_constructor,
                ..
            } => {
                let offset = if *is_constructor { 1 } else { 0 };
                let args = match function.func_type() {
                    Some(sig) => self.args(sig, offset, args),
                    None => args.iter().map(|a| self.expr(a)).collect(),
                };
                format!("{}({})", mangle(&function.name), args.join(", "))
            }
            ExprKind::MethodCallExpr { method, args } => {
                let args = self.args(method.func_type(), 1, args);
                format!(
                    "{}.{}({})",
                    self.expr(&method.object),
                    method.member.name,
                    args.join(", ")
                )
            }
        }
    }

    fn args(&self, sig: &FuncType, offset: usize, args: &[Expr]) -> Vec<String> {
        args.iter()
            .enumerate()
            .map(|(i, arg)| match sig.ref_params.get(&(i + offset)) {
                Some(&cell) if passes_own_cell(self.instances, cell, arg) => match &arg.kind {
                    ExprKind::Identifier { name, .. } => name.clone(),
                    _ => self.expr(arg),
                },
                Some(_) => format!("[{}]", self.expr(arg)),
                None => self.expr(arg),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::pipeline;

    fn python(src: &str) -> String {
        let (program, _) = pipeline::lower(src).unwrap();
        emit(&program).unwrap()
    }

    #[test]
    fn closures_use_list_cells() {
        let src = "
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
        let out = python(src);

        assert!(out.contains("def exp(x, y):\n    a = [0]\n    a[0] = 1\n    return exp__f(y, a, x)\n"));
        assert!(out.contains("def exp__f(i, a, x):\n    if (i <= 0):\n        return a[0]\n    else:\n        a[0] = (a[0] * x)\n        return exp__f((i - 1), a, x)\n"));
        assert!(out.ends_with("assert (exp(2, 10) == 1024)\n"));
    }

    #[test]
    fn classes_and_multiple_assignment() {
        let src = "
class A(object):
    x: int = 1
class B(A):
    pass
a: A = None
b: B = None
a = b = B()
print(a.x)
";
        let out = python(src);

        assert!(out.contains("class A(object):\n    x = 1\n"));
        assert!(out.contains("class B(A):\n    pass\n"));
        assert!(out.contains("__x = B()\na = __x\nb = __x\n"));
        assert!(out.contains("print(a.x)\n"));
    }

    #[test]
    fn elif_chains() {
        let src = "
x: int = 0
if x == 0:
    x = 1
elif x == 1:
    x = 2
else:
    x = 3
";
        let out = python(src);

        assert!(out.contains("if (x == 0):\n    x = 1\nelif (x == 1):\n    x = 2\nelse:\n    x = 3\n"));
    }
}
