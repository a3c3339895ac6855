//! Common Intermediate Language, assembled by `ilasm`.
//!
//! User classes become CLR classes with one field per attribute and one virtual method per
//! ChocoPy method. Functions and globals are static members of a `Main` class. Lists are
//! `object[]` with boxed elements and cells are one element arrays of the variable type.
use super::{passes_own_cell, quote, Artifact, CodeBuilder};
use crate::asm::EmitError;
use crate::sem::{FuncType, TypeSystem, ValueType};
use crate::syntax::*;
use log::{debug, trace};
use std::collections::HashMap;
use std::mem;

const BACKEND: &str = "CIL";
const MAIN: &str = "'Main'";
const STRING: &str = "[mscorlib]System.String";
const CONSOLE: &str = "[mscorlib]System.Console";

pub fn emit(program: &Program, ts: &TypeSystem, name: &str) -> Result<Artifact, EmitError> {
    let mut emitter = CilEmitter::new(ts, &program.instances);
    let contents = emitter.program(program, name)?;

    debug!("emitted {} CIL lines", contents.lines().count());
    Ok(Artifact::new(format!("{}.cil", name), contents))
}

fn id(name: &str) -> String {
    format!("'{}'", name)
}

fn cil_type(ty: &ValueType) -> String {
    match ty {
        ValueType::List(_) => "object[]".to_string(),
        ValueType::Class(name) => match name.as_str() {
            "int" => "int64".to_string(),
            "bool" => "bool".to_string(),
            "str" => "string".to_string(),
            "object" | "<None>" | "<Empty>" => "object".to_string(),
            class => format!("class {}", id(class)),
        },
    }
}

fn return_type(ty: &ValueType) -> String {
    if ty.is_none() {
        "void".to_string()
    } else {
        cil_type(ty)
    }
}

/// Values stored unboxed: `int` and `bool`.
fn is_value(ty: &ValueType) -> bool {
    ty.is_int() || ty.is_bool()
}

#[derive(Debug, Clone)]
enum Slot {
    This,
    Arg(String),
    Local(String),
}

#[derive(Debug, Default)]
struct Frame {
    slots: HashMap<VarId, Slot>,
    locals: Vec<(String, String)>,
    return_type: Option<ValueType>,
    temps: usize,
}

impl Frame {
    fn local(&mut self, id: VarId, name: &str, ty: String) {
        self.slots.insert(id, Slot::Local(name.to_string()));
        self.locals.push((name.to_string(), ty));
    }

    fn temp(&mut self, ty: String) -> String {
        let name = format!(".tmp.{}", self.temps);
        self.temps += 1;
        self.locals.push((name.clone(), ty));
        name
    }
}

struct CilEmitter<'a> {
    ts: &'a TypeSystem,
    instances: &'a VarInstances,
    code: CodeBuilder,
    frame: Frame,
    labels: usize,
}

impl<'a> CilEmitter<'a> {
    fn new(ts: &'a TypeSystem, instances: &'a VarInstances) -> Self {
        Self {
            ts,
            instances,
            code: body(),
            frame: Frame::default(),
            labels: 0,
        }
    }

    fn label(&mut self) -> String {
        self.labels += 1;
        format!("L{}", self.labels)
    }

    fn mark(&mut self, label: &str) {
        self.code.outdented(format!("{}:", label));
    }

    fn op<S: AsRef<str>>(&mut self, line: S) {
        self.code.line(line);
    }

    fn is_boxed(&self, id: VarId) -> bool {
        self.instances.get(id).is_nonlocal
    }

    fn program(&mut self, program: &Program, name: &str) -> Result<String, EmitError> {
        let mut out = CodeBuilder::new("    ");
        out.line(".assembly extern mscorlib {}")
            .line(format!(".assembly {} {{}}", id(name)))
            .line(format!(".module {}", id(&format!("{}.exe", name))));

        for class in program.class_defs() {
            let text = self.class(class)?;
            out.blank().append(&text);
        }

        out.blank()
            .line(format!(
                ".class public abstract sealed auto ansi {} extends [mscorlib]System.Object",
                MAIN
            ))
            .line("{")
            .indent();
        for def in program.var_defs() {
            out.line(format!(
                ".field public static {} {}",
                cil_type(def.var.value_type()),
                id(def.var.name())
            ));
        }
        for func in program.func_defs() {
            let text = self.method(&func.name.name, func, false)?;
            out.blank().append(&text);
        }
        let main = self.main(program)?;
        out.blank().append(&main).blank().append(HELPERS);
        out.dedent().line("}");

        Ok(out.finish())
    }

    fn class(&mut self, class: &ClassDef) -> Result<String, EmitError> {
        let name = &class.name.name;
        let parent = match class.superclass.name.as_str() {
            "object" => "[mscorlib]System.Object".to_string(),
            parent => id(parent),
        };
        let mut out = CodeBuilder::new("    ");

        out.line(format!(
            ".class public auto ansi beforefieldinit {} extends {}",
            id(name),
            parent
        ))
        .line("{")
        .indent();
        for attr in class.attributes() {
            out.line(format!(
                ".field public {} {}",
                cil_type(attr.var.value_type()),
                id(attr.var.name())
            ));
        }

        // The constructor only initializes the attributes; `__init__` runs after it.
        self.frame = Frame::default();
        for attr in class.attributes() {
            self.op("ldarg.0");
            self.expr(&attr.value)?;
            self.coerce(attr.value.value_type(), attr.var.value_type());
            self.op(format!(
                "stfld {} {}::{}",
                cil_type(attr.var.value_type()),
                id(name),
                id(attr.var.name())
            ));
        }
        self.op("ldarg.0");
        self.op(format!("call instance void {}::.ctor()", parent));
        self.op("ret");
        let body = mem::replace(&mut self.code, body()).finish();
        out.blank()
            .line(".method public hidebysig specialname rtspecialname instance void .ctor() cil managed")
            .line("{")
            .indent()
            .line(".maxstack 64")
            .dedent()
            .append(&body)
            .line("}");

        for method in class.methods() {
            let text = self.method(&method.name.name, method, true)?;
            out.blank().append(&text);
        }
        out.dedent().line("}");
        Ok(out.finish())
    }

    fn method(&mut self, name: &str, func: &FuncDef, is_method: bool) -> Result<String, EmitError> {
        trace!("emit method {}", name);
        let ret = func.signature().return_type.clone();
        self.frame = Frame {
            return_type: Some(ret.clone()),
            ..Frame::default()
        };

        let mut params = vec![];
        for (i, param) in func.params.iter().enumerate() {
            let var = param.instance();
            let ty = cil_type(param.value_type());

            if is_method && i == 0 {
                self.frame.slots.insert(var, Slot::This);
            } else if func.ref_params.contains_key(&i) {
                params.push(format!("{}[] {}", ty, id(param.name())));
                self.frame.slots.insert(var, Slot::Arg(param.name().to_string()));
            } else if self.is_boxed(var) {
                let arg = format!("{}.arg", param.name());
                params.push(format!("{} {}", ty, id(&arg)));
                self.frame.local(var, param.name(), format!("{}[]", ty));
                self.new_cell(param.value_type(), |e| {
                    e.op(format!("ldarg {}", id(&arg)));
                    Ok(())
                })?;
                self.op(format!("stloc {}", id(param.name())));
            } else {
                params.push(format!("{} {}", ty, id(param.name())));
                self.frame.slots.insert(var, Slot::Arg(param.name().to_string()));
            }
        }

        for def in func.var_defs() {
            let ty = def.var.value_type();
            if self.is_boxed(def.var.instance()) {
                self.frame.local(def.var.instance(), def.var.name(), format!("{}[]", cil_type(ty)));
                self.new_cell(ty, |e| {
                    e.expr(&def.value)?;
                    e.coerce(def.value.value_type(), ty);
                    Ok(())
                })?;
            } else {
                self.frame.local(def.var.instance(), def.var.name(), cil_type(ty));
                self.expr(&def.value)?;
                self.coerce(def.value.value_type(), ty);
            }
            self.op(format!("stloc {}", id(def.var.name())));
        }

        self.stmts(&func.statements)?;
        if !ret.is_none() {
            self.default_value(&ret);
        }
        self.op("ret");

        let body = mem::replace(&mut self.code, body()).finish();
        let modifiers = if is_method {
            "public hidebysig virtual instance"
        } else {
            "public static"
        };
        let mut out = CodeBuilder::new("    ");
        out.line(format!(
            ".method {} {} {}({}) cil managed",
            modifiers,
            return_type(&ret),
            id(name),
            params.join(", ")
        ))
        .line("{")
        .indent()
        .line(".maxstack 64");
        self.locals(&mut out);
        out.dedent().append(&body).line("}");
        Ok(out.finish())
    }

    fn main(&mut self, program: &Program) -> Result<String, EmitError> {
        self.frame = Frame::default();

        for def in program.var_defs() {
            self.expr(&def.value)?;
            self.coerce(def.value.value_type(), def.var.value_type());
            self.op(format!(
                "stsfld {} {}::{}",
                cil_type(def.var.value_type()),
                MAIN,
                id(def.var.name())
            ));
        }
        self.stmts(&program.statements)?;
        self.op("ret");

        let body = mem::replace(&mut self.code, body()).finish();
        let mut out = CodeBuilder::new("    ");
        out.line(".method public static void '.entry'() cil managed")
            .line("{")
            .indent()
            .line(".entrypoint")
            .line(".maxstack 64");
        self.locals(&mut out);
        out.dedent().append(&body).line("}");
        Ok(out.finish())
    }

    fn locals(&mut self, out: &mut CodeBuilder) {
        let locals = mem::take(&mut self.frame.locals);
        if locals.is_empty() {
            return;
        }
        let locals: Vec<String> = locals
            .iter()
            .map(|(name, ty)| format!("{} {}", ty, id(name)))
            .collect();
        out.line(format!(".locals init ({})", locals.join(", ")));
    }

    /// Pushes a one element array holding the value pushed by `value`.
    fn new_cell<F>(&mut self, ty: &ValueType, value: F) -> Result<(), EmitError>
    where
        F: FnOnce(&mut Self) -> Result<(), EmitError>,
    {
        let ty = cil_type(ty);
        self.op("ldc.i4.1");
        self.op(format!("newarr {}", ty));
        self.op("dup");
        self.op("ldc.i4.0");
        value(self)?;
        self.op(format!("stelem {}", ty));
        Ok(())
    }

    fn default_value(&mut self, ty: &ValueType) {
        if is_value(ty) {
            self.op(if ty.is_int() { "ldc.i8 0" } else { "ldc.i4.0" });
        } else {
            self.op("ldnull");
        }
    }

    fn coerce(&mut self, from: &ValueType, to: &ValueType) {
        if is_value(from) && !is_value(to) {
            self.op(format!("box {}", cil_type(from)));
        }
    }

    /// Converts an `object` element of a list to `ty`.
    fn unbox(&mut self, ty: &ValueType) {
        if is_value(ty) {
            self.op(format!("unbox.any {}", cil_type(ty)));
        } else if !(ty.is_class("object") || ty.is_none() || ty.is_empty()) {
            self.op(format!("castclass {}", cil_type(ty)));
        }
    }

    fn slot(&self, var: VarId, name: &str) -> Slot {
        self.frame.slots.get(&var).cloned().unwrap_or_else(|| {
            panic!("Internal compiler error: unbound variable {}", name)
        })
    }

    /// Pushes the cell of a boxed variable.
    fn load_cell(&mut self, var: VarId, name: &str) {
        match self.slot(var, name) {
            Slot::Arg(name) => self.op(format!("ldarg {}", id(&name))),
            Slot::Local(name) => self.op(format!("ldloc {}", id(&name))),
            Slot::This => self.op("ldarg.0"),
        }
    }

    fn load_var(&mut self, var: VarId, name: &str, ty: &ValueType) {
        if self.instances.get(var).is_global {
            self.op(format!("ldsfld {} {}::{}", cil_type(ty), MAIN, id(name)));
        } else if self.is_boxed(var) {
            self.load_cell(var, name);
            self.op("ldc.i4.0");
            self.op(format!("ldelem {}", cil_type(ty)));
        } else {
            self.load_cell(var, name);
        }
    }

    /// Stores the value computed by `value` into a variable.
    fn store_var<F>(&mut self, var: VarId, name: &str, ty: &ValueType, value: F) -> Result<(), EmitError>
    where
        F: FnOnce(&mut Self) -> Result<(), EmitError>,
    {
        if self.instances.get(var).is_global {
            value(self)?;
            self.op(format!("stsfld {} {}::{}", cil_type(ty), MAIN, id(name)));
        } else if self.is_boxed(var) {
            self.load_cell(var, name);
            self.op("ldc.i4.0");
            value(self)?;
            self.op(format!("stelem {}", cil_type(ty)));
        } else {
            value(self)?;
            match self.slot(var, name) {
                Slot::Arg(name) => self.op(format!("starg {}", id(&name))),
                Slot::Local(name) => self.op(format!("stloc {}", id(&name))),
                Slot::This => self.op("starg 0"),
            }
        }
        Ok(())
    }

    fn stmts(&mut self, stmts: &[Stmt]) -> Result<(), EmitError> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), EmitError> {
        match stmt {
            Stmt::ExprStmt(stmt) => {
                self.expr(&stmt.expr)?;
                self.op("pop");
            }
            Stmt::AssignStmt(stmt) => {
                let ty = stmt.value.value_type();
                let tmp = self.frame.temp(cil_type(ty));
                self.expr(&stmt.value)?;
                self.op(format!("stloc {}", id(&tmp)));
                for target in &stmt.targets {
                    self.assign(target, ty, &tmp)?;
                }
            }
            Stmt::IfStmt(stmt) => {
                let else_label = self.label();
                let end = self.label();
                self.expr(&stmt.condition)?;
                self.op(format!("brfalse {}", else_label));
                self.stmts(&stmt.then_body)?;
                self.op(format!("br {}", end));
                self.mark(&else_label);
                self.stmts(&stmt.else_body)?;
                self.mark(&end);
            }
            Stmt::WhileStmt(stmt) => {
                let head = self.label();
                let end = self.label();
                self.mark(&head);
                self.expr(&stmt.condition)?;
                self.op(format!("brfalse {}", end));
                self.stmts(&stmt.body)?;
                self.op(format!("br {}", head));
                self.mark(&end);
            }
            Stmt::ForStmt(stmt) => self.for_stmt(stmt)?,
            Stmt::ReturnStmt(stmt) => {
                let return_type = self.frame.return_type.clone().unwrap_or_else(ValueType::none);
                if let Some(value) = &stmt.value {
                    self.expr(value)?;
                    if return_type.is_none() {
                        self.op("pop");
                    } else {
                        self.coerce(value.value_type(), &return_type);
                    }
                } else if !return_type.is_none() {
                    self.op("ldnull");
                }
                self.op("ret");
            }
        }
        Ok(())
    }

    fn assign(&mut self, target: &Expr, ty: &ValueType, tmp: &str) -> Result<(), EmitError> {
        let load = format!("ldloc {}", id(tmp));
        match &target.kind {
            ExprKind::Identifier {
                name,
                var_instance: Some(var),
            } => {
                let target_type = target.value_type().clone();
                self.store_var(*var, name, &target_type, |e| {
                    e.op(&load);
                    e.coerce(ty, &target_type);
                    Ok(())
                })?;
            }
            ExprKind::MemberExpr { object, member } => {
                self.expr(object)?;
                self.op(load);
                let field = self.field(object.value_type(), &member.name);
                let (_, attr_type) = self.attr(object.value_type(), &member.name);
                self.coerce(ty, &attr_type);
                self.op(format!("stfld {}", field));
            }
            ExprKind::IndexExpr { list, index } => {
                self.expr(list)?;
                self.expr(index)?;
                self.op("conv.ovf.i4");
                self.op(load);
                self.coerce(ty, &ValueType::object());
                self.op("stelem.ref");
            }
            _ => panic!("Internal compiler error: invalid assignment target"),
        }
        Ok(())
    }

    fn for_stmt(&mut self, stmt: &ForStmt) -> Result<(), EmitError> {
        let iterable_type = stmt.iterable.value_type().clone();
        let iterable = self.frame.temp(cil_type(&iterable_type));
        let index = self.frame.temp("int32".to_string());
        let head = self.label();
        let end = self.label();

        self.expr(&stmt.iterable)?;
        self.op(format!("stloc {}", id(&iterable)));
        self.op("ldc.i4.0");
        self.op(format!("stloc {}", id(&index)));
        self.mark(&head);
        self.op(format!("ldloc {}", id(&index)));
        self.op(format!("ldloc {}", id(&iterable)));
        if iterable_type.is_str() {
            self.op(format!("callvirt instance int32 {}::get_Length()", STRING));
        } else {
            self.op("ldlen");
            self.op("conv.i4");
        }
        self.op(format!("bge {}", end));

        let element = if iterable_type.is_str() {
            ValueType::str()
        } else {
            iterable_type.element_type().cloned().unwrap_or_else(ValueType::object)
        };
        let target_type = stmt
            .identifier
            .value_type()
            .cloned()
            .unwrap_or_else(|| element.clone());
        let var = stmt.identifier.var_instance.unwrap_or_else(|| {
            panic!("Internal compiler error: unbound loop variable {}", stmt.identifier.name)
        });
        let is_str = iterable_type.is_str();
        self.store_var(var, &stmt.identifier.name, &target_type, |e| {
            e.op(format!("ldloc {}", id(&iterable)));
            e.op(format!("ldloc {}", id(&index)));
            if is_str {
                e.op(format!("callvirt instance char {}::get_Chars(int32)", STRING));
                e.op("call string [mscorlib]System.Char::ToString(char)");
            } else {
                e.op("ldelem.ref");
                e.unbox(&element);
            }
            e.coerce(&element, &target_type);
            Ok(())
        })?;

        self.stmts(&stmt.body)?;
        self.op(format!("ldloc {}", id(&index)));
        self.op("ldc.i4.1");
        self.op("add");
        self.op(format!("stloc {}", id(&index)));
        self.op(format!("br {}", head));
        self.mark(&end);
        Ok(())
    }

    /// The class declaring attribute `name` of `ty`, and its type.
    fn attr(&self, ty: &ValueType, name: &str) -> (String, ValueType) {
        let class = ty.class_name().unwrap_or("object");
        self.ts
            .ancestors(class)
            .into_iter()
            .find_map(|c| {
                let info = self.ts.get_class(c)?;
                info.own_attrs()
                    .iter()
                    .find(|a| a.name == name)
                    .map(|a| (c.to_string(), a.value_type.clone()))
            })
            .unwrap_or_else(|| panic!("Internal compiler error: no attribute {}.{}", class, name))
    }

    fn field(&self, ty: &ValueType, name: &str) -> String {
        let (owner, attr_type) = self.attr(ty, name);
        format!("{} {}::{}", cil_type(&attr_type), id(&owner), id(name))
    }

    /// The `callvirt` operand of method `name` as seen from `ty`.
    fn method_ref(&self, class: &str, name: &str) -> (String, FuncType) {
        let owner = self
            .ts
            .get_method_def_class(class, name)
            .unwrap_or_else(|| panic!("Internal compiler error: no method {}.{}", class, name));
        let sig = self
            .ts
            .get_method(owner, name)
            .cloned()
            .unwrap_or_else(|| panic!("Internal compiler error: no method {}.{}", class, name));
        let params: Vec<String> = sig
            .params
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, ty)| param_type(&sig, i, ty))
            .collect();

        (
            format!(
                "instance {} {}::{}({})",
                return_type(&sig.return_type),
                id(owner),
                id(name),
                params.join(", ")
            ),
            sig,
        )
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), EmitError> {
        match &expr.kind {
            ExprKind::IntegerLiteral { value } => self.op(format!("ldc.i8 {}", value)),
            ExprKind::BooleanLiteral { value } => {
                self.op(if *value { "ldc.i4.1" } else { "ldc.i4.0" })
            }
            ExprKind::NoneLiteral => self.op("ldnull"),
            ExprKind::StringLiteral { value } => self.op(format!("ldstr {}", quote(value))),
            ExprKind::Identifier { name, var_instance } => {
                let var = var_instance.unwrap_or_else(|| {
                    panic!("Internal compiler error: unbound identifier {}", name)
                });
                self.load_var(var, name, expr.value_type());
            }
            ExprKind::ListExpr { elements, .. } => {
                self.op(format!("ldc.i4 {}", elements.len()));
                self.op("newarr [mscorlib]System.Object");
                for (i, element) in elements.iter().enumerate() {
                    self.op("dup");
                    self.op(format!("ldc.i4 {}", i));
                    self.expr(element)?;
                    self.coerce(element.value_type(), &ValueType::object());
                    self.op("stelem.ref");
                }
            }
            ExprKind::BinaryExpr {
                left,
                operator,
                right,
            } => self.binary(left, *operator, right)?,
            ExprKind::UnaryExpr { operator, operand } => {
                self.expr(operand)?;
                match operator {
                    UnaryOperator::Neg => self.op("neg"),
                    UnaryOperator::Not => {
                        self.op("ldc.i4.0");
                        self.op("ceq");
                    }
                }
            }
            ExprKind::IfExpr {
                condition,
                then_expr,
                else_expr,
            } => {
                let else_label = self.label();
                let end = self.label();
                let ty = expr.value_type();
                self.expr(condition)?;
                self.op(format!("brfalse {}", else_label));
                self.expr(then_expr)?;
                self.coerce(then_expr.value_type(), ty);
                self.op(format!("br {}", end));
                self.mark(&else_label);
                self.expr(else_expr)?;
                self.coerce(else_expr.value_type(), ty);
                self.mark(&end);
            }
            ExprKind::IndexExpr { list, index } => {
                let list_type = list.value_type();
                self.expr(list)?;
                self.expr(index)?;
                self.op("conv.ovf.i4");
                if list_type.is_str() {
                    self.op(format!("callvirt instance char {}::get_Chars(int32)", STRING));
                    self.op("call string [mscorlib]System.Char::ToString(char)");
                } else {
                    self.op("ldelem.ref");
                    self.unbox(expr.value_type());
                }
            }
            ExprKind::MemberExpr { object, member } => {
                self.expr(object)?;
                let field = self.field(object.value_type(), &member.name);
                self.op(format!("ldfld {}", field));
            }
            ExprKind::CallExpr {
                function,
                args,
                is_constructor,
                ..
            } => self.call(expr, function, args, *is_constructor)?,
            ExprKind::MethodCallExpr { method, args } => {
                let class = method.object.value_type().class_name().unwrap_or("object").to_string();
                let (callee, sig) = self.method_ref(&class, &method.member.name);
                self.expr(&method.object)?;
                if self.ts.get_method_def_class(&class, &method.member.name) == Some("object") {
                    self.op("pop");
                } else {
                    self.args(&sig, 1, args)?;
                    self.op(format!("callvirt {}", callee));
                }
                if sig.return_type.is_none() {
                    self.op("ldnull");
                }
            }
        }
        Ok(())
    }

    fn binary(&mut self, left: &Expr, operator: BinaryOperator, right: &Expr) -> Result<(), EmitError> {
        use BinaryOperator::*;

        if let And | Or = operator {
            let end = self.label();
            self.expr(left)?;
            self.op("dup");
            self.op(format!("{} {}", if operator == And { "brfalse" } else { "brtrue" }, end));
            self.op("pop");
            self.expr(right)?;
            self.mark(&end);
            return Ok(());
        }

        let left_type = left.value_type();
        self.expr(left)?;
        self.expr(right)?;
        match operator {
            Add if left_type.is_str() => {
                self.op("call string [mscorlib]System.String::Concat(string, string)")
            }
            Add if left_type.is_list_like() => self.op(format!(
                "call object[] {}::'.listconcat'(object[], object[])",
                MAIN
            )),
            Add => self.op("add"),
            Sub => self.op("sub"),
            Mul => self.op("mul"),
            FloorDiv => self.op(format!("call int64 {}::'.floordiv'(int64, int64)", MAIN)),
            Mod => self.op(format!("call int64 {}::'.floormod'(int64, int64)", MAIN)),
            Eq if left_type.is_str() => {
                self.op("call bool [mscorlib]System.String::op_Equality(string, string)")
            }
            Ne if left_type.is_str() => {
                self.op("call bool [mscorlib]System.String::op_Inequality(string, string)")
            }
            Eq | Is => self.op("ceq"),
            Ne => {
                self.op("ceq");
                self.op("ldc.i4.0");
                self.op("ceq");
            }
            Lt => self.op("clt"),
            Gt => self.op("cgt"),
            Le => {
                self.op("cgt");
                self.op("ldc.i4.0");
                self.op("ceq");
            }
            Ge => {
                self.op("clt");
                self.op("ldc.i4.0");
                self.op("ceq");
            }
            And | Or => unreachable!(),
        }
        Ok(())
    }

    fn call(
        &mut self,
        expr: &Expr,
        function: &Identifier,
        args: &[Expr],
        is_constructor: bool,
    ) -> Result<(), EmitError> {
        let sig = function.func_type().cloned().unwrap_or_else(|| {
            panic!("Internal compiler error: untyped callee {}", function.name)
        });

        if is_constructor {
            match function.name.as_str() {
                "int" => self.op("ldc.i8 0"),
                "bool" => self.op("ldc.i4.0"),
                "str" => self.op("ldstr \"\""),
                "object" => self.op("newobj instance void [mscorlib]System.Object::.ctor()"),
                class => {
                    self.op(format!("newobj instance void {}::.ctor()", id(class)));
                    if self.ts.get_method_def_class(class, "__init__") != Some("object") {
                        let (callee, init) = self.method_ref(class, "__init__");
                        self.op("dup");
                        self.args(&init, 1, args)?;
                        self.op(format!("callvirt {}", callee));
                    }
                }
            }
            return Ok(());
        }

        match function.name.as_str() {
            "print" => {
                let arg = &args[0];
                let ty = arg.value_type();
                let param = match ty.class_name() {
                    Some("int") => "int64",
                    Some("bool") => "bool",
                    Some("str") => "string",
                    _ => return Err(EmitError::UnsupportedPrint(ty.to_string())),
                };
                self.expr(arg)?;
                self.op(format!("call void {}::WriteLine({})", CONSOLE, param));
                self.op("ldnull");
            }
            "len" => {
                let ty = args[0].value_type();
                self.expr(&args[0])?;
                if ty.is_str() {
                    self.op(format!("callvirt instance int32 {}::get_Length()", STRING));
                } else if ty.is_list_like() {
                    self.op("ldlen");
                } else {
                    return Err(EmitError::Unsupported(format!("len of {}", ty), BACKEND));
                }
                self.op("conv.i8");
            }
            "input" => {
                let end = self.label();
                self.op(format!("call string {}::ReadLine()", CONSOLE));
                self.op("dup");
                self.op(format!("brtrue {}", end));
                self.op("pop");
                self.op("ldstr \"\"");
                self.mark(&end);
            }
            "__assert__" => {
                let ok = self.label();
                self.expr(&args[0])?;
                self.op(format!("brtrue {}", ok));
                self.op(format!(
                    "ldstr \"Assertion failed on line {}\"",
                    expr.location.start.line
                ));
                self.op("newobj instance void [mscorlib]System.Exception::.ctor(string)");
                self.op("throw");
                self.mark(&ok);
                self.op("ldnull");
            }
            name => {
                self.args(&sig, 0, args)?;
                let params: Vec<String> = sig
                    .params
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| param_type(&sig, i, ty))
                    .collect();
                self.op(format!(
                    "call {} {}::{}({})",
                    return_type(&sig.return_type),
                    MAIN,
                    id(name),
                    params.join(", ")
                ));
                if sig.return_type.is_none() {
                    self.op("ldnull");
                }
            }
        }
        Ok(())
    }

    fn args(&mut self, sig: &FuncType, offset: usize, args: &[Expr]) -> Result<(), EmitError> {
        for (i, arg) in args.iter().enumerate() {
            let index = i + offset;
            let param_type = sig.params.get(index).cloned().unwrap_or_else(|| {
                panic!("Internal compiler error: too many arguments")
            });

            match (sig.ref_params.get(&index), &arg.kind) {
                (Some(&cell), ExprKind::Identifier { name, .. })
                    if passes_own_cell(self.instances, cell, arg) =>
                {
                    self.load_cell(cell, name);
                }
                (Some(_), _) => {
                    self.new_cell(&param_type, |e| {
                        e.expr(arg)?;
                        e.coerce(arg.value_type(), &param_type);
                        Ok(())
                    })?;
                }
                (None, _) => {
                    self.expr(arg)?;
                    self.coerce(arg.value_type(), &param_type);
                }
            }
        }
        Ok(())
    }
}

/// Method bodies are written one level in so labels can sit flush left.
fn body() -> CodeBuilder {
    let mut code = CodeBuilder::new("    ");
    code.indent();
    code
}

fn param_type(sig: &FuncType, index: usize, ty: &ValueType) -> String {
    if sig.is_ref_param(index) {
        format!("{}[]", cil_type(ty))
    } else {
        cil_type(ty)
    }
}

const HELPERS: &str = "\
.method public static int64 '.floordiv'(int64 a, int64 b) cil managed
{
    .maxstack 4
    .locals init (int64 q)
    ldarg.0
    ldarg.1
    div
    stloc.0
    ldarg.0
    ldarg.1
    rem
    brfalse DONE
    ldarg.0
    ldc.i8 0
    clt
    ldarg.1
    ldc.i8 0
    clt
    beq DONE
    ldloc.0
    ldc.i8 1
    sub
    stloc.0
DONE:
    ldloc.0
    ret
}

.method public static int64 '.floormod'(int64 a, int64 b) cil managed
{
    .maxstack 4
    .locals init (int64 r)
    ldarg.0
    ldarg.1
    rem
    stloc.0
    ldloc.0
    brfalse DONE
    ldloc.0
    ldc.i8 0
    clt
    ldarg.1
    ldc.i8 0
    clt
    beq DONE
    ldloc.0
    ldarg.1
    add
    stloc.0
DONE:
    ldloc.0
    ret
}

.method public static object[] '.listconcat'(object[] a, object[] b) cil managed
{
    .maxstack 4
    .locals init (object[] r)
    ldarg.0
    ldlen
    ldarg.1
    ldlen
    add
    newarr [mscorlib]System.Object
    stloc.0
    ldarg.0
    ldloc.0
    ldc.i4.0
    callvirt instance void [mscorlib]System.Array::CopyTo(class [mscorlib]System.Array, int32)
    ldarg.1
    ldloc.0
    ldarg.0
    ldlen
    conv.i4
    callvirt instance void [mscorlib]System.Array::CopyTo(class [mscorlib]System.Array, int32)
    ldloc.0
    ret
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::pipeline;
    use assert_matches::assert_matches;

    fn cil(src: &str) -> Result<String, EmitError> {
        let (program, ts) = pipeline::lower(src).unwrap();
        emit(&program, &ts, "test").map(|artifact| artifact.contents)
    }

    #[test]
    fn assembly_shell() {
        let out = cil("x: int = 1\nprint(x)\n").unwrap();

        assert!(out.starts_with(".assembly extern mscorlib {}\n.assembly 'test' {}\n"));
        assert!(out.contains(".field public static int64 'x'\n"));
        assert!(out.contains("ldc.i8 1\n        stsfld int64 'Main'::'x'\n"));
        assert!(out.contains("call void [mscorlib]System.Console::WriteLine(int64)\n"));
        assert!(out.contains(".entrypoint"));
    }

    #[test]
    fn classes_fields_and_dispatch() {
        let src = "
class A(object):
    n: int = 3
    def get(self: \"A\") -> int:
        return self.n
class B(A):
    def __init__(self: \"B\"):
        self.n = 4
a: A = None
a = B()
print(a.get())
";
        let out = cil(src).unwrap();

        assert!(out.contains(".class public auto ansi beforefieldinit 'B' extends 'A'\n"));
        assert!(out.contains("stfld int64 'A'::'n'"));
        assert!(out.contains(".method public hidebysig virtual instance int64 'get'() cil managed"));
        assert!(out.contains("newobj instance void 'B'::.ctor()\n        dup\n        callvirt instance void 'B'::'__init__'()"));
        assert!(out.contains("callvirt instance int64 'A'::'get'()"));
    }

    #[test]
    fn nonlocal_variables_live_in_arrays() {
        let src = "
def outer() -> int:
    a: int = 1
    def inner():
        nonlocal a
        a = 2
    inner()
    return a
print(outer())
";
        let out = cil(src).unwrap();

        assert!(out.contains(".locals init (int64[] 'a'"));
        assert!(out.contains(".method public static void 'outer.inner'(int64[] 'a') cil managed"));
        assert!(out.contains("ldloc 'a'\n        call void 'Main'::'outer.inner'(int64[])"));
        assert!(out.contains("ldelem int64"));
    }

    #[test]
    fn list_elements_are_boxed() {
        let out = cil("x: [int] = None\nx = [1, 2]\nprint(x[1] + len(x))\n").unwrap();

        assert!(out.contains("newarr [mscorlib]System.Object"));
        assert!(out.contains("box int64"));
        assert!(out.contains("ldelem.ref\n        unbox.any int64"));
        assert!(out.contains("ldlen\n        conv.i8"));
    }

    #[test]
    fn printing_objects_is_rejected() {
        assert_matches!(
            cil("class A(object):\n    pass\nprint(A())\n"),
            Err(EmitError::UnsupportedPrint(ty)) if ty == "A"
        );
    }
}
