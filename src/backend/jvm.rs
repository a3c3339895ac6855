//! JVM assembly in the syntax of the Krakatau assembler, one `.j` file per class.
//!
//! Integers are `long`, booleans `boolean`, strings `java/lang/String`. Lists are object
//! arrays holding boxed `Long` and `Boolean` values. Variables captured with `nonlocal`
//! live in one element arrays of their own type.
//!
//! Class files are version 49 so the verifier infers stack frames itself.
use super::{mangle, passes_own_cell, quote, Artifact, CodeBuilder};
use crate::asm::EmitError;
use crate::sem::{FuncType, TypeSystem, ValueType};
use crate::syntax::*;
use log::{debug, trace};
use std::collections::HashMap;
use std::mem;

const BACKEND: &str = "JVM";
const OBJECT: &str = "java/lang/Object";
const STRING: &str = "java/lang/String";
const LIST: &str = "[Ljava/lang/Object;";
const MAX_STACK: u16 = 255;

pub fn emit(program: &Program, ts: &TypeSystem, main_class: &str) -> Result<Vec<Artifact>, EmitError> {
    let mut emitter = JvmEmitter::new(ts, &program.instances, main_class);
    let mut artifacts = vec![];

    for class in program.class_defs() {
        if class.name.name == main_class {
            return Err(EmitError::Unsupported(
                format!("A class named {}", main_class),
                BACKEND,
            ));
        }
        let contents = emitter.class(class)?;
        artifacts.push(Artifact::new(format!("{}.j", class.name.name), contents));
    }
    let contents = emitter.main_class(program)?;
    artifacts.push(Artifact::new(format!("{}.j", main_class), contents));

    debug!("emitted {} JVM classes", artifacts.len());
    Ok(artifacts)
}

/// How a value sits in a local slot or on the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Long,
    Int,
    Ref,
}

impl Kind {
    fn of(ty: &ValueType) -> Self {
        if ty.is_int() {
            Kind::Long
        } else if ty.is_bool() {
            Kind::Int
        } else {
            Kind::Ref
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Kind::Long => "l",
            Kind::Int => "i",
            Kind::Ref => "a",
        }
    }

    fn width(self) -> u16 {
        if self == Kind::Long {
            2
        } else {
            1
        }
    }

    /// Load and store opcodes of a one element cell array.
    fn array_prefix(self) -> &'static str {
        match self {
            Kind::Long => "la",
            Kind::Int => "ba",
            Kind::Ref => "aa",
        }
    }
}

/// The class or array name used by `checkcast`, `anewarray` and member references.
fn internal_name(ty: &ValueType) -> String {
    match ty {
        ValueType::List(_) => LIST.to_string(),
        ValueType::Class(name) => match name.as_str() {
            "str" => STRING.to_string(),
            "object" | "<None>" | "<Empty>" => OBJECT.to_string(),
            "int" => "java/lang/Long".to_string(),
            "bool" => "java/lang/Boolean".to_string(),
            class => class.to_string(),
        },
    }
}

fn descriptor(ty: &ValueType) -> String {
    match Kind::of(ty) {
        Kind::Long => "J".to_string(),
        Kind::Int => "Z".to_string(),
        Kind::Ref if ty.is_list() => LIST.to_string(),
        Kind::Ref => format!("L{};", internal_name(ty)),
    }
}

fn method_descriptor(sig: &FuncType, skip: usize) -> String {
    let params: String = sig
        .params
        .iter()
        .enumerate()
        .skip(skip)
        .map(|(i, ty)| {
            if sig.is_ref_param(i) {
                format!("[{}", descriptor(ty))
            } else {
                descriptor(ty)
            }
        })
        .collect();
    let result = if sig.return_type.is_none() {
        "V".to_string()
    } else {
        descriptor(&sig.return_type)
    };
    format!("({}){}", params, result)
}

#[derive(Debug, Default)]
struct Frame {
    slots: HashMap<VarId, u16>,
    next: u16,
    return_type: Option<ValueType>,
}

impl Frame {
    fn allocate(&mut self, kind: Kind) -> u16 {
        let slot = self.next;
        self.next += kind.width();
        slot
    }
}

struct JvmEmitter<'a> {
    ts: &'a TypeSystem,
    instances: &'a VarInstances,
    main: &'a str,
    code: CodeBuilder,
    frame: Frame,
    labels: usize,
}

impl<'a> JvmEmitter<'a> {
    fn new(ts: &'a TypeSystem, instances: &'a VarInstances, main: &'a str) -> Self {
        Self {
            ts,
            instances,
            main,
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

    fn is_boxed(&self, var: VarId) -> bool {
        self.instances.get(var).is_nonlocal
    }

    /// Wraps the body written so far into a `.method` block.
    fn finish_method(&mut self, header: String) -> String {
        let body = mem::replace(&mut self.code, self::body()).finish();
        let mut out = CodeBuilder::new("    ");

        out.line(header)
            .indent()
            .line(format!(".code stack {} locals {}", MAX_STACK, self.frame.next.max(1)))
            .dedent()
            .append(&body)
            .indent()
            .line(".end code")
            .dedent()
            .line(".end method");
        out.finish()
    }

    fn class(&mut self, class: &ClassDef) -> Result<String, EmitError> {
        let name = &class.name.name;
        let parent = match class.superclass.name.as_str() {
            "object" => OBJECT,
            parent => parent,
        };
        let mut out = CodeBuilder::new("    ");

        out.line(".version 49 0")
            .line(format!(".class public super {}", name))
            .line(format!(".super {}", parent));
        for attr in class.attributes() {
            out.line(format!(
                ".field public {} {}",
                attr.var.name(),
                descriptor(attr.var.value_type())
            ));
        }

        self.frame = Frame::default();
        self.frame.allocate(Kind::Ref);
        self.op("aload_0");
        self.op(format!("invokespecial Method {} <init> ()V", parent));
        for attr in class.attributes() {
            self.op("aload_0");
            self.expr(&attr.value)?;
            self.coerce(attr.value.value_type(), attr.var.value_type());
            self.op(format!(
                "putfield Field {} {} {}",
                name,
                attr.var.name(),
                descriptor(attr.var.value_type())
            ));
        }
        self.op("return");
        let init = self.finish_method(".method public <init> : ()V".to_string());
        out.blank().append(&init);

        for method in class.methods() {
            let text = self.method(&method.name.name, method, true)?;
            out.blank().append(&text);
        }
        out.line(".end class");
        Ok(out.finish())
    }

    fn main_class(&mut self, program: &Program) -> Result<String, EmitError> {
        let mut out = CodeBuilder::new("    ");

        out.line(".version 49 0")
            .line(format!(".class public super {}", self.main))
            .line(format!(".super {}", OBJECT));
        for def in program.var_defs() {
            out.line(format!(
                ".field public static {} {}",
                def.var.name(),
                descriptor(def.var.value_type())
            ));
        }
        for func in program.func_defs() {
            let text = self.method(&mangle(&func.name.name), func, false)?;
            out.blank().append(&text);
        }

        self.frame = Frame::default();
        self.frame.allocate(Kind::Ref);
        for def in program.var_defs() {
            self.expr(&def.value)?;
            self.coerce(def.value.value_type(), def.var.value_type());
            self.op(format!(
                "putstatic Field {} {} {}",
                self.main,
                def.var.name(),
                descriptor(def.var.value_type())
            ));
        }
        self.stmts(&program.statements)?;
        self.op("return");
        let main = self.finish_method(".method public static main : ([Ljava/lang/String;)V".to_string());
        out.blank().append(&main).blank().append(HELPERS).line(".end class");
        Ok(out.finish())
    }

    fn method(&mut self, name: &str, func: &FuncDef, is_method: bool) -> Result<String, EmitError> {
        trace!("emit method {}", name);
        let sig = func.signature().clone();
        self.frame = Frame {
            return_type: Some(sig.return_type.clone()),
            ..Frame::default()
        };

        let mut cells = vec![];
        for (i, param) in func.params.iter().enumerate() {
            let var = param.instance();
            let kind = if func.ref_params.contains_key(&i) {
                Kind::Ref
            } else {
                Kind::of(param.value_type())
            };
            let slot = self.frame.allocate(kind);
            self.frame.slots.insert(var, slot);

            if !func.ref_params.contains_key(&i) && self.is_boxed(var) && !(is_method && i == 0) {
                cells.push((var, slot, param.value_type().clone()));
            }
        }
        // Boxed parameters that are not passed by reference get a fresh cell.
        for (var, arg, ty) in cells {
            let cell = self.frame.allocate(Kind::Ref);
            self.new_cell(&ty, |e| {
                e.op(format!("{}load {}", Kind::of(&ty).prefix(), arg));
                Ok(())
            })?;
            self.op(format!("astore {}", cell));
            self.frame.slots.insert(var, cell);
        }

        for def in func.var_defs() {
            let ty = def.var.value_type();
            let var = def.var.instance();
            if self.is_boxed(var) {
                let slot = self.frame.allocate(Kind::Ref);
                self.new_cell(ty, |e| {
                    e.expr(&def.value)?;
                    e.coerce(def.value.value_type(), ty);
                    Ok(())
                })?;
                self.op(format!("astore {}", slot));
                self.frame.slots.insert(var, slot);
            } else {
                let kind = Kind::of(ty);
                let slot = self.frame.allocate(kind);
                self.expr(&def.value)?;
                self.coerce(def.value.value_type(), ty);
                self.op(format!("{}store {}", kind.prefix(), slot));
                self.frame.slots.insert(var, slot);
            }
        }

        self.stmts(&func.statements)?;
        self.default_return(&sig.return_type);

        let (modifiers, skip) = if is_method {
            ("public", 1)
        } else {
            ("public static", 0)
        };
        Ok(self.finish_method(format!(
            ".method {} {} : {}",
            modifiers,
            name,
            method_descriptor(&sig, skip)
        )))
    }

    fn default_return(&mut self, ty: &ValueType) {
        if ty.is_none() {
            self.op("return");
            return;
        }
        match Kind::of(ty) {
            Kind::Long => self.op("lconst_0"),
            Kind::Int => self.op("iconst_0"),
            Kind::Ref => self.op("aconst_null"),
        }
        self.op(format!("{}return", Kind::of(ty).prefix()));
    }

    /// Pushes a one element array holding the value pushed by `value`.
    fn new_cell<F>(&mut self, ty: &ValueType, value: F) -> Result<(), EmitError>
    where
        F: FnOnce(&mut Self) -> Result<(), EmitError>,
    {
        let kind = Kind::of(ty);
        self.op("iconst_1");
        match kind {
            Kind::Long => self.op("newarray long"),
            Kind::Int => self.op("newarray boolean"),
            Kind::Ref => self.op(format!("anewarray {}", internal_name(ty))),
        }
        self.op("dup");
        self.op("iconst_0");
        value(self)?;
        self.op(format!("{}store", kind.array_prefix()));
        Ok(())
    }

    fn coerce(&mut self, from: &ValueType, to: &ValueType) {
        if Kind::of(from) != Kind::Ref && Kind::of(to) == Kind::Ref {
            self.op(format!(
                "invokestatic Method {} valueOf ({}){}",
                internal_name(from),
                descriptor(from),
                descriptor(&ValueType::class(internal_name(from)))
            ));
        }
    }

    /// Converts an `Object` list element to `ty`.
    fn unbox(&mut self, ty: &ValueType) {
        match Kind::of(ty) {
            Kind::Long => {
                self.op("checkcast java/lang/Long");
                self.op("invokevirtual Method java/lang/Long longValue ()J");
            }
            Kind::Int => {
                self.op("checkcast java/lang/Boolean");
                self.op("invokevirtual Method java/lang/Boolean booleanValue ()Z");
            }
            Kind::Ref if ty.is_class("object") || ty.is_none() || ty.is_empty() => {}
            Kind::Ref => self.op(format!("checkcast {}", internal_name(ty))),
        }
    }

    fn pop(&mut self, ty: &ValueType) {
        self.op(if Kind::of(ty) == Kind::Long { "pop2" } else { "pop" });
    }

    fn slot(&self, var: VarId, name: &str) -> u16 {
        *self.frame.slots.get(&var).unwrap_or_else(|| {
            panic!("Internal compiler error: unbound variable {}", name)
        })
    }

    fn load_var(&mut self, var: VarId, name: &str, ty: &ValueType) {
        let kind = Kind::of(ty);
        if self.instances.get(var).is_global {
            self.op(format!("getstatic Field {} {} {}", self.main, name, descriptor(ty)));
        } else if self.is_boxed(var) {
            let slot = self.slot(var, name);
            self.op(format!("aload {}", slot));
            self.op("iconst_0");
            self.op(format!("{}load", kind.array_prefix()));
        } else {
            let slot = self.slot(var, name);
            self.op(format!("{}load {}", kind.prefix(), slot));
        }
    }

    fn store_var<F>(&mut self, var: VarId, name: &str, ty: &ValueType, value: F) -> Result<(), EmitError>
    where
        F: FnOnce(&mut Self) -> Result<(), EmitError>,
    {
        let kind = Kind::of(ty);
        if self.instances.get(var).is_global {
            value(self)?;
            self.op(format!("putstatic Field {} {} {}", self.main, name, descriptor(ty)));
        } else if self.is_boxed(var) {
            let slot = self.slot(var, name);
            self.op(format!("aload {}", slot));
            self.op("iconst_0");
            value(self)?;
            self.op(format!("{}store", kind.array_prefix()));
        } else {
            let slot = self.slot(var, name);
            value(self)?;
            self.op(format!("{}store {}", kind.prefix(), slot));
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
                self.pop(stmt.expr.value_type());
            }
            Stmt::AssignStmt(stmt) => {
                let ty = stmt.value.value_type();
                let kind = Kind::of(ty);
                let tmp = self.frame.allocate(kind);
                self.expr(&stmt.value)?;
                self.op(format!("{}store {}", kind.prefix(), tmp));
                for target in &stmt.targets {
                    self.assign(target, ty, tmp)?;
                }
            }
            Stmt::IfStmt(stmt) => {
                let else_label = self.label();
                let end = self.label();
                self.expr(&stmt.condition)?;
                self.op(format!("ifeq {}", else_label));
                self.stmts(&stmt.then_body)?;
                self.op(format!("goto {}", end));
                self.mark(&else_label);
                self.stmts(&stmt.else_body)?;
                self.mark(&end);
            }
            Stmt::WhileStmt(stmt) => {
                let head = self.label();
                let end = self.label();
                self.mark(&head);
                self.expr(&stmt.condition)?;
                self.op(format!("ifeq {}", end));
                self.stmts(&stmt.body)?;
                self.op(format!("goto {}", head));
                self.mark(&end);
            }
            Stmt::ForStmt(stmt) => self.for_stmt(stmt)?,
            Stmt::ReturnStmt(stmt) => {
                let ret = self.frame.return_type.clone().unwrap_or_else(ValueType::none);
                match &stmt.value {
                    Some(value) if ret.is_none() => {
                        self.expr(value)?;
                        self.pop(value.value_type());
                        self.op("return");
                    }
                    Some(value) => {
                        self.expr(value)?;
                        self.coerce(value.value_type(), &ret);
                        self.op(format!("{}return", Kind::of(&ret).prefix()));
                    }
                    None => self.default_return(&ret),
                }
            }
        }
        Ok(())
    }

    fn assign(&mut self, target: &Expr, ty: &ValueType, tmp: u16) -> Result<(), EmitError> {
        let load = format!("{}load {}", Kind::of(ty).prefix(), tmp);
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
                let (field, attr_type) = self.field(object.value_type(), &member.name);
                self.coerce(ty, &attr_type);
                self.op(format!("putfield {}", field));
            }
            ExprKind::IndexExpr { list, index } => {
                self.expr(list)?;
                self.expr(index)?;
                self.op("l2i");
                self.op(load);
                self.coerce(ty, &ValueType::object());
                self.op("aastore");
            }
            _ => panic!("Internal compiler error: invalid assignment target"),
        }
        Ok(())
    }

    fn for_stmt(&mut self, stmt: &ForStmt) -> Result<(), EmitError> {
        let iterable_type = stmt.iterable.value_type().clone();
        let is_str = iterable_type.is_str();
        let iterable = self.frame.allocate(Kind::Ref);
        let index = self.frame.allocate(Kind::Int);
        let head = self.label();
        let end = self.label();

        self.expr(&stmt.iterable)?;
        self.op(format!("astore {}", iterable));
        self.op("iconst_0");
        self.op(format!("istore {}", index));
        self.mark(&head);
        self.op(format!("iload {}", index));
        self.op(format!("aload {}", iterable));
        if is_str {
            self.op("invokevirtual Method java/lang/String length ()I");
        } else {
            self.op("arraylength");
        }
        self.op(format!("if_icmpge {}", end));

        let element = if is_str {
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
        self.store_var(var, &stmt.identifier.name, &target_type, |e| {
            e.op(format!("aload {}", iterable));
            e.op(format!("iload {}", index));
            if is_str {
                e.char_at();
            } else {
                e.op("aaload");
                e.unbox(&element);
            }
            e.coerce(&element, &target_type);
            Ok(())
        })?;

        self.stmts(&stmt.body)?;
        self.op(format!("iinc {} 1", index));
        self.op(format!("goto {}", head));
        self.mark(&end);
        Ok(())
    }

    fn char_at(&mut self) {
        self.op("invokevirtual Method java/lang/String charAt (I)C");
        self.op("invokestatic Method java/lang/String valueOf (C)Ljava/lang/String;");
    }

    /// Field reference of attribute `name` of `ty`, and the attribute type.
    fn field(&self, ty: &ValueType, name: &str) -> (String, ValueType) {
        let class = ty.class_name().unwrap_or("object");
        let (owner, attr_type) = self
            .ts
            .ancestors(class)
            .into_iter()
            .find_map(|c| {
                let info = self.ts.get_class(c)?;
                info.own_attrs()
                    .iter()
                    .find(|a| a.name == name)
                    .map(|a| (c.to_string(), a.value_type.clone()))
            })
            .unwrap_or_else(|| panic!("Internal compiler error: no attribute {}.{}", class, name));

        (
            format!("Field {} {} {}", owner, name, descriptor(&attr_type)),
            attr_type,
        )
    }

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

        (
            format!("Method {} {} {}", owner, name, method_descriptor(&sig, 1)),
            sig,
        )
    }

    /// Turns the comparison branch `jump` into a `boolean` on the stack.
    fn compare(&mut self, jump: &str) {
        let yes = self.label();
        let end = self.label();
        self.op(format!("{} {}", jump, yes));
        self.op("iconst_0");
        self.op(format!("goto {}", end));
        self.mark(&yes);
        self.op("iconst_1");
        self.mark(&end);
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), EmitError> {
        match &expr.kind {
            ExprKind::IntegerLiteral { value } => self.op(format!("ldc2_w {}L", value)),
            ExprKind::BooleanLiteral { value } => {
                self.op(if *value { "iconst_1" } else { "iconst_0" })
            }
            ExprKind::NoneLiteral => self.op("aconst_null"),
            ExprKind::StringLiteral { value } => self.op(format!("ldc {}", quote(value))),
            ExprKind::Identifier { name, var_instance } => {
                let var = var_instance.unwrap_or_else(|| {
                    panic!("Internal compiler error: unbound identifier {}", name)
                });
                self.load_var(var, name, expr.value_type());
            }
            ExprKind::ListExpr { elements, .. } => {
                self.op(format!("ldc {}", elements.len()));
                self.op(format!("anewarray {}", OBJECT));
                for (i, element) in elements.iter().enumerate() {
                    self.op("dup");
                    self.op(format!("ldc {}", i));
                    self.expr(element)?;
                    self.coerce(element.value_type(), &ValueType::object());
                    self.op("aastore");
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
                    UnaryOperator::Neg => self.op("lneg"),
                    UnaryOperator::Not => {
                        self.op("iconst_1");
                        self.op("ixor");
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
                self.op(format!("ifeq {}", else_label));
                self.expr(then_expr)?;
                self.coerce(then_expr.value_type(), ty);
                self.op(format!("goto {}", end));
                self.mark(&else_label);
                self.expr(else_expr)?;
                self.coerce(else_expr.value_type(), ty);
                self.mark(&end);
            }
            ExprKind::IndexExpr { list, index } => {
                let is_str = list.value_type().is_str();
                self.expr(list)?;
                self.expr(index)?;
                self.op("l2i");
                if is_str {
                    self.char_at();
                } else {
                    self.op("aaload");
                    self.unbox(expr.value_type());
                }
            }
            ExprKind::MemberExpr { object, member } => {
                self.expr(object)?;
                let (field, _) = self.field(object.value_type(), &member.name);
                self.op(format!("getfield {}", field));
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
                    self.op(format!("invokevirtual {}", callee));
                }
                if sig.return_type.is_none() {
                    self.op("aconst_null");
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
            self.op(format!("{} {}", if operator == And { "ifeq" } else { "ifne" }, end));
            self.op("pop");
            self.expr(right)?;
            self.mark(&end);
            return Ok(());
        }

        let ty = left.value_type();
        let kind = Kind::of(ty);
        self.expr(left)?;
        self.expr(right)?;
        match operator {
            Add if ty.is_str() => self.op(
                "invokevirtual Method java/lang/String concat (Ljava/lang/String;)Ljava/lang/String;",
            ),
            Add if ty.is_list_like() => self.op(format!(
                "invokestatic Method {} $listconcat ({1}{1}){1}",
                self.main, LIST
            )),
            Add => self.op("ladd"),
            Sub => self.op("lsub"),
            Mul => self.op("lmul"),
            FloorDiv => self.op("invokestatic Method java/lang/Math floorDiv (JJ)J"),
            Mod => self.op("invokestatic Method java/lang/Math floorMod (JJ)J"),
            Eq | Ne if ty.is_str() => {
                self.op("invokevirtual Method java/lang/String equals (Ljava/lang/Object;)Z");
                if operator == Ne {
                    self.op("iconst_1");
                    self.op("ixor");
                }
            }
            Eq | Ne | Lt | Le | Gt | Ge if kind == Kind::Long => {
                self.op("lcmp");
                self.compare(match operator {
                    Eq => "ifeq",
                    Ne => "ifne",
                    Lt => "iflt",
                    Le => "ifle",
                    Gt => "ifgt",
                    _ => "ifge",
                });
            }
            Eq if kind == Kind::Int => self.compare("if_icmpeq"),
            Ne if kind == Kind::Int => self.compare("if_icmpne"),
            Is | Eq => self.compare("if_acmpeq"),
            Ne => self.compare("if_acmpne"),
            Lt | Le | Gt | Ge | And | Or => {
                return Err(EmitError::Unsupported(
                    format!("Operator {} on {}", operator, ty),
                    BACKEND,
                ))
            }
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
                "int" => self.op("lconst_0"),
                "bool" => self.op("iconst_0"),
                "str" => self.op("ldc \"\""),
                "object" => {
                    self.op(format!("new {}", OBJECT));
                    self.op("dup");
                    self.op(format!("invokespecial Method {} <init> ()V", OBJECT));
                }
                class => {
                    self.op(format!("new {}", class));
                    self.op("dup");
                    self.op(format!("invokespecial Method {} <init> ()V", class));
                    if self.ts.get_method_def_class(class, "__init__") != Some("object") {
                        let (callee, init) = self.method_ref(class, "__init__");
                        self.op("dup");
                        self.args(&init, 1, args)?;
                        self.op(format!("invokevirtual {}", callee));
                    }
                }
            }
            return Ok(());
        }

        match function.name.as_str() {
            "print" => {
                let arg = &args[0];
                let ty = arg.value_type();
                self.op("getstatic Field java/lang/System out Ljava/io/PrintStream;");
                self.expr(arg)?;
                match ty.class_name() {
                    Some("int") => self.op("invokevirtual Method java/io/PrintStream println (J)V"),
                    Some("bool") => {
                        let no = self.label();
                        let end = self.label();
                        self.op(format!("ifeq {}", no));
                        self.op("ldc \"True\"");
                        self.op(format!("goto {}", end));
                        self.mark(&no);
                        self.op("ldc \"False\"");
                        self.mark(&end);
                        self.op("invokevirtual Method java/io/PrintStream println (Ljava/lang/String;)V");
                    }
                    Some("str") => {
                        self.op("invokevirtual Method java/io/PrintStream println (Ljava/lang/String;)V")
                    }
                    _ => return Err(EmitError::UnsupportedPrint(ty.to_string())),
                }
                self.op("aconst_null");
            }
            "len" => {
                let ty = args[0].value_type();
                self.expr(&args[0])?;
                if ty.is_str() {
                    self.op("invokevirtual Method java/lang/String length ()I");
                } else if ty.is_list_like() {
                    self.op("arraylength");
                } else {
                    return Err(EmitError::Unsupported(format!("len of {}", ty), BACKEND));
                }
                self.op("i2l");
            }
            "input" => self.op(format!(
                "invokestatic Method {} $input ()Ljava/lang/String;",
                self.main
            )),
            "__assert__" => {
                let ok = self.label();
                self.expr(&args[0])?;
                self.op(format!("ifne {}", ok));
                self.op("new java/lang/RuntimeException");
                self.op("dup");
                self.op(format!("ldc \"Assertion failed on line {}\"", expr.location.start.line));
                self.op("invokespecial Method java/lang/RuntimeException <init> (Ljava/lang/String;)V");
                self.op("athrow");
                self.mark(&ok);
                self.op("aconst_null");
            }
            name => {
                self.args(&sig, 0, args)?;
                self.op(format!(
                    "invokestatic Method {} {} {}",
                    self.main,
                    mangle(name),
                    method_descriptor(&sig, 0)
                ));
                if sig.return_type.is_none() {
                    self.op("aconst_null");
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
                    let slot = self.slot(cell, name);
                    self.op(format!("aload {}", slot));
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

/// Instructions sit two levels in, labels one.
fn body() -> CodeBuilder {
    let mut code = CodeBuilder::new("    ");
    code.indent().indent();
    code
}

const HELPERS: &str = "\
.method public static $listconcat : ([Ljava/lang/Object;[Ljava/lang/Object;)[Ljava/lang/Object;
    .code stack 5 locals 3
        aload_0
        arraylength
        aload_1
        arraylength
        iadd
        anewarray java/lang/Object
        astore_2
        aload_0
        iconst_0
        aload_2
        iconst_0
        aload_0
        arraylength
        invokestatic Method java/lang/System arraycopy (Ljava/lang/Object;ILjava/lang/Object;II)V
        aload_1
        iconst_0
        aload_2
        aload_0
        arraylength
        aload_1
        arraylength
        invokestatic Method java/lang/System arraycopy (Ljava/lang/Object;ILjava/lang/Object;II)V
        aload_2
        areturn
    .end code
.end method

.method public static $input : ()Ljava/lang/String;
    .code stack 5 locals 0
        new java/io/BufferedReader
        dup
        new java/io/InputStreamReader
        dup
        getstatic Field java/lang/System in Ljava/io/InputStream;
        invokespecial Method java/io/InputStreamReader <init> (Ljava/io/InputStream;)V
        invokespecial Method java/io/BufferedReader <init> (Ljava/io/Reader;)V
        invokevirtual Method java/io/BufferedReader readLine ()Ljava/lang/String;
        dup
        ifnonnull DONE
        pop
        ldc \"\"
DONE:
        areturn
    .end code
.end method
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::pipeline;
    use assert_matches::assert_matches;

    fn jvm(src: &str) -> Result<Vec<Artifact>, EmitError> {
        let (program, ts) = pipeline::lower(src).unwrap();
        emit(&program, &ts, "Main")
    }

    fn main_class(src: &str) -> String {
        let artifacts = jvm(src).unwrap();
        artifacts.last().unwrap().contents.clone()
    }

    #[test]
    fn one_file_per_class() {
        let artifacts = jvm("class A(object):\n    x: int = 1\nclass B(A):\n    pass\nprint(B().x)\n").unwrap();
        let names: Vec<&str> = artifacts.iter().map(|a| a.file_name.as_str()).collect();

        assert_eq!(names, vec!["A.j", "B.j", "Main.j"]);
        assert!(artifacts[0].contents.starts_with(".version 49 0\n.class public super A\n.super java/lang/Object\n.field public x J\n"));
        assert!(artifacts[1].contents.contains(".super A\n"));
        assert!(artifacts[1].contents.contains("invokespecial Method A <init> ()V"));
        assert!(artifacts[2].contents.contains("getfield Field A x J"));
    }

    #[test]
    fn integer_arithmetic_is_long() {
        let out = main_class("x: int = 7\nx = x // 2 + x % 3\nprint(x < 4)\n");

        assert!(out.contains(".field public static x J"));
        assert!(out.contains("invokestatic Method java/lang/Math floorDiv (JJ)J"));
        assert!(out.contains("invokestatic Method java/lang/Math floorMod (JJ)J"));
        assert!(out.contains("ladd"));
        assert!(out.contains("lcmp\n        iflt L"));
        assert!(out.contains("ldc \"True\""));
    }

    #[test]
    fn hoisted_functions_take_cells() {
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
        let out = main_class(src);

        assert!(out.contains(".method public static outer__inner : ([J)V"));
        assert!(out.contains("newarray long"));
        assert!(out.contains("invokestatic Method Main outer__inner ([J)V"));
        assert!(out.contains("laload"));
        assert!(out.contains("lastore"));
    }

    #[test]
    fn list_helpers() {
        let out = main_class("x: [int] = None\nx = [1] + [2]\nprint(x[0])\n");

        assert!(out.contains("invokestatic Method java/lang/Long valueOf (J)Ljava/lang/Long;"));
        assert!(out.contains(
            "invokestatic Method Main $listconcat ([Ljava/lang/Object;[Ljava/lang/Object;)[Ljava/lang/Object;"
        ));
        assert!(out.contains("aaload\n        checkcast java/lang/Long\n        invokevirtual Method java/lang/Long longValue ()J"));
    }

    #[test]
    fn main_class_name_is_reserved() {
        assert_matches!(
            jvm("class Main(object):\n    pass\n"),
            Err(EmitError::Unsupported(_, "JVM"))
        );
    }
}
