//! Textual LLVM IR with opaque pointers.
//!
//! `int` is `i64`, `bool` is `i1` and everything else a `ptr`. Objects start with their
//! vtable pointer followed by one field per attribute; lists and strings start with an
//! `i64` length. Runtime errors print a message and `longjmp` back into `main`, which then
//! exits with status 1.
use super::{passes_own_cell, Artifact, CodeBuilder};
use crate::asm::EmitError;
use crate::sem::{FuncType, TypeSystem, ValueType};
use crate::syntax::*;
use log::{debug, trace};
use std::collections::HashMap;
use std::fmt::Write;
use std::mem;

/// Symbols of the runtime and the C library that user definitions must not take.
const RESERVED: &[&str] = &["main", "malloc", "printf", "memcmp", "setjmp", "longjmp"];

pub fn emit(program: &Program, ts: &TypeSystem, name: &str) -> Result<Artifact, EmitError> {
    let mut emitter = LlvmEmitter::new(ts, &program.instances);
    let contents = emitter.module(program, name)?;

    debug!("emitted {} LLVM IR lines", contents.lines().count());
    Ok(Artifact::new(format!("{}.ll", name), contents))
}

fn llvm_type(ty: &ValueType) -> &'static str {
    if ty.is_int() {
        "i64"
    } else if ty.is_bool() {
        "i1"
    } else {
        "ptr"
    }
}

fn return_type(ty: &ValueType) -> &'static str {
    if ty.is_none() {
        "void"
    } else {
        llvm_type(ty)
    }
}

/// The symbol of a user function or constructor.
fn symbol(name: &str) -> String {
    if RESERVED.contains(&name) || name.starts_with("llvm") {
        format!("@.u.{}", name)
    } else {
        format!("@{}", name)
    }
}

fn method_symbol(class: &str, method: &str) -> String {
    format!("@{}.{}", class, method)
}

fn vtable(class: &str) -> String {
    format!("@.vtable.{}", class)
}

/// Bytes of a string constant in LLVM `c"..."` notation.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte == b'"' || byte == b'\\' || !(0x20..0x7f).contains(&byte) {
            let _ = write!(escaped, "\\{:02X}", byte);
        } else {
            escaped.push(byte as char);
        }
    }
    escaped
}

/// Instruction buffer of one function, tracking the current basic block.
#[derive(Debug)]
struct IrBuilder {
    code: CodeBuilder,
    allocas: Vec<String>,
    temps: usize,
    labels: usize,
    block: String,
    terminated: bool,
}

impl IrBuilder {
    fn new() -> Self {
        let mut code = CodeBuilder::new("  ");
        code.indent();
        Self {
            code,
            allocas: vec![],
            temps: 0,
            labels: 0,
            block: "entry".to_string(),
            terminated: false,
        }
    }

    fn temp(&mut self) -> String {
        self.temps += 1;
        format!("%t{}", self.temps)
    }

    fn label(&mut self, prefix: &str) -> String {
        self.labels += 1;
        format!("{}.{}", prefix, self.labels)
    }

    fn inst<S: AsRef<str>>(&mut self, text: S) {
        if self.terminated {
            let dead = self.label("dead");
            self.start(&dead);
        }
        self.code.line(text);
    }

    /// Emits `text` as the definition of a fresh register and returns the register.
    fn value<S: AsRef<str>>(&mut self, text: S) -> String {
        let temp = self.temp();
        self.inst(format!("{} = {}", temp, text.as_ref()));
        temp
    }

    fn terminate<S: AsRef<str>>(&mut self, text: S) {
        self.inst(text);
        self.terminated = true;
    }

    fn br(&mut self, label: &str) {
        self.terminate(format!("br label %{}", label));
    }

    fn cond_br(&mut self, condition: &str, then: &str, r#else: &str) {
        self.terminate(format!(
            "br i1 {}, label %{}, label %{}",
            condition, then, r#else
        ));
    }

    /// Starts block `label`, falling through from the current one if it is still open.
    fn start(&mut self, label: &str) {
        if !self.terminated {
            self.code.line(format!("br label %{}", label));
        }
        self.code.outdented(format!("{}:", label));
        self.block = label.to_string();
        self.terminated = false;
    }

    fn alloca(&mut self, name: &str, ty: &str) {
        self.allocas.push(format!("{} = alloca {}", name, ty));
    }

    fn finish(self) -> String {
        let mut out = CodeBuilder::new("  ");
        out.line("entry:").indent();
        for alloca in &self.allocas {
            out.line(alloca);
        }
        out.dedent().append(self.code.as_str());
        out.finish()
    }
}

struct LlvmEmitter<'a> {
    ts: &'a TypeSystem,
    instances: &'a VarInstances,
    b: IrBuilder,
    /// Address of every variable of the current function.
    vars: HashMap<VarId, String>,
    return_type: ValueType,
    strings: HashMap<String, String>,
    constants: Vec<String>,
}

impl<'a> LlvmEmitter<'a> {
    fn new(ts: &'a TypeSystem, instances: &'a VarInstances) -> Self {
        Self {
            ts,
            instances,
            b: IrBuilder::new(),
            vars: HashMap::new(),
            return_type: ValueType::none(),
            strings: HashMap::new(),
            constants: vec![],
        }
    }

    fn is_boxed(&self, var: VarId) -> bool {
        self.instances.get(var).is_nonlocal
    }

    /// Interns a string constant and returns its symbol.
    fn string(&mut self, value: &str) -> String {
        if let Some(symbol) = self.strings.get(value) {
            return symbol.clone();
        }
        let symbol = format!("@.str.{}", self.strings.len());
        let len = value.len();
        let bytes = if len == 0 {
            "zeroinitializer".to_string()
        } else {
            format!("c\"{}\"", escape(value))
        };
        self.constants.push(format!(
            "{} = private constant {{ i64, [{} x i8] }} {{ i64 {}, [{} x i8] {} }}",
            symbol, len, len, len, bytes
        ));
        self.strings.insert(value.to_string(), symbol.clone());
        symbol
    }

    fn module(&mut self, program: &Program, name: &str) -> Result<String, EmitError> {
        let mut out = CodeBuilder::new("  ");
        out.line(format!("; ModuleID = '{}'", name))
            .line(format!("source_filename = \"{}.py\"", name))
            .blank();

        for class in self.ts.object_classes() {
            let fields: Vec<&str> = self
                .ts
                .ordered_attrs(&class.name)
                .iter()
                .map(|attr| llvm_type(&attr.value_type))
                .collect();
            let mut ty = String::from("ptr");
            for field in fields {
                ty.push_str(", ");
                ty.push_str(field);
            }
            out.line(format!("%{} = type {{ {} }}", class.name, ty));
        }
        out.blank();

        for class in self.ts.object_classes() {
            let slots: Vec<String> = self
                .ts
                .ordered_methods(&class.name)
                .iter()
                .map(|slot| format!("ptr {}", method_symbol(&slot.def_class, &slot.name)))
                .collect();
            out.line(format!(
                "{} = internal constant [{} x ptr] [{}]",
                vtable(&class.name),
                slots.len(),
                slots.join(", ")
            ));
        }
        out.blank();

        for def in program.var_defs() {
            let value = self.constant(&def.value, def.var.value_type());
            out.line(format!(
                "{} = internal global {} {}",
                symbol(def.var.name()),
                llvm_type(def.var.value_type()),
                value
            ));
        }

        let mut functions = vec![];
        for class in program.class_defs() {
            functions.push(self.constructor(&class.name.name)?);
            for method in class.methods() {
                functions.push(self.function(method_symbol(&class.name.name, &method.name.name), method)?);
            }
        }
        for func in program.func_defs() {
            functions.push(self.function(symbol(&func.name.name), func)?);
        }
        functions.push(self.main(program)?);

        for constant in &self.constants {
            out.line(constant);
        }
        out.blank().append(RUNTIME);
        for function in functions {
            out.blank().append(&function);
        }
        Ok(out.finish())
    }

    /// The initializer of a global or attribute: always a literal.
    fn constant(&mut self, expr: &Expr, ty: &ValueType) -> String {
        let boxed = llvm_type(ty) == "ptr";
        match &expr.kind {
            ExprKind::IntegerLiteral { value } if boxed => format!("inttoptr (i64 {} to ptr)", value),
            ExprKind::BooleanLiteral { value } if boxed => {
                format!("inttoptr (i64 {} to ptr)", *value as i64)
            }
            ExprKind::IntegerLiteral { value } => value.to_string(),
            ExprKind::BooleanLiteral { value } => value.to_string(),
            ExprKind::StringLiteral { value } => self.string(value),
            ExprKind::ListExpr { .. } => "@.empty".to_string(),
            _ => "null".to_string(),
        }
    }

    fn begin(&mut self, return_type: ValueType) {
        self.b = IrBuilder::new();
        self.vars.clear();
        self.return_type = return_type;
    }

    fn constructor(&mut self, class: &str) -> Result<String, EmitError> {
        trace!("emit constructor {}", class);
        self.begin(ValueType::class(class));
        let attrs: Vec<_> = self.ts.ordered_attrs(class).into_iter().cloned().collect();

        let object = self.b.value(format!("call ptr @.alloc(i64 {})", 8 + 8 * attrs.len()));
        self.b.inst(format!("store ptr {}, ptr {}", vtable(class), object));
        for (slot, attr) in attrs.iter().enumerate() {
            let value = match &attr.init {
                Some(init) => self.constant(init, &attr.value_type),
                None => "zeroinitializer".to_string(),
            };
            let field = self.b.value(format!(
                "getelementptr %{}, ptr {}, i32 0, i32 {}",
                class,
                object,
                slot + 1
            ));
            self.b.inst(format!("store {} {}, ptr {}", llvm_type(&attr.value_type), value, field));
        }
        self.b.terminate(format!("ret ptr {}", object));

        let body = mem::replace(&mut self.b, IrBuilder::new()).finish();
        Ok(format!("define internal ptr {}() {{\n{}}}\n", symbol(class), body))
    }

    fn function(&mut self, name: String, func: &FuncDef) -> Result<String, EmitError> {
        trace!("emit function {}", name);
        let sig = func.signature().clone();
        self.begin(sig.return_type.clone());

        let mut params = vec![];
        for (i, param) in func.params.iter().enumerate() {
            let var = param.instance();
            let ty = llvm_type(param.value_type());
            let arg = format!("%{}", param.name());

            if func.ref_params.contains_key(&i) {
                let cell = format!("{}.cell", arg);
                params.push(format!("ptr {}", cell));
                self.vars.insert(var, cell);
            } else if self.is_boxed(var) {
                params.push(format!("{} {}.arg", ty, arg));
                let cell = self.b.value("call ptr @.alloc(i64 8)");
                self.b.inst(format!("store {} {}.arg, ptr {}", ty, arg, cell));
                self.vars.insert(var, cell);
            } else {
                params.push(format!("{} {}.arg", ty, arg));
                let addr = format!("{}.addr", arg);
                self.b.alloca(&addr, ty);
                self.b.inst(format!("store {} {}.arg, ptr {}", ty, arg, addr));
                self.vars.insert(var, addr);
            }
        }

        for def in func.var_defs() {
            let var = def.var.instance();
            let ty = def.var.value_type();
            let value = self.constant(&def.value, ty);
            let addr = if self.is_boxed(var) {
                self.b.value("call ptr @.alloc(i64 8)")
            } else {
                let addr = format!("%{}.addr", def.var.name());
                self.b.alloca(&addr, llvm_type(ty));
                addr
            };
            self.b.inst(format!("store {} {}, ptr {}", llvm_type(ty), value, addr));
            self.vars.insert(var, addr);
        }

        self.stmts(&func.statements)?;
        self.default_return();

        let body = mem::replace(&mut self.b, IrBuilder::new()).finish();
        Ok(format!(
            "define internal {} {}({}) {{\n{}}}\n",
            return_type(&sig.return_type),
            name,
            params.join(", "),
            body
        ))
    }

    fn main(&mut self, program: &Program) -> Result<String, EmitError> {
        self.begin(ValueType::none());

        let status = self.b.value("call i32 @setjmp(ptr @.jmpbuf)");
        let failed = self.b.value(format!("icmp ne i32 {}, 0", status));
        self.b.cond_br(&failed, "fail", "run");
        self.b.start("fail");
        self.b.terminate("ret i32 1");
        self.b.start("run");
        self.stmts(&program.statements)?;
        if !self.b.terminated {
            self.b.terminate("ret i32 0");
        }

        let body = mem::replace(&mut self.b, IrBuilder::new()).finish();
        Ok(format!("define i32 @main() {{\n{}}}\n", body))
    }

    fn default_return(&mut self) {
        if self.b.terminated {
            return;
        }
        if self.return_type.is_none() {
            self.b.terminate("ret void");
        } else {
            let ty = llvm_type(&self.return_type);
            let zero = match ty {
                "i64" => "0",
                "i1" => "false",
                _ => "null",
            };
            self.b.terminate(format!("ret {} {}", ty, zero));
        }
    }

    fn coerce(&mut self, value: String, from: &ValueType, to: &ValueType) -> String {
        match (llvm_type(from), llvm_type(to)) {
            ("i64", "ptr") => self.b.value(format!("inttoptr i64 {} to ptr", value)),
            ("i1", "ptr") => {
                let wide = self.b.value(format!("zext i1 {} to i64", value));
                self.b.value(format!("inttoptr i64 {} to ptr", wide))
            }
            _ => value,
        }
    }

    fn address(&self, var: VarId, name: &str) -> String {
        if self.instances.get(var).is_global {
            return symbol(name);
        }
        self.vars.get(&var).cloned().unwrap_or_else(|| {
            panic!("Internal compiler error: unbound variable {}", name)
        })
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
            }
            Stmt::AssignStmt(stmt) => {
                let ty = stmt.value.value_type();
                let value = self.expr(&stmt.value)?;
                for target in &stmt.targets {
                    self.assign(target, value.clone(), ty)?;
                }
            }
            Stmt::IfStmt(stmt) => {
                let then = self.b.label("then");
                let r#else = self.b.label("else");
                let end = self.b.label("endif");
                let condition = self.expr(&stmt.condition)?;
                self.b.cond_br(&condition, &then, &r#else);
                self.b.start(&then);
                self.stmts(&stmt.then_body)?;
                self.b.start(&r#else);
                self.stmts(&stmt.else_body)?;
                self.b.start(&end);
            }
            Stmt::WhileStmt(stmt) => {
                let head = self.b.label("while");
                let body = self.b.label("body");
                let end = self.b.label("endwhile");
                self.b.start(&head);
                let condition = self.expr(&stmt.condition)?;
                self.b.cond_br(&condition, &body, &end);
                self.b.start(&body);
                self.stmts(&stmt.body)?;
                self.b.br(&head);
                self.b.start(&end);
            }
            Stmt::ForStmt(stmt) => self.for_stmt(stmt)?,
            Stmt::ReturnStmt(stmt) => {
                let return_type = self.return_type.clone();
                match &stmt.value {
                    Some(value) if !return_type.is_none() => {
                        let result = self.expr(value)?;
                        let result = self.coerce(result, value.value_type(), &return_type);
                        self.b
                            .terminate(format!("ret {} {}", llvm_type(&return_type), result));
                    }
                    Some(value) => {
                        self.expr(value)?;
                        self.b.terminate("ret void");
                    }
                    None => self.default_return(),
                }
            }
        }
        Ok(())
    }

    fn assign(&mut self, target: &Expr, value: String, ty: &ValueType) -> Result<(), EmitError> {
        let target_type = target.value_type().clone();
        let value = self.coerce(value, ty, &target_type);
        let addr = match &target.kind {
            ExprKind::Identifier {
                name,
                var_instance: Some(var),
            } => self.address(*var, name),
            ExprKind::MemberExpr { object, member } => {
                let object_type = object.value_type().clone();
                let object = self.expr(object)?;
                self.field(object, &object_type, &member.name)
            }
            ExprKind::IndexExpr { list, index } => {
                let list = self.expr(list)?;
                let index = self.expr(index)?;
                self.b
                    .value(format!("call ptr @.list_elem(ptr {}, i64 {})", list, index))
            }
            _ => panic!("Internal compiler error: invalid assignment target"),
        };
        self.b
            .inst(format!("store {} {}, ptr {}", llvm_type(&target_type), value, addr));
        Ok(())
    }

    fn for_stmt(&mut self, stmt: &ForStmt) -> Result<(), EmitError> {
        let iterable_type = stmt.iterable.value_type().clone();
        let head = self.b.label("for");
        let body = self.b.label("body");
        let end = self.b.label("endfor");
        let index = format!("%{}.index", head);

        let iterable = self.expr(&stmt.iterable)?;
        self.b.alloca(&index, "i64");
        self.b.inst(format!("store i64 0, ptr {}", index));
        self.b.start(&head);
        let i = self.b.value(format!("load i64, ptr {}", index));
        let len = self.b.value(format!("call i64 @.len(ptr {})", iterable));
        let more = self.b.value(format!("icmp slt i64 {}, {}", i, len));
        self.b.cond_br(&more, &body, &end);
        self.b.start(&body);

        let (element_type, element) = if iterable_type.is_str() {
            let element = self
                .b
                .value(format!("call ptr @.str_idx(ptr {}, i64 {})", iterable, i));
            (ValueType::str(), element)
        } else {
            let element_type = iterable_type.element_type().cloned().unwrap_or_else(ValueType::object);
            let addr = self
                .b
                .value(format!("call ptr @.list_elem(ptr {}, i64 {})", iterable, i));
            let element = self
                .b
                .value(format!("load {}, ptr {}", llvm_type(&element_type), addr));
            (element_type, element)
        };
        let target_type = stmt
            .identifier
            .value_type()
            .cloned()
            .unwrap_or_else(|| element_type.clone());
        let var = stmt.identifier.var_instance.unwrap_or_else(|| {
            panic!("Internal compiler error: unbound loop variable {}", stmt.identifier.name)
        });
        let element = self.coerce(element, &element_type, &target_type);
        let addr = self.address(var, &stmt.identifier.name);
        self.b
            .inst(format!("store {} {}, ptr {}", llvm_type(&target_type), element, addr));

        self.stmts(&stmt.body)?;
        let i = self.b.value(format!("load i64, ptr {}", index));
        let next = self.b.value(format!("add i64 {}, 1", i));
        self.b.inst(format!("store i64 {}, ptr {}", next, index));
        self.b.br(&head);
        self.b.start(&end);
        Ok(())
    }

    /// Address of attribute `name` of `object`, after the null check.
    fn field(&mut self, object: String, ty: &ValueType, name: &str) -> String {
        let class = ty.class_name().unwrap_or("object").to_string();
        let slot = self
            .ts
            .ordered_attrs(&class)
            .iter()
            .position(|attr| attr.name == name)
            .unwrap_or_else(|| panic!("Internal compiler error: no attribute {}.{}", class, name));
        let checked = self.b.value(format!("call ptr @.check(ptr {})", object));
        self.b.value(format!(
            "getelementptr %{}, ptr {}, i32 0, i32 {}",
            class,
            checked,
            slot + 1
        ))
    }

    fn expr(&mut self, expr: &Expr) -> Result<String, EmitError> {
        let value = match &expr.kind {
            ExprKind::IntegerLiteral { value } => value.to_string(),
            ExprKind::BooleanLiteral { value } => value.to_string(),
            ExprKind::NoneLiteral => "null".to_string(),
            ExprKind::StringLiteral { value } => self.string(value),
            ExprKind::Identifier { name, var_instance } => {
                let var = var_instance.unwrap_or_else(|| {
                    panic!("Internal compiler error: unbound identifier {}", name)
                });
                let addr = self.address(var, name);
                self.b
                    .value(format!("load {}, ptr {}", llvm_type(expr.value_type()), addr))
            }
            ExprKind::ListExpr { elements, .. } if elements.is_empty() => "@.empty".to_string(),
            ExprKind::ListExpr { elements, .. } => {
                let element_type = expr
                    .value_type()
                    .element_type()
                    .cloned()
                    .unwrap_or_else(ValueType::object);
                let list = self.b.value(format!(
                    "call ptr @.alloc(i64 {})",
                    8 + 8 * elements.len()
                ));
                self.b.inst(format!("store i64 {}, ptr {}", elements.len(), list));
                for (i, element) in elements.iter().enumerate() {
                    let value = self.expr(element)?;
                    let value = self.coerce(value, element.value_type(), &element_type);
                    let addr = self
                        .b
                        .value(format!("getelementptr i64, ptr {}, i64 {}", list, i + 1));
                    self.b.inst(format!(
                        "store {} {}, ptr {}",
                        llvm_type(&element_type),
                        value,
                        addr
                    ));
                }
                list
            }
            ExprKind::BinaryExpr {
                left,
                operator,
                right,
            } => self.binary(left, *operator, right)?,
            ExprKind::UnaryExpr { operator, operand } => {
                let operand = self.expr(operand)?;
                match operator {
                    UnaryOperator::Neg => self.b.value(format!("sub i64 0, {}", operand)),
                    UnaryOperator::Not => self.b.value(format!("xor i1 {}, true", operand)),
                }
            }
            ExprKind::IfExpr {
                condition,
                then_expr,
                else_expr,
            } => {
                let ty = expr.value_type();
                let then = self.b.label("ifexpr.then");
                let r#else = self.b.label("ifexpr.else");
                let end = self.b.label("ifexpr.end");

                let condition = self.expr(condition)?;
                self.b.cond_br(&condition, &then, &r#else);
                self.b.start(&then);
                let a = self.expr(then_expr)?;
                let a = self.coerce(a, then_expr.value_type(), ty);
                let a_block = self.b.block.clone();
                self.b.br(&end);
                self.b.start(&r#else);
                let b = self.expr(else_expr)?;
                let b = self.coerce(b, else_expr.value_type(), ty);
                let b_block = self.b.block.clone();
                self.b.start(&end);
                self.b.value(format!(
                    "phi {} [ {}, %{} ], [ {}, %{} ]",
                    llvm_type(ty),
                    a,
                    a_block,
                    b,
                    b_block
                ))
            }
            ExprKind::IndexExpr { list, index } => {
                let is_str = list.value_type().is_str();
                let list = self.expr(list)?;
                let index = self.expr(index)?;
                if is_str {
                    self.b
                        .value(format!("call ptr @.str_idx(ptr {}, i64 {})", list, index))
                } else {
                    let addr = self
                        .b
                        .value(format!("call ptr @.list_elem(ptr {}, i64 {})", list, index));
                    self.b
                        .value(format!("load {}, ptr {}", llvm_type(expr.value_type()), addr))
                }
            }
            ExprKind::MemberExpr { object, member } => {
                let object_type = object.value_type().clone();
                let object = self.expr(object)?;
                let addr = self.field(object, &object_type, &member.name);
                self.b
                    .value(format!("load {}, ptr {}", llvm_type(expr.value_type()), addr))
            }
            ExprKind::CallExpr {
                function,
                args,
                is_constructor,
                ..
            } => self.call(expr, function, args, *is_constructor)?,
            ExprKind::MethodCallExpr { method, args } => self.method_call(method, args)?,
        };
        Ok(value)
    }

    fn binary(&mut self, left: &Expr, operator: BinaryOperator, right: &Expr) -> Result<String, EmitError> {
        use BinaryOperator::*;

        if let And | Or = operator {
            let rhs = self.b.label("rhs");
            let end = self.b.label("logic.end");
            let short = if operator == And { "false" } else { "true" };

            let l = self.expr(left)?;
            let l_block = self.b.block.clone();
            if operator == And {
                self.b.cond_br(&l, &rhs, &end);
            } else {
                self.b.cond_br(&l, &end, &rhs);
            }
            self.b.start(&rhs);
            let r = self.expr(right)?;
            let r_block = self.b.block.clone();
            self.b.start(&end);
            return Ok(self.b.value(format!(
                "phi i1 [ {}, %{} ], [ {}, %{} ]",
                short, l_block, r, r_block
            )));
        }

        let ty = left.value_type().clone();
        let l = self.expr(left)?;
        let r = self.expr(right)?;
        let value = match operator {
            Add if ty.is_str() => {
                format!("call ptr @.str_concat(ptr {}, ptr {})", l, r)
            }
            Add if ty.is_list_like() => {
                format!("call ptr @.list_concat(ptr {}, ptr {})", l, r)
            }
            Add => format!("add i64 {}, {}", l, r),
            Sub => format!("sub i64 {}, {}", l, r),
            Mul => format!("mul i64 {}, {}", l, r),
            FloorDiv => format!("call i64 @.floordiv(i64 {}, i64 {})", l, r),
            Mod => format!("call i64 @.floormod(i64 {}, i64 {})", l, r),
            Eq | Ne if ty.is_str() => {
                let equal = self
                    .b
                    .value(format!("call i1 @.str_eq(ptr {}, ptr {})", l, r));
                if operator == Eq {
                    return Ok(equal);
                }
                format!("xor i1 {}, true", equal)
            }
            Eq | Is => format!("icmp eq {} {}, {}", llvm_type(&ty), l, r),
            Ne => format!("icmp ne {} {}, {}", llvm_type(&ty), l, r),
            Lt => format!("icmp slt i64 {}, {}", l, r),
            Le => format!("icmp sle i64 {}, {}", l, r),
            Gt => format!("icmp sgt i64 {}, {}", l, r),
            Ge => format!("icmp sge i64 {}, {}", l, r),
            And | Or => unreachable!(),
        };
        Ok(self.b.value(value))
    }

    fn call(
        &mut self,
        expr: &Expr,
        function: &Identifier,
        args: &[Expr],
        is_constructor: bool,
    ) -> Result<String, EmitError> {
        let sig = function.func_type().cloned().unwrap_or_else(|| {
            panic!("Internal compiler error: untyped callee {}", function.name)
        });

        if is_constructor {
            return Ok(match function.name.as_str() {
                "int" => "0".to_string(),
                "bool" => "false".to_string(),
                "str" => self.string(""),
                class => {
                    let object = self.b.value(format!("call ptr {}()", symbol(class)));
                    let ts = self.ts;
                    if let Some(owner) = ts.get_method_def_class(class, "__init__") {
                        if owner != "object" {
                            let mut operands = vec![format!("ptr {}", object)];
                            operands.extend(self.args(&sig, 1, args)?);
                            self.b.inst(format!(
                                "call void {}({})",
                                method_symbol(owner, "__init__"),
                                operands.join(", ")
                            ));
                        }
                    }
                    object
                }
            });
        }

        match function.name.as_str() {
            "print" => {
                let arg = &args[0];
                let ty = arg.value_type();
                let (printer, operand) = match ty.class_name() {
                    Some("int") => ("@.print_int", "i64"),
                    Some("bool") => ("@.print_bool", "i1"),
                    Some("str") => ("@.print_str", "ptr"),
                    _ => return Err(EmitError::UnsupportedPrint(ty.to_string())),
                };
                let value = self.expr(arg)?;
                self.b
                    .inst(format!("call void {}({} {})", printer, operand, value));
                Ok("null".to_string())
            }
            "len" => {
                let value = self.expr(&args[0])?;
                Ok(self.b.value(format!("call i64 @.len(ptr {})", value)))
            }
            "input" => Ok(self.string("")),
            "__assert__" => {
                let value = self.expr(&args[0])?;
                self.b.inst(format!(
                    "call void @.assert(i1 {}, i64 {})",
                    value, expr.location.start.line
                ));
                Ok("null".to_string())
            }
            name => {
                let operands = self.args(&sig, 0, args)?;
                let call = format!(
                    "call {} {}({})",
                    return_type(&sig.return_type),
                    symbol(name),
                    operands.join(", ")
                );
                if sig.return_type.is_none() {
                    self.b.inst(call);
                    Ok("null".to_string())
                } else {
                    Ok(self.b.value(call))
                }
            }
        }
    }

    /// Dispatches through the vtable of the receiver.
    fn method_call(&mut self, method: &MethodRef, args: &[Expr]) -> Result<String, EmitError> {
        let class = method.object.value_type().class_name().unwrap_or("object").to_string();
        let slot = self
            .ts
            .ordered_methods(&class)
            .iter()
            .position(|m| m.name == method.member.name)
            .unwrap_or_else(|| {
                panic!("Internal compiler error: no method {}.{}", class, method.member.name)
            });
        let sig = method.func_type().clone();

        let object = self.expr(&method.object)?;
        let object = self.b.value(format!("call ptr @.check(ptr {})", object));
        let table = self.b.value(format!("load ptr, ptr {}", object));
        let entry = self
            .b
            .value(format!("getelementptr ptr, ptr {}, i64 {}", table, slot));
        let target = self.b.value(format!("load ptr, ptr {}", entry));

        let mut operands = vec![format!("ptr {}", object)];
        operands.extend(self.args(&sig, 1, args)?);
        let call = format!(
            "call {} {}({})",
            return_type(&sig.return_type),
            target,
            operands.join(", ")
        );
        if sig.return_type.is_none() {
            self.b.inst(call);
            Ok("null".to_string())
        } else {
            Ok(self.b.value(call))
        }
    }

    /// Typed operands for the parameters of `sig` from `offset` on.
    fn args(&mut self, sig: &FuncType, offset: usize, args: &[Expr]) -> Result<Vec<String>, EmitError> {
        let mut operands = vec![];

        for (i, arg) in args.iter().enumerate() {
            let index = i + offset;
            let param_type = sig.params.get(index).cloned().unwrap_or_else(|| {
                panic!("Internal compiler error: too many arguments")
            });

            match (sig.ref_params.get(&index), &arg.kind) {
                (Some(&cell), ExprKind::Identifier { name, .. })
                    if passes_own_cell(self.instances, cell, arg) =>
                {
                    operands.push(format!("ptr {}", self.address(cell, name)));
                }
                (Some(_), _) => {
                    let value = self.expr(arg)?;
                    let value = self.coerce(value, arg.value_type(), &param_type);
                    let cell = self.b.value("call ptr @.alloc(i64 8)");
                    self.b.inst(format!(
                        "store {} {}, ptr {}",
                        llvm_type(&param_type),
                        value,
                        cell
                    ));
                    operands.push(format!("ptr {}", cell));
                }
                (None, _) => {
                    let value = self.expr(arg)?;
                    let value = self.coerce(value, arg.value_type(), &param_type);
                    operands.push(format!("{} {}", llvm_type(&param_type), value));
                }
            }
        }
        Ok(operands)
    }
}

const RUNTIME: &str = r#"declare ptr @malloc(i64)
declare i32 @printf(ptr, ...)
declare i32 @memcmp(ptr, ptr, i64)
declare i32 @setjmp(ptr) returns_twice
declare void @longjmp(ptr, i32) noreturn
declare void @llvm.memcpy.p0.p0.i64(ptr, ptr, i64, i1)

@.jmpbuf = internal global [64 x i64] zeroinitializer
@.empty = internal constant i64 0
@.fmt.int = private constant [6 x i8] c"%lld\0A\00"
@.fmt.str = private constant [6 x i8] c"%.*s\0A\00"
@.msg.assert = private constant [31 x i8] c"Assertion failed on line %lld\0A\00"
@.msg.none = private constant [19 x i8] c"Operation on None\0A\00"
@.msg.bounds = private constant [21 x i8] c"Index out of bounds\0A\00"
@.msg.div = private constant [18 x i8] c"Division by zero\0A\00"
@.str.True = private constant { i64, [4 x i8] } { i64 4, [4 x i8] c"True" }
@.str.False = private constant { i64, [5 x i8] } { i64 5, [5 x i8] c"False" }

define internal void @.fail(ptr %message) noreturn {
entry:
  call i32 (ptr, ...) @printf(ptr %message)
  call void @longjmp(ptr @.jmpbuf, i32 1)
  unreachable
}

define internal ptr @.alloc(i64 %bytes) {
entry:
  %p = call ptr @malloc(i64 %bytes)
  ret ptr %p
}

define internal ptr @.check(ptr %p) {
entry:
  %null = icmp eq ptr %p, null
  br i1 %null, label %fail, label %ok
fail:
  call void @.fail(ptr @.msg.none)
  unreachable
ok:
  ret ptr %p
}

define internal void @.bounds(ptr %p, i64 %i) {
entry:
  %len = load i64, ptr %p
  %neg = icmp slt i64 %i, 0
  %big = icmp sge i64 %i, %len
  %bad = or i1 %neg, %big
  br i1 %bad, label %fail, label %ok
fail:
  call void @.fail(ptr @.msg.bounds)
  unreachable
ok:
  ret void
}

define internal i64 @.len(ptr %p) {
entry:
  %q = call ptr @.check(ptr %p)
  %n = load i64, ptr %q
  ret i64 %n
}

define internal ptr @.list_elem(ptr %list, i64 %i) {
entry:
  %l = call ptr @.check(ptr %list)
  call void @.bounds(ptr %l, i64 %i)
  %slot = add i64 %i, 1
  %p = getelementptr i64, ptr %l, i64 %slot
  ret ptr %p
}

define internal ptr @.str_idx(ptr %str, i64 %i) {
entry:
  %s = call ptr @.check(ptr %str)
  call void @.bounds(ptr %s, i64 %i)
  %offset = add i64 %i, 8
  %src = getelementptr i8, ptr %s, i64 %offset
  %c = load i8, ptr %src
  %r = call ptr @.alloc(i64 9)
  store i64 1, ptr %r
  %dst = getelementptr i8, ptr %r, i64 8
  store i8 %c, ptr %dst
  ret ptr %r
}

define internal ptr @.str_concat(ptr %a0, ptr %b0) {
entry:
  %a = call ptr @.check(ptr %a0)
  %b = call ptr @.check(ptr %b0)
  %la = load i64, ptr %a
  %lb = load i64, ptr %b
  %n = add i64 %la, %lb
  %size = add i64 %n, 8
  %r = call ptr @.alloc(i64 %size)
  store i64 %n, ptr %r
  %da = getelementptr i8, ptr %a, i64 8
  %db = getelementptr i8, ptr %b, i64 8
  %dr = getelementptr i8, ptr %r, i64 8
  call void @llvm.memcpy.p0.p0.i64(ptr %dr, ptr %da, i64 %la, i1 false)
  %tail = getelementptr i8, ptr %dr, i64 %la
  call void @llvm.memcpy.p0.p0.i64(ptr %tail, ptr %db, i64 %lb, i1 false)
  ret ptr %r
}

define internal ptr @.list_concat(ptr %a0, ptr %b0) {
entry:
  %a = call ptr @.check(ptr %a0)
  %b = call ptr @.check(ptr %b0)
  %la = load i64, ptr %a
  %lb = load i64, ptr %b
  %n = add i64 %la, %lb
  %slots = add i64 %n, 1
  %size = mul i64 %slots, 8
  %r = call ptr @.alloc(i64 %size)
  store i64 %n, ptr %r
  %da = getelementptr i64, ptr %a, i64 1
  %db = getelementptr i64, ptr %b, i64 1
  %dr = getelementptr i64, ptr %r, i64 1
  %ba = mul i64 %la, 8
  %bb = mul i64 %lb, 8
  call void @llvm.memcpy.p0.p0.i64(ptr %dr, ptr %da, i64 %ba, i1 false)
  %tail = getelementptr i64, ptr %dr, i64 %la
  call void @llvm.memcpy.p0.p0.i64(ptr %tail, ptr %db, i64 %bb, i1 false)
  ret ptr %r
}

define internal i1 @.str_eq(ptr %a0, ptr %b0) {
entry:
  %a = call ptr @.check(ptr %a0)
  %b = call ptr @.check(ptr %b0)
  %la = load i64, ptr %a
  %lb = load i64, ptr %b
  %same = icmp eq i64 %la, %lb
  br i1 %same, label %bytes, label %differ
bytes:
  %da = getelementptr i8, ptr %a, i64 8
  %db = getelementptr i8, ptr %b, i64 8
  %c = call i32 @memcmp(ptr %da, ptr %db, i64 %la)
  %eq = icmp eq i32 %c, 0
  ret i1 %eq
differ:
  ret i1 false
}

define internal i64 @.floordiv(i64 %a, i64 %b) {
entry:
  %zero = icmp eq i64 %b, 0
  br i1 %zero, label %fail, label %ok
fail:
  call void @.fail(ptr @.msg.div)
  unreachable
ok:
  %q = sdiv i64 %a, %b
  %r = srem i64 %a, %b
  %inexact = icmp ne i64 %r, 0
  %signs = xor i64 %a, %b
  %negative = icmp slt i64 %signs, 0
  %adjust = and i1 %inexact, %negative
  %d = zext i1 %adjust to i64
  %result = sub i64 %q, %d
  ret i64 %result
}

define internal i64 @.floormod(i64 %a, i64 %b) {
entry:
  %zero = icmp eq i64 %b, 0
  br i1 %zero, label %fail, label %ok
fail:
  call void @.fail(ptr @.msg.div)
  unreachable
ok:
  %r = srem i64 %a, %b
  %inexact = icmp ne i64 %r, 0
  %signs = xor i64 %r, %b
  %negative = icmp slt i64 %signs, 0
  %adjust = and i1 %inexact, %negative
  %plus = add i64 %r, %b
  %result = select i1 %adjust, i64 %plus, i64 %r
  ret i64 %result
}

define internal void @.print_int(i64 %v) {
entry:
  call i32 (ptr, ...) @printf(ptr @.fmt.int, i64 %v)
  ret void
}

define internal void @.print_str(ptr %str) {
entry:
  %s = call ptr @.check(ptr %str)
  %len = load i64, ptr %s
  %n = trunc i64 %len to i32
  %data = getelementptr i8, ptr %s, i64 8
  call i32 (ptr, ...) @printf(ptr @.fmt.str, i32 %n, ptr %data)
  ret void
}

define internal void @.print_bool(i1 %v) {
entry:
  %s = select i1 %v, ptr @.str.True, ptr @.str.False
  call void @.print_str(ptr %s)
  ret void
}

define internal void @.assert(i1 %ok, i64 %line) {
entry:
  br i1 %ok, label %pass, label %fail
fail:
  call i32 (ptr, ...) @printf(ptr @.msg.assert, i64 %line)
  call void @longjmp(ptr @.jmpbuf, i32 1)
  unreachable
pass:
  ret void
}

define internal void @object.__init__(ptr %self) {
entry:
  ret void
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::pipeline;
    use assert_matches::assert_matches;

    fn llvm(src: &str) -> Result<String, EmitError> {
        let (program, ts) = pipeline::lower(src).unwrap();
        emit(&program, &ts, "test").map(|artifact| artifact.contents)
    }

    #[test]
    fn globals_are_constant_initialized() {
        let out = llvm("x: int = 3\ns: str = \"hi\"\nb: bool = True\nl: [int] = []\n").unwrap();

        assert!(out.contains("@x = internal global i64 3\n"));
        assert!(out.contains("@s = internal global ptr @.str.0\n"));
        assert!(out.contains("@b = internal global i1 true\n"));
        assert!(out.contains("@l = internal global ptr @.empty\n"));
        assert!(out.contains(
            "@.str.0 = private constant { i64, [2 x i8] } { i64 2, [2 x i8] c\"hi\" }"
        ));
    }

    #[test]
    fn main_returns_one_on_failure() {
        let out = llvm("__assert__(1 == 2)\n").unwrap();

        assert!(out.contains("define i32 @main() {\nentry:\n  %t1 = call i32 @setjmp(ptr @.jmpbuf)\n"));
        assert!(out.contains("fail:\n  ret i32 1\nrun:\n  %t3 = icmp eq i64 1, 2\n  call void @.assert(i1 %t3, i64 1)\n  ret i32 0\n"));
    }

    #[test]
    fn classes_and_vtables() {
        let src = "
class A(object):
    x: int = 1
    def f(self: \"A\") -> int:
        return self.x
class B(A):
    y: bool = True
    def f(self: \"B\") -> int:
        return 2
a: A = None
a = B()
print(a.f())
";
        let out = llvm(src).unwrap();

        assert!(out.contains("%object = type { ptr }\n%A = type { ptr, i64 }\n%B = type { ptr, i64, i1 }\n"));
        assert!(out.contains("@.vtable.A = internal constant [2 x ptr] [ptr @object.__init__, ptr @A.f]"));
        assert!(out.contains("@.vtable.B = internal constant [2 x ptr] [ptr @object.__init__, ptr @B.f]"));
        assert!(out.contains("define internal ptr @B() {\nentry:\n  %t1 = call ptr @.alloc(i64 24)\n  store ptr @.vtable.B, ptr %t1\n"));
        assert!(out.contains("getelementptr ptr, ptr %t"));
        assert!(out.contains(", i64 1\n"));
        assert!(out.contains("define internal i64 @A.f(ptr %self.arg) {"));
    }

    #[test]
    fn short_circuit_uses_phi() {
        let out = llvm("b: bool = True\nb = b and not b\n").unwrap();

        assert!(out.contains("br i1 %t3, label %rhs.1, label %logic.end.2\n"));
        assert!(out.contains("phi i1 [ false, %run ], [ %t5, %rhs.1 ]"));
    }

    #[test]
    fn nonlocal_cells_are_heap_slots() {
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
        let out = llvm(src).unwrap();

        assert!(out.contains("define internal void @outer.inner(ptr %a.cell) {"));
        assert!(out.contains("store i64 2, ptr %a.cell\n"));
        assert!(out.contains("call void @outer.inner(ptr %t1)"));
    }

    #[test]
    fn reserved_symbols_are_renamed() {
        let out = llvm("def main() -> int:\n    return 1\nprint(main())\n").unwrap();

        assert!(out.contains("define internal i64 @.u.main() {"));
        assert!(out.contains("call i64 @.u.main()"));
    }

    #[test]
    fn printing_lists_is_rejected() {
        assert_matches!(llvm("print([1])\n"), Err(EmitError::UnsupportedPrint(_)));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(escape("a\"b\\\n"), "a\\22b\\5C\\0A");
    }
}
