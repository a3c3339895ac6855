use super::layout::{self, Layout};
use super::wasm::{self, Builders, Instruction, InstructionsBuilder, Type};
use super::{result_type, stdlib, wasm_type, EmitError, ATTR_BYTES, HEADER_BYTES, HEAP};
use crate::sem::{FuncType, TypeSystem, ValueType};
use crate::syntax::*;
use crate::util::naming::SequenceNaming;
use log::{debug, trace};
use std::collections::HashMap;
use std::mem;

/// Where a variable lives.
#[derive(Debug, Clone)]
enum Storage {
    Global(String),
    Local(String),
    /// A local holding the address of a cell with a value of the given type.
    Cell(String, Type),
}

/// Locals of the function being emitted.
#[derive(Debug, Default)]
struct Frame {
    locals: Vec<(String, Type)>,
    free: HashMap<&'static str, Vec<String>>,
    naming: SequenceNaming,
    return_type: Option<ValueType>,
}

impl Frame {
    fn new(return_type: Option<ValueType>) -> Self {
        Self {
            return_type,
            naming: SequenceNaming::new(),
            ..Self::default()
        }
    }

    fn declare<S: Into<String>>(&mut self, name: S, ty: Type) {
        self.locals.push((name.into(), ty));
    }

    /// A scratch local. Names start with `.` so they never clash with variables.
    fn acquire(&mut self, ty: Type) -> String {
        if let Some(name) = self.free.get_mut(ty.as_str()).and_then(Vec::pop) {
            return name;
        }
        let name = self.naming.next(format!(".{}", ty));
        self.declare(name.clone(), ty);
        name
    }

    fn release(&mut self, name: String, ty: Type) {
        self.free.entry(ty.as_str()).or_default().push(name);
    }

    fn label(&mut self, kind: &str) -> String {
        self.naming.next(kind)
    }
}

fn ops() -> InstructionsBuilder {
    Builders::instructions()
}

fn coerce(b: &mut InstructionsBuilder, from: &ValueType, to: &ValueType) {
    match (wasm_type(from), wasm_type(to)) {
        (Type::I64, Type::I32) => {
            b.i32_wrap_i64();
        }
        (Type::I32, Type::I64) => {
            b.i64_extend_i32_u();
        }
        _ => {}
    }
}

fn param_types(sig: &FuncType) -> Vec<Type> {
    sig.params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if sig.is_ref_param(i) {
                Type::I32
            } else {
                wasm_type(p)
            }
        })
        .collect()
}

fn instance(name: &str, var_instance: Option<VarId>) -> VarId {
    var_instance.unwrap_or_else(|| panic!("Internal compiler error: unbound identifier {}", name))
}

/// Translates a closure converted program into a WASM module.
#[derive(Debug)]
pub struct WasmEmitter<'a> {
    instances: &'a VarInstances,
    layout: Layout,
    frame: Frame,
}

impl<'a> WasmEmitter<'a> {
    pub fn new(ts: &TypeSystem, instances: &'a VarInstances) -> Self {
        Self {
            instances,
            layout: Layout::new(ts),
            frame: Frame::default(),
        }
    }

    pub fn emit(mut self, program: &Program) -> Result<wasm::Module, EmitError> {
        let mut module = wasm::Module::new();

        self.imports(&mut module);

        for def in program.var_defs() {
            let ty = def.var.value_type();
            let init = self.constant(&def.value, ty);

            module.globals.push(
                Builders::global(def.var.name(), wasm_type(ty))
                    .mutable(true)
                    .init(init)
                    .build(),
            );
        }

        module.functions.extend(stdlib::functions());
        let classes: Vec<String> = self.layout.classes().map(|c| c.name.clone()).collect();
        for class in &classes {
            let constructor = self.constructor(class);
            module.functions.push(constructor);
        }
        for class in program.class_defs() {
            for method in class.methods() {
                let name = layout::method_name(&class.name.name, &method.name.name);
                module.functions.push(self.function(name, method)?);
            }
        }
        for func in program.func_defs() {
            let name = layout::function_name(&func.name.name);
            module.functions.push(self.function(name, func)?);
        }
        module.functions.push(self.main(program)?);

        module.table = Some(wasm::Table {
            size: self.layout.table().len() as wasm::Size,
        });
        module.elements.push(wasm::ElementSegment {
            offset: 0,
            functions: self.layout.table().iter().map(wasm::Identifier::new).collect(),
        });
        module.data_segments = self.layout.data_segments().to_vec();
        module.globals.insert(
            0,
            Builders::global(HEAP, Type::I32)
                .mutable(true)
                .init(ops().i32_const(self.layout.heap_base() as i32).build())
                .build(),
        );
        module.start = Some(wasm::Identifier::new("main"));

        debug!(
            "emitted {} functions, {} data segments",
            module.functions.len(),
            module.data_segments.len()
        );
        Ok(module)
    }

    fn imports(&self, module: &mut wasm::Module) {
        let imports = [
            ("logInt", "log_int", vec![Type::I64]),
            ("logBool", "log_bool", vec![Type::I32]),
            ("logString", "log_str", vec![Type::I32]),
            ("assert", "assert", vec![Type::I32, Type::I32]),
        ];

        for (name, id, params) in imports.iter() {
            let mut desc = Builders::func_desc();
            desc.id(id);
            for param in params {
                desc.param(*param);
            }
            module
                .imports
                .push(wasm::Import::new("imports", name, desc.build()));
        }
        module
            .imports
            .push(wasm::Import::new("js", "mem", Builders::memory_desc(1)));
    }

    /// The value of a variable initializer, as a constant expression.
    fn constant(&mut self, literal: &Expr, ty: &ValueType) -> Vec<Instruction> {
        let mut b = ops();

        match &literal.kind {
            ExprKind::IntegerLiteral { value } => {
                b.constant(wasm_type(ty), *value);
            }
            ExprKind::BooleanLiteral { value } => {
                b.i32_const(*value as i32);
            }
            ExprKind::StringLiteral { value } => {
                b.i32_const(self.layout.string(value) as i32);
            }
            ExprKind::ListExpr { .. } => {
                // Zero length words look the same for lists and strings.
                b.i32_const(self.layout.string("") as i32);
            }
            _ => {
                b.constant(wasm_type(ty), 0);
            }
        }
        b.build()
    }

    /// `$C(args...)`: allocates an instance, initializes the attributes and runs `__init__`.
    fn constructor(&mut self, class: &str) -> wasm::Function {
        let (vtable, size, attrs, init) = {
            let layout = self.layout.class(class);
            let init = layout
                .methods
                .iter()
                .find(|m| m.name == "__init__")
                .cloned()
                .unwrap_or_else(|| panic!("Internal compiler error: {} has no __init__", class));
            (layout.vtable, layout.instance_size(), layout.attrs.clone(), init)
        };

        let mut builder = Builders::function();
        let mut b = ops();
        builder.id(layout::function_name(class));

        b.i32_const(size as i32)
            .call("alloc")
            .local_tee(".self")
            .i32_const(vtable as i32)
            .i32_store(0);
        for (slot, attr) in attrs.iter().enumerate() {
            let offset = HEADER_BYTES + slot as wasm::Size * ATTR_BYTES;
            let value = match &attr.init {
                Some(literal) => self.constant(literal, &attr.value_type),
                None => ops().constant(wasm_type(&attr.value_type), 0).build(),
            };
            b.local_get(".self")
                .append(value)
                .store(wasm_type(&attr.value_type), offset);
        }

        b.local_get(".self");
        for (i, ty) in param_types(&init.func_type).into_iter().enumerate().skip(1) {
            let name = format!("p{}", i);
            builder.named_param(&name, ty);
            b.local_get(&name);
        }
        b.call(layout::method_name(&init.def_class, "__init__"))
            .local_get(".self");

        builder
            .result_type(Some(Type::I32))
            .named_local(".self", Type::I32)
            .body(b.build())
            .build()
    }

    fn function(&mut self, name: String, func: &FuncDef) -> Result<wasm::Function, EmitError> {
        trace!("emit function {}", name);
        let return_type = func.signature().return_type.clone();
        let result = result_type(&return_type);
        self.frame = Frame::new(Some(return_type));

        let mut builder = Builders::function();
        let mut b = ops();
        builder.id(name).result_type(result);

        for (i, param) in func.params.iter().enumerate() {
            let ty = wasm_type(param.value_type());

            if func.ref_params.contains_key(&i) {
                builder.named_param(param.name(), Type::I32);
            } else if self.is_boxed(param.instance()) {
                let arg = format!("{}.arg", param.name());
                builder.named_param(&arg, ty);
                self.frame.declare(param.name(), Type::I32);
                Self::new_cell(&mut b, param.name(), ty, ops().local_get(&arg).build());
            } else {
                builder.named_param(param.name(), ty);
            }
        }

        for def in func.var_defs() {
            let ty = def.var.value_type();
            let mut value = ops();
            self.expr(&mut value, &def.value)?;
            coerce(&mut value, def.value.value_type(), ty);

            if self.is_boxed(def.var.instance()) {
                self.frame.declare(def.var.name(), Type::I32);
                Self::new_cell(&mut b, def.var.name(), wasm_type(ty), value.build());
            } else {
                self.frame.declare(def.var.name(), wasm_type(ty));
                b.append(value.build()).local_set(def.var.name());
            }
        }

        self.stmts(&mut b, &func.statements)?;
        if let Some(ty) = result {
            b.constant(ty, 0);
        }

        for (name, ty) in mem::take(&mut self.frame.locals) {
            builder.named_local(name, ty);
        }
        Ok(builder.body(b.build()).build())
    }

    /// Top-level statements, run as the start function.
    fn main(&mut self, program: &Program) -> Result<wasm::Function, EmitError> {
        self.frame = Frame::new(None);

        let mut builder = Builders::function();
        let mut b = ops();

        self.stmts(&mut b, &program.statements)?;
        for (name, ty) in mem::take(&mut self.frame.locals) {
            builder.named_local(name, ty);
        }
        Ok(builder.id("main").body(b.build()).build())
    }

    fn new_cell(b: &mut InstructionsBuilder, local: &str, ty: Type, value: Vec<Instruction>) {
        b.i32_const(ATTR_BYTES as i32)
            .call("alloc")
            .local_tee(local)
            .append(value)
            .store(ty, 0);
    }

    fn is_boxed(&self, id: VarId) -> bool {
        self.instances.get(id).is_nonlocal
    }

    fn storage(&self, name: &str, id: VarId, ty: &ValueType) -> Storage {
        let instance = self.instances.get(id);

        if instance.is_global {
            Storage::Global(name.to_string())
        } else if instance.is_nonlocal {
            Storage::Cell(name.to_string(), wasm_type(ty))
        } else {
            Storage::Local(name.to_string())
        }
    }

    fn load_var(&self, b: &mut InstructionsBuilder, storage: &Storage) {
        match storage {
            Storage::Global(name) => b.global_get(name),
            Storage::Local(name) => b.local_get(name),
            Storage::Cell(name, ty) => b.local_get(name).load(*ty, 0),
        };
    }

    fn store_var(&self, b: &mut InstructionsBuilder, storage: &Storage, value: Vec<Instruction>) {
        match storage {
            Storage::Global(name) => b.append(value).global_set(name),
            Storage::Local(name) => b.append(value).local_set(name),
            Storage::Cell(name, ty) => b.local_get(name).append(value).store(*ty, 0),
        };
    }

    fn stmts(&mut self, b: &mut InstructionsBuilder, stmts: &[Stmt]) -> Result<(), EmitError> {
        for stmt in stmts {
            self.stmt(b, stmt)?;
        }
        Ok(())
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<Vec<Instruction>, EmitError> {
        let mut b = ops();
        self.stmts(&mut b, stmts)?;
        Ok(b.build())
    }

    fn stmt(&mut self, b: &mut InstructionsBuilder, stmt: &Stmt) -> Result<(), EmitError> {
        match stmt {
            Stmt::ExprStmt(stmt) => {
                self.expr(b, &stmt.expr)?;
                b.drop();
            }
            Stmt::AssignStmt(stmt) => self.assign(b, stmt)?,
            Stmt::IfStmt(stmt) => {
                self.expr(b, &stmt.condition)?;
                let then = self.block(&stmt.then_body)?;
                let r#else = if stmt.else_body.is_empty() {
                    None
                } else {
                    Some(self.block(&stmt.else_body)?)
                };
                b.if_else(None, then, r#else);
            }
            Stmt::WhileStmt(stmt) => {
                let label = self.frame.label("while");
                let (exit, next) = (format!("{}.end", label), format!("{}.loop", label));

                let mut body = ops();
                self.expr(&mut body, &stmt.condition)?;
                body.i32_eqz().br_if(&exit);
                self.stmts(&mut body, &stmt.body)?;
                body.br(&next);

                b.block(&exit, ops().r#loop(&next, body.build()).build());
            }
            Stmt::ForStmt(stmt) => self.for_stmt(b, stmt)?,
            Stmt::ReturnStmt(stmt) => {
                let return_type = self.frame.return_type.clone();
                match (&stmt.value, return_type) {
                    (Some(value), Some(ty)) if !ty.is_none() => {
                        self.expr(b, value)?;
                        coerce(b, value.value_type(), &ty);
                    }
                    (Some(value), _) => {
                        self.expr(b, value)?;
                        b.drop();
                    }
                    (None, Some(ty)) if !ty.is_none() => {
                        b.constant(wasm_type(&ty), 0);
                    }
                    (None, _) => {}
                }
                b.r#return();
            }
        }
        Ok(())
    }

    fn assign(&mut self, b: &mut InstructionsBuilder, stmt: &AssignStmt) -> Result<(), EmitError> {
        let value_type = stmt.value.value_type();
        let mut value = ops();
        self.expr(&mut value, &stmt.value)?;

        if let [target] = stmt.targets.as_slice() {
            return self.assign_target(b, target, value.build(), value_type);
        }

        let ty = wasm_type(value_type);
        let tmp = self.frame.acquire(ty);
        b.append(value.build()).local_set(&tmp);
        for target in &stmt.targets {
            self.assign_target(b, target, ops().local_get(&tmp).build(), value_type)?;
        }
        self.frame.release(tmp, ty);
        Ok(())
    }

    fn assign_target(
        &mut self,
        b: &mut InstructionsBuilder,
        target: &Expr,
        value: Vec<Instruction>,
        value_type: &ValueType,
    ) -> Result<(), EmitError> {
        let target_type = target.value_type();
        let mut value = {
            let mut v = ops();
            v.append(value);
            v
        };
        coerce(&mut value, value_type, target_type);

        match &target.kind {
            ExprKind::Identifier { name, var_instance } => {
                let storage = self.storage(name, instance(name, *var_instance), target_type);
                self.store_var(b, &storage, value.build());
            }
            ExprKind::MemberExpr { object, member } => {
                let offset = self.attr_offset(object.value_type(), &member.name);
                self.expr(b, object)?;
                b.call("nullthrow")
                    .append(value.build())
                    .store(wasm_type(target_type), offset);
            }
            ExprKind::IndexExpr { list, index } => {
                self.expr(b, list)?;
                self.expr(b, index)?;
                b.call("list_elem")
                    .append(value.build())
                    .store(wasm_type(target_type), 0);
            }
            kind => panic!("Internal compiler error: cannot assign to {:?}", kind),
        }
        Ok(())
    }

    fn for_stmt(&mut self, b: &mut InstructionsBuilder, stmt: &ForStmt) -> Result<(), EmitError> {
        let iterable_type = stmt.iterable.value_type();
        let label = self.frame.label("for");
        let (exit, next) = (format!("{}.end", label), format!("{}.loop", label));
        self.expr(b, &stmt.iterable)?;
        let iterable = self.frame.acquire(Type::I32);
        let length = self.frame.acquire(Type::I32);
        let index = self.frame.acquire(Type::I32);
        b.local_tee(&iterable)
            .call("len")
            .local_set(&length)
            .i32_const(0)
            .local_set(&index);

        let mut element = ops();
        let element_type = if iterable_type.is_str() {
            element
                .local_get(&iterable)
                .local_get(&index)
                .i64_extend_i32_u()
                .call("str_idx");
            ValueType::str()
        } else {
            let element_type = iterable_type.element_type().cloned().unwrap_or_else(ValueType::object);
            element
                .local_get(&iterable)
                .i32_const(HEADER_BYTES as i32)
                .i32_add()
                .local_get(&index)
                .i32_const(ATTR_BYTES as i32)
                .i32_mul()
                .i32_add()
                .load(wasm_type(&element_type), 0);
            element_type
        };

        let var_type = stmt
            .identifier
            .value_type()
            .cloned()
            .unwrap_or_else(|| element_type.clone());
        coerce(&mut element, &element_type, &var_type);
        let storage = self.storage(
            &stmt.identifier.name,
            instance(&stmt.identifier.name, stmt.identifier.var_instance),
            &var_type,
        );

        let mut body = ops();
        body.local_get(&index)
            .local_get(&length)
            .i32_ge_s()
            .br_if(&exit);
        self.store_var(&mut body, &storage, element.build());
        self.stmts(&mut body, &stmt.body)?;
        body.local_get(&index)
            .i32_const(1)
            .i32_add()
            .local_set(&index)
            .br(&next);

        b.block(&exit, ops().r#loop(&next, body.build()).build());

        self.frame.release(index, Type::I32);
        self.frame.release(length, Type::I32);
        self.frame.release(iterable, Type::I32);
        Ok(())
    }

    fn attr_offset(&self, object_type: &ValueType, attr: &str) -> wasm::Size {
        let class = object_type
            .class_name()
            .unwrap_or_else(|| panic!("Internal compiler error: attribute {} of {}", attr, object_type));
        self.layout
            .class(class)
            .attr_offset(attr)
            .map(|(offset, _)| offset)
            .unwrap_or_else(|| panic!("Internal compiler error: no attribute {} in {}", attr, class))
    }

    /// Emits `expr`, leaving one value of its WASM type on the stack.
    fn expr(&mut self, b: &mut InstructionsBuilder, expr: &Expr) -> Result<(), EmitError> {
        match &expr.kind {
            ExprKind::IntegerLiteral { value } => {
                b.i64_const(*value);
            }
            ExprKind::BooleanLiteral { value } => {
                b.i32_const(*value as i32);
            }
            ExprKind::NoneLiteral => {
                b.i32_const(0);
            }
            ExprKind::StringLiteral { value } => {
                b.i32_const(self.layout.string(value) as i32);
            }
            ExprKind::Identifier { name, var_instance } => {
                let storage = self.storage(name, instance(name, *var_instance), expr.value_type());
                self.load_var(b, &storage);
            }
            ExprKind::ListExpr {
                elements,
                empty_list_type,
            } => {
                let element_type = expr
                    .value_type()
                    .element_type()
                    .or_else(|| empty_list_type.as_ref())
                    .cloned()
                    .unwrap_or_else(ValueType::object);
                let list = self.frame.acquire(Type::I32);

                b.i32_const((HEADER_BYTES + elements.len() as wasm::Size * ATTR_BYTES) as i32)
                    .call("alloc")
                    .local_tee(&list)
                    .i32_const(elements.len() as i32)
                    .i32_store(0);
                for (i, element) in elements.iter().enumerate() {
                    b.local_get(&list);
                    self.expr(b, element)?;
                    coerce(b, element.value_type(), &element_type);
                    b.store(
                        wasm_type(&element_type),
                        HEADER_BYTES + i as wasm::Size * ATTR_BYTES,
                    );
                }
                b.local_get(&list);
                self.frame.release(list, Type::I32);
            }
            ExprKind::UnaryExpr { operator, operand } => match operator {
                UnaryOperator::Neg => {
                    b.i64_const(0);
                    self.expr(b, operand)?;
                    b.i64_sub();
                }
                UnaryOperator::Not => {
                    self.expr(b, operand)?;
                    b.i32_eqz();
                }
            },
            ExprKind::BinaryExpr {
                left,
                operator,
                right,
            } => self.binary(b, expr, left, *operator, right)?,
            ExprKind::IfExpr {
                condition,
                then_expr,
                else_expr,
            } => {
                let ty = expr.value_type();
                self.expr(b, condition)?;

                let mut then = ops();
                self.expr(&mut then, then_expr)?;
                coerce(&mut then, then_expr.value_type(), ty);
                let mut r#else = ops();
                self.expr(&mut r#else, else_expr)?;
                coerce(&mut r#else, else_expr.value_type(), ty);

                b.if_else(Some(wasm_type(ty)), then.build(), Some(r#else.build()));
            }
            ExprKind::IndexExpr { list, index } => {
                let list_type = list.value_type();
                self.expr(b, list)?;
                self.expr(b, index)?;
                if list_type.is_str() {
                    b.call("str_idx");
                } else {
                    b.call("list_elem").load(wasm_type(expr.value_type()), 0);
                }
            }
            ExprKind::MemberExpr { object, member } => {
                let offset = self.attr_offset(object.value_type(), &member.name);
                self.expr(b, object)?;
                b.call("nullthrow").load(wasm_type(expr.value_type()), offset);
            }
            ExprKind::CallExpr {
                function,
                args,
                is_constructor,
                ..
            } => self.call(b, expr, function, args, *is_constructor)?,
            ExprKind::MethodCallExpr { method, args } => {
                let sig = method.func_type().clone();
                let class = method
                    .object
                    .value_type()
                    .class_name()
                    .unwrap_or_else(|| panic!("Internal compiler error: method call on a list"))
                    .to_string();
                let offset = self
                    .layout
                    .class(&class)
                    .method_offset(&method.member.name)
                    .unwrap_or_else(|| {
                        panic!(
                            "Internal compiler error: no slot for {}.{}",
                            class, method.member.name
                        )
                    });
                let receiver = self.frame.acquire(Type::I32);

                self.expr(b, &method.object)?;
                b.call("nullthrow").local_tee(&receiver);
                self.args(b, &sig, 1, args)?;
                b.local_get(&receiver)
                    .i32_load(0)
                    .i32_load(offset)
                    .call_indirect(param_types(&sig), result_type(&sig.return_type));
                if sig.return_type.is_none() {
                    b.i32_const(0);
                }
                self.frame.release(receiver, Type::I32);
            }
        }
        Ok(())
    }

    fn binary(
        &mut self,
        b: &mut InstructionsBuilder,
        expr: &Expr,
        left: &Expr,
        operator: BinaryOperator,
        right: &Expr,
    ) -> Result<(), EmitError> {
        use BinaryOperator::*;

        // Short-circuit operators evaluate the right operand conditionally.
        match operator {
            And | Or => {
                self.expr(b, left)?;
                let mut other = ops();
                self.expr(&mut other, right)?;
                let (then, r#else) = if operator == And {
                    (other.build(), ops().i32_const(0).build())
                } else {
                    (ops().i32_const(1).build(), other.build())
                };
                b.if_else(Some(Type::I32), then, Some(r#else));
                return Ok(());
            }
            Mod => {
                let (a, n) = (self.frame.acquire(Type::I64), self.frame.acquire(Type::I64));
                self.expr(b, left)?;
                b.local_set(&a);
                self.expr(b, right)?;
                b.local_set(&n)
                    .local_get(&a)
                    .local_get(&n)
                    .i64_rem_s()
                    .local_get(&n)
                    .i64_add()
                    .local_get(&n)
                    .i64_rem_s();
                self.frame.release(n, Type::I64);
                self.frame.release(a, Type::I64);
                return Ok(());
            }
            _ => {}
        }

        let operand_type = left.value_type();
        self.expr(b, left)?;
        self.expr(b, right)?;

        let instruction = match operator {
            Add if expr.value_type().is_int() => Instruction::I64Add,
            Add if expr.value_type().is_str() => {
                b.call("str_concat");
                return Ok(());
            }
            Add => {
                b.call("list_concat");
                return Ok(());
            }
            Sub => Instruction::I64Sub,
            Mul => Instruction::I64Mul,
            FloorDiv => {
                b.call("floor_div");
                return Ok(());
            }
            Eq | Ne if operand_type.is_str() => {
                b.call("str_cmp");
                if operator == Ne {
                    b.i32_eqz();
                }
                return Ok(());
            }
            Eq if operand_type.is_int() => Instruction::I64Eq,
            Ne if operand_type.is_int() => Instruction::I64Ne,
            Eq | Is => Instruction::I32Eq,
            Ne => Instruction::I32Ne,
            Lt => Instruction::I64LtS,
            Le => Instruction::I64LeS,
            Gt => Instruction::I64GtS,
            Ge => Instruction::I64GeS,
            And | Or | Mod => unreachable!(),
        };
        b.push(instruction);
        Ok(())
    }

    fn call(
        &mut self,
        b: &mut InstructionsBuilder,
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
                "int" => {
                    b.i64_const(0);
                }
                "bool" => {
                    b.i32_const(0);
                }
                "str" => {
                    b.i32_const(self.layout.string("") as i32);
                }
                class => {
                    self.args(b, &sig, 1, args)?;
                    b.call(layout::function_name(class));
                }
            }
            return Ok(());
        }

        match function.name.as_str() {
            "print" => {
                let arg = &args[0];
                let ty = arg.value_type();
                let log = match ty.class_name() {
                    Some("int") => "log_int",
                    Some("bool") => "log_bool",
                    Some("str") => "log_str",
                    _ => return Err(EmitError::UnsupportedPrint(ty.to_string())),
                };
                self.expr(b, arg)?;
                b.call(log).i32_const(0);
            }
            "len" => {
                self.expr(b, &args[0])?;
                b.call("len").i64_extend_i32_u();
            }
            "input" => {
                b.i32_const(self.layout.string("") as i32);
            }
            "__assert__" => {
                self.expr(b, &args[0])?;
                b.i32_const(expr.location.start.line as i32)
                    .call("assert")
                    .i32_const(0);
            }
            name => {
                self.args(b, &sig, 0, args)?;
                b.call(layout::function_name(name));
                if sig.return_type.is_none() {
                    b.i32_const(0);
                }
            }
        }
        Ok(())
    }

    /// Pushes `args` for the parameters of `sig` starting at `offset`. A reference parameter
    /// receives the cell of the variable it was created for, or a fresh cell.
    fn args(
        &mut self,
        b: &mut InstructionsBuilder,
        sig: &FuncType,
        offset: usize,
        args: &[Expr],
    ) -> Result<(), EmitError> {
        for (i, arg) in args.iter().enumerate() {
            let index = i + offset;
            let param_type = sig.params.get(index).unwrap_or_else(|| {
                panic!("Internal compiler error: too many arguments")
            });

            match (sig.ref_params.get(&index), &arg.kind) {
                (
                    Some(cell),
                    ExprKind::Identifier {
                        name,
                        var_instance: Some(id),
                    },
                ) if cell == id && self.is_boxed(*id) => {
                    b.local_get(name);
                }
                (Some(_), _) => {
                    let tmp = self.frame.acquire(Type::I32);
                    b.i32_const(ATTR_BYTES as i32).call("alloc").local_tee(&tmp);
                    self.expr(b, arg)?;
                    coerce(b, arg.value_type(), param_type);
                    b.store(wasm_type(param_type), 0).local_get(&tmp);
                    self.frame.release(tmp, Type::I32);
                }
                (None, _) => {
                    self.expr(b, arg)?;
                    coerce(b, arg.value_type(), param_type);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::pipeline;
    use assert_matches::assert_matches;

    fn compile(src: &str) -> Result<String, EmitError> {
        let (program, ts) = pipeline::lower(src).unwrap();
        let module = WasmEmitter::new(&ts, &program.instances).emit(&program)?;
        Ok(wasm::Printer::print(&module))
    }

    #[test]
    fn module_shell() {
        let wat = compile("x: int = 0\nx = 5\n").unwrap();

        assert!(wat.starts_with("(module (import \"imports\" \"logInt\" (func $log_int (param i64)))"));
        assert!(wat.contains("(import \"imports\" \"assert\" (func $assert (param i32) (param i32)))"));
        assert!(wat.contains("(import \"js\" \"mem\" (memory 1))"));
        assert!(wat.contains("(global $.heap (mut i32) (i32.const "));
        assert!(wat.contains("(global $x (mut i64) (i64.const 0))"));
        assert!(wat.contains("(func $main (i64.const 5) (global.set $x))"));
        assert!(wat.ends_with("(start $main))"));
    }

    #[test]
    fn python_modulo_and_floor_division() {
        let wat = compile("x: int = 7\nx = x % 3\nx = x // 2\n").unwrap();

        assert!(wat.contains(
            "(local.set $.i64.1) (local.get $.i64.0) (local.get $.i64.1) (i64.rem_s) (local.get $.i64.1) (i64.add) (local.get $.i64.1) (i64.rem_s)"
        ));
        assert!(wat.contains("(global.get $x) (i64.const 2) (call $floor_div)"));
    }

    #[test]
    fn short_circuit() {
        let wat = compile("b: bool = True\nb = b and not b\n").unwrap();

        assert!(wat.contains(
            "(global.get $b) (if (result i32) (then (global.get $b) (i32.eqz)) (else (i32.const 0)))"
        ));
    }

    #[test]
    fn assertion_passes_line() {
        let wat = compile("x: int = 1\n__assert__(x == 1)\n").unwrap();

        assert!(wat.contains("(global.get $x) (i64.const 1) (i64.eq) (i32.const 2) (call $assert) (i32.const 0) (drop)"));
    }

    #[test]
    fn strings_in_constant_pool() {
        let wat = compile("s: str = \"ab\"\ns = s + \"ab\"\nprint(s[0])\n").unwrap();

        assert_eq!(wat.matches("\"\\02\\00\\00\\00ab\"").count(), 1);
        assert!(wat.contains("(call $str_concat)"));
        assert!(wat.contains("(i64.const 0) (call $str_idx) (call $log_str)"));
    }

    #[test]
    fn print_of_object_is_rejected() {
        let err = compile("class A(object):\n    pass\nprint(A())\n").unwrap_err();

        assert_matches!(err, EmitError::UnsupportedPrint(ty) if ty == "A");
    }

    #[test]
    fn dynamic_dispatch() {
        let src = "
x: int = 0
class A(object):
    def t(self: A):
        global x
        x = 1
class B(A):
    def t(self: B):
        global x
        x = 2
c1: A = None
c1 = B()
c1.t()
__assert__(x == 2)
";
        let wat = compile(src).unwrap();

        assert!(wat.contains("(table 3 funcref)"));
        assert!(wat.contains("(elem (i32.const 0) $object.__init__ $A.t $B.t)"));
        assert!(wat.contains("(func $B (result i32) (local $.self i32) (i32.const 8) (call $alloc) (local.tee $.self) (i32.const 20) (i32.store)"));
        assert!(wat.contains(
            "(global.get $c1) (call $nullthrow) (local.tee $.i32.0) (local.get $.i32.0) (i32.load) (i32.load offset=4) (call_indirect (param i32)) (i32.const 0) (drop)"
        ));
        assert!(wat.contains("(func $B.t (param $self i32) (i64.const 2) (global.set $x))"));
    }

    #[test]
    fn nonlocal_cells() {
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
        let wat = compile(src).unwrap();

        // a lives in a cell allocated at its declaration
        assert!(wat.contains("(func $exp (param $x i64) (param $y i64) (result i64) (local $a i32) (i32.const 8) (call $alloc) (local.tee $a) (i64.const 0) (i64.store)"));
        // f receives a pointer to the cell and x by value
        assert!(wat.contains("(func $exp.f (param $i i64) (param $a i32) (param $x i64) (result i64)"));
        assert!(wat.contains("(local.get $a) (local.get $a) (i64.load) (local.get $x) (i64.mul) (i64.store)"));
        assert!(wat.contains("(local.get $y) (local.get $a) (local.get $x) (call $exp.f)"));
    }

    #[test]
    fn list_concat_and_bounds() {
        let wat = compile("x: [int] = None\nx = [1, 2, 3] + [4]\n__assert__(x[3] == 4)\n").unwrap();

        assert!(wat.contains("(i32.const 28) (call $alloc) (local.tee $.i32.0) (i32.const 3) (i32.store) (local.get $.i32.0) (i64.const 1) (i64.store offset=4)"));
        assert!(wat.contains("(call $list_concat) (global.set $x)"));
        assert!(wat.contains("(global.get $x) (i64.const 3) (call $list_elem) (i64.load)"));
    }

    #[test]
    fn empty_list_initializers() {
        let wat = compile("x: [int] = []\nx = x + [1]\n__assert__(len(x) == 1)\n").unwrap();

        assert!(wat.contains("(global $x (mut i32) (i32.const "));
        assert!(wat.contains("(global.get $x) (call $len) (i64.extend_i32_u) (i64.const 1) (i64.eq)"));
    }

    #[test]
    fn for_loop_over_list() {
        let src = "
s: int = 0
i: int = 0
for i in [1, 2]:
    s = s + i
";
        let wat = compile(src).unwrap();

        assert!(wat.contains("(local.tee $.i32.0) (call $len) (local.set $.i32.1) (i32.const 0) (local.set $.i32.2)"));
        assert!(wat.contains("(block $for.0.end (loop $for.0.loop (local.get $.i32.2) (local.get $.i32.1) (i32.ge_s) (br_if $for.0.end)"));
        assert!(wat.contains("(i64.load) (global.set $i)"));
    }

    #[test]
    fn linked_list() {
        let src = "
class Node(object):
    value: int = 0
    next: Node = None
class LinkedList(object):
    head: Node = None
    def add(self: LinkedList, v: int):
        n: Node = None
        n = Node()
        n.value = v
        n.next = self.head
        self.head = n
    def length(self: LinkedList) -> int:
        n: int = 0
        cur: Node = None
        cur = self.head
        while not (cur is None):
            n = n + 1
            cur = cur.next
        return n
l: LinkedList = None
l = LinkedList()
l.add(1)
l.add(2)
l.add(3)
__assert__(l.length() == 3)
";
        let wat = compile(src).unwrap();

        assert!(wat.contains("(func $Node (result i32) (local $.self i32) (i32.const 24) (call $alloc) (local.tee $.self)"));
        assert!(wat.contains("(local.get $.self) (i64.const 0) (i64.store offset=4) (local.get $.self) (i32.const 0) (i32.store offset=12)"));
        assert!(wat.contains("(local.get $n) (call $nullthrow) (local.get $v) (i64.store offset=4)"));
        assert!(wat.contains("(block $while.0.end (loop $while.0.loop (local.get $cur) (i32.const 0) (i32.eq) (i32.eqz) (i32.eqz) (br_if $while.0.end)"));
        assert!(wat.contains("(local.get $cur) (call $nullthrow) (i32.load offset=12) (local.set $cur)"));
        assert!(wat.contains("(call_indirect (param i32 i64))"));
        assert!(wat.contains("(call_indirect (param i32) (result i64))"));
    }
}
