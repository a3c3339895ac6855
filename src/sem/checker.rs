//! Type checking.
//!
//! Checking runs in three phases over the top-level declarations: class names first, then
//! global variables, function signatures and class members, and finally the bodies. Every
//! expression gets an inferred type; on error the checker records a diagnostic on the node
//! (at most one per node), falls back to `object` and keeps going.
use super::scope::{Binding, Environment};
use super::types::{FuncType, SymbolType, ValueType, EMPTY, NONE};
use super::typesystem::TypeSystem;
use super::SemanticAnalyzer;
use crate::syntax::*;
use log::debug;
use std::collections::HashSet;
use std::mem;

#[derive(Debug)]
pub struct TypeChecker {
    ts: TypeSystem,
    env: Environment,
    errors: Vec<SemanticError>,
    /// Declared return type of the function being checked. `None` at the top level.
    return_type: Option<ValueType>,
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticAnalyzer for TypeChecker {
    fn analyze(&mut self, program: &mut Program) {
        // Classes declared twice keep their first definition.
        let mut skipped = HashSet::new();

        for (i, decl) in program.declarations.iter_mut().enumerate() {
            if let Declaration::ClassDef(def) = decl {
                if !self.declare_class(def) {
                    skipped.insert(i);
                }
            }
        }

        for (i, decl) in program.declarations.iter_mut().enumerate() {
            match decl {
                Declaration::VarDef(def) => self.declare_var(def),
                Declaration::FuncDef(def) => self.declare_func(def),
                Declaration::ClassDef(def) if !skipped.contains(&i) => self.declare_members(def),
                _ => {}
            }
        }

        for (i, decl) in program.declarations.iter_mut().enumerate() {
            match decl {
                Declaration::VarDef(def) => self.check_var_def(def),
                Declaration::FuncDef(def) => self.check_func_body(def),
                Declaration::ClassDef(def) if !skipped.contains(&i) => {
                    for decl in &mut def.declarations {
                        if let Declaration::FuncDef(method) = decl {
                            self.check_func_body(method);
                        }
                    }
                }
                _ => {}
            }
        }

        for stmt in &mut program.statements {
            self.check_stmt(stmt);
        }

        debug!("type checking found {} errors", self.errors.len());
        program.errors.errors.append(&mut self.errors);
    }
}

impl TypeChecker {
    pub fn new() -> Self {
        Self {
            ts: TypeSystem::new(),
            env: Environment::prelude(),
            errors: vec![],
            return_type: None,
        }
    }

    pub fn type_system(&self) -> &TypeSystem {
        &self.ts
    }

    pub fn into_type_system(self) -> TypeSystem {
        self.ts
    }

    fn report<S: Into<String>>(&mut self, slot: &mut Option<String>, location: Location, message: S) {
        if slot.is_some() {
            return;
        }
        let message = message.into();

        *slot = Some(message.clone());
        self.errors.push(SemanticError { location, message });
    }

    fn report_identifier<S: Into<String>>(&mut self, ident: &mut Identifier, message: S) {
        let location = ident.location;
        self.report(&mut ident.error_msg, location, message);
    }

    // --- Declarations

    /// Registers a class name. Returns `false` if the name is already taken.
    fn declare_class(&mut self, def: &mut ClassDef) -> bool {
        let name = def.name.name.clone();

        if TypeSystem::is_builtin(&name) || self.env.get_local(&name).is_some() {
            self.report_identifier(
                &mut def.name,
                format!("Duplicate declaration of identifier: {}", name),
            );
            return false;
        }

        let superclass = def.superclass.name.clone();
        let message = if superclass == name {
            Some(format!("Cannot extend class itself: {}", name))
        } else if TypeSystem::is_special_class(&superclass) {
            Some(format!("Cannot extend special class: {}", superclass))
        } else if !self.ts.class_exists(&superclass) {
            Some(format!("Superclass not defined: {}", superclass))
        } else {
            None
        };

        let superclass = match message {
            Some(message) => {
                self.report_identifier(&mut def.superclass, message);
                "object".to_string()
            }
            None => superclass,
        };

        self.ts.add_class(&name, Some(&superclass));
        self.env.insert(name.clone(), Binding::Class(name));
        true
    }

    fn resolve_annotation(&mut self, annotation: &TypeAnnotation, slot: &mut Option<String>) -> ValueType {
        match annotation {
            TypeAnnotation::ClassType {
                class_name,
                location,
            } => {
                if class_name == NONE {
                    return ValueType::none();
                }
                if class_name == EMPTY || !self.ts.class_exists(class_name) {
                    self.report(slot, *location, format!("Unknown class: {}", class_name));
                    return ValueType::object();
                }
                ValueType::class(class_name.as_str())
            }
            TypeAnnotation::ListType { element_type, .. } => {
                ValueType::list(self.resolve_annotation(element_type, slot))
            }
        }
    }

    fn resolve_typed_var(&mut self, var: &mut TypedVar) -> ValueType {
        let annotation = var.type_annotation.clone();
        let ty = self.resolve_annotation(&annotation, &mut var.error_msg);

        var.t = Some(ty.clone());
        var.identifier.inferred_type = Some(SymbolType::Value(ty.clone()));
        ty
    }

    fn declare_var(&mut self, def: &mut VarDef) {
        let ty = self.resolve_typed_var(&mut def.var);
        let name = def.var.name().to_string();

        if !self.env.insert(name.clone(), Binding::Variable(ty)) {
            self.report_identifier(
                &mut def.var.identifier,
                format!("Duplicate declaration of identifier: {}", name),
            );
        }
    }

    fn check_var_def(&mut self, def: &mut VarDef) {
        let declared = def.var.value_type().clone();
        let value = self.check_expr(&mut def.value);

        if !self.ts.can_assign(&value, &declared) {
            let location = def.location;
            self.report(
                &mut def.error_msg,
                location,
                format!("Expected type {}; got type {}", declared, value),
            );
        }
    }

    /// Resolves the annotations of a function and records its signature on the node.
    fn signature(&mut self, func: &mut FuncDef) -> FuncType {
        let params = func
            .params
            .iter_mut()
            .map(|param| self.resolve_typed_var(param))
            .collect();
        let annotation = func.return_type.clone();
        let return_type = self.resolve_annotation(&annotation, &mut func.error_msg);

        let sig = FuncType {
            params,
            return_type,
            ref_params: func.ref_params.clone(),
            freevars: func.freevars.clone(),
        };

        func.func_type = Some(sig.clone());
        func.name.inferred_type = Some(SymbolType::Func(sig.clone()));
        sig
    }

    fn declare_func(&mut self, func: &mut FuncDef) {
        let sig = self.signature(func);
        let name = func.name.name.clone();

        if !self.env.insert(name.clone(), Binding::Function(sig)) {
            self.report_identifier(
                &mut func.name,
                format!("Duplicate declaration of identifier: {}", name),
            );
        }
    }

    fn declare_members(&mut self, def: &mut ClassDef) {
        let class = def.name.name.clone();
        let mut declared = HashSet::new();

        // attributes
        for decl in &mut def.declarations {
            if let Declaration::VarDef(attr) = decl {
                let ty = self.resolve_typed_var(&mut attr.var);
                let name = attr.var.name().to_string();

                if !declared.insert(name.clone()) {
                    self.report_identifier(
                        &mut attr.var.identifier,
                        format!("Duplicate declaration of identifier: {}", name),
                    );
                } else if self.ts.get_attr(&class, &name).is_some()
                    || self.ts.get_method(&class, &name).is_some()
                {
                    self.report_identifier(
                        &mut attr.var.identifier,
                        format!("Cannot redefine attribute: {}", name),
                    );
                } else {
                    self.ts.add_attr(&class, &name, ty, Some(attr.value.clone()));
                }

                self.check_var_def(attr);
            }
        }

        // methods
        for decl in &mut def.declarations {
            if let Declaration::FuncDef(method) = decl {
                method.is_method = true;

                let sig = self.signature(method);
                let name = method.name.name.clone();

                let has_receiver = method.params.first().map_or(false, |param| {
                    param.name() == "self" && param.t.as_ref() == Some(&ValueType::class(class.as_str()))
                });
                if !has_receiver {
                    self.report_identifier(
                        &mut method.name,
                        format!("First parameter of method must be of same class: {}", name),
                    );
                }

                if self.ts.get_attr(&class, &name).is_some() {
                    self.report_identifier(
                        &mut method.name,
                        format!("Cannot redefine attribute: {}", name),
                    );
                    continue;
                }
                if !declared.insert(name.clone()) {
                    self.report_identifier(
                        &mut method.name,
                        format!("Cannot redefine method: {}", name),
                    );
                    continue;
                }
                if let Some(inherited) = self.ts.get_method(&class, &name) {
                    if !sig.overrides(inherited) {
                        self.report_identifier(
                            &mut method.name,
                            format!("Method overridden with different type signature: {}", name),
                        );
                    }
                }

                self.ts.add_method(&class, &name, sig);
            }
        }
    }

    fn check_func_body(&mut self, func: &mut FuncDef) {
        let sig = func.signature().clone();

        self.env.push();

        for param in &mut func.params {
            let name = param.name().to_string();
            let ty = param.value_type().clone();

            if !self.env.insert(name.clone(), Binding::Variable(ty)) {
                self.report_identifier(
                    &mut param.identifier,
                    format!("Duplicate declaration of identifier: {}", name),
                );
            }
        }

        for decl in &mut func.declarations {
            self.declare_local(decl);
        }

        for decl in &mut func.declarations {
            match decl {
                Declaration::VarDef(def) => self.check_var_def(def),
                Declaration::FuncDef(def) => self.check_func_body(def),
                _ => {}
            }
        }

        let saved = mem::replace(&mut self.return_type, Some(sig.return_type.clone()));
        for stmt in &mut func.statements {
            self.check_stmt(stmt);
        }
        self.return_type = saved;

        if !self.ts.can_assign(&ValueType::none(), &sig.return_type)
            && !func.statements.iter().any(Stmt::is_return)
        {
            let name = func.name.name.clone();
            self.report_identifier(
                &mut func.name,
                format!("Missing return statement in function: {}", name),
            );
        }

        self.env.pop();
    }

    fn declare_local(&mut self, decl: &mut Declaration) {
        match decl {
            Declaration::VarDef(def) => self.declare_var(def),
            Declaration::FuncDef(def) => self.declare_func(def),
            Declaration::ClassDef(_) => {}
            Declaration::GlobalDecl(decl) => {
                let name = decl.variable.name.clone();

                match self.env.get_global(&name) {
                    Some(Binding::Variable(ty)) => {
                        let ty = ty.clone();
                        decl.variable.inferred_type = Some(SymbolType::Value(ty.clone()));
                        if !self.env.insert(name.clone(), Binding::Variable(ty)) {
                            self.report_identifier(
                                &mut decl.variable,
                                format!("Duplicate declaration of identifier: {}", name),
                            );
                        }
                    }
                    _ => self.report_identifier(
                        &mut decl.variable,
                        format!("Unknown global variable: {}", name),
                    ),
                }
            }
            Declaration::NonLocalDecl(decl) => {
                let name = decl.variable.name.clone();

                match self.env.get_enclosing(&name) {
                    Some(Binding::Variable(ty)) => {
                        let ty = ty.clone();
                        decl.variable.inferred_type = Some(SymbolType::Value(ty.clone()));
                        if !self.env.insert(name.clone(), Binding::Variable(ty)) {
                            self.report_identifier(
                                &mut decl.variable,
                                format!("Duplicate declaration of identifier: {}", name),
                            );
                        }
                    }
                    _ => self.report_identifier(
                        &mut decl.variable,
                        format!("Not a nonlocal variable: {}", name),
                    ),
                }
            }
        }
    }

    // --- Statements

    fn check_stmts(&mut self, stmts: &mut [Stmt]) -> bool {
        let mut returns = false;

        for stmt in stmts {
            self.check_stmt(stmt);
            returns |= stmt.is_return();
        }
        returns
    }

    fn check_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::ExprStmt(stmt) => {
                self.check_expr(&mut stmt.expr);
            }
            Stmt::AssignStmt(stmt) => self.check_assign(stmt),
            Stmt::IfStmt(stmt) => {
                self.check_condition(&mut stmt.condition);
                let then_returns = self.check_stmts(&mut stmt.then_body);
                let else_returns = self.check_stmts(&mut stmt.else_body);

                stmt.is_return = !stmt.then_body.is_empty()
                    && !stmt.else_body.is_empty()
                    && then_returns
                    && else_returns;
            }
            Stmt::WhileStmt(stmt) => {
                self.check_condition(&mut stmt.condition);
                stmt.is_return = self.check_stmts(&mut stmt.body);
            }
            Stmt::ForStmt(stmt) => self.check_for(stmt),
            Stmt::ReturnStmt(stmt) => self.check_return(stmt),
        }
    }

    fn check_condition(&mut self, condition: &mut Expr) {
        let ty = self.check_expr(condition);

        if !ty.is_bool() {
            let location = condition.location;
            self.report(
                &mut condition.error_msg,
                location,
                format!("Condition expression must be bool; got type {}", ty),
            );
        }
    }

    fn check_assign(&mut self, stmt: &mut AssignStmt) {
        let value = self.check_expr(&mut stmt.value);

        if stmt.targets.len() > 1 && value == ValueType::list(ValueType::none()) {
            let location = stmt.location;
            self.report(
                &mut stmt.error_msg,
                location,
                format!("Multiple assignment of {} is not supported", value),
            );
        }

        for target in &mut stmt.targets {
            if let Some(ty) = self.check_target(target) {
                if !self.ts.can_assign(&value, &ty) {
                    let location = stmt.location;
                    self.report(
                        &mut stmt.error_msg,
                        location,
                        format!("Expected type {}; got type {}", ty, value),
                    );
                }
            }
        }
    }

    /// Checks an assignment target. Returns `None` if the target cannot be assigned.
    fn check_target(&mut self, target: &mut Expr) -> Option<ValueType> {
        match &target.kind {
            ExprKind::Identifier { name, .. } => {
                let name = name.clone();
                let location = target.location;

                match self.env.get_local(&name).cloned() {
                    Some(Binding::Variable(ty)) => {
                        target.inferred_type = Some(ty.clone());
                        Some(ty)
                    }
                    _ => {
                        let message = match self.env.get(&name) {
                            Some(Binding::Variable(_)) => format!(
                                "Cannot assign to variable that is not explicitly declared in this scope: {}",
                                name
                            ),
                            _ => format!("Unknown identifier: {}", name),
                        };
                        target.inferred_type = Some(ValueType::object());
                        self.report(&mut target.error_msg, location, message);
                        None
                    }
                }
            }
            ExprKind::IndexExpr { .. } => {
                let ty = self.check_expr(target);
                let is_str = match &target.kind {
                    ExprKind::IndexExpr { list, .. } => {
                        list.inferred_type.as_ref().map_or(false, ValueType::is_str)
                    }
                    _ => false,
                };

                if is_str {
                    let location = target.location;
                    self.report(
                        &mut target.error_msg,
                        location,
                        "Cannot assign to element of immutable type str",
                    );
                    return None;
                }
                Some(ty)
            }
            _ => Some(self.check_expr(target)),
        }
    }

    fn check_for(&mut self, stmt: &mut ForStmt) {
        let iterable = self.check_expr(&mut stmt.iterable);

        let element = if iterable.is_str() {
            Some(ValueType::str())
        } else if let Some(element) = iterable.element_type() {
            Some(element.clone())
        } else {
            let location = stmt.iterable.location;
            self.report(
                &mut stmt.iterable.error_msg,
                location,
                format!("Cannot iterate over value of type {}", iterable),
            );
            None
        };

        let name = stmt.identifier.name.clone();
        match self.env.get_local(&name).cloned() {
            Some(Binding::Variable(ty)) => {
                stmt.identifier.inferred_type = Some(SymbolType::Value(ty.clone()));

                if let Some(element) = element {
                    if !self.ts.can_assign(&element, &ty) {
                        let location = stmt.location;
                        self.report(
                            &mut stmt.error_msg,
                            location,
                            format!("Expected type {}; got type {}", ty, element),
                        );
                    }
                }
            }
            _ => {
                let message = match self.env.get(&name) {
                    Some(Binding::Variable(_)) => format!(
                        "Cannot assign to variable that is not explicitly declared in this scope: {}",
                        name
                    ),
                    _ => format!("Unknown identifier: {}", name),
                };
                stmt.identifier.inferred_type = Some(SymbolType::Value(ValueType::object()));
                self.report_identifier(&mut stmt.identifier, message);
            }
        }

        stmt.is_return = self.check_stmts(&mut stmt.body);
    }

    fn check_return(&mut self, stmt: &mut ReturnStmt) {
        let value = match stmt.value {
            Some(ref mut value) => self.check_expr(value),
            None => ValueType::none(),
        };
        let location = stmt.location;

        match self.return_type.clone() {
            None => self.report(
                &mut stmt.error_msg,
                location,
                "Return statement cannot appear at the top level",
            ),
            Some(expected) => {
                if !self.ts.can_assign(&value, &expected) {
                    self.report(
                        &mut stmt.error_msg,
                        location,
                        format!("Expected type {}; got type {}", expected, value),
                    );
                }
            }
        }
    }

    // --- Expressions

    pub fn check_expr(&mut self, expr: &mut Expr) -> ValueType {
        let Expr {
            kind,
            location,
            error_msg,
            inferred_type,
        } = expr;
        let location = *location;

        let ty = match kind {
            ExprKind::IntegerLiteral { .. } => ValueType::int(),
            ExprKind::BooleanLiteral { .. } => ValueType::bool(),
            ExprKind::NoneLiteral => ValueType::none(),
            ExprKind::StringLiteral { .. } => ValueType::str(),
            ExprKind::Identifier { name, .. } => match self.env.get(name) {
                Some(Binding::Variable(ty)) => ty.clone(),
                Some(_) => {
                    let message = format!("Not a variable: {}", name);
                    self.report(error_msg, location, message);
                    ValueType::object()
                }
                None => {
                    let message = format!("Unknown identifier: {}", name);
                    self.report(error_msg, location, message);
                    ValueType::object()
                }
            },
            ExprKind::ListExpr { elements, .. } => {
                let mut element: Option<ValueType> = None;

                for e in elements.iter_mut() {
                    let ty = self.check_expr(e);
                    element = Some(match element {
                        None => ty,
                        Some(acc) => self.ts.join(&acc, &ty),
                    });
                }
                element.map_or_else(ValueType::empty, ValueType::list)
            }
            ExprKind::BinaryExpr {
                left,
                operator,
                right,
            } => {
                let l = self.check_expr(left);
                let r = self.check_expr(right);

                match self.binary_type(*operator, &l, &r) {
                    Ok(ty) => ty,
                    Err(fallback) => {
                        let message =
                            format!("Cannot use operator {} on types {} and {}", operator, l, r);
                        self.report(error_msg, location, message);
                        fallback
                    }
                }
            }
            ExprKind::UnaryExpr { operator, operand } => {
                let ty = self.check_expr(operand);
                let (expected, ok) = match operator {
                    UnaryOperator::Neg => (ValueType::int(), ty.is_int()),
                    UnaryOperator::Not => (ValueType::bool(), ty.is_bool()),
                };

                if !ok {
                    let message = format!("Cannot use operator {} on type {}", operator, ty);
                    self.report(error_msg, location, message);
                }
                expected
            }
            ExprKind::IfExpr {
                condition,
                then_expr,
                else_expr,
            } => {
                self.check_condition(condition);
                let then_type = self.check_expr(then_expr);
                let else_type = self.check_expr(else_expr);

                self.ts.join(&then_type, &else_type)
            }
            ExprKind::IndexExpr { list, index } => {
                let list_type = self.check_expr(list);
                let index_type = self.check_expr(index);

                let element = if list_type.is_str() {
                    ValueType::str()
                } else if let Some(element) = list_type.element_type() {
                    element.clone()
                } else {
                    let message = format!("Cannot index into type {}", list_type);
                    self.report(error_msg, location, message);
                    ValueType::object()
                };

                if !index_type.is_int() {
                    let message = format!("Index is of non-integer type {}", index_type);
                    self.report(error_msg, location, message);
                }
                element
            }
            ExprKind::MemberExpr { object, member } => {
                let object_type = self.check_expr(object);
                let attr = object_type
                    .class_name()
                    .and_then(|class| self.ts.get_attr(class, &member.name))
                    .map(|attr| attr.value_type.clone());

                match attr {
                    Some(ty) => {
                        member.inferred_type = Some(SymbolType::Value(ty.clone()));
                        ty
                    }
                    None => {
                        let message = format!(
                            "There is no attribute named {} in class {}",
                            member.name, object_type
                        );
                        self.report(error_msg, location, message);
                        ValueType::object()
                    }
                }
            }
            ExprKind::CallExpr {
                function,
                args,
                is_constructor,
                ..
            } => {
                let arg_types: Vec<ValueType> =
                    args.iter_mut().map(|arg| self.check_expr(arg)).collect();

                match self.env.get(&function.name).cloned() {
                    Some(Binding::Class(class)) => {
                        *is_constructor = true;

                        let init = self
                            .ts
                            .get_method(&class, "__init__")
                            .cloned()
                            .unwrap_or_else(|| {
                                FuncType::new(vec![ValueType::class(class.as_str())], ValueType::none())
                            });
                        if let Some(message) = self.check_args(&init, 1, &arg_types) {
                            self.report(error_msg, location, message);
                        }
                        function.inferred_type = Some(SymbolType::Func(init));
                        ValueType::class(class)
                    }
                    Some(Binding::Function(sig)) => {
                        if let Some(message) = self.check_args(&sig, 0, &arg_types) {
                            self.report(error_msg, location, message);
                        }
                        let return_type = sig.return_type.clone();
                        function.inferred_type = Some(SymbolType::Func(sig));
                        return_type
                    }
                    _ => {
                        let message = format!("Not a function or class: {}", function.name);
                        self.report(error_msg, location, message);
                        ValueType::object()
                    }
                }
            }
            ExprKind::MethodCallExpr { method, args } => {
                let object_type = self.check_expr(&mut method.object);
                let arg_types: Vec<ValueType> =
                    args.iter_mut().map(|arg| self.check_expr(arg)).collect();

                let class = match object_type.class_name() {
                    Some(class) if !object_type.is_none() && !object_type.is_empty() => class,
                    _ => {
                        let message = format!("Cannot call method on value of type {}", object_type);
                        self.report(error_msg, location, message);
                        return self.annotate(inferred_type, ValueType::object());
                    }
                };

                match self.ts.get_method(class, &method.member.name).cloned() {
                    Some(sig) => {
                        if let Some(message) = self.check_args(&sig, 1, &arg_types) {
                            self.report(error_msg, location, message);
                        }
                        let return_type = sig.return_type.clone();
                        method.member.inferred_type = Some(SymbolType::Func(sig.clone()));
                        method.inferred_type = Some(SymbolType::Func(sig));
                        return_type
                    }
                    None => {
                        let message = format!(
                            "There is no method named {} in class {}",
                            method.member.name, class
                        );
                        self.report(error_msg, location, message);
                        ValueType::object()
                    }
                }
            }
        };

        self.annotate(inferred_type, ty)
    }

    fn annotate(&self, slot: &mut Option<ValueType>, ty: ValueType) -> ValueType {
        *slot = Some(ty.clone());
        ty
    }

    /// The result type of a binary operation, or the fallback type if the operands do not fit.
    fn binary_type(&self, operator: BinaryOperator, l: &ValueType, r: &ValueType) -> Result<ValueType, ValueType> {
        use BinaryOperator::*;

        match operator {
            Add => {
                if l.is_int() && r.is_int() {
                    Ok(ValueType::int())
                } else if l.is_str() && r.is_str() {
                    Ok(ValueType::str())
                } else if l.is_list_like() && r.is_list_like() {
                    let element = match (l.element_type(), r.element_type()) {
                        (Some(a), Some(b)) => self.ts.join(a, b),
                        (Some(a), None) | (None, Some(a)) => a.clone(),
                        (None, None) => ValueType::object(),
                    };
                    Ok(ValueType::list(element))
                } else if l.is_int() || r.is_int() {
                    Err(ValueType::int())
                } else {
                    Err(ValueType::object())
                }
            }
            Sub | Mul | FloorDiv | Mod => {
                if l.is_int() && r.is_int() {
                    Ok(ValueType::int())
                } else {
                    Err(ValueType::int())
                }
            }
            Lt | Le | Gt | Ge => {
                if l.is_int() && r.is_int() {
                    Ok(ValueType::bool())
                } else {
                    Err(ValueType::bool())
                }
            }
            Eq | Ne => {
                if l == r && l.is_special() {
                    Ok(ValueType::bool())
                } else {
                    Err(ValueType::bool())
                }
            }
            Is => {
                if !l.is_special() && !r.is_special() {
                    Ok(ValueType::bool())
                } else {
                    Err(ValueType::bool())
                }
            }
            And | Or => {
                if l.is_bool() && r.is_bool() {
                    Ok(ValueType::bool())
                } else {
                    Err(ValueType::bool())
                }
            }
        }
    }

    /// Checks call arguments against `sig`, skipping `offset` leading (receiver) parameters.
    fn check_args(&self, sig: &FuncType, offset: usize, args: &[ValueType]) -> Option<String> {
        let expected = sig.params.len().saturating_sub(offset);

        if args.len() != expected {
            return Some(format!("Expected {} arguments; got {}", expected, args.len()));
        }

        for (i, arg) in args.iter().enumerate() {
            let param = &sig.params[i + offset];
            if !self.ts.can_assign(arg, param) {
                return Some(format!(
                    "Expected type {}; got type {} in parameter {}",
                    param,
                    arg,
                    i + offset
                ));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_string;
    use assert_matches::assert_matches;

    fn analyze(src: &str) -> Program {
        let mut program = parse_string(src).unwrap();
        let mut checker = TypeChecker::new();

        checker.analyze(&mut program);
        program
    }

    fn messages(src: &str) -> Vec<String> {
        analyze(src)
            .errors
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    fn first_expr_type(program: &Program) -> ValueType {
        match &program.statements[0] {
            Stmt::ExprStmt(stmt) => stmt.expr.value_type().clone(),
            Stmt::AssignStmt(stmt) => stmt.value.value_type().clone(),
            stmt => panic!("unexpected statement {:?}", stmt),
        }
    }

    #[test]
    fn well_typed_program() {
        let src = "
class A(object):
    x: int = 1
    def get(self: A) -> int:
        return self.x
class B(A):
    def get(self: B) -> int:
        return 2
a: A = None
n: int = 0
a = B()
n = a.get() + a.x
print(n)
";
        let program = analyze(src);
        assert!(program.errors.errors.is_empty(), "{:?}", program.errors.errors);
    }

    #[test]
    fn literals_and_lists() {
        assert_eq!(first_expr_type(&analyze("1 + 2\n")), ValueType::int());
        assert_eq!(first_expr_type(&analyze("\"a\" + \"b\"\n")), ValueType::str());
        assert_eq!(first_expr_type(&analyze("[]\n")), ValueType::empty());
        assert_eq!(
            first_expr_type(&analyze("[1, 2]\n")),
            ValueType::list(ValueType::int())
        );
        assert_eq!(
            first_expr_type(&analyze("[1, None]\n")),
            ValueType::list(ValueType::object())
        );
        assert_eq!(
            first_expr_type(&analyze("[1] + []\n")),
            ValueType::list(ValueType::int())
        );
        assert_eq!(first_expr_type(&analyze("\"abc\"[0]\n")), ValueType::str());
        assert_eq!(first_expr_type(&analyze("1 if True else None\n")), ValueType::object());
    }

    #[test]
    fn operator_errors() {
        assert_eq!(
            messages("1 + \"a\"\n"),
            vec!["Cannot use operator + on types int and str"]
        );
        assert_eq!(messages("not 1\n"), vec!["Cannot use operator not on type int"]);
        assert_eq!(
            messages("1 == True\n"),
            vec!["Cannot use operator == on types int and bool"]
        );
        assert_eq!(messages("1 is 1\n"), vec!["Cannot use operator is on types int and int"]);
        assert_eq!(messages("None is None\n"), Vec::<String>::new());
    }

    #[test]
    fn error_falls_back_to_object() {
        let program = analyze("x + 1\n");

        assert_eq!(
            program.errors.errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>(),
            vec!["Unknown identifier: x", "Cannot use operator + on types object and int"]
        );
        assert_matches!(&program.statements[0], Stmt::ExprStmt(stmt) => {
            assert!(stmt.expr.error_msg.is_some());
        });
    }

    #[test]
    fn assignment() {
        assert_eq!(messages("x: int = 1\nx = True\n"), vec!["Expected type int; got type bool"]);
        assert_eq!(messages("x: str = None\n"), vec!["Expected type str; got type <None>"]);
        assert_eq!(
            messages("x: str = \"a\"\nx[0] = \"b\"\n"),
            vec!["Cannot assign to element of immutable type str"]
        );
        assert_eq!(
            messages("x: [[int]] = None\ny: [[int]] = None\nx = y = [None]\n"),
            vec!["Multiple assignment of [<None>] is not supported"]
        );
        assert_eq!(
            messages("x: int = 0\ndef f():\n    x = 1\n"),
            vec!["Cannot assign to variable that is not explicitly declared in this scope: x"]
        );
        assert!(messages("x: int = 0\ndef f():\n    global x\n    x = 1\n").is_empty());
        assert!(messages("x: [int] = None\nx = []\nx = [1]\n").is_empty());
    }

    #[test]
    fn list_branches_join_elementwise() {
        let src = "
class A(object):
    pass
class B(A):
    pass
class C(A):
    pass
a: [A] = None
b: [B] = None
c: [C] = None
a = b if True else c
";
        assert!(messages(src).is_empty());
        assert_eq!(
            first_expr_type(&analyze("[[1]] + [[True]]\n")),
            ValueType::list(ValueType::list(ValueType::object()))
        );
    }

    #[test]
    fn conditions_and_loops() {
        assert_eq!(
            messages("if 1:\n    pass\n"),
            vec!["Condition expression must be bool; got type int"]
        );
        assert_eq!(
            messages("x: int = 0\nfor x in 5:\n    pass\n"),
            vec!["Cannot iterate over value of type int"]
        );
        assert_eq!(
            messages("x: int = 0\nfor x in \"abc\":\n    pass\n"),
            vec!["Expected type int; got type str"]
        );
        assert!(messages("x: str = \"\"\nfor x in \"abc\":\n    print(x)\n").is_empty());
    }

    #[test]
    fn calls() {
        assert_eq!(
            messages("def f(a: int) -> int:\n    return a\nf(1, 2)\n"),
            vec!["Expected 1 arguments; got 2"]
        );
        assert_eq!(
            messages("def f(a: int) -> int:\n    return a\nf(True)\n"),
            vec!["Expected type int; got type bool in parameter 0"]
        );
        assert_eq!(messages("x: int = 0\nx(1)\n"), vec!["Not a function or class: x"]);
        assert_eq!(
            messages("class A(object):\n    pass\nA().f()\n"),
            vec!["There is no method named f in class A"]
        );
        assert_eq!(
            messages("class A(object):\n    pass\nA().y\n"),
            vec!["There is no attribute named y in class A"]
        );
        assert_eq!(messages("x: int = 0\nx.f()\n"), vec!["There is no method named f in class int"]);
        assert_eq!(
            messages("x: [int] = None\nx.f()\n"),
            vec!["Cannot call method on value of type [int]"]
        );
        assert!(messages("print(len([1, 2]))\nprint(input())\n").is_empty());
    }

    #[test]
    fn constructor() {
        let program = analyze("class A(object):\n    pass\nA()\n");

        assert!(program.errors.errors.is_empty());
        assert_matches!(&program.statements[0], Stmt::ExprStmt(stmt) => {
            assert_matches!(&stmt.expr.kind, ExprKind::CallExpr { is_constructor: true, function, .. } => {
                assert_matches!(function.func_type(), Some(sig) if sig.params.len() == 1);
            });
            assert_eq!(stmt.expr.value_type(), &ValueType::class("A"));
        });
    }

    #[test]
    fn class_errors() {
        assert_eq!(
            messages("class A(int):\n    pass\n"),
            vec!["Cannot extend special class: int"]
        );
        assert_eq!(
            messages("class A(A):\n    pass\n"),
            vec!["Cannot extend class itself: A"]
        );
        assert_eq!(
            messages("class A(B):\n    pass\nclass B(object):\n    pass\n"),
            vec!["Superclass not defined: B"]
        );
        assert_eq!(
            messages("class A(object):\n    x: int = 0\nclass B(A):\n    x: int = 1\n"),
            vec!["Cannot redefine attribute: x"]
        );
        assert_eq!(
            messages(
                "class A(object):\n    def f(self: A) -> int:\n        return 0\nclass B(A):\n    def f(self: B) -> bool:\n        return True\n"
            ),
            vec!["Method overridden with different type signature: f"]
        );
        assert_eq!(
            messages("class A(object):\n    def f(x: int):\n        pass\n"),
            vec!["First parameter of method must be of same class: f"]
        );
        assert_eq!(
            messages("class A(object):\n    x: int = 0\n    def x(self: A):\n        pass\n"),
            vec!["Cannot redefine attribute: x"]
        );
        assert_eq!(
            messages("x: int = 0\nclass x(object):\n    pass\n"),
            vec!["Duplicate declaration of identifier: x"]
        );
        assert_eq!(messages("x: Foo = None\n"), vec!["Unknown class: Foo"]);
    }

    #[test]
    fn functions() {
        assert_eq!(
            messages("def f() -> int:\n    pass\n"),
            vec!["Missing return statement in function: f"]
        );
        assert!(messages(
            "def f(x: bool) -> int:\n    if x:\n        return 1\n    else:\n        return 2\n"
        )
        .is_empty());
        assert_eq!(
            messages("def f(x: bool) -> int:\n    if x:\n        return 1\n"),
            vec!["Missing return statement in function: f"]
        );
        assert!(messages("def f() -> object:\n    pass\n").is_empty());
        assert_eq!(
            messages("return 1\n"),
            vec!["Return statement cannot appear at the top level"]
        );
        assert_eq!(
            messages("def f(a: int, a: int):\n    pass\n"),
            vec!["Duplicate declaration of identifier: a"]
        );
        assert_eq!(
            messages("def f():\n    global y\n    pass\n"),
            vec!["Unknown global variable: y"]
        );
        assert_eq!(
            messages("x: int = 0\ndef f():\n    nonlocal x\n    pass\n"),
            vec!["Not a nonlocal variable: x"]
        );
    }

    #[test]
    fn nested_functions() {
        let src = "
def outer(a: int) -> int:
    b: int = 0
    def inner() -> int:
        nonlocal b
        b = a + 1
        return b
    return inner()
print(outer(1))
";
        assert!(messages(src).is_empty());
    }
}
