//! Mutable traversal over the syntax tree.
//!
//! A pass overrides the `visit_*` hooks it cares about and calls the matching `walk_*`
//! function to continue into the children.
use super::tree::*;

pub trait VisitorMut {
    fn visit_program_mut(&mut self, program: &mut Program) {
        walk_program_mut(self, program);
    }

    fn visit_declaration_mut(&mut self, decl: &mut Declaration) {
        walk_declaration_mut(self, decl);
    }

    fn visit_func_def_mut(&mut self, func: &mut FuncDef) {
        walk_func_def_mut(self, func);
    }

    fn visit_typed_var_mut(&mut self, var: &mut TypedVar) {
        self.visit_identifier_mut(&mut var.identifier);
    }

    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) {
        walk_stmt_mut(self, stmt);
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
    }

    /// Identifiers outside of expressions: declared names, callees, members and loop targets.
    fn visit_identifier_mut(&mut self, _ident: &mut Identifier) {}
}

pub fn walk_program_mut<V: VisitorMut + ?Sized>(visitor: &mut V, program: &mut Program) {
    for decl in &mut program.declarations {
        visitor.visit_declaration_mut(decl);
    }
    for stmt in &mut program.statements {
        visitor.visit_stmt_mut(stmt);
    }
}

pub fn walk_declaration_mut<V: VisitorMut + ?Sized>(visitor: &mut V, decl: &mut Declaration) {
    match decl {
        Declaration::VarDef(def) => {
            visitor.visit_typed_var_mut(&mut def.var);
            visitor.visit_expr_mut(&mut def.value);
        }
        Declaration::FuncDef(def) => visitor.visit_func_def_mut(def),
        Declaration::ClassDef(def) => {
            visitor.visit_identifier_mut(&mut def.name);
            visitor.visit_identifier_mut(&mut def.superclass);
            for decl in &mut def.declarations {
                visitor.visit_declaration_mut(decl);
            }
        }
        Declaration::GlobalDecl(decl) => visitor.visit_identifier_mut(&mut decl.variable),
        Declaration::NonLocalDecl(decl) => visitor.visit_identifier_mut(&mut decl.variable),
    }
}

pub fn walk_func_def_mut<V: VisitorMut + ?Sized>(visitor: &mut V, func: &mut FuncDef) {
    visitor.visit_identifier_mut(&mut func.name);
    for param in &mut func.params {
        visitor.visit_typed_var_mut(param);
    }
    for decl in &mut func.declarations {
        visitor.visit_declaration_mut(decl);
    }
    for stmt in &mut func.statements {
        visitor.visit_stmt_mut(stmt);
    }
}

pub fn walk_stmts_mut<V: VisitorMut + ?Sized>(visitor: &mut V, stmts: &mut [Stmt]) {
    for stmt in stmts {
        visitor.visit_stmt_mut(stmt);
    }
}

pub fn walk_stmt_mut<V: VisitorMut + ?Sized>(visitor: &mut V, stmt: &mut Stmt) {
    match stmt {
        Stmt::AssignStmt(stmt) => {
            for target in &mut stmt.targets {
                visitor.visit_expr_mut(target);
            }
            visitor.visit_expr_mut(&mut stmt.value);
        }
        Stmt::IfStmt(stmt) => {
            visitor.visit_expr_mut(&mut stmt.condition);
            walk_stmts_mut(visitor, &mut stmt.then_body);
            walk_stmts_mut(visitor, &mut stmt.else_body);
        }
        Stmt::WhileStmt(stmt) => {
            visitor.visit_expr_mut(&mut stmt.condition);
            walk_stmts_mut(visitor, &mut stmt.body);
        }
        Stmt::ForStmt(stmt) => {
            visitor.visit_identifier_mut(&mut stmt.identifier);
            visitor.visit_expr_mut(&mut stmt.iterable);
            walk_stmts_mut(visitor, &mut stmt.body);
        }
        Stmt::ReturnStmt(stmt) => {
            if let Some(ref mut value) = stmt.value {
                visitor.visit_expr_mut(value);
            }
        }
        Stmt::ExprStmt(stmt) => visitor.visit_expr_mut(&mut stmt.expr),
    }
}

pub fn walk_expr_mut<V: VisitorMut + ?Sized>(visitor: &mut V, expr: &mut Expr) {
    match &mut expr.kind {
        ExprKind::IntegerLiteral { .. }
        | ExprKind::BooleanLiteral { .. }
        | ExprKind::NoneLiteral
        | ExprKind::StringLiteral { .. }
        | ExprKind::Identifier { .. } => {}
        ExprKind::ListExpr { elements, .. } => {
            for element in elements {
                visitor.visit_expr_mut(element);
            }
        }
        ExprKind::BinaryExpr { left, right, .. } => {
            visitor.visit_expr_mut(left);
            visitor.visit_expr_mut(right);
        }
        ExprKind::UnaryExpr { operand, .. } => visitor.visit_expr_mut(operand),
        ExprKind::IfExpr {
            condition,
            then_expr,
            else_expr,
        } => {
            visitor.visit_expr_mut(condition);
            visitor.visit_expr_mut(then_expr);
            visitor.visit_expr_mut(else_expr);
        }
        ExprKind::IndexExpr { list, index } => {
            visitor.visit_expr_mut(list);
            visitor.visit_expr_mut(index);
        }
        ExprKind::MemberExpr { object, member } => {
            visitor.visit_expr_mut(object);
            visitor.visit_identifier_mut(member);
        }
        ExprKind::CallExpr { function, args, .. } => {
            visitor.visit_identifier_mut(function);
            for arg in args {
                visitor.visit_expr_mut(arg);
            }
        }
        ExprKind::MethodCallExpr { method, args } => {
            visitor.visit_expr_mut(&mut method.object);
            visitor.visit_identifier_mut(&mut method.member);
            for arg in args {
                visitor.visit_expr_mut(arg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_string;

    #[derive(Default)]
    struct IdentifierCounter {
        expressions: usize,
        identifiers: usize,
    }

    impl VisitorMut for IdentifierCounter {
        fn visit_expr_mut(&mut self, expr: &mut Expr) {
            if let ExprKind::Identifier { .. } = expr.kind {
                self.expressions += 1;
            }
            walk_expr_mut(self, expr);
        }

        fn visit_identifier_mut(&mut self, _ident: &mut Identifier) {
            self.identifiers += 1;
        }
    }

    #[test]
    fn counts_identifiers() {
        let mut program = parse_string(
            "def f(a: int) -> int:\n    return a + b\nfor x in y:\n    print(x.z)\n",
        )
        .unwrap();
        let mut counter = IdentifierCounter::default();

        counter.visit_program_mut(&mut program);

        // a, b, y, x
        assert_eq!(counter.expressions, 4);
        // f, a (param), x (loop target), print, z
        assert_eq!(counter.identifiers, 5);
    }
}
