use super::types::ValueType;
use super::SemanticAnalyzer;
use crate::syntax::*;
use log::debug;
use std::mem;

/// Chooses an element type for every empty list literal from the type expected where it
/// appears: `x: [int] = []` makes an `[int]`. Without a list context the element type is
/// `object`.
#[derive(Debug, Default)]
pub struct EmptyListTyper {
    typed: usize,
}

impl SemanticAnalyzer for EmptyListTyper {
    fn analyze(&mut self, program: &mut Program) {
        for decl in &mut program.declarations {
            match decl {
                Declaration::VarDef(def) => self.var_def(def),
                Declaration::FuncDef(func) => self.function(func),
                Declaration::ClassDef(class) => {
                    for decl in &mut class.declarations {
                        match decl {
                            Declaration::VarDef(def) => self.var_def(def),
                            Declaration::FuncDef(method) => self.function(method),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        self.stmts(&mut program.statements, None);

        debug!("typed {} empty lists", self.typed);
    }
}

impl EmptyListTyper {
    pub fn new() -> Self {
        Self::default()
    }

    fn var_def(&mut self, def: &mut VarDef) {
        let expected = def.var.value_type().clone();
        self.expr(&mut def.value, Some(&expected));
    }

    fn function(&mut self, func: &mut FuncDef) {
        for decl in &mut func.declarations {
            match decl {
                Declaration::VarDef(def) => self.var_def(def),
                Declaration::FuncDef(nested) => self.function(nested),
                _ => {}
            }
        }

        let return_type = func.signature().return_type.clone();
        self.stmts(&mut func.statements, Some(&return_type));
    }

    fn stmts(&mut self, stmts: &mut Vec<Stmt>, return_type: Option<&ValueType>) {
        for stmt in mem::take(stmts) {
            match stmt {
                Stmt::AssignStmt(assign) if assign.targets.len() > 1 && is_empty_list(&assign.value) => {
                    for target in assign.targets {
                        stmts.push(Stmt::AssignStmt(AssignStmt {
                            location: assign.location,
                            error_msg: None,
                            targets: vec![target],
                            value: assign.value.clone(),
                        }));
                    }
                }
                stmt => stmts.push(stmt),
            }
        }

        for stmt in stmts {
            self.stmt(stmt, return_type);
        }
    }

    fn stmt(&mut self, stmt: &mut Stmt, return_type: Option<&ValueType>) {
        match stmt {
            Stmt::AssignStmt(stmt) => {
                for target in &mut stmt.targets {
                    self.expr(target, None);
                }
                let expected = stmt.targets.first().and_then(|t| t.inferred_type.clone());
                self.expr(&mut stmt.value, expected.as_ref());
            }
            Stmt::IfStmt(stmt) => {
                self.expr(&mut stmt.condition, None);
                self.stmts(&mut stmt.then_body, return_type);
                self.stmts(&mut stmt.else_body, return_type);
            }
            Stmt::WhileStmt(stmt) => {
                self.expr(&mut stmt.condition, None);
                self.stmts(&mut stmt.body, return_type);
            }
            Stmt::ForStmt(stmt) => {
                self.expr(&mut stmt.iterable, None);
                self.stmts(&mut stmt.body, return_type);
            }
            Stmt::ReturnStmt(stmt) => {
                if let Some(ref mut value) = stmt.value {
                    self.expr(value, return_type);
                }
            }
            Stmt::ExprStmt(stmt) => self.expr(&mut stmt.expr, None),
        }
    }

    fn expr(&mut self, expr: &mut Expr, expected: Option<&ValueType>) {
        match &mut expr.kind {
            ExprKind::ListExpr {
                elements,
                empty_list_type,
            } => {
                if elements.is_empty() {
                    let element = expected
                        .and_then(ValueType::element_type)
                        .cloned()
                        .unwrap_or_else(ValueType::object);

                    *empty_list_type = Some(element);
                    self.typed += 1;
                } else {
                    let element = expected.and_then(ValueType::element_type);
                    for e in elements {
                        self.expr(e, element);
                    }
                }
            }
            ExprKind::BinaryExpr {
                left,
                operator,
                right,
            } => {
                let expected = match operator {
                    BinaryOperator::Add => expected,
                    _ => None,
                };
                self.expr(left, expected);
                self.expr(right, expected);
            }
            ExprKind::UnaryExpr { operand, .. } => self.expr(operand, None),
            ExprKind::IfExpr {
                condition,
                then_expr,
                else_expr,
            } => {
                self.expr(condition, None);
                self.expr(then_expr, expected);
                self.expr(else_expr, expected);
            }
            ExprKind::IndexExpr { list, index } => {
                self.expr(list, None);
                self.expr(index, None);
            }
            ExprKind::MemberExpr { object, .. } => self.expr(object, None),
            ExprKind::CallExpr {
                function,
                args,
                is_constructor,
                ..
            } => {
                let offset = if *is_constructor { 1 } else { 0 };
                let params = function
                    .func_type()
                    .map(|sig| sig.params.clone())
                    .unwrap_or_default();
                self.args(args, &params, offset);
            }
            ExprKind::MethodCallExpr { method, args } => {
                self.expr(&mut method.object, None);
                let params = method.func_type().params.clone();
                self.args(args, &params, 1);
            }
            ExprKind::IntegerLiteral { .. }
            | ExprKind::BooleanLiteral { .. }
            | ExprKind::NoneLiteral
            | ExprKind::StringLiteral { .. }
            | ExprKind::Identifier { .. } => {}
        }
    }

    fn args(&mut self, args: &mut [Expr], params: &[ValueType], offset: usize) {
        for (i, arg) in args.iter_mut().enumerate() {
            self.expr(arg, params.get(i + offset));
        }
    }
}

fn is_empty_list(expr: &Expr) -> bool {
    matches!(&expr.kind, ExprKind::ListExpr { elements, .. } if elements.is_empty())
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
        EmptyListTyper::new().analyze(&mut program);
        program
    }

    fn empty_type(expr: &Expr) -> Option<&ValueType> {
        match &expr.kind {
            ExprKind::ListExpr {
                empty_list_type, ..
            } => empty_list_type.as_ref(),
            kind => panic!("unexpected {:?}", kind),
        }
    }

    #[test]
    fn var_def_and_assignment() {
        let program = analyze("x: [int] = []\ny: [bool] = None\ny = []\nx = [] if True else x\n");

        let x = program.var_defs().next().unwrap();
        assert_eq!(empty_type(&x.value), Some(&ValueType::int()));
        assert_matches!(&program.statements[0], Stmt::AssignStmt(stmt) => {
            assert_eq!(empty_type(&stmt.value), Some(&ValueType::bool()));
        });
        assert_matches!(&program.statements[1], Stmt::AssignStmt(stmt) => {
            assert_matches!(&stmt.value.kind, ExprKind::IfExpr { then_expr, .. } => {
                assert_eq!(empty_type(then_expr), Some(&ValueType::int()));
            });
        });
    }

    #[test]
    fn concatenation() {
        let program = analyze("x: [int] = None\nx = x + []\n");

        assert_matches!(&program.statements[0], Stmt::AssignStmt(stmt) => {
            assert_matches!(&stmt.value.kind, ExprKind::BinaryExpr { right, .. } => {
                assert_eq!(empty_type(right), Some(&ValueType::int()));
            });
        });
    }

    #[test]
    fn arguments_and_returns() {
        let src = "
class A(object):
    def m(self: A, ys: [A]) -> [bool]:
        return []
def f(zs: [int]) -> int:
    return 0
f([])
A().m([])
len([])
";
        let program = analyze(src);

        let class = program.class_defs().next().unwrap();
        let m = class.methods().next().unwrap();
        assert_matches!(&m.statements[0], Stmt::ReturnStmt(ReturnStmt { value: Some(value), .. }) => {
            assert_eq!(empty_type(value), Some(&ValueType::bool()));
        });

        assert_matches!(&program.statements[0], Stmt::ExprStmt(stmt) => {
            assert_matches!(&stmt.expr.kind, ExprKind::CallExpr { args, .. } => {
                assert_eq!(empty_type(&args[0]), Some(&ValueType::int()));
            });
        });
        assert_matches!(&program.statements[1], Stmt::ExprStmt(stmt) => {
            assert_matches!(&stmt.expr.kind, ExprKind::MethodCallExpr { args, .. } => {
                assert_eq!(empty_type(&args[0]), Some(&ValueType::class("A")));
            });
        });
        assert_matches!(&program.statements[2], Stmt::ExprStmt(stmt) => {
            assert_matches!(&stmt.expr.kind, ExprKind::CallExpr { args, .. } => {
                assert_eq!(empty_type(&args[0]), Some(&ValueType::object()));
            });
        });
    }

    #[test]
    fn multiple_assignment_is_split() {
        let program = analyze("x: [int] = None\ny: [str] = None\nx = y = []\n");

        assert_eq!(program.statements.len(), 2);
        assert_matches!(&program.statements[0], Stmt::AssignStmt(stmt) => {
            assert_eq!(stmt.targets.len(), 1);
            assert_eq!(empty_type(&stmt.value), Some(&ValueType::int()));
        });
        assert_matches!(&program.statements[1], Stmt::AssignStmt(stmt) => {
            assert_eq!(empty_type(&stmt.value), Some(&ValueType::str()));
        });
    }
}
