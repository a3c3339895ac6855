use super::errors::ParseError;
use super::tokenizer::{Position, Token, TokenKind, Tokenizer};
use super::tree::*;
use crate::sem::types::NONE;
use log::debug;
use std::collections::{BTreeMap, VecDeque};

/// Where a declaration appears. Affects what is allowed in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    TopLevel,
    Function,
    Class,
}

#[derive(Debug)]
pub struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    lookahead: VecDeque<Token>,
    /// End of the most recently consumed token.
    last_end: Position,
}

pub fn parse_string<S: AsRef<str> + ?Sized>(src: &S) -> Result<Program, ParseError> {
    Parser::new(src.as_ref()).parse()
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            tokenizer: Tokenizer::from_string(src),
            lookahead: VecDeque::new(),
            last_end: Position::default(),
        }
    }

    pub fn parse(&mut self) -> Result<Program, ParseError> {
        let start = Position::default();
        let mut declarations = vec![];
        let mut statements = vec![];

        loop {
            match self.peek_kind()? {
                TokenKind::Eos => break,
                TokenKind::Newline => {
                    self.next_token()?;
                    continue;
                }
                _ => {}
            }

            if self.is_declaration_start(Context::TopLevel)? {
                if !statements.is_empty() {
                    return Err(self.declaration_after_statement()?);
                }
                declarations.push(self.parse_declaration(Context::TopLevel)?);
            } else if let Some(stmt) = self.parse_stmt()? {
                statements.push(stmt);
            }
        }

        let program = Program {
            location: Location::new(start, self.last_end),
            declarations,
            statements,
            errors: Errors::default(),
            instances: VarInstances::default(),
        };

        debug!(
            "parsed {} declarations and {} statements",
            program.declarations.len(),
            program.statements.len()
        );
        Ok(program)
    }

    fn declaration_after_statement(&mut self) -> Result<ParseError, ParseError> {
        let position = self.peek()?.start;
        Ok(ParseError::semantic_error(
            position,
            "All declarations must come before statements",
        ))
    }

    fn is_declaration_start(&mut self, context: Context) -> Result<bool, ParseError> {
        let is_decl = match self.peek_kind()? {
            TokenKind::Def | TokenKind::Class => true,
            TokenKind::Global | TokenKind::Nonlocal => context == Context::Function,
            TokenKind::Identifier(_) => self.peek_nth_kind(1)? == &TokenKind::Char(':'),
            _ => false,
        };

        Ok(is_decl)
    }

    // --- Declarations

    fn parse_declaration(&mut self, context: Context) -> Result<Declaration, ParseError> {
        let decl = match self.peek_kind()? {
            TokenKind::Def => Declaration::FuncDef(self.parse_func_def(context)?),
            TokenKind::Class => {
                if context != Context::TopLevel {
                    let position = self.peek()?.start;
                    return Err(ParseError::semantic_error(
                        position,
                        "Classes can only be declared at the top level",
                    ));
                }
                Declaration::ClassDef(self.parse_class_def()?)
            }
            TokenKind::Global => {
                let start = self.next_token()?.start;
                let variable = self.parse_identifier()?;
                self.expect_newline()?;

                Declaration::GlobalDecl(GlobalDecl {
                    location: Location::new(start, variable.location.end),
                    error_msg: None,
                    variable,
                })
            }
            TokenKind::Nonlocal => {
                let start = self.next_token()?.start;
                let variable = self.parse_identifier()?;
                self.expect_newline()?;

                Declaration::NonLocalDecl(NonLocalDecl {
                    location: Location::new(start, variable.location.end),
                    error_msg: None,
                    variable,
                })
            }
            _ => Declaration::VarDef(self.parse_var_def(context)?),
        };
        Ok(decl)
    }

    fn parse_var_def(&mut self, context: Context) -> Result<VarDef, ParseError> {
        let var = self.parse_typed_var()?;
        self.expect_char('=')?;
        let value = self.parse_expr()?;

        if !value.is_literal() {
            let message = if context == Context::TopLevel {
                "Global variables can only be initialized with literals"
            } else {
                "Variables can only be initialized with literals"
            };
            return Err(ParseError::semantic_error(value.location.start, message));
        }
        self.expect_newline()?;

        Ok(VarDef {
            location: Location::new(var.location.start, value.location.end),
            error_msg: None,
            var,
            value,
            is_attr: context == Context::Class,
        })
    }

    fn parse_typed_var(&mut self) -> Result<TypedVar, ParseError> {
        let identifier = self.parse_identifier()?;
        self.expect_char(':')?;
        let type_annotation = self.parse_type_annotation()?;

        Ok(TypedVar {
            location: Location::new(identifier.location.start, type_annotation.location().end),
            error_msg: None,
            identifier,
            type_annotation,
            t: None,
            var_instance: None,
        })
    }

    fn parse_type_annotation(&mut self) -> Result<TypeAnnotation, ParseError> {
        let token = self.next_token()?;
        let location = Location::new(token.start, token.end);

        match &token.kind {
            TokenKind::Identifier(class_name) | TokenKind::String(class_name) => {
                Ok(TypeAnnotation::ClassType {
                    location,
                    class_name: class_name.clone(),
                })
            }
            TokenKind::None => Ok(TypeAnnotation::ClassType {
                location,
                class_name: NONE.to_string(),
            }),
            TokenKind::Char('[') => {
                let element_type = self.parse_type_annotation()?;
                let end = self.expect_char(']')?.end;

                Ok(TypeAnnotation::ListType {
                    location: Location::new(token.start, end),
                    element_type: Box::new(element_type),
                })
            }
            _ => Err(ParseError::mismatch_token(&token, "type")),
        }
    }

    fn parse_func_def(&mut self, context: Context) -> Result<FuncDef, ParseError> {
        let start = self.expect_token(TokenKind::Def, "def")?.start;
        let name = self.parse_identifier()?;

        // parameters
        self.expect_char('(')?;
        let mut params = vec![];
        while self.peek_kind()? != &TokenKind::Char(')') {
            params.push(self.parse_typed_var()?);
            if !self.match_token(&TokenKind::Char(','))? {
                break;
            }
        }
        let close = self.expect_char(')')?;

        // return type
        let return_type = if self.match_token(&TokenKind::Arrow)? {
            let annotation = self.parse_type_annotation()?;
            if context == Context::Class && name.name == "__init__" {
                return Err(ParseError::semantic_error(
                    annotation.location().start,
                    "__init__ cannot have a return type",
                ));
            }
            annotation
        } else {
            TypeAnnotation::ClassType {
                location: Location::new(close.end, close.end),
                class_name: NONE.to_string(),
            }
        };

        self.expect_char(':')?;
        let (declarations, statements) = self.parse_func_body()?;

        debug!("parsed function {}", name.name);
        Ok(FuncDef {
            location: Location::new(start, self.last_end),
            error_msg: None,
            name,
            params,
            return_type,
            declarations,
            statements,
            is_method: context == Context::Class,
            func_type: None,
            freevars: vec![],
            ref_params: BTreeMap::new(),
        })
    }

    fn parse_func_body(&mut self) -> Result<(Vec<Declaration>, Vec<Stmt>), ParseError> {
        self.expect_newline()?;
        self.expect_token(TokenKind::Indent, "indent")?;

        let mut declarations = vec![];
        let mut statements = vec![];
        let mut has_stmt = false;

        while !self.match_token(&TokenKind::Dedent)? {
            if self.peek_kind()? == &TokenKind::Eos {
                break;
            }
            if self.is_declaration_start(Context::Function)? {
                if has_stmt {
                    return Err(self.declaration_after_statement()?);
                }
                declarations.push(self.parse_declaration(Context::Function)?);
            } else {
                has_stmt = true;
                if let Some(stmt) = self.parse_stmt()? {
                    statements.push(stmt);
                }
            }
        }

        Ok((declarations, statements))
    }

    fn parse_class_def(&mut self) -> Result<ClassDef, ParseError> {
        let start = self.expect_token(TokenKind::Class, "class")?.start;
        let name = self.parse_identifier()?;

        let superclass = if self.match_token(&TokenKind::Char('('))? {
            let superclass = self.parse_identifier()?;
            self.expect_char(')')?;
            superclass
        } else {
            Identifier::new("object", name.location)
        };

        self.expect_char(':')?;
        self.expect_newline()?;
        self.expect_token(TokenKind::Indent, "indent")?;

        let mut declarations = vec![];
        while !self.match_token(&TokenKind::Dedent)? {
            match self.peek_kind()? {
                TokenKind::Eos => break,
                TokenKind::Pass => {
                    self.next_token()?;
                    self.expect_newline()?;
                }
                TokenKind::Def => declarations.push(self.parse_declaration(Context::Class)?),
                TokenKind::Identifier(_) => {
                    declarations.push(Declaration::VarDef(self.parse_var_def(Context::Class)?))
                }
                _ => {
                    let token = self.next_token()?;
                    return Err(ParseError::mismatch_token(&token, "class member"));
                }
            }
        }

        debug!("parsed class {}", name.name);
        Ok(ClassDef {
            location: Location::new(start, self.last_end),
            error_msg: None,
            name,
            superclass,
            declarations,
        })
    }

    // --- Statements

    /// Parses a statement. Returns `None` for `pass`.
    fn parse_stmt(&mut self) -> Result<Option<Stmt>, ParseError> {
        let stmt = match self.peek_kind()? {
            TokenKind::If => Stmt::IfStmt(self.parse_if_stmt()?),
            TokenKind::While => {
                let start = self.next_token()?.start;
                let condition = self.parse_expr()?;
                self.expect_char(':')?;
                let body = self.parse_block()?;

                Stmt::WhileStmt(WhileStmt {
                    location: Location::new(start, self.last_end),
                    error_msg: None,
                    condition,
                    body,
                    is_return: false,
                })
            }
            TokenKind::For => {
                let start = self.next_token()?.start;
                let identifier = self.parse_identifier()?;
                self.expect_token(TokenKind::In, "in")?;
                let iterable = self.parse_expr()?;
                self.expect_char(':')?;
                let body = self.parse_block()?;

                Stmt::ForStmt(ForStmt {
                    location: Location::new(start, self.last_end),
                    error_msg: None,
                    identifier,
                    iterable,
                    body,
                    is_return: false,
                })
            }
            TokenKind::Pass => {
                self.next_token()?;
                self.expect_newline()?;
                return Ok(None);
            }
            TokenKind::Return => {
                let token = self.next_token()?;
                let value = if self.peek_kind()? == &TokenKind::Newline {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                let end = self.last_end;
                self.expect_newline()?;

                Stmt::ReturnStmt(ReturnStmt {
                    location: Location::new(token.start, end),
                    error_msg: None,
                    value,
                })
            }
            TokenKind::Assert => {
                let token = self.next_token()?;
                let condition = self.parse_expr()?;
                let location = Location::new(token.start, condition.location.end);
                self.expect_newline()?;

                // `assert e` is a call of the builtin `__assert__`.
                let call = Expr::new(
                    ExprKind::CallExpr {
                        function: Identifier::new(
                            "__assert__",
                            Location::new(token.start, token.end),
                        ),
                        args: vec![condition],
                        is_constructor: false,
                        freevars: vec![],
                    },
                    location,
                );
                Stmt::ExprStmt(ExprStmt {
                    location,
                    error_msg: None,
                    expr: call,
                })
            }
            TokenKind::Global | TokenKind::Nonlocal => {
                let token = self.next_token()?;
                return Err(ParseError::mismatch_token(&token, "statement"));
            }
            _ => self.parse_simple_stmt()?,
        };

        Ok(Some(stmt))
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.parse_expr()?;
        let start = expr.location.start;

        if self.peek_kind()? != &TokenKind::Char('=') {
            let location = Location::new(start, expr.location.end);
            self.expect_newline()?;
            return Ok(Stmt::ExprStmt(ExprStmt {
                location,
                error_msg: None,
                expr,
            }));
        }

        let mut targets = vec![expr];
        while self.match_token(&TokenKind::Char('='))? {
            targets.push(self.parse_expr()?);
        }
        let value = match targets.pop() {
            Some(value) => value,
            None => unreachable!(),
        };

        for target in &targets {
            match target.kind {
                ExprKind::Identifier { .. }
                | ExprKind::IndexExpr { .. }
                | ExprKind::MemberExpr { .. } => {}
                _ => {
                    return Err(ParseError::syntax_error(
                        target.location.start,
                        "Cannot assign to expression",
                    ))
                }
            }
        }

        let location = Location::new(start, value.location.end);
        self.expect_newline()?;
        Ok(Stmt::AssignStmt(AssignStmt {
            location,
            error_msg: None,
            targets,
            value,
        }))
    }

    /// `if`/`elif` chains nest: each `elif` becomes the sole statement of an else body.
    fn parse_if_stmt(&mut self) -> Result<IfStmt, ParseError> {
        let start = self.next_token()?.start; // "if" or "elif"
        let condition = self.parse_expr()?;
        self.expect_char(':')?;
        let then_body = self.parse_block()?;

        let else_body = match self.peek_kind()? {
            TokenKind::Elif => vec![Stmt::IfStmt(self.parse_if_stmt()?)],
            TokenKind::Else => {
                self.next_token()?;
                self.expect_char(':')?;
                self.parse_block()?
            }
            _ => vec![],
        };

        Ok(IfStmt {
            location: Location::new(start, self.last_end),
            error_msg: None,
            condition,
            then_body,
            else_body,
            is_return: false,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_newline()?;
        self.expect_token(TokenKind::Indent, "indent")?;

        let mut statements = vec![];
        while !self.match_token(&TokenKind::Dedent)? {
            if self.peek_kind()? == &TokenKind::Eos {
                break;
            }
            if self.is_declaration_start(Context::TopLevel)? {
                return Err(self.declaration_after_statement()?);
            }
            if let Some(stmt) = self.parse_stmt()? {
                statements.push(stmt);
            }
        }

        Ok(statements)
    }

    // --- Expressions

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let then_expr = self.parse_or()?;

        if !self.match_token(&TokenKind::If)? {
            return Ok(then_expr);
        }

        let condition = self.parse_or()?;
        self.expect_token(TokenKind::Else, "else")?;
        let else_expr = self.parse_expr()?;
        let location = then_expr.location.union(&else_expr.location);

        Ok(Expr::new(
            ExprKind::IfExpr {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            location,
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;

        while self.match_token(&TokenKind::Or)? {
            let right = self.parse_and()?;
            left = binary(left, BinaryOperator::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;

        while self.match_token(&TokenKind::And)? {
            let right = self.parse_not()?;
            left = binary(left, BinaryOperator::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.peek_kind()? == &TokenKind::Not {
            let start = self.next_token()?.start;
            let operand = self.parse_not()?;
            let location = Location::new(start, operand.location.end);

            return Ok(Expr::new(
                ExprKind::UnaryExpr {
                    operator: UnaryOperator::Not,
                    operand: Box::new(operand),
                },
                location,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_arith()?;

        let operator = match self.peek_kind()? {
            TokenKind::Eq => BinaryOperator::Eq,
            TokenKind::Ne => BinaryOperator::Ne,
            TokenKind::Le => BinaryOperator::Le,
            TokenKind::Ge => BinaryOperator::Ge,
            TokenKind::Char('<') => BinaryOperator::Lt,
            TokenKind::Char('>') => BinaryOperator::Gt,
            TokenKind::Is => BinaryOperator::Is,
            _ => return Ok(left),
        };
        self.next_token()?;

        let right = self.parse_arith()?;
        Ok(binary(left, operator, right))
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;

        loop {
            let operator = match self.peek_kind()? {
                TokenKind::Char('+') => BinaryOperator::Add,
                TokenKind::Char('-') => BinaryOperator::Sub,
                _ => return Ok(left),
            };
            self.next_token()?;

            let right = self.parse_term()?;
            left = binary(left, operator, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;

        loop {
            let operator = match self.peek_kind()? {
                TokenKind::Char('*') => BinaryOperator::Mul,
                TokenKind::FloorDiv => BinaryOperator::FloorDiv,
                TokenKind::Char('%') => BinaryOperator::Mod,
                TokenKind::Char('/') => {
                    let position = self.peek()?.start;
                    return Err(ParseError::semantic_error(
                        position,
                        "Unsupported operator: /",
                    ));
                }
                _ => return Ok(left),
            };
            self.next_token()?;

            let right = self.parse_factor()?;
            left = binary(left, operator, right);
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        if self.peek_kind()? == &TokenKind::Char('-') {
            let start = self.next_token()?.start;
            let operand = self.parse_factor()?;
            let location = Location::new(start, operand.location.end);

            return Ok(Expr::new(
                ExprKind::UnaryExpr {
                    operator: UnaryOperator::Neg,
                    operand: Box::new(operand),
                },
                location,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek_kind()? {
                TokenKind::Char('.') => {
                    self.next_token()?;
                    let member = self.parse_identifier()?;

                    if self.peek_kind()? == &TokenKind::Char('(') {
                        let method_location = expr.location.union(&member.location);
                        let args = self.parse_args('(', ')')?;
                        let location = Location::new(expr.location.start, self.last_end);

                        expr = Expr::new(
                            ExprKind::MethodCallExpr {
                                method: MethodRef {
                                    location: method_location,
                                    error_msg: None,
                                    object: Box::new(expr),
                                    member,
                                    inferred_type: None,
                                },
                                args,
                            },
                            location,
                        );
                    } else {
                        let location = expr.location.union(&member.location);
                        expr = Expr::new(
                            ExprKind::MemberExpr {
                                object: Box::new(expr),
                                member,
                            },
                            location,
                        );
                    }
                }
                TokenKind::Char('[') => {
                    self.next_token()?;
                    let index = self.parse_expr()?;
                    let end = self.expect_char(']')?.end;
                    let location = Location::new(expr.location.start, end);

                    expr = Expr::new(
                        ExprKind::IndexExpr {
                            list: Box::new(expr),
                            index: Box::new(index),
                        },
                        location,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let kind = self.peek_kind()?.clone();

        match kind {
            TokenKind::Integer(value) => self.read_literal(ExprKind::IntegerLiteral { value }),
            TokenKind::String(value) => self.read_literal(ExprKind::StringLiteral { value }),
            TokenKind::True => self.read_literal(ExprKind::BooleanLiteral { value: true }),
            TokenKind::False => self.read_literal(ExprKind::BooleanLiteral { value: false }),
            TokenKind::None => self.read_literal(ExprKind::NoneLiteral),
            TokenKind::Identifier(_) => self.read_identifier(),
            TokenKind::Char('[') => {
                let start = self.peek()?.start;
                let elements = self.parse_args('[', ']')?;

                Ok(Expr::new(
                    ExprKind::ListExpr {
                        elements,
                        empty_list_type: None,
                    },
                    Location::new(start, self.last_end),
                ))
            }
            TokenKind::Char('(') => {
                let start = self.next_token()?.start;
                let mut expr = self.parse_expr()?;
                let end = self.expect_char(')')?.end;

                expr.location = Location::new(start, end);
                Ok(expr)
            }
            TokenKind::Reserved(word) => {
                let position = self.peek()?.start;
                Err(ParseError::semantic_error(
                    position,
                    format!("Unsupported keyword: {}", word),
                ))
            }
            _ => {
                let token = self.next_token()?;
                Err(ParseError::mismatch_token(&token, "expression"))
            }
        }
    }

    fn read_literal(&mut self, kind: ExprKind) -> Result<Expr, ParseError> {
        let token = self.next_token()?;
        Ok(Expr::new(kind, Location::new(token.start, token.end)))
    }

    /// A variable reference, or a call if followed by an argument list.
    fn read_identifier(&mut self) -> Result<Expr, ParseError> {
        let function = self.parse_identifier()?;

        if self.peek_kind()? != &TokenKind::Char('(') {
            return Ok(Expr::identifier(function.name, function.location, None));
        }

        let start = function.location.start;
        let args = self.parse_args('(', ')')?;

        Ok(Expr::new(
            ExprKind::CallExpr {
                function,
                args,
                is_constructor: false,
                freevars: vec![],
            },
            Location::new(start, self.last_end),
        ))
    }

    fn parse_args(&mut self, open: char, close: char) -> Result<Vec<Expr>, ParseError> {
        self.expect_char(open)?;

        let mut args = vec![];
        while self.peek_kind()? != &TokenKind::Char(close) {
            args.push(self.parse_expr()?);
            if !self.match_token(&TokenKind::Char(','))? {
                break;
            }
        }
        self.expect_char(close)?;

        Ok(args)
    }

    fn parse_identifier(&mut self) -> Result<Identifier, ParseError> {
        let token = self.next_token()?;

        match token.kind {
            TokenKind::Identifier(name) => {
                Ok(Identifier::new(name, Location::new(token.start, token.end)))
            }
            _ => Err(ParseError::mismatch_token(&token, "identifier")),
        }
    }

    // --- Tokens

    fn fill(&mut self, n: usize) -> Result<(), ParseError> {
        while self.lookahead.len() <= n {
            let token = self.tokenizer.next_token()?;
            self.lookahead.push_back(token);
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<&Token, ParseError> {
        self.fill(0)?;
        Ok(&self.lookahead[0])
    }

    fn peek_kind(&mut self) -> Result<&TokenKind, ParseError> {
        self.peek().map(|token| &token.kind)
    }

    fn peek_nth_kind(&mut self, n: usize) -> Result<&TokenKind, ParseError> {
        self.fill(n)?;
        Ok(&self.lookahead[n].kind)
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.fill(0)?;

        match self.lookahead.pop_front() {
            Some(token) => {
                if token.kind != TokenKind::Eos {
                    self.last_end = token.end;
                }
                Ok(token)
            }
            None => unreachable!(),
        }
    }

    fn match_token(&mut self, kind: &TokenKind) -> Result<bool, ParseError> {
        if self.peek_kind()? == kind {
            self.next_token()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_token(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        let token = self.next_token()?;

        if token.kind == kind {
            Ok(token)
        } else {
            Err(ParseError::mismatch_token(&token, expected))
        }
    }

    fn expect_char(&mut self, c: char) -> Result<Token, ParseError> {
        self.expect_token(TokenKind::Char(c), &c.to_string())
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        self.expect_token(TokenKind::Newline, "newline").map(|_| ())
    }
}

fn binary(left: Expr, operator: BinaryOperator, right: Expr) -> Expr {
    let location = left.location.union(&right.location);

    Expr::new(
        ExprKind::BinaryExpr {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        },
        location,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parse_expr(src: &str) -> Expr {
        let program = parse_string(src).unwrap();
        match program.statements.into_iter().next() {
            Some(Stmt::ExprStmt(stmt)) => stmt.expr,
            stmt => panic!("expected expression statement: {:?}", stmt),
        }
    }

    fn parse_error(src: &str) -> String {
        parse_string(src).unwrap_err().to_string()
    }

    #[test]
    fn empty_program() {
        let program = parse_string("").unwrap();

        assert!(program.declarations.is_empty());
        assert!(program.statements.is_empty());
    }

    #[test]
    fn integer_literal() {
        let expr = parse_expr("42");

        assert_matches!(expr.kind, ExprKind::IntegerLiteral { value: 42 });
        assert_eq!(expr.location.start, Position { line: 1, column: 1 });
    }

    #[test]
    fn precedence() {
        let expr = parse_expr("1 + 2 * 3 < 4 and not x or y");

        assert_matches!(expr.kind, ExprKind::BinaryExpr { operator: BinaryOperator::Or, left, .. } => {
            assert_matches!(left.kind, ExprKind::BinaryExpr { operator: BinaryOperator::And, left, right } => {
                assert_matches!(right.kind, ExprKind::UnaryExpr { operator: UnaryOperator::Not, .. });
                assert_matches!(left.kind, ExprKind::BinaryExpr { operator: BinaryOperator::Lt, left, .. } => {
                    assert_matches!(left.kind, ExprKind::BinaryExpr { operator: BinaryOperator::Add, right, .. } => {
                        assert_matches!(right.kind, ExprKind::BinaryExpr { operator: BinaryOperator::Mul, .. });
                    });
                });
            });
        });
    }

    #[test]
    fn left_associative_arithmetic() {
        let expr = parse_expr("a - b - c");

        assert_matches!(expr.kind, ExprKind::BinaryExpr { operator: BinaryOperator::Sub, left, right } => {
            assert_matches!(left.kind, ExprKind::BinaryExpr { operator: BinaryOperator::Sub, .. });
            assert_matches!(right.kind, ExprKind::Identifier { ref name, .. } if name == "c");
        });
    }

    #[test]
    fn ternary() {
        let expr = parse_expr("a if b else c");

        assert_matches!(expr.kind, ExprKind::IfExpr { condition, then_expr, .. } => {
            assert_matches!(condition.kind, ExprKind::Identifier { ref name, .. } if name == "b");
            assert_matches!(then_expr.kind, ExprKind::Identifier { ref name, .. } if name == "a");
        });
    }

    #[test]
    fn postfix() {
        let expr = parse_expr("a.b[0].c(1, 2)");

        assert_matches!(expr.kind, ExprKind::MethodCallExpr { method, args } => {
            assert_eq!(args.len(), 2);
            assert_eq!(method.member.name, "c");
            assert_matches!(method.object.kind, ExprKind::IndexExpr { list, .. } => {
                assert_matches!(list.kind, ExprKind::MemberExpr { ref member, .. } if member.name == "b");
            });
        });
    }

    #[test]
    fn call_and_list() {
        let expr = parse_expr("f([], [1, 2])");

        assert_matches!(expr.kind, ExprKind::CallExpr { function, args, .. } => {
            assert_eq!(function.name, "f");
            assert_matches!(&args[0].kind, ExprKind::ListExpr { elements, .. } if elements.is_empty());
            assert_matches!(&args[1].kind, ExprKind::ListExpr { elements, .. } if elements.len() == 2);
        });
    }

    #[test]
    fn assert_is_builtin_call() {
        let expr = parse_expr("assert x");

        assert_matches!(expr.kind, ExprKind::CallExpr { function, args, .. } => {
            assert_eq!(function.name, "__assert__");
            assert_eq!(args.len(), 1);
        });
    }

    #[test]
    fn multiple_assignment() {
        let program = parse_string("a = b = 1\n").unwrap();

        assert_matches!(&program.statements[0], Stmt::AssignStmt(stmt) => {
            assert_eq!(stmt.targets.len(), 2);
            assert_matches!(stmt.value.kind, ExprKind::IntegerLiteral { value: 1 });
        });
    }

    #[test]
    fn declarations() {
        let src = "
x: int = 1
class A(object):
    y: [str] = None
    def f(self: \"A\") -> int:
        return 1
def g(a: int, b: bool):
    z: int = 0
    def h():
        nonlocal z
        z = 1
    pass
print(x)
";
        let program = parse_string(src).unwrap();

        assert_eq!(program.declarations.len(), 3);
        assert_eq!(program.statements.len(), 1);

        assert_matches!(&program.declarations[0], Declaration::VarDef(def) => {
            assert_eq!(def.var.name(), "x");
            assert!(!def.is_attr);
        });
        assert_matches!(&program.declarations[1], Declaration::ClassDef(class) => {
            assert_eq!(class.superclass.name, "object");
            assert_eq!(class.declarations.len(), 2);
            assert_matches!(&class.declarations[0], Declaration::VarDef(def) => {
                assert!(def.is_attr);
                assert_matches!(&def.var.type_annotation, TypeAnnotation::ListType { .. });
            });
            assert_matches!(&class.declarations[1], Declaration::FuncDef(def) => {
                assert!(def.is_method);
                assert_matches!(&def.params[0].type_annotation, TypeAnnotation::ClassType { class_name, .. } if class_name == "A");
            });
        });
        assert_matches!(&program.declarations[2], Declaration::FuncDef(def) => {
            assert_eq!(def.params.len(), 2);
            assert_matches!(&def.return_type, TypeAnnotation::ClassType { class_name, .. } if class_name == NONE);
            assert_eq!(def.declarations.len(), 2);
            // `pass` produces no statement
            assert!(def.statements.is_empty());
        });
    }

    #[test]
    fn declarations_only_body() {
        let program = parse_string("def f1():\n    x: int = 1\n\nf1()\n").unwrap();

        assert_eq!(program.statements.len(), 1);
        assert_matches!(&program.declarations[0], Declaration::FuncDef(def) => {
            assert_eq!(def.declarations.len(), 1);
            assert!(def.statements.is_empty());
        });
    }

    #[test]
    fn elif_nests() {
        let src = "if a:\n  x = 1\nelif b:\n  x = 2\nelse:\n  x = 3\n";
        let program = parse_string(src).unwrap();

        assert_matches!(&program.statements[0], Stmt::IfStmt(stmt) => {
            assert_eq!(stmt.else_body.len(), 1);
            assert_matches!(&stmt.else_body[0], Stmt::IfStmt(inner) => {
                assert_eq!(inner.else_body.len(), 1);
            });
        });
    }

    #[test]
    fn errors() {
        assert_eq!(
            parse_error("x = 1\ny: int = 2\n"),
            "All declarations must come before statements. Line 2 Col 1"
        );
        assert_eq!(
            parse_error("x: int = 1 + 2\n"),
            "Global variables can only be initialized with literals. Line 1 Col 10"
        );
        assert_eq!(
            parse_error("def f():\n    x: int = y\n    pass\n"),
            "Variables can only be initialized with literals. Line 2 Col 14"
        );
        assert_eq!(
            parse_error("x = 2147483648\n"),
            "Integer literal is too large. Line 1 Col 5"
        );
        assert_eq!(
            parse_error("x = (1\n"),
            "Syntax error: Expected ), but found newline. Line 2 Col 1"
        );
        assert_eq!(
            parse_error("class A(object):\n    def __init__(self: A) -> int:\n        return 0\n"),
            "__init__ cannot have a return type. Line 2 Col 30"
        );
        assert_eq!(parse_error("lambda\n"), "Unsupported keyword: lambda. Line 1 Col 1");
    }
}
