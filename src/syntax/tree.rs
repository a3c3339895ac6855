//! Grammar
//! -------
//!
//! ```ignore
//! Program        := Declaration* Statement*
//! Declaration    := VarDef | FuncDef | ClassDef
//! VarDef         := TypedVar "=" Literal NEWLINE
//! TypedVar       := Id ":" Type
//! Type           := Id | <String> | "[" Type "]"
//! FuncDef        := "def" Id "(" (TypedVar ",")* TypedVar? ")" ("->" Type)? ":" FuncBody
//! FuncBody       := NEWLINE INDENT (VarDef | FuncDef | GlobalDecl | NonLocalDecl)* Statement+ DEDENT
//! ClassDef       := "class" Id "(" Id ")" ":" NEWLINE INDENT (VarDef | FuncDef | "pass")+ DEDENT
//! GlobalDecl     := "global" Id NEWLINE
//! NonLocalDecl   := "nonlocal" Id NEWLINE
//! Statement      := SimpleStmt NEWLINE | IfStmt | WhileStmt | ForStmt
//! SimpleStmt     := "pass" | Expr | "return" Expr? | "assert" Expr | (Target "=")+ Expr
//! IfStmt         := "if" Expr ":" Block ("elif" Expr ":" Block)* ("else" ":" Block)?
//! WhileStmt      := "while" Expr ":" Block
//! ForStmt        := "for" Id "in" Expr ":" Block
//! Block          := NEWLINE INDENT Statement+ DEDENT
//! Target         := Id | Expr "." Id | Expr "[" Expr "]"
//! Expr           := OrExpr ("if" Expr "else" Expr)?
//! OrExpr         := AndExpr ("or" AndExpr)*
//! AndExpr        := NotExpr ("and" NotExpr)*
//! NotExpr        := "not" NotExpr | CompExpr
//! CompExpr       := ArithExpr (CompOp ArithExpr)?
//! ArithExpr      := Term (("+" | "-") Term)*
//! Term           := Factor (("*" | "//" | "%") Factor)*
//! Factor         := "-" Factor | Postfix
//! Postfix        := Atom ("." Id | "." Id "(" Args ")" | "[" Expr "]" | "(" Args ")")*
//! Atom           := Literal | Id | "[" Args "]" | "(" Expr ")"
//! Literal        := "None" | "True" | "False" | <Integer> | <String>
//! ```
//!
//! Every node owns its children. Analysis passes attach their results to the fields marked
//! as annotations; only the semantic ones survive to the JSON dump.
use super::tokenizer::Position;
use crate::sem::types::{FuncType, SymbolType, ValueType};
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Source span of a node: one-based start and end positions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub start: Position,
    pub end: Position,
}

impl Location {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// The zero location used by nodes with no source, e.g. the error list.
    pub fn none() -> Self {
        let zero = Position { line: 0, column: 0 };
        Self {
            start: zero,
            end: zero,
        }
    }

    pub fn union(&self, other: &Location) -> Location {
        Location {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.start.line)?;
        seq.serialize_element(&self.start.column)?;
        seq.serialize_element(&self.end.line)?;
        seq.serialize_element(&self.end.column)?;
        seq.end()
    }
}

/// Handle of a variable instance in [`VarInstances`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

/// The identity of a declared variable. Two identifiers referring to the same variable share
/// one instance.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VarInstance {
    pub is_global: bool,
    /// Written from a nested function through a `nonlocal` declaration.
    pub is_nonlocal: bool,
    /// The receiver parameter of a method.
    pub is_self: bool,
}

/// Arena of variable instances owned by the program.
#[derive(Debug, Default, Clone)]
pub struct VarInstances {
    instances: Vec<VarInstance>,
}

impl VarInstances {
    pub fn new_instance(&mut self) -> VarId {
        self.instances.push(VarInstance::default());
        VarId(self.instances.len() - 1)
    }

    pub fn get(&self, id: VarId) -> &VarInstance {
        &self.instances[id.0]
    }

    pub fn get_mut(&mut self, id: VarId) -> &mut VarInstance {
        &mut self.instances[id.0]
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub struct Program {
    pub location: Location,
    pub declarations: Vec<Declaration>,
    pub statements: Vec<Stmt>,
    pub errors: Errors,
    #[serde(skip)]
    pub instances: VarInstances,
}

impl Program {
    pub fn has_errors(&self) -> bool {
        !self.errors.errors.is_empty()
    }

    pub fn func_defs(&self) -> impl Iterator<Item = &FuncDef> {
        self.declarations.iter().filter_map(Declaration::func_def)
    }

    pub fn class_defs(&self) -> impl Iterator<Item = &ClassDef> {
        self.declarations.iter().filter_map(Declaration::class_def)
    }

    pub fn var_defs(&self) -> impl Iterator<Item = &VarDef> {
        self.declarations.iter().filter_map(Declaration::var_def)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub struct Errors {
    pub location: Location,
    pub errors: Vec<SemanticError>,
}

impl Default for Errors {
    fn default() -> Self {
        Self {
            location: Location::none(),
            errors: vec![],
        }
    }
}

/// A diagnostic reported by an analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename = "CompilerError")]
pub struct SemanticError {
    pub location: Location,
    pub message: String,
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.message, self.location.start)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum Declaration {
    VarDef(VarDef),
    FuncDef(FuncDef),
    ClassDef(ClassDef),
    GlobalDecl(GlobalDecl),
    NonLocalDecl(NonLocalDecl),
}

impl Declaration {
    pub fn var_def(&self) -> Option<&VarDef> {
        if let Declaration::VarDef(node) = self {
            Some(node)
        } else {
            None
        }
    }

    pub fn func_def(&self) -> Option<&FuncDef> {
        if let Declaration::FuncDef(node) = self {
            Some(node)
        } else {
            None
        }
    }

    pub fn class_def(&self) -> Option<&ClassDef> {
        if let Declaration::ClassDef(node) = self {
            Some(node)
        } else {
            None
        }
    }

    pub fn location(&self) -> Location {
        match self {
            Declaration::VarDef(node) => node.location,
            Declaration::FuncDef(node) => node.location,
            Declaration::ClassDef(node) => node.location,
            Declaration::GlobalDecl(node) => node.location,
            Declaration::NonLocalDecl(node) => node.location,
        }
    }

    /// The name this declaration introduces into its scope.
    pub fn name(&self) -> &str {
        match self {
            Declaration::VarDef(node) => node.var.name(),
            Declaration::FuncDef(node) => &node.name.name,
            Declaration::ClassDef(node) => &node.name.name,
            Declaration::GlobalDecl(node) => &node.variable.name,
            Declaration::NonLocalDecl(node) => &node.variable.name,
        }
    }
}

/// An identifier in a position that is not an expression: names of declarations, callees,
/// attribute names and loop targets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub struct Identifier {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub name: String,
    #[serde(rename = "inferredType", skip_serializing_if = "Option::is_none")]
    pub inferred_type: Option<SymbolType>,
    #[serde(skip)]
    pub var_instance: Option<VarId>,
}

impl Identifier {
    pub fn new<S: Into<String>>(name: S, location: Location) -> Self {
        Self {
            location,
            error_msg: None,
            name: name.into(),
            inferred_type: None,
            var_instance: None,
        }
    }

    pub fn value_type(&self) -> Option<&ValueType> {
        match self.inferred_type {
            Some(SymbolType::Value(ref ty)) => Some(ty),
            _ => None,
        }
    }

    pub fn func_type(&self) -> Option<&FuncType> {
        match self.inferred_type {
            Some(SymbolType::Func(ref ty)) => Some(ty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum TypeAnnotation {
    ClassType {
        location: Location,
        #[serde(rename = "className")]
        class_name: String,
    },
    ListType {
        location: Location,
        #[serde(rename = "elementType")]
        element_type: Box<TypeAnnotation>,
    },
}

impl TypeAnnotation {
    pub fn location(&self) -> Location {
        match self {
            TypeAnnotation::ClassType { location, .. } => *location,
            TypeAnnotation::ListType { location, .. } => *location,
        }
    }

    /// Builds the annotation spelling `ty`.
    pub fn from_value_type(ty: &ValueType, location: Location) -> Self {
        match ty {
            ValueType::Class(name) => TypeAnnotation::ClassType {
                location,
                class_name: name.clone(),
            },
            ValueType::List(element) => TypeAnnotation::ListType {
                location,
                element_type: Box::new(Self::from_value_type(element, location)),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub struct TypedVar {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub identifier: Identifier,
    #[serde(rename = "type")]
    pub type_annotation: TypeAnnotation,
    /// The resolved annotation.
    #[serde(skip)]
    pub t: Option<ValueType>,
    #[serde(skip)]
    pub var_instance: Option<VarId>,
}

impl TypedVar {
    pub fn name(&self) -> &str {
        &self.identifier.name
    }

    pub fn value_type(&self) -> &ValueType {
        self.t
            .as_ref()
            .unwrap_or_else(|| panic!("Internal compiler error: unresolved type of {}", self.name()))
    }

    pub fn instance(&self) -> VarId {
        self.var_instance
            .unwrap_or_else(|| panic!("Internal compiler error: unbound variable {}", self.name()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VarDef {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub var: TypedVar,
    /// Always a literal.
    pub value: Expr,
    #[serde(skip)]
    pub is_attr: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FuncDef {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub name: Identifier,
    pub params: Vec<TypedVar>,
    #[serde(rename = "returnType")]
    pub return_type: TypeAnnotation,
    pub declarations: Vec<Declaration>,
    pub statements: Vec<Stmt>,
    #[serde(rename = "isMethod", skip_serializing_if = "is_false")]
    pub is_method: bool,
    #[serde(skip)]
    pub func_type: Option<FuncType>,
    /// Variables read or written by this function (or functions nested in it) that are
    /// declared by an enclosing function.
    #[serde(skip)]
    pub freevars: Vec<Identifier>,
    /// Parameter index to the instance whose storage is passed by reference.
    #[serde(skip)]
    pub ref_params: BTreeMap<usize, VarId>,
}

impl FuncDef {
    pub fn signature(&self) -> &FuncType {
        self.func_type.as_ref().unwrap_or_else(|| {
            panic!(
                "Internal compiler error: unresolved signature of {}",
                self.name.name
            )
        })
    }

    pub fn nested_func_defs(&self) -> impl Iterator<Item = &FuncDef> {
        self.declarations.iter().filter_map(Declaration::func_def)
    }

    pub fn var_defs(&self) -> impl Iterator<Item = &VarDef> {
        self.declarations.iter().filter_map(Declaration::var_def)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassDef {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub name: Identifier,
    #[serde(rename = "superClass")]
    pub superclass: Identifier,
    pub declarations: Vec<Declaration>,
}

impl ClassDef {
    pub fn methods(&self) -> impl Iterator<Item = &FuncDef> {
        self.declarations.iter().filter_map(Declaration::func_def)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &VarDef> {
        self.declarations.iter().filter_map(Declaration::var_def)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalDecl {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub variable: Identifier,
}

#[derive(Debug, Clone, Serialize)]
pub struct NonLocalDecl {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub variable: Identifier,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum Stmt {
    AssignStmt(AssignStmt),
    IfStmt(IfStmt),
    WhileStmt(WhileStmt),
    ForStmt(ForStmt),
    ReturnStmt(ReturnStmt),
    ExprStmt(ExprStmt),
}

impl Stmt {
    pub fn location(&self) -> Location {
        match self {
            Stmt::AssignStmt(node) => node.location,
            Stmt::IfStmt(node) => node.location,
            Stmt::WhileStmt(node) => node.location,
            Stmt::ForStmt(node) => node.location,
            Stmt::ReturnStmt(node) => node.location,
            Stmt::ExprStmt(node) => node.location,
        }
    }

    /// Set by the type checker: every path through this statement returns.
    pub fn is_return(&self) -> bool {
        match self {
            Stmt::AssignStmt(_) | Stmt::ExprStmt(_) => false,
            Stmt::IfStmt(node) => node.is_return,
            Stmt::WhileStmt(node) => node.is_return,
            Stmt::ForStmt(node) => node.is_return,
            Stmt::ReturnStmt(_) => true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignStmt {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub targets: Vec<Expr>,
    pub value: Expr,
}

#[derive(Debug, Clone, Serialize)]
pub struct IfStmt {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub condition: Expr,
    #[serde(rename = "thenBody")]
    pub then_body: Vec<Stmt>,
    #[serde(rename = "elseBody")]
    pub else_body: Vec<Stmt>,
    #[serde(skip)]
    pub is_return: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhileStmt {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub condition: Expr,
    pub body: Vec<Stmt>,
    #[serde(skip)]
    pub is_return: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForStmt {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub identifier: Identifier,
    pub iterable: Expr,
    pub body: Vec<Stmt>,
    #[serde(skip)]
    pub is_return: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnStmt {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExprStmt {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub expr: Expr,
}

#[derive(Debug, Clone, Serialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(rename = "inferredType", skip_serializing_if = "Option::is_none")]
    pub inferred_type: Option<ValueType>,
}

impl Expr {
    pub fn new(kind: ExprKind, location: Location) -> Self {
        Self {
            kind,
            location,
            error_msg: None,
            inferred_type: None,
        }
    }

    /// A variable reference that resolves to `var_instance`.
    pub fn identifier<S: Into<String>>(
        name: S,
        location: Location,
        var_instance: Option<VarId>,
    ) -> Self {
        Self::new(
            ExprKind::Identifier {
                name: name.into(),
                var_instance,
            },
            location,
        )
    }

    pub fn value_type(&self) -> &ValueType {
        self.inferred_type.as_ref().unwrap_or_else(|| {
            panic!(
                "Internal compiler error: untyped expression at {}",
                self.location.start
            )
        })
    }

    /// Literals that may initialize a variable. The empty list counts as one.
    pub fn is_literal(&self) -> bool {
        match &self.kind {
            ExprKind::IntegerLiteral { .. }
            | ExprKind::BooleanLiteral { .. }
            | ExprKind::NoneLiteral
            | ExprKind::StringLiteral { .. } => true,
            ExprKind::ListExpr { elements, .. } => elements.is_empty(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum ExprKind {
    IntegerLiteral {
        value: i64,
    },
    BooleanLiteral {
        value: bool,
    },
    NoneLiteral,
    StringLiteral {
        value: String,
    },
    Identifier {
        name: String,
        #[serde(skip)]
        var_instance: Option<VarId>,
    },
    ListExpr {
        elements: Vec<Expr>,
        /// Element type chosen for an empty list from its context.
        #[serde(skip)]
        empty_list_type: Option<ValueType>,
    },
    BinaryExpr {
        left: Box<Expr>,
        operator: BinaryOperator,
        right: Box<Expr>,
    },
    UnaryExpr {
        operator: UnaryOperator,
        operand: Box<Expr>,
    },
    IfExpr {
        condition: Box<Expr>,
        #[serde(rename = "thenExpr")]
        then_expr: Box<Expr>,
        #[serde(rename = "elseExpr")]
        else_expr: Box<Expr>,
    },
    IndexExpr {
        list: Box<Expr>,
        index: Box<Expr>,
    },
    MemberExpr {
        object: Box<Expr>,
        member: Identifier,
    },
    CallExpr {
        function: Identifier,
        args: Vec<Expr>,
        #[serde(skip)]
        is_constructor: bool,
        /// Free variables of the callee, captured by the hoister.
        #[serde(skip)]
        freevars: Vec<Identifier>,
    },
    MethodCallExpr {
        method: MethodRef,
        args: Vec<Expr>,
    },
}

/// The `object.member` part of a method call. Its inferred type is the method signature.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename = "MemberExpr")]
pub struct MethodRef {
    pub location: Location,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub object: Box<Expr>,
    pub member: Identifier,
    #[serde(rename = "inferredType", skip_serializing_if = "Option::is_none")]
    pub inferred_type: Option<SymbolType>,
}

impl MethodRef {
    pub fn func_type(&self) -> &FuncType {
        match self.inferred_type {
            Some(SymbolType::Func(ref ty)) => ty,
            _ => panic!(
                "Internal compiler error: untyped method {}",
                self.member.name
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOperator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "//")]
    FloorDiv,
    #[serde(rename = "%")]
    Mod,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "and")]
    And,
    #[serde(rename = "or")]
    Or,
}

impl BinaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::FloorDiv => "//",
            BinaryOperator::Mod => "%",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::Is => "is",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Lt
                | BinaryOperator::Le
                | BinaryOperator::Gt
                | BinaryOperator::Ge
                | BinaryOperator::Is
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOperator {
    #[serde(rename = "-")]
    Neg,
    #[serde(rename = "not")]
    Not,
}

impl UnaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Neg => "-",
            UnaryOperator::Not => "not",
        }
    }
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        match self {
            ValueType::Class(name) => {
                let mut s = serializer.serialize_struct("ClassValueType", 2)?;
                s.serialize_field("kind", "ClassValueType")?;
                s.serialize_field("className", name)?;
                s.end()
            }
            ValueType::List(element) => {
                let mut s = serializer.serialize_struct("ListValueType", 2)?;
                s.serialize_field("kind", "ListValueType")?;
                s.serialize_field("elementType", element.as_ref())?;
                s.end()
            }
        }
    }
}

impl Serialize for SymbolType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        match self {
            SymbolType::Value(ty) => ty.serialize(serializer),
            SymbolType::Func(ty) => {
                let mut s = serializer.serialize_struct("FuncType", 3)?;
                s.serialize_field("kind", "FuncType")?;
                s.serialize_field("parameters", &ty.params)?;
                s.serialize_field("returnType", &ty.return_type)?;
                s.end()
            }
        }
    }
}
