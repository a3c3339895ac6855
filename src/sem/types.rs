//! Static types of ChocoPy values and functions.
use crate::syntax::{Identifier, VarId};
use std::collections::BTreeMap;
use std::fmt;

pub const OBJECT: &str = "object";
pub const INT: &str = "int";
pub const BOOL: &str = "bool";
pub const STR: &str = "str";
/// The type of `None`.
pub const NONE: &str = "<None>";
/// The type of `[]`.
pub const EMPTY: &str = "<Empty>";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Class(String),
    List(Box<ValueType>),
}

impl ValueType {
    pub fn class<S: Into<String>>(name: S) -> Self {
        ValueType::Class(name.into())
    }

    pub fn list(element: ValueType) -> Self {
        ValueType::List(Box::new(element))
    }

    pub fn object() -> Self {
        Self::class(OBJECT)
    }

    pub fn int() -> Self {
        Self::class(INT)
    }

    pub fn bool() -> Self {
        Self::class(BOOL)
    }

    pub fn str() -> Self {
        Self::class(STR)
    }

    pub fn none() -> Self {
        Self::class(NONE)
    }

    pub fn empty() -> Self {
        Self::class(EMPTY)
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            ValueType::Class(name) => Some(name),
            ValueType::List(_) => None,
        }
    }

    pub fn element_type(&self) -> Option<&ValueType> {
        match self {
            ValueType::Class(_) => None,
            ValueType::List(element) => Some(element),
        }
    }

    pub fn is_class(&self, name: &str) -> bool {
        self.class_name() == Some(name)
    }

    pub fn is_int(&self) -> bool {
        self.is_class(INT)
    }

    pub fn is_bool(&self) -> bool {
        self.is_class(BOOL)
    }

    pub fn is_str(&self) -> bool {
        self.is_class(STR)
    }

    pub fn is_none(&self) -> bool {
        self.is_class(NONE)
    }

    pub fn is_empty(&self) -> bool {
        self.is_class(EMPTY)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ValueType::List(_))
    }

    /// `int`, `bool` and `str` are unboxed and cannot be `None`.
    pub fn is_special(&self) -> bool {
        self.is_int() || self.is_bool() || self.is_str()
    }

    /// Lists, including the empty list.
    pub fn is_list_like(&self) -> bool {
        self.is_list() || self.is_empty()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Class(name) => write!(f, "{}", name),
            ValueType::List(element) => write!(f, "[{}]", element),
        }
    }
}

/// The signature of a function, method or constructor.
#[derive(Debug, Clone)]
pub struct FuncType {
    pub params: Vec<ValueType>,
    pub return_type: ValueType,
    /// Parameter index to the instance whose storage is passed by reference.
    pub ref_params: BTreeMap<usize, VarId>,
    pub freevars: Vec<Identifier>,
}

impl FuncType {
    pub fn new(params: Vec<ValueType>, return_type: ValueType) -> Self {
        Self {
            params,
            return_type,
            ref_params: BTreeMap::new(),
            freevars: vec![],
        }
    }

    pub fn is_ref_param(&self, index: usize) -> bool {
        self.ref_params.contains_key(&index)
    }

    /// The signature without its first (receiver) parameter.
    pub fn drop_first_param(&self) -> FuncType {
        FuncType {
            params: self.params.iter().skip(1).cloned().collect(),
            return_type: self.return_type.clone(),
            ref_params: self
                .ref_params
                .iter()
                .filter(|(&i, _)| i > 0)
                .map(|(&i, &v)| (i - 1, v))
                .collect(),
            freevars: self.freevars.clone(),
        }
    }

    /// Two method signatures are compatible if they agree on everything but the receiver.
    pub fn overrides(&self, other: &FuncType) -> bool {
        self.params.len() == other.params.len()
            && self.return_type == other.return_type
            && self.params.iter().skip(1).eq(other.params.iter().skip(1))
    }
}

// Annotations do not take part in signature equality.
impl PartialEq for FuncType {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && self.return_type == other.return_type
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ") -> {}", self.return_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolType {
    Value(ValueType),
    Func(FuncType),
}

impl SymbolType {
    pub fn value_type(&self) -> Option<&ValueType> {
        match self {
            SymbolType::Value(ty) => Some(ty),
            SymbolType::Func(_) => None,
        }
    }

    pub fn func_type(&self) -> Option<&FuncType> {
        match self {
            SymbolType::Value(_) => None,
            SymbolType::Func(ty) => Some(ty),
        }
    }
}

impl From<ValueType> for SymbolType {
    fn from(ty: ValueType) -> Self {
        SymbolType::Value(ty)
    }
}

impl From<FuncType> for SymbolType {
    fn from(ty: FuncType) -> Self {
        SymbolType::Func(ty)
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolType::Value(ty) => write!(f, "{}", ty),
            SymbolType::Func(ty) => write!(f, "{}", ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(ValueType::int().to_string(), "int");
        assert_eq!(
            ValueType::list(ValueType::list(ValueType::str())).to_string(),
            "[[str]]"
        );
        assert_eq!(
            FuncType::new(vec![ValueType::int(), ValueType::bool()], ValueType::none()).to_string(),
            "(int, bool) -> <None>"
        );
    }

    #[test]
    fn signature_equality_ignores_annotations() {
        let a = FuncType::new(vec![ValueType::int()], ValueType::int());
        let mut b = a.clone();
        b.ref_params.insert(0, VarId(3));

        assert_eq!(a, b);
        assert_ne!(a, FuncType::new(vec![ValueType::str()], ValueType::int()));
    }

    #[test]
    fn overrides_ignore_receiver() {
        let base = FuncType::new(vec![ValueType::class("A"), ValueType::int()], ValueType::int());
        let derived = FuncType::new(vec![ValueType::class("B"), ValueType::int()], ValueType::int());
        let other = FuncType::new(vec![ValueType::class("B"), ValueType::str()], ValueType::int());

        assert!(derived.overrides(&base));
        assert!(!other.overrides(&base));
    }

    #[test]
    fn drop_first_param_shifts_ref_params() {
        let mut ty = FuncType::new(
            vec![ValueType::class("A"), ValueType::int(), ValueType::int()],
            ValueType::none(),
        );
        ty.ref_params.insert(2, VarId(7));

        let dropped = ty.drop_first_param();
        assert_eq!(dropped.params, vec![ValueType::int(), ValueType::int()]);
        assert_eq!(dropped.ref_params.get(&1), Some(&VarId(7)));
    }
}
