//! The class hierarchy and the relations between value types.
use super::types::{FuncType, ValueType, BOOL, EMPTY, INT, NONE, OBJECT, STR};
use crate::syntax::Expr;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AttrInfo {
    pub name: String,
    pub value_type: ValueType,
    /// The literal the attribute is initialized with.
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub superclass: Option<String>,
    attrs: Vec<AttrInfo>,
    methods: Vec<(String, FuncType)>,
}

impl ClassInfo {
    fn new(name: &str, superclass: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            superclass: superclass.map(str::to_string),
            attrs: vec![],
            methods: vec![],
        }
    }

    /// Attributes declared by this class, in declaration order.
    pub fn own_attrs(&self) -> &[AttrInfo] {
        &self.attrs
    }

    pub fn own_methods(&self) -> impl Iterator<Item = (&str, &FuncType)> {
        self.methods.iter().map(|(name, ty)| (name.as_str(), ty))
    }
}

/// A vtable slot: the method name, the class whose body implements it, and its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSlot {
    pub name: String,
    pub def_class: String,
    pub func_type: FuncType,
}

#[derive(Debug, Clone)]
pub struct TypeSystem {
    classes: Vec<ClassInfo>,
    index: HashMap<String, usize>,
}

impl Default for TypeSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeSystem {
    /// A hierarchy containing only the builtin classes.
    pub fn new() -> Self {
        let mut ts = Self {
            classes: vec![],
            index: HashMap::new(),
        };

        ts.add_class(OBJECT, None);
        for name in &[INT, BOOL, STR, NONE, EMPTY] {
            ts.add_class(name, Some(OBJECT));
        }
        for name in &[OBJECT, INT, BOOL, STR] {
            ts.add_method(
                name,
                "__init__",
                FuncType::new(vec![ValueType::class(*name)], ValueType::none()),
            );
        }

        ts
    }

    pub fn is_builtin(name: &str) -> bool {
        matches!(name, OBJECT | INT | BOOL | STR | NONE | EMPTY)
    }

    /// Builtin classes that cannot be subclassed.
    pub fn is_special_class(name: &str) -> bool {
        matches!(name, INT | BOOL | STR | NONE | EMPTY)
    }

    pub fn add_class(&mut self, name: &str, superclass: Option<&str>) {
        if self.index.contains_key(name) {
            return;
        }
        self.index.insert(name.to_string(), self.classes.len());
        self.classes.push(ClassInfo::new(name, superclass));
    }

    pub fn add_attr(&mut self, class: &str, name: &str, value_type: ValueType, init: Option<Expr>) {
        if let Some(info) = self.class_mut(class) {
            info.attrs.push(AttrInfo {
                name: name.to_string(),
                value_type,
                init,
            });
        }
    }

    pub fn add_method(&mut self, class: &str, name: &str, func_type: FuncType) {
        if let Some(info) = self.class_mut(class) {
            match info.methods.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = func_type,
                None => info.methods.push((name.to_string(), func_type)),
            }
        }
    }

    pub fn class_exists(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get_class(&self, name: &str) -> Option<&ClassInfo> {
        self.index.get(name).map(|&i| &self.classes[i])
    }

    fn class_mut(&mut self, name: &str) -> Option<&mut ClassInfo> {
        let i = *self.index.get(name)?;
        Some(&mut self.classes[i])
    }

    /// Classes in registration order, `object` first.
    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }

    /// `object` followed by the classes declared by the program.
    pub fn object_classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes
            .iter()
            .filter(|c| c.name == OBJECT || !Self::is_builtin(&c.name))
    }

    pub fn superclass(&self, name: &str) -> Option<&str> {
        self.get_class(name)?.superclass.as_deref()
    }

    /// `name` and its superclasses, nearest first.
    pub fn ancestors<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        let mut chain = vec![];
        let mut current = Some(name);

        while let Some(class) = current {
            if chain.contains(&class) {
                break;
            }
            chain.push(class);
            current = self.superclass(class);
        }

        chain
    }

    pub fn is_sub_class(&self, a: &str, b: &str) -> bool {
        self.ancestors(a).contains(&b)
    }

    pub fn is_subtype(&self, a: &ValueType, b: &ValueType) -> bool {
        if a == b || b.is_class(OBJECT) {
            return true;
        }
        match (a, b) {
            (ValueType::Class(a), ValueType::Class(b)) => self.is_sub_class(a, b),
            _ => false,
        }
    }

    /// Whether a value of type `a` may be stored where `b` is expected.
    pub fn can_assign(&self, a: &ValueType, b: &ValueType) -> bool {
        if self.is_subtype(a, b) {
            return true;
        }
        if a.is_none() && !b.is_special() {
            return true;
        }
        if a.is_empty() && b.is_list() {
            return true;
        }
        match (a.element_type(), b.element_type()) {
            (Some(ae), Some(be)) => ae.is_none() && self.can_assign(ae, be),
            _ => false,
        }
    }

    /// The least upper bound of two types.
    pub fn join(&self, a: &ValueType, b: &ValueType) -> ValueType {
        if self.can_assign(a, b) {
            return b.clone();
        }
        if self.can_assign(b, a) {
            return a.clone();
        }
        match (a, b) {
            (ValueType::List(a), ValueType::List(b)) => ValueType::list(self.join(a, b)),
            (ValueType::Class(a), ValueType::Class(b)) => {
                let others = self.ancestors(b);
                self.ancestors(a)
                    .into_iter()
                    .find(|c| others.contains(c))
                    .map(ValueType::class)
                    .unwrap_or_else(ValueType::object)
            }
            _ => ValueType::object(),
        }
    }

    /// Attributes of `class` in layout order: inherited ones first.
    pub fn ordered_attrs(&self, class: &str) -> Vec<&AttrInfo> {
        let mut attrs = vec![];

        for name in self.ancestors(class).into_iter().rev() {
            if let Some(info) = self.get_class(name) {
                attrs.extend(info.attrs.iter());
            }
        }
        attrs
    }

    /// Methods of `class` in vtable order. An override keeps the slot of the method it
    /// replaces.
    pub fn ordered_methods(&self, class: &str) -> Vec<MethodSlot> {
        let mut slots: Vec<MethodSlot> = vec![];

        for name in self.ancestors(class).into_iter().rev() {
            let info = match self.get_class(name) {
                Some(info) => info,
                None => continue,
            };
            for (method, func_type) in info.own_methods() {
                let slot = MethodSlot {
                    name: method.to_string(),
                    def_class: name.to_string(),
                    func_type: func_type.clone(),
                };
                match slots.iter_mut().find(|s| s.name == method) {
                    Some(existing) => *existing = slot,
                    None => slots.push(slot),
                }
            }
        }
        slots
    }

    pub fn get_attr(&self, class: &str, name: &str) -> Option<&AttrInfo> {
        self.ancestors(class).into_iter().find_map(|c| {
            self.get_class(c)
                .and_then(|info| info.attrs.iter().find(|a| a.name == name))
        })
    }

    pub fn get_method(&self, class: &str, name: &str) -> Option<&FuncType> {
        self.ancestors(class).into_iter().find_map(|c| {
            self.get_class(c).and_then(|info| {
                info.methods
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, ty)| ty)
            })
        })
    }

    /// The nearest class in the chain of `class` that defines `name`.
    pub fn get_method_def_class<'a>(&'a self, class: &'a str, name: &str) -> Option<&'a str> {
        self.ancestors(class).into_iter().find(|c| {
            self.get_class(c)
                .map_or(false, |info| info.methods.iter().any(|(n, _)| n == name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> TypeSystem {
        let mut ts = TypeSystem::new();
        ts.add_class("A", Some(OBJECT));
        ts.add_class("B", Some("A"));
        ts.add_class("C", Some("A"));
        ts
    }

    #[test]
    fn sub_class() {
        let ts = hierarchy();

        assert!(ts.is_sub_class("B", "A"));
        assert!(ts.is_sub_class("B", "B"));
        assert!(ts.is_sub_class("B", OBJECT));
        assert!(!ts.is_sub_class("A", "B"));
        assert!(!ts.is_sub_class("B", "C"));
    }

    #[test]
    fn subtype() {
        let ts = hierarchy();
        let int_list = ValueType::list(ValueType::int());

        assert!(ts.is_subtype(&int_list, &ValueType::object()));
        assert!(ts.is_subtype(&int_list, &int_list));
        assert!(!ts.is_subtype(&ValueType::list(ValueType::class("B")), &ValueType::list(ValueType::class("A"))));
    }

    #[test]
    fn assignability() {
        let ts = hierarchy();

        assert!(ts.can_assign(&ValueType::class("B"), &ValueType::class("A")));
        assert!(ts.can_assign(&ValueType::none(), &ValueType::class("A")));
        assert!(ts.can_assign(&ValueType::none(), &ValueType::list(ValueType::int())));
        assert!(!ts.can_assign(&ValueType::none(), &ValueType::int()));
        assert!(!ts.can_assign(&ValueType::none(), &ValueType::str()));
        assert!(ts.can_assign(&ValueType::empty(), &ValueType::list(ValueType::bool())));
        assert!(ts.can_assign(
            &ValueType::list(ValueType::none()),
            &ValueType::list(ValueType::class("A"))
        ));
        assert!(!ts.can_assign(
            &ValueType::list(ValueType::none()),
            &ValueType::list(ValueType::int())
        ));
        assert!(!ts.can_assign(&ValueType::int(), &ValueType::bool()));
    }

    #[test]
    fn join() {
        let ts = hierarchy();

        assert_eq!(ts.join(&ValueType::class("B"), &ValueType::class("C")), ValueType::class("A"));
        assert_eq!(ts.join(&ValueType::class("B"), &ValueType::class("A")), ValueType::class("A"));
        assert_eq!(ts.join(&ValueType::int(), &ValueType::str()), ValueType::object());
        assert_eq!(ts.join(&ValueType::none(), &ValueType::class("B")), ValueType::class("B"));
        assert_eq!(ts.join(&ValueType::none(), &ValueType::int()), ValueType::object());
        assert_eq!(
            ts.join(&ValueType::list(ValueType::int()), &ValueType::list(ValueType::int())),
            ValueType::list(ValueType::int())
        );
        assert_eq!(
            ts.join(&ValueType::list(ValueType::class("B")), &ValueType::list(ValueType::class("C"))),
            ValueType::list(ValueType::class("A"))
        );
        assert_eq!(
            ts.join(&ValueType::list(ValueType::int()), &ValueType::list(ValueType::bool())),
            ValueType::list(ValueType::object())
        );
        assert_eq!(
            ts.join(
                &ValueType::list(ValueType::list(ValueType::class("C"))),
                &ValueType::list(ValueType::list(ValueType::class("B")))
            ),
            ValueType::list(ValueType::list(ValueType::class("A")))
        );
        assert_eq!(
            ts.join(&ValueType::list(ValueType::int()), &ValueType::class("A")),
            ValueType::object()
        );
    }

    #[test]
    fn join_laws() {
        let ts = hierarchy();
        let types = vec![
            ValueType::int(),
            ValueType::none(),
            ValueType::class("A"),
            ValueType::class("B"),
            ValueType::class("C"),
            ValueType::list(ValueType::int()),
            ValueType::empty(),
        ];

        for a in &types {
            for b in &types {
                let j = ts.join(a, b);
                assert!(ts.can_assign(a, &j), "{} into join({}, {})", a, a, b);
                assert!(ts.can_assign(b, &j), "{} into join({}, {})", b, a, b);
                assert_eq!(ts.join(a, a), a.clone());
            }
        }
    }

    #[test]
    fn layout_keeps_override_slot() {
        let mut ts = hierarchy();
        let m = |class: &str| FuncType::new(vec![ValueType::class(class)], ValueType::int());

        ts.add_attr("A", "x", ValueType::int(), None);
        ts.add_attr("B", "y", ValueType::bool(), None);
        ts.add_method("A", "f", m("A"));
        ts.add_method("A", "g", m("A"));
        ts.add_method("B", "h", m("B"));
        ts.add_method("B", "f", m("B"));

        let attrs: Vec<_> = ts.ordered_attrs("B").iter().map(|a| a.name.clone()).collect();
        assert_eq!(attrs, vec!["x", "y"]);

        let methods: Vec<_> = ts
            .ordered_methods("B")
            .into_iter()
            .map(|s| format!("{}.{}", s.def_class, s.name))
            .collect();
        assert_eq!(methods, vec!["object.__init__", "B.f", "A.g", "B.h"]);

        assert_eq!(ts.get_method_def_class("B", "g"), Some("A"));
        assert_eq!(ts.get_method_def_class("B", "f"), Some("B"));
        assert_eq!(ts.get_method_def_class("C", "f"), Some("A"));
        assert!(ts.get_attr("C", "y").is_none());
    }
}
