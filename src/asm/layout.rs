//! Static memory of a compiled program: vtables, the function table and the constant pool.
use super::wasm::{DataSegment, Size, SIZE_BYTES};
use super::{align, ATTR_BYTES, HEADER_BYTES, VTABLE_BASE};
use crate::sem::{AttrInfo, MethodSlot, TypeSystem, ValueType};
use log::debug;
use std::collections::HashMap;

/// Names of runtime functions and imports that user functions and classes must not shadow.
const RESERVED: &[&str] = &[
    "main",
    "alloc",
    "align",
    "mem_cpy",
    "nullthrow",
    "check_bounds",
    "list_elem",
    "len",
    "get_char",
    "str_idx",
    "str_concat",
    "list_concat",
    "str_cmp",
    "floor_div",
    "log_int",
    "log_bool",
    "log_str",
    "assert",
];

/// The WASM function name of a top-level function or class constructor.
pub fn function_name(name: &str) -> String {
    if RESERVED.contains(&name) {
        format!("{}.0", name)
    } else {
        name.to_string()
    }
}

/// The WASM function name of a method body.
pub fn method_name(class: &str, method: &str) -> String {
    format!("{}.{}", class, method)
}

#[derive(Debug)]
pub struct ClassLayout {
    pub name: String,
    /// Address of the first vtable entry.
    pub vtable: Size,
    pub methods: Vec<MethodSlot>,
    pub attrs: Vec<AttrInfo>,
}

impl ClassLayout {
    /// Byte offset of attribute `name` in an instance.
    pub fn attr_offset(&self, name: &str) -> Option<(Size, &ValueType)> {
        self.attrs
            .iter()
            .position(|a| a.name == name)
            .map(|slot| (HEADER_BYTES + slot as Size * ATTR_BYTES, &self.attrs[slot].value_type))
    }

    /// Byte offset of method `name` in the vtable.
    pub fn method_offset(&self, name: &str) -> Option<Size> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(|slot| slot as Size * SIZE_BYTES)
    }

    /// Size of an instance in bytes.
    pub fn instance_size(&self) -> Size {
        align(HEADER_BYTES + self.attrs.len() as Size * ATTR_BYTES)
    }
}

#[derive(Debug)]
pub struct Layout {
    classes: Vec<ClassLayout>,
    index: HashMap<String, usize>,
    /// Function table, in table index order.
    table: Vec<String>,
    strings: HashMap<String, Size>,
    segments: Vec<DataSegment>,
    next: Size,
}

impl Layout {
    pub fn new(ts: &TypeSystem) -> Self {
        let mut layout = Self {
            classes: vec![],
            index: HashMap::new(),
            table: vec![],
            strings: HashMap::new(),
            segments: vec![],
            next: VTABLE_BASE,
        };

        for class in ts.object_classes() {
            let methods = ts.ordered_methods(&class.name);
            let attrs = ts.ordered_attrs(&class.name).into_iter().cloned().collect();
            let vtable = layout.next;
            let mut bytes = vec![];

            for slot in &methods {
                let index = layout.table_index(&method_name(&slot.def_class, &slot.name));
                bytes.extend_from_slice(&index.to_le_bytes());
            }
            layout.next += bytes.len() as Size;
            if !bytes.is_empty() {
                layout.segments.push(DataSegment::new(vtable, bytes));
            }

            layout.index.insert(class.name.clone(), layout.classes.len());
            layout.classes.push(ClassLayout {
                name: class.name.clone(),
                vtable,
                methods,
                attrs,
            });
        }

        debug!(
            "laid out {} vtables, {} table entries",
            layout.classes.len(),
            layout.table.len()
        );
        layout
    }

    fn table_index(&mut self, function: &str) -> u32 {
        match self.table.iter().position(|f| f == function) {
            Some(i) => i as u32,
            None => {
                self.table.push(function.to_string());
                self.table.len() as u32 - 1
            }
        }
    }

    pub fn class(&self, name: &str) -> &ClassLayout {
        self.index
            .get(name)
            .map(|&i| &self.classes[i])
            .unwrap_or_else(|| panic!("Internal compiler error: no layout for class {}", name))
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassLayout> {
        self.classes.iter()
    }

    pub fn table(&self) -> &[String] {
        &self.table
    }

    /// Address of the constant string `value`, adding it to the pool on first use.
    pub fn string(&mut self, value: &str) -> Size {
        if let Some(&addr) = self.strings.get(value) {
            return addr;
        }

        let addr = align(self.next);
        let mut bytes = (value.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(value.as_bytes());

        self.next = addr + bytes.len() as Size;
        self.segments.push(DataSegment::new(addr, bytes));
        self.strings.insert(value.to_string(), addr);
        addr
    }

    /// Segments of everything laid out so far.
    pub fn data_segments(&self) -> &[DataSegment] {
        &self.segments
    }

    /// First address after the static data.
    pub fn heap_base(&self) -> Size {
        align(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sem::FuncType;

    fn method(class: &str) -> FuncType {
        FuncType::new(vec![ValueType::class(class)], ValueType::none())
    }

    fn hierarchy() -> TypeSystem {
        let mut ts = TypeSystem::new();

        ts.add_class("A", Some("object"));
        ts.add_class("B", Some("A"));
        ts.add_attr("A", "x", ValueType::int(), None);
        ts.add_attr("B", "y", ValueType::bool(), None);
        ts.add_method("A", "t", method("A"));
        ts.add_method("B", "t", method("B"));
        ts.add_method("B", "u", method("B"));
        ts
    }

    #[test]
    fn vtables() {
        let layout = Layout::new(&hierarchy());
        let object = layout.class("object");
        let a = layout.class("A");
        let b = layout.class("B");

        assert_eq!(object.vtable, 8);
        assert_eq!(a.vtable, 12);
        assert_eq!(b.vtable, 20);
        assert_eq!(layout.table(), &["object.__init__", "A.t", "B.t", "B.u"]);

        assert_eq!(b.method_offset("t"), Some(4));
        assert_eq!(b.method_offset("u"), Some(8));
        assert_eq!(a.method_offset("u"), None);

        let segments = layout.data_segments();
        assert_eq!(segments[2].offset(), 20);
        assert_eq!(segments[2].bytes(), &[0, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn attributes() {
        let layout = Layout::new(&hierarchy());
        let b = layout.class("B");

        assert_eq!(b.attr_offset("x"), Some((4, &ValueType::int())));
        assert_eq!(b.attr_offset("y"), Some((12, &ValueType::bool())));
        assert_eq!(b.instance_size(), 24);
        assert_eq!(layout.class("object").instance_size(), 8);
    }

    #[test]
    fn string_pool() {
        let mut layout = Layout::new(&hierarchy());
        let heap = layout.heap_base();

        let hello = layout.string("hello");
        assert_eq!(hello, heap);
        assert_eq!(layout.string("hello"), hello);
        assert_eq!(layout.string(""), hello + 16);
        assert_eq!(layout.heap_base(), hello + 24);
    }

    #[test]
    fn reserved_names() {
        assert_eq!(function_name("alloc"), "alloc.0");
        assert_eq!(function_name("main"), "main.0");
        assert_eq!(function_name("fib"), "fib");
        assert_eq!(method_name("A", "t"), "A.t");
    }
}
