//! WebAssembly code generation.
//!
//! ## Memory Layout
//!
//! ```ignore
//!    +---------+-------------------+---------------+----------+
//!    | (0..8)  | Vtables (i32 ...) | Constant Pool | Heap ... |
//!    o---------o-------------------o---------------o----------+
//!    |         |                                   |
//! index 0   Vtable Base (8)                    Heap Base
//! ```
//!
//! Words are 32-bit for booleans and pointers, 64-bit for integers. `None` is the null
//! pointer, so the first eight bytes are never handed out.
//!
//! ### Vtables
//!
//! One entry per method slot of each class, holding the index of the method body in the
//! function table. An override reuses the slot of the method it replaces, so a call site
//! only needs the slot offset of the static type to reach the dynamic implementation.
//!
//! ### Constant Pool
//!
//! String literals, interned. Same layout as heap strings.
//!
//! ### Heap
//!
//! A bump allocator starting at Heap Base, aligned to 8. Nothing is freed.
//!
//! - **Object** - vtable address (i32), then attributes at `4 + slot * 8`.
//! - **List** - length (i32), then elements at `4 + i * 8`.
//! - **String** - length (i32), then one byte per character.
//! - **Cell** - one 8-byte slot holding a variable captured by a nested function that
//!   assigns to it.

pub mod emitter;
pub mod layout;
pub mod stdlib;
pub mod wasm;
use crate::sem::{TypeSystem, ValueType};
use crate::syntax::Program;
pub use emitter::WasmEmitter;
use thiserror::Error;

/// Memory alignment
const ALIGNMENT: wasm::Size = 8;

/// Address of the first vtable.
pub const VTABLE_BASE: wasm::Size = 8;

/// Size of the length or vtable word at the head of every heap block.
pub const HEADER_BYTES: wasm::Size = wasm::SIZE_BYTES;

/// Bytes per attribute, list element or cell.
pub const ATTR_BYTES: wasm::Size = 8;

/// The heap cursor global.
pub const HEAP: &str = ".heap";

#[inline]
fn align(n: wasm::Size) -> wasm::Size {
    let m = n / ALIGNMENT;
    let a = ALIGNMENT * m;

    if a < n {
        ALIGNMENT * (m + 1)
    } else {
        a
    }
}

/// `int` is the only 64-bit value.
pub fn wasm_type(ty: &ValueType) -> wasm::Type {
    if ty.is_int() {
        wasm::Type::I64
    } else {
        wasm::Type::I32
    }
}

/// Functions returning `<None>` have no result.
pub fn result_type(ty: &ValueType) -> Option<wasm::Type> {
    if ty.is_none() {
        None
    } else {
        Some(wasm_type(ty))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("Built-in function print is unsupported for values of type {0}")]
    UnsupportedPrint(String),
    #[error("{0} is not supported by the {1} backend")]
    Unsupported(String, &'static str),
}

/// Compiles a checked, closure converted program to WebAssembly text.
pub fn emit(program: &Program, ts: &TypeSystem) -> Result<String, EmitError> {
    let module = WasmEmitter::new(ts, &program.instances).emit(program)?;

    Ok(wasm::Printer::print_pretty(&module))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(align(0), 0);
        assert_eq!(align(1), 8);
        assert_eq!(align(8), 8);
        assert_eq!(align(13), 16);
    }

    #[test]
    fn value_widths() {
        assert_eq!(wasm_type(&ValueType::int()), wasm::Type::I64);
        assert_eq!(wasm_type(&ValueType::bool()), wasm::Type::I32);
        assert_eq!(wasm_type(&ValueType::list(ValueType::int())), wasm::Type::I32);
        assert_eq!(result_type(&ValueType::none()), None);
        assert_eq!(result_type(&ValueType::str()), Some(wasm::Type::I32));
    }
}
