//! Runtime functions emitted into every module.
//!
//! Each of them is plain WASM over the linear memory; the host only supplies logging and
//! the assertion hook.
use super::wasm::{Builders, Function, InstructionsBuilder, Type};
use super::HEAP;

pub fn functions() -> Vec<Function> {
    vec![
        align(),
        alloc(),
        mem_cpy(),
        nullthrow(),
        check_bounds(),
        list_elem(),
        len(),
        get_char(),
        str_idx(),
        str_concat(),
        list_concat(),
        str_cmp(),
        floor_div(),
        object_init(),
    ]
}

fn ops() -> InstructionsBuilder {
    Builders::instructions()
}

/// Rounds `n` up to a multiple of 8.
fn align() -> Function {
    Builders::function()
        .id("align")
        .named_param("n", Type::I32)
        .result_type(Some(Type::I32))
        .body(
            ops()
                .local_get("n")
                .i32_const(7)
                .i32_add()
                .i32_const(-8)
                .i32_and()
                .build(),
        )
        .build()
}

/// Bump allocator: returns the heap cursor and advances it by `bytes`, rounded up.
fn alloc() -> Function {
    Builders::function()
        .id("alloc")
        .named_param("bytes", Type::I32)
        .result_type(Some(Type::I32))
        .named_local("addr", Type::I32)
        .body(
            ops()
                .global_get(HEAP)
                .local_set("addr")
                .global_get(HEAP)
                .local_get("bytes")
                .call("align")
                .i32_add()
                .global_set(HEAP)
                .local_get("addr")
                .build(),
        )
        .build()
}

/// Copies `n` bytes from `src` to `dst`, no checks.
fn mem_cpy() -> Function {
    let mut body = ops();
    body.loop_with("done", "copy", |b| {
        b.local_get("i")
            .local_get("n")
            .i32_ge_u()
            .br_if("done")
            .local_get("dst")
            .local_get("i")
            .i32_add()
            .local_get("src")
            .local_get("i")
            .i32_add()
            .i32_load8_u(0)
            .i32_store8(0)
            .local_get("i")
            .i32_const(1)
            .i32_add()
            .local_set("i")
            .br("copy");
    });

    Builders::function()
        .id("mem_cpy")
        .named_param("src", Type::I32)
        .named_param("dst", Type::I32)
        .named_param("n", Type::I32)
        .named_local("i", Type::I32)
        .body(body.build())
        .build()
}

/// Traps on a null pointer, otherwise returns it.
fn nullthrow() -> Function {
    Builders::function()
        .id("nullthrow")
        .named_param("ptr", Type::I32)
        .result_type(Some(Type::I32))
        .body(
            ops()
                .local_get("ptr")
                .i32_eqz()
                .if_else(None, ops().unreachable().build(), None)
                .local_get("ptr")
                .build(),
        )
        .build()
}

/// Traps unless `0 <= idx < len(ptr)`.
fn check_bounds() -> Function {
    Builders::function()
        .id("check_bounds")
        .named_param("ptr", Type::I32)
        .named_param("idx", Type::I64)
        .body(
            ops()
                .local_get("idx")
                .i64_const(0)
                .i64_lt_s()
                .local_get("idx")
                .local_get("ptr")
                .i32_load(0)
                .i64_extend_i32_u()
                .i64_ge_s()
                .i32_or()
                .if_else(None, ops().unreachable().build(), None)
                .build(),
        )
        .build()
}

/// Address of element `idx` of a list, after the null and bounds checks.
fn list_elem() -> Function {
    Builders::function()
        .id("list_elem")
        .named_param("list", Type::I32)
        .named_param("idx", Type::I64)
        .result_type(Some(Type::I32))
        .body(
            ops()
                .local_get("list")
                .call("nullthrow")
                .local_get("idx")
                .call("check_bounds")
                .local_get("list")
                .i32_const(4)
                .i32_add()
                .local_get("idx")
                .i32_wrap_i64()
                .i32_const(8)
                .i32_mul()
                .i32_add()
                .build(),
        )
        .build()
}

/// Length of a list or string.
fn len() -> Function {
    Builders::function()
        .id("len")
        .named_param("ptr", Type::I32)
        .result_type(Some(Type::I32))
        .body(ops().local_get("ptr").call("nullthrow").i32_load(0).build())
        .build()
}

fn get_char() -> Function {
    Builders::function()
        .id("get_char")
        .named_param("str", Type::I32)
        .named_param("idx", Type::I32)
        .result_type(Some(Type::I32))
        .body(
            ops()
                .local_get("str")
                .local_get("idx")
                .i32_add()
                .i32_load8_u(4)
                .build(),
        )
        .build()
}

/// `s[idx]` as a new one character string.
fn str_idx() -> Function {
    Builders::function()
        .id("str_idx")
        .named_param("str", Type::I32)
        .named_param("idx", Type::I64)
        .result_type(Some(Type::I32))
        .named_local("result", Type::I32)
        .body(
            ops()
                .local_get("str")
                .local_get("idx")
                .call("check_bounds")
                .i32_const(8)
                .call("alloc")
                .local_tee("result")
                .i32_const(1)
                .i32_store(0)
                .local_get("result")
                .local_get("str")
                .local_get("idx")
                .i32_wrap_i64()
                .call("get_char")
                .i32_store8(4)
                .local_get("result")
                .build(),
        )
        .build()
}

/// Allocates `len(a) + len(b)` elements of `width` bytes and copies both operands into it.
fn concat(name: &str, width: i32) -> Function {
    let mut body = ops();

    if width > 1 {
        body.local_get("a")
            .call("nullthrow")
            .drop()
            .local_get("b")
            .call("nullthrow")
            .drop();
    }
    body.local_get("a")
        .i32_load(0)
        .local_set("la")
        .local_get("b")
        .i32_load(0)
        .local_set("lb")
        // allocate and store the length
        .i32_const(4)
        .local_get("la")
        .local_get("lb")
        .i32_add()
        .i32_const(width)
        .i32_mul()
        .i32_add()
        .call("align")
        .call("alloc")
        .local_tee("result")
        .local_get("la")
        .local_get("lb")
        .i32_add()
        .i32_store(0)
        // a
        .local_get("a")
        .i32_const(4)
        .i32_add()
        .local_get("result")
        .i32_const(4)
        .i32_add()
        .local_get("la")
        .i32_const(width)
        .i32_mul()
        .call("mem_cpy")
        // b
        .local_get("b")
        .i32_const(4)
        .i32_add()
        .local_get("result")
        .i32_const(4)
        .i32_add()
        .local_get("la")
        .i32_const(width)
        .i32_mul()
        .i32_add()
        .local_get("lb")
        .i32_const(width)
        .i32_mul()
        .call("mem_cpy")
        .local_get("result");

    Builders::function()
        .id(name)
        .named_param("a", Type::I32)
        .named_param("b", Type::I32)
        .result_type(Some(Type::I32))
        .named_local("la", Type::I32)
        .named_local("lb", Type::I32)
        .named_local("result", Type::I32)
        .body(body.build())
        .build()
}

fn str_concat() -> Function {
    concat("str_concat", 1)
}

fn list_concat() -> Function {
    concat("list_concat", 8)
}

/// 1 if both strings hold the same bytes.
fn str_cmp() -> Function {
    let mut body = ops();

    body.local_get("a")
        .i32_load(0)
        .local_tee("n")
        .local_get("b")
        .i32_load(0)
        .i32_ne()
        .if_else(None, ops().i32_const(0).r#return().build(), None)
        .loop_with("done", "next", |b| {
            b.local_get("i")
                .local_get("n")
                .i32_ge_u()
                .br_if("done")
                .local_get("a")
                .local_get("i")
                .call("get_char")
                .local_get("b")
                .local_get("i")
                .call("get_char")
                .i32_ne()
                .if_else(None, ops().i32_const(0).r#return().build(), None)
                .local_get("i")
                .i32_const(1)
                .i32_add()
                .local_set("i")
                .br("next");
        })
        .i32_const(1);

    Builders::function()
        .id("str_cmp")
        .named_param("a", Type::I32)
        .named_param("b", Type::I32)
        .result_type(Some(Type::I32))
        .named_local("n", Type::I32)
        .named_local("i", Type::I32)
        .body(body.build())
        .build()
}

/// Integer division rounding towards negative infinity.
fn floor_div() -> Function {
    Builders::function()
        .id("floor_div")
        .named_param("a", Type::I64)
        .named_param("b", Type::I64)
        .result_type(Some(Type::I64))
        .named_local("q", Type::I64)
        .body(
            ops()
                .local_get("a")
                .local_get("b")
                .i64_div_s()
                .local_set("q")
                // remainder and operands of different signs
                .local_get("a")
                .local_get("b")
                .i64_rem_s()
                .i64_const(0)
                .i64_ne()
                .local_get("a")
                .i64_const(0)
                .i64_lt_s()
                .local_get("b")
                .i64_const(0)
                .i64_lt_s()
                .i32_xor()
                .i32_and()
                .if_else(
                    Some(Type::I64),
                    ops().local_get("q").i64_const(1).i64_sub().build(),
                    Some(ops().local_get("q").build()),
                )
                .build(),
        )
        .build()
}

fn object_init() -> Function {
    Builders::function()
        .id("object.__init__")
        .named_param("self", Type::I32)
        .body(ops().nop().build())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::wasm::{Instruction, Module, Printer};

    #[test]
    fn runtime_names() {
        let mut module = Module::new();
        module.functions = functions();

        for name in &[
            "alloc",
            "nullthrow",
            "check_bounds",
            "str_cmp",
            "str_concat",
            "list_concat",
            "str_idx",
            "get_char",
            "mem_cpy",
            "len",
            "floor_div",
            "object.__init__",
        ] {
            assert!(module.function(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn nullthrow_traps() {
        let f = nullthrow();

        assert!(f.body().iter().any(|i| matches!(
            i,
            Instruction::If { then, .. } if then == &vec![Instruction::Unreachable]
        )));
    }

    #[test]
    fn floor_div_signature() {
        let f = floor_div();

        assert_eq!(f.params().collect::<Vec<_>>(), vec![Type::I64, Type::I64]);
        assert_eq!(f.result_type(), Some(Type::I64));
    }

    #[test]
    fn str_concat_copies_bytes() {
        let mut module = Module::new();
        module.functions.push(str_concat());
        let wat = Printer::print(&module);

        assert!(wat.contains("(local.get $la) (i32.const 1) (i32.mul) (call $mem_cpy)"));
        assert!(!wat.contains("nullthrow"));
    }
}
