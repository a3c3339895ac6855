//! A WebAssembly text format (WAT) model and printer.
//!
//! The model covers the subset of the instruction set the code generator needs. Modules are
//! built through [`Builders`] and rendered with [`Printer`], either compact (folded, one line)
//! or pretty (one instruction per line).
use std::fmt;
use std::mem;

// The length of the vector always is a multiple of the WebAssembly page size,
// which is defined to be the constant 65536 – abbreviated 64Ki.
//
// https://webassembly.github.io/spec/core/exec/runtime.html#page-size
pub const PAGE_SIZE: u32 = 65536;

/// `usize` for WebAssembly.
///
/// the largest amount of memory possible with 32-bit pointers,
/// which is what WebAssembly currently supports
pub type Size = u32;

/// The size of `Size` type in bytes.
pub const SIZE_BYTES: Size = mem::size_of::<Size>() as Size;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Type {
    I32,
    I64,
}

impl Type {
    pub fn as_str(&self) -> &'static str {
        match self {
            Type::I32 => "i32",
            Type::I64 => "i64",
        }
    }

    pub fn num_bytes(&self) -> Size {
        match self {
            Type::I32 => 4,
            Type::I64 => 8,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Instruction {
    // Numeric instructions.
    I32Const(i32),
    I64Const(i64),
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32GeS,
    I32GeU,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32RemS,
    I32And,
    I32Or,
    I32Xor,
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64GtS,
    I64LeS,
    I64GeS,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64RemS,
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,

    // Parametric instructions.
    Drop,
    Select,

    // Variable instructions
    LocalGet(Index),
    LocalSet(Index),
    LocalTee(Index),
    GlobalGet(Index),
    GlobalSet(Index),

    // Memory instructions
    I32Load(MemArg),
    I64Load(MemArg),
    I32Load8U(MemArg),
    I32Store(MemArg),
    I64Store(MemArg),
    I32Store8(MemArg),

    // Control Instructions
    Nop,
    Unreachable,
    Return,
    Call(Index),
    /// Calls the table element on top of the stack with an inline type use.
    CallIndirect {
        params: Vec<Type>,
        result_type: Option<Type>,
    },
    If {
        result_type: Option<Type>,
        then: Vec<Instruction>,
        r#else: Option<Vec<Instruction>>,
    },
    Block {
        label: Option<Identifier>,
        result_type: Option<Type>,
        body: Vec<Instruction>,
    },
    Loop {
        label: Option<Identifier>,
        body: Vec<Instruction>,
    },
    Br(Index),
    BrIf(Index),

    // line comment
    Comment(String),
}

impl Instruction {
    /// The text of an instruction that has no nested instructions.
    fn plain_text(&self) -> Option<String> {
        use Instruction::*;

        let text = match self {
            I32Const(n) => format!("i32.const {}", n),
            I64Const(n) => format!("i64.const {}", n),
            I32Eqz => "i32.eqz".to_string(),
            I32Eq => "i32.eq".to_string(),
            I32Ne => "i32.ne".to_string(),
            I32LtS => "i32.lt_s".to_string(),
            I32LtU => "i32.lt_u".to_string(),
            I32GtS => "i32.gt_s".to_string(),
            I32GtU => "i32.gt_u".to_string(),
            I32LeS => "i32.le_s".to_string(),
            I32GeS => "i32.ge_s".to_string(),
            I32GeU => "i32.ge_u".to_string(),
            I32Add => "i32.add".to_string(),
            I32Sub => "i32.sub".to_string(),
            I32Mul => "i32.mul".to_string(),
            I32DivS => "i32.div_s".to_string(),
            I32RemS => "i32.rem_s".to_string(),
            I32And => "i32.and".to_string(),
            I32Or => "i32.or".to_string(),
            I32Xor => "i32.xor".to_string(),
            I64Eqz => "i64.eqz".to_string(),
            I64Eq => "i64.eq".to_string(),
            I64Ne => "i64.ne".to_string(),
            I64LtS => "i64.lt_s".to_string(),
            I64GtS => "i64.gt_s".to_string(),
            I64LeS => "i64.le_s".to_string(),
            I64GeS => "i64.ge_s".to_string(),
            I64Add => "i64.add".to_string(),
            I64Sub => "i64.sub".to_string(),
            I64Mul => "i64.mul".to_string(),
            I64DivS => "i64.div_s".to_string(),
            I64RemS => "i64.rem_s".to_string(),
            I32WrapI64 => "i32.wrap_i64".to_string(),
            I64ExtendI32S => "i64.extend_i32_s".to_string(),
            I64ExtendI32U => "i64.extend_i32_u".to_string(),
            Drop => "drop".to_string(),
            Select => "select".to_string(),
            LocalGet(idx) => format!("local.get {}", idx),
            LocalSet(idx) => format!("local.set {}", idx),
            LocalTee(idx) => format!("local.tee {}", idx),
            GlobalGet(idx) => format!("global.get {}", idx),
            GlobalSet(idx) => format!("global.set {}", idx),
            I32Load(memarg) => format!("i32.load{}", memarg),
            I64Load(memarg) => format!("i64.load{}", memarg),
            I32Load8U(memarg) => format!("i32.load8_u{}", memarg),
            I32Store(memarg) => format!("i32.store{}", memarg),
            I64Store(memarg) => format!("i64.store{}", memarg),
            I32Store8(memarg) => format!("i32.store8{}", memarg),
            Nop => "nop".to_string(),
            Unreachable => "unreachable".to_string(),
            Return => "return".to_string(),
            Call(idx) => format!("call {}", idx),
            CallIndirect {
                params,
                result_type,
            } => {
                let mut text = "call_indirect".to_string();
                if !params.is_empty() {
                    text.push_str(" (param");
                    for param in params {
                        text.push(' ');
                        text.push_str(param.as_str());
                    }
                    text.push(')');
                }
                if let Some(ty) = result_type {
                    text.push_str(&format!(" (result {})", ty));
                }
                text
            }
            Br(idx) => format!("br {}", idx),
            BrIf(idx) => format!("br_if {}", idx),
            If { .. } | Block { .. } | Loop { .. } | Comment(_) => return None,
        };
        Some(text)
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Identifier(String);

impl Identifier {
    pub fn new<T: AsRef<str>>(name: T) -> Self {
        Identifier(name.as_ref().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

// https://webassembly.github.io/spec/core/text/modules.html#text-localidx
#[derive(Debug, PartialEq, Clone)]
pub enum Index {
    Id(Identifier),
    Index(Size),
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Id(id) => write!(f, "{}", id),
            Index::Index(i) => write!(f, "{}", i),
        }
    }
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct MemArg {
    offset: Option<Size>,
    align: Option<u32>,
}

impl MemArg {
    pub fn offset(offset: Size) -> Self {
        MemArg {
            offset: Some(offset),
            align: None,
        }
    }
}

impl fmt::Display for MemArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) if offset > 0 => write!(f, " offset={}", offset)?,
            _ => {}
        }
        if let Some(align) = self.align {
            write!(f, " align={}", align)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Module {
    pub imports: Vec<Import>,
    pub table: Option<Table>,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
    pub elements: Vec<ElementSegment>,
    pub data_segments: Vec<DataSegment>,
    pub start: Option<Identifier>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions
            .iter()
            .find(|f| f.id.as_ref().map(Identifier::as_str) == Some(name))
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Import {
    module: String,
    name: String,
    desc: ImportDescriptor,
}

impl Import {
    pub fn new<T: AsRef<str>, U: AsRef<str>>(module: T, name: U, desc: ImportDescriptor) -> Self {
        Self {
            module: module.as_ref().to_string(),
            name: name.as_ref().to_string(),
            desc,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum ImportDescriptor {
    Function {
        id: Option<Identifier>,
        params: Vec<Type>,
        result_type: Option<Type>,
    },
    Memory {
        id: Option<Identifier>,
        min: u32,
        max: Option<u32>,
    },
}

/// A `funcref` table.
#[derive(Debug, PartialEq, Clone)]
pub struct Table {
    pub size: Size,
}

/// Active element segment filling the table from `offset`.
#[derive(Debug, PartialEq, Clone)]
pub struct ElementSegment {
    pub offset: Size,
    pub functions: Vec<Identifier>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Global {
    id: Option<Identifier>,
    r#type: Type,
    mutable: bool,
    init: Vec<Instruction>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct DataSegment {
    offset: Size,
    bytes: Vec<u8>,
}

impl DataSegment {
    pub fn new(offset: Size, bytes: Vec<u8>) -> Self {
        Self { offset, bytes }
    }

    pub fn offset(&self) -> Size {
        self.offset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, PartialEq)]
pub struct Function {
    id: Option<Identifier>,
    params: Vec<Param>,
    result_type: Option<Type>,
    locals: Vec<Local>,
    body: Vec<Instruction>,
}

impl Function {
    pub fn body(&self) -> &[Instruction] {
        &self.body
    }

    pub fn params(&self) -> impl Iterator<Item = Type> + '_ {
        self.params.iter().map(|p| p.r#type)
    }

    pub fn result_type(&self) -> Option<Type> {
        self.result_type
    }
}

#[derive(Debug, PartialEq)]
pub struct Param {
    id: Option<Identifier>,
    r#type: Type,
}

#[derive(Debug, PartialEq)]
pub struct Local {
    id: Option<Identifier>,
    r#type: Type,
}

pub struct Builders {}

impl Builders {
    pub fn func_desc() -> FunctionDescriptorBuilder {
        FunctionDescriptorBuilder::default()
    }

    pub fn memory_desc(min: u32) -> ImportDescriptor {
        ImportDescriptor::Memory {
            id: None,
            min,
            max: None,
        }
    }

    pub fn global<T: AsRef<str>>(name: T, ty: Type) -> GlobalBuilder {
        GlobalBuilder {
            id: Identifier::new(name),
            r#type: ty,
            mutable: false,
            init: vec![],
        }
    }

    pub fn function() -> FunctionBuilder {
        FunctionBuilder::default()
    }

    pub fn instructions() -> InstructionsBuilder {
        InstructionsBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct FunctionDescriptorBuilder {
    id: Option<Identifier>,
    params: Vec<Type>,
    result_type: Option<Type>,
}

impl FunctionDescriptorBuilder {
    pub fn id<T: AsRef<str>>(&mut self, id: T) -> &mut Self {
        self.id = Some(Identifier::new(id));
        self
    }

    pub fn param(&mut self, ty: Type) -> &mut Self {
        self.params.push(ty);
        self
    }

    pub fn result_type(&mut self, ty: Type) -> &mut Self {
        self.result_type = Some(ty);
        self
    }

    pub fn build(&mut self) -> ImportDescriptor {
        ImportDescriptor::Function {
            id: self.id.take(),
            params: mem::take(&mut self.params),
            result_type: self.result_type.take(),
        }
    }
}

#[derive(Debug)]
pub struct GlobalBuilder {
    id: Identifier,
    r#type: Type,
    mutable: bool,
    init: Vec<Instruction>,
}

impl GlobalBuilder {
    pub fn mutable(&mut self, mutable: bool) -> &mut Self {
        self.mutable = mutable;
        self
    }

    pub fn init(&mut self, instructions: Vec<Instruction>) -> &mut Self {
        self.init = instructions;
        self
    }

    pub fn build(&mut self) -> Global {
        Global {
            id: Some(self.id.clone()),
            r#type: self.r#type,
            mutable: self.mutable,
            init: mem::take(&mut self.init),
        }
    }
}

#[derive(Debug, Default)]
pub struct FunctionBuilder {
    id: Option<Identifier>,
    params: Vec<Param>,
    locals: Vec<Local>,
    result_type: Option<Type>,
    body: Vec<Instruction>,
}

impl FunctionBuilder {
    pub fn id<T: AsRef<str>>(&mut self, id: T) -> &mut Self {
        self.id = Some(Identifier::new(id));
        self
    }

    pub fn param(&mut self, ty: Type) -> &mut Self {
        self.params.push(Param {
            id: None,
            r#type: ty,
        });
        self
    }

    pub fn named_param<T: AsRef<str>>(&mut self, name: T, ty: Type) -> &mut Self {
        self.params.push(Param {
            id: Some(Identifier::new(name)),
            r#type: ty,
        });
        self
    }

    pub fn named_local<T: AsRef<str>>(&mut self, name: T, ty: Type) -> &mut Self {
        self.locals.push(Local {
            id: Some(Identifier::new(name)),
            r#type: ty,
        });
        self
    }

    pub fn result_type(&mut self, ty: Option<Type>) -> &mut Self {
        self.result_type = ty;
        self
    }

    pub fn body(&mut self, insts: Vec<Instruction>) -> &mut Self {
        self.body = insts;
        self
    }

    pub fn build(&mut self) -> Function {
        Function {
            id: self.id.take(),
            result_type: self.result_type.take(),
            params: mem::take(&mut self.params),
            locals: mem::take(&mut self.locals),
            body: mem::take(&mut self.body),
        }
    }
}

#[derive(Debug, Default)]
pub struct InstructionsBuilder {
    instructions: Vec<Instruction>,
}

impl InstructionsBuilder {
    pub fn i32_const(&mut self, n: i32) -> &mut Self {
        self.push(Instruction::I32Const(n))
    }

    pub fn i64_const(&mut self, n: i64) -> &mut Self {
        self.push(Instruction::I64Const(n))
    }

    /// A constant of the given type.
    pub fn constant(&mut self, ty: Type, n: i64) -> &mut Self {
        match ty {
            Type::I32 => self.i32_const(n as i32),
            Type::I64 => self.i64_const(n),
        }
    }

    pub fn i32_eqz(&mut self) -> &mut Self {
        self.push(Instruction::I32Eqz)
    }

    pub fn i32_eq(&mut self) -> &mut Self {
        self.push(Instruction::I32Eq)
    }

    pub fn i32_ne(&mut self) -> &mut Self {
        self.push(Instruction::I32Ne)
    }

    pub fn i32_lt_s(&mut self) -> &mut Self {
        self.push(Instruction::I32LtS)
    }

    pub fn i32_lt_u(&mut self) -> &mut Self {
        self.push(Instruction::I32LtU)
    }

    pub fn i32_gt_s(&mut self) -> &mut Self {
        self.push(Instruction::I32GtS)
    }

    pub fn i32_ge_s(&mut self) -> &mut Self {
        self.push(Instruction::I32GeS)
    }

    pub fn i32_ge_u(&mut self) -> &mut Self {
        self.push(Instruction::I32GeU)
    }

    pub fn i32_add(&mut self) -> &mut Self {
        self.push(Instruction::I32Add)
    }

    pub fn i32_sub(&mut self) -> &mut Self {
        self.push(Instruction::I32Sub)
    }

    pub fn i32_mul(&mut self) -> &mut Self {
        self.push(Instruction::I32Mul)
    }

    pub fn i32_and(&mut self) -> &mut Self {
        self.push(Instruction::I32And)
    }

    pub fn i32_or(&mut self) -> &mut Self {
        self.push(Instruction::I32Or)
    }

    pub fn i32_xor(&mut self) -> &mut Self {
        self.push(Instruction::I32Xor)
    }

    pub fn i64_eqz(&mut self) -> &mut Self {
        self.push(Instruction::I64Eqz)
    }

    pub fn i64_ne(&mut self) -> &mut Self {
        self.push(Instruction::I64Ne)
    }

    pub fn i64_lt_s(&mut self) -> &mut Self {
        self.push(Instruction::I64LtS)
    }

    pub fn i64_eq(&mut self) -> &mut Self {
        self.push(Instruction::I64Eq)
    }

    pub fn i64_ge_s(&mut self) -> &mut Self {
        self.push(Instruction::I64GeS)
    }

    pub fn i64_mul(&mut self) -> &mut Self {
        self.push(Instruction::I64Mul)
    }

    pub fn i64_add(&mut self) -> &mut Self {
        self.push(Instruction::I64Add)
    }

    pub fn i64_sub(&mut self) -> &mut Self {
        self.push(Instruction::I64Sub)
    }

    pub fn i64_div_s(&mut self) -> &mut Self {
        self.push(Instruction::I64DivS)
    }

    pub fn i64_rem_s(&mut self) -> &mut Self {
        self.push(Instruction::I64RemS)
    }

    pub fn i32_wrap_i64(&mut self) -> &mut Self {
        self.push(Instruction::I32WrapI64)
    }

    pub fn i64_extend_i32_u(&mut self) -> &mut Self {
        self.push(Instruction::I64ExtendI32U)
    }

    pub fn drop(&mut self) -> &mut Self {
        self.push(Instruction::Drop)
    }

    pub fn local_get<T: AsRef<str>>(&mut self, name: T) -> &mut Self {
        self.push(Instruction::LocalGet(Index::Id(Identifier::new(name))))
    }

    pub fn local_set<T: AsRef<str>>(&mut self, name: T) -> &mut Self {
        self.push(Instruction::LocalSet(Index::Id(Identifier::new(name))))
    }

    pub fn local_tee<T: AsRef<str>>(&mut self, name: T) -> &mut Self {
        self.push(Instruction::LocalTee(Index::Id(Identifier::new(name))))
    }

    pub fn global_get<T: AsRef<str>>(&mut self, name: T) -> &mut Self {
        self.push(Instruction::GlobalGet(Index::Id(Identifier::new(name))))
    }

    pub fn global_set<T: AsRef<str>>(&mut self, name: T) -> &mut Self {
        self.push(Instruction::GlobalSet(Index::Id(Identifier::new(name))))
    }

    pub fn i32_load(&mut self, offset: Size) -> &mut Self {
        self.push(Instruction::I32Load(MemArg::offset(offset)))
    }

    pub fn i32_load8_u(&mut self, offset: Size) -> &mut Self {
        self.push(Instruction::I32Load8U(MemArg::offset(offset)))
    }

    pub fn i32_store(&mut self, offset: Size) -> &mut Self {
        self.push(Instruction::I32Store(MemArg::offset(offset)))
    }

    pub fn i32_store8(&mut self, offset: Size) -> &mut Self {
        self.push(Instruction::I32Store8(MemArg::offset(offset)))
    }

    /// Loads a value of type `ty`.
    pub fn load(&mut self, ty: Type, offset: Size) -> &mut Self {
        match ty {
            Type::I32 => self.push(Instruction::I32Load(MemArg::offset(offset))),
            Type::I64 => self.push(Instruction::I64Load(MemArg::offset(offset))),
        }
    }

    /// Stores a value of type `ty`.
    pub fn store(&mut self, ty: Type, offset: Size) -> &mut Self {
        match ty {
            Type::I32 => self.push(Instruction::I32Store(MemArg::offset(offset))),
            Type::I64 => self.push(Instruction::I64Store(MemArg::offset(offset))),
        }
    }

    pub fn nop(&mut self) -> &mut Self {
        self.push(Instruction::Nop)
    }

    pub fn unreachable(&mut self) -> &mut Self {
        self.push(Instruction::Unreachable)
    }

    pub fn r#return(&mut self) -> &mut Self {
        self.push(Instruction::Return)
    }

    pub fn call<T: AsRef<str>>(&mut self, name: T) -> &mut Self {
        self.push(Instruction::Call(Index::Id(Identifier::new(name))))
    }

    pub fn call_indirect(&mut self, params: Vec<Type>, result_type: Option<Type>) -> &mut Self {
        self.push(Instruction::CallIndirect {
            params,
            result_type,
        })
    }

    pub fn br<T: AsRef<str>>(&mut self, label: T) -> &mut Self {
        self.push(Instruction::Br(Index::Id(Identifier::new(label))))
    }

    pub fn br_if<T: AsRef<str>>(&mut self, label: T) -> &mut Self {
        self.push(Instruction::BrIf(Index::Id(Identifier::new(label))))
    }

    pub fn comment<T: AsRef<str>>(&mut self, comment: T) -> &mut Self {
        self.push(Instruction::Comment(comment.as_ref().to_string()))
    }

    pub fn if_else(
        &mut self,
        result_type: Option<Type>,
        then: Vec<Instruction>,
        r#else: Option<Vec<Instruction>>,
    ) -> &mut Self {
        self.push(Instruction::If {
            result_type,
            then,
            r#else,
        })
    }

    /// `if` whose branches are built by closures.
    pub fn if_with<F, G>(&mut self, result_type: Option<Type>, then_fn: F, else_fn: Option<G>) -> &mut Self
    where
        F: FnOnce(&mut Self),
        G: FnOnce(&mut Self),
    {
        let then = Self::build_with(then_fn);
        let r#else = else_fn.map(Self::build_with);

        self.if_else(result_type, then, r#else)
    }

    pub fn block<T: AsRef<str>>(&mut self, label: T, body: Vec<Instruction>) -> &mut Self {
        self.push(Instruction::Block {
            label: Some(Identifier::new(label)),
            result_type: None,
            body,
        })
    }

    pub fn r#loop<T: AsRef<str>>(&mut self, label: T, body: Vec<Instruction>) -> &mut Self {
        self.push(Instruction::Loop {
            label: Some(Identifier::new(label)),
            body,
        })
    }

    /// `block $exit (loop $next ...)`: `br_if $exit` leaves the loop, `br $next` repeats it.
    pub fn loop_with<T: AsRef<str>, U: AsRef<str>, F>(&mut self, exit: T, next: U, body_fn: F) -> &mut Self
    where
        F: FnOnce(&mut Self),
    {
        let mut inner = Self::default();
        inner.r#loop(next, Self::build_with(body_fn));
        let body = inner.build();

        self.block(exit, body)
    }

    pub fn append(&mut self, instructions: Vec<Instruction>) -> &mut Self {
        self.instructions.extend(instructions);
        self
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    pub fn build(&mut self) -> Vec<Instruction> {
        mem::take(&mut self.instructions)
    }

    fn build_with<F: FnOnce(&mut Self)>(builder_fn: F) -> Vec<Instruction> {
        let mut builder = Self::default();

        builder_fn(&mut builder);
        builder.build()
    }
}

#[derive(Debug)]
pub struct Printer {
    buffer: String,
    level: i32,
    pub indent: i32,
    pub pretty: bool,
    indent_no_newline: bool,
}

impl ToString for Printer {
    fn to_string(&self) -> String {
        self.buffer.clone()
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    pub fn print(module: &Module) -> String {
        let mut printer = Printer::new();

        printer.write_module(module);
        printer.to_string()
    }

    pub fn print_pretty(module: &Module) -> String {
        let mut printer = Printer::new();

        printer.pretty = true;
        printer.write_module(module);
        printer.buffer.push('\n');
        printer.to_string()
    }

    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            level: 0,
            indent: 2,
            pretty: false,
            indent_no_newline: false,
        }
    }

    pub fn as_str(&self) -> &str {
        self.buffer.as_str()
    }

    fn indent(&mut self) {
        if self.level == 0 {
            return;
        }
        if self.pretty {
            if !self.indent_no_newline {
                self.buffer.push('\n');
            }
            self.indent_no_newline = false;

            for _ in 0..self.level * self.indent {
                self.buffer.push(' ');
            }
        } else {
            self.buffer.push(' ');
        }
    }

    fn push_indent(&mut self) {
        self.level += 1;
    }

    fn close_indent(&mut self) {
        self.level -= 1;
        self.buffer.push(')');
    }

    fn open(&mut self, keyword: &str) {
        self.indent();
        self.buffer.push('(');
        self.buffer.push_str(keyword);
    }

    fn plain(&mut self, text: &str) {
        self.indent();
        if self.pretty {
            self.buffer.push_str(text);
        } else {
            self.buffer.push('(');
            self.buffer.push_str(text);
            self.buffer.push(')');
        }
    }

    pub fn write_module(&mut self, module: &Module) {
        self.open("module");
        self.push_indent();

        for import in &module.imports {
            self.write_import(import);
        }
        if let Some(table) = &module.table {
            self.indent();
            self.buffer.push_str(&format!("(table {} funcref)", table.size));
        }
        for global in &module.globals {
            self.write_global(global);
        }
        for function in &module.functions {
            self.write_function(function);
        }
        for elem in &module.elements {
            self.indent();
            self.buffer
                .push_str(&format!("(elem (i32.const {})", elem.offset));
            for func in &elem.functions {
                self.buffer.push_str(&format!(" {}", func));
            }
            self.buffer.push(')');
        }
        for data_segment in &module.data_segments {
            self.write_data_segment(data_segment);
        }
        if let Some(start) = &module.start {
            self.indent();
            self.buffer.push_str(&format!("(start {})", start));
        }

        self.close_indent();
    }

    fn write_import(&mut self, import: &Import) {
        self.open("import");
        self.buffer.push(' ');
        self.write_string(&import.module);
        self.buffer.push(' ');
        self.write_string(&import.name);
        self.buffer.push(' ');
        self.write_import_descriptor(&import.desc);
        self.buffer.push(')');
    }

    fn write_import_descriptor(&mut self, desc: &ImportDescriptor) {
        match desc {
            ImportDescriptor::Function {
                id,
                params,
                result_type,
            } => {
                self.buffer.push_str("(func");

                if let Some(id) = id {
                    self.buffer.push_str(&format!(" {}", id));
                }
                for param in params {
                    self.buffer.push_str(&format!(" (param {})", param));
                }
                if let Some(ty) = result_type {
                    self.buffer.push_str(&format!(" (result {})", ty));
                }
                self.buffer.push(')');
            }
            ImportDescriptor::Memory { id, min, max } => {
                self.buffer.push_str("(memory");

                if let Some(id) = id {
                    self.buffer.push_str(&format!(" {}", id));
                }
                self.buffer.push_str(&format!(" {}", min));
                if let Some(max) = max {
                    self.buffer.push_str(&format!(" {}", max));
                }
                self.buffer.push(')');
            }
        }
    }

    fn write_typed(&mut self, keyword: &str, id: &Option<Identifier>, ty: Type) {
        self.buffer.push_str(&format!(" ({}", keyword));
        if let Some(id) = id {
            self.buffer.push_str(&format!(" {}", id));
        }
        self.buffer.push_str(&format!(" {})", ty));
    }

    fn write_data_segment(&mut self, data_segment: &DataSegment) {
        self.open("data");
        self.buffer
            .push_str(&format!(" (i32.const {}) ", data_segment.offset));
        self.write_bytes(&data_segment.bytes);
        self.buffer.push(')');
    }

    fn write_global(&mut self, global: &Global) {
        self.open("global");

        if let Some(id) = &global.id {
            self.buffer.push_str(&format!(" {}", id));
        }
        if global.mutable {
            self.buffer.push_str(&format!(" (mut {})", global.r#type));
        } else {
            self.buffer.push_str(&format!(" {}", global.r#type));
        }

        // Initializers stay on the same line.
        let pretty = self.pretty;
        self.pretty = false;
        self.push_indent();
        for instruction in &global.init {
            self.write_instruction(instruction);
        }
        self.level -= 1;
        self.buffer.push(')');
        self.pretty = pretty;
    }

    fn write_function(&mut self, function: &Function) {
        self.open("func");

        if let Some(id) = &function.id {
            self.buffer.push_str(&format!(" {}", id));
        }
        for param in &function.params {
            self.write_typed("param", &param.id, param.r#type);
        }
        if let Some(result_type) = function.result_type {
            self.buffer.push_str(&format!(" (result {})", result_type));
        }
        for local in &function.locals {
            self.write_typed("local", &local.id, local.r#type);
        }

        self.push_indent();
        self.write_instructions(&function.body);
        self.close_indent();
    }

    fn write_string(&mut self, string: &str) {
        self.write_bytes(string.as_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.push('"');
        for b in bytes {
            match *b {
                b'"' => self.buffer.push_str("\\\""),
                b'\t' => self.buffer.push_str("\\t"),
                b'\n' => self.buffer.push_str("\\n"),
                b'\r' => self.buffer.push_str("\\r"),
                b'\\' => self.buffer.push_str("\\\\"),
                0x20..=0x7e => self.buffer.push(*b as char),
                _ => self.buffer.push_str(&format!("\\{:02x}", b)),
            }
        }
        self.buffer.push('"');
    }

    fn write_instructions(&mut self, instructions: &[Instruction]) {
        for instruction in instructions {
            self.write_instruction(instruction);
        }
    }

    pub fn write_instruction(&mut self, instruction: &Instruction) {
        if let Some(text) = instruction.plain_text() {
            self.plain(&text);
            return;
        }

        match instruction {
            Instruction::If {
                result_type,
                then,
                r#else,
            } => {
                self.open("if");
                if let Some(result_type) = result_type {
                    self.buffer.push_str(&format!(" (result {})", result_type));
                }

                self.push_indent();
                self.open("then");
                self.push_indent();
                self.write_instructions(then);
                self.close_indent();

                if let Some(instructions) = r#else {
                    self.open("else");
                    self.push_indent();
                    self.write_instructions(instructions);
                    self.close_indent();
                }

                self.close_indent();
            }
            Instruction::Block {
                label,
                result_type,
                body,
            } => {
                self.open("block");
                if let Some(label) = label {
                    self.buffer.push_str(&format!(" {}", label));
                }
                if let Some(result_type) = result_type {
                    self.buffer.push_str(&format!(" (result {})", result_type));
                }

                self.push_indent();
                self.write_instructions(body);
                self.close_indent();
            }
            Instruction::Loop { label, body } => {
                self.open("loop");
                if let Some(label) = label {
                    self.buffer.push_str(&format!(" {}", label));
                }

                self.push_indent();
                self.write_instructions(body);
                self.close_indent();
            }
            Instruction::Comment(comment) => {
                if self.pretty {
                    self.indent();
                    self.buffer.push_str(";; ");
                    self.buffer.push_str(comment);
                } else {
                    self.indent();
                    self.buffer.push_str(&format!("(;{};)", comment));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_value() {
        let mut printer = Printer::new();

        printer.write_instruction(&Instruction::I32Const(0));

        assert_eq!(printer.as_str(), "(i32.const 0)");
    }

    #[test]
    fn module_with_imports() {
        let mut module = Module::new();

        module.imports.push(Import::new(
            "imports",
            "logInt",
            Builders::func_desc()
                .id("log_int")
                .param(Type::I64)
                .build(),
        ));
        module
            .imports
            .push(Import::new("js", "mem", Builders::memory_desc(1)));

        assert_eq!(
            Printer::print(&module),
            "(module (import \"imports\" \"logInt\" (func $log_int (param i64))) (import \"js\" \"mem\" (memory 1)))"
        );
    }

    #[test]
    fn function() {
        let mut module = Module::new();

        module.functions.push(
            Builders::function()
                .id("foo")
                .named_param("x", Type::I32)
                .named_local("y", Type::I64)
                .result_type(Some(Type::I32))
                .body(
                    Builders::instructions()
                        .local_get("x")
                        .local_get("y")
                        .i32_wrap_i64()
                        .i32_add()
                        .build(),
                )
                .build(),
        );

        assert_eq!(
            Printer::print(&module),
            "(module (func $foo (param $x i32) (result i32) (local $y i64) (local.get $x) (local.get $y) (i32.wrap_i64) (i32.add)))"
        );
    }

    #[test]
    fn comparisons() {
        let mut printer = Printer::new();

        printer.write_instruction(&Instruction::I32GtS);
        printer.write_instruction(&Instruction::I64GeS);

        assert_eq!(printer.as_str(), "(i32.gt_s)(i64.ge_s)");
    }

    #[test]
    fn memory_and_indirect_calls() {
        let instructions = Builders::instructions()
            .load(Type::I64, 12)
            .i32_load(0)
            .store(Type::I32, 4)
            .call_indirect(vec![Type::I32, Type::I64], Some(Type::I32))
            .build();
        let mut printer = Printer::new();
        printer.pretty = true;
        printer.level = 1;

        for instruction in &instructions {
            printer.write_instruction(instruction);
        }

        assert_eq!(
            printer.as_str(),
            "\n  i64.load offset=12\n  i32.load\n  i32.store offset=4\n  call_indirect (param i32 i64) (result i32)"
        );
    }

    #[test]
    fn structured_control() {
        let mut builder = Builders::instructions();
        builder
            .loop_with("exit", "next", |b| {
                b.local_get("i").i32_eqz().br_if("exit").br("next");
            })
            .if_with(
                Some(Type::I32),
                |b| {
                    b.i32_const(1);
                },
                Some(|b: &mut InstructionsBuilder| {
                    b.i32_const(0);
                }),
            );
        let mut module = Module::new();
        module
            .functions
            .push(Builders::function().id("f").body(builder.build()).build());
        module.table = Some(Table { size: 1 });
        module.elements.push(ElementSegment {
            offset: 0,
            functions: vec![Identifier::new("f")],
        });
        module.start = Some(Identifier::new("f"));

        assert_eq!(
            Printer::print(&module),
            "(module (table 1 funcref) (func $f (block $exit (loop $next (local.get $i) (i32.eqz) (br_if $exit) (br $next))) (if (result i32) (then (i32.const 1)) (else (i32.const 0)))) (elem (i32.const 0) $f) (start $f))"
        );
    }

    #[test]
    fn data_segment_escapes() {
        let mut module = Module::new();
        module
            .data_segments
            .push(DataSegment::new(8, vec![2, 0, 0, 0, b'h', b'"']));

        assert_eq!(
            Printer::print(&module),
            "(module (data (i32.const 8) \"\\02\\00\\00\\00h\\\"\"))"
        );
    }
}
