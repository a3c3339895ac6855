pub mod binder;
pub mod checker;
pub mod closure;
pub mod empty_list;
pub mod hoister;
mod scope;
pub mod types;
pub mod typesystem;

use crate::syntax::Program;
pub use binder::Binder;
pub use checker::TypeChecker;
pub use closure::{ClosureTransformer, TypeEraser};
pub use empty_list::EmptyListTyper;
pub use hoister::Hoister;
pub use types::{FuncType, SymbolType, ValueType};
pub use typesystem::{AttrInfo, ClassInfo, MethodSlot, TypeSystem};

pub trait SemanticAnalyzer {
    fn analyze(&mut self, program: &mut Program);
}
