#![deny(nonstandard_style, rust_2018_idioms)]
#![warn(unused)]

pub mod asm;
pub mod backend;
pub mod compiler;
pub mod sem;
pub mod syntax;

mod util;
