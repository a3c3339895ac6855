mod errors;
mod parser;
mod tokenizer;
pub mod traverse;
mod tree;

pub use errors::{ParseError, ParseErrorKind};
pub use parser::{parse_string, Parser};
pub use tokenizer::*;
pub use tree::*;
