pub mod cli;
pub mod pipeline;
pub use cli::Command;

use crate::asm::EmitError;
use crate::syntax::{ParseError, SemanticError};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    InputSourceError(#[from] io::Error),

    #[error(transparent)]
    ParseError(#[from] ParseError),

    #[error("{}", lines(.0))]
    SemanticErrors(Vec<SemanticError>),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

fn lines(errors: &[SemanticError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<String> for CompilerError {
    fn from(message: String) -> Self {
        CompilerError::InvalidOption(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{Location, Position};

    #[test]
    fn semantic_errors_one_per_line() {
        let at = |line| Location::new(Position { line, column: 1 }, Position { line, column: 2 });
        let err = CompilerError::SemanticErrors(vec![
            SemanticError {
                location: at(1),
                message: "Unknown identifier: x".to_string(),
            },
            SemanticError {
                location: at(3),
                message: "Unknown class: C".to_string(),
            },
        ]);

        assert_eq!(
            err.to_string(),
            "Unknown identifier: x. Line 1 Col 1\nUnknown class: C. Line 3 Col 1"
        );
    }
}
