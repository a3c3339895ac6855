//! Pass sequence from source text to a program the backends can emit.
use super::CompilerError;
use crate::sem::{
    Binder, ClosureTransformer, EmptyListTyper, Hoister, SemanticAnalyzer, TypeChecker,
    TypeEraser, TypeSystem,
};
use crate::syntax::{parse_string, Program};
use log::{debug, info};

pub fn parse(src: &str) -> Result<Program, CompilerError> {
    let program = parse_string(src)?;

    debug!(
        "parsed {} declarations and {} statements",
        program.declarations.len(),
        program.statements.len()
    );
    Ok(program)
}

/// Type checks and binds `program`. Diagnostics are left in `program.errors`.
pub fn check(program: &mut Program) -> TypeSystem {
    let mut checker = TypeChecker::new();

    checker.analyze(program);
    if !program.has_errors() {
        Binder::new().analyze(program);
    }
    info!("semantic analysis found {} errors", program.errors.errors.len());
    checker.into_type_system()
}

pub fn ensure_valid(program: &Program) -> Result<(), CompilerError> {
    if program.has_errors() {
        Err(CompilerError::SemanticErrors(program.errors.errors.clone()))
    } else {
        Ok(())
    }
}

/// Closure conversion of a valid program, then type checking of the result.
pub fn transform(program: &mut Program) -> TypeSystem {
    Hoister::new().analyze(program);
    ClosureTransformer::new().analyze(program);
    TypeEraser::new().analyze(program);

    let mut checker = TypeChecker::new();
    checker.analyze(program);
    if program.has_errors() {
        let messages: Vec<String> = program.errors.errors.iter().map(ToString::to_string).collect();
        panic!(
            "Internal compiler error: transformed program does not type check: {}",
            messages.join("; ")
        );
    }
    Binder::rebinding().analyze(program);
    EmptyListTyper::new().analyze(program);

    debug!("{} functions after hoisting", program.func_defs().count());
    checker.into_type_system()
}

pub fn lower(src: &str) -> Result<(Program, TypeSystem), CompilerError> {
    let mut program = parse(src)?;

    check(&mut program);
    ensure_valid(&program)?;
    let ts = transform(&mut program);
    Ok((program, ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn semantic_errors_stop_lowering() {
        let result = lower("x: int = 0\nx = \"a\"\n");

        assert_matches!(result, Err(CompilerError::SemanticErrors(errors)) if errors.len() == 1);
    }

    #[test]
    fn parse_errors_stop_lowering() {
        assert_matches!(lower("x: int = \n"), Err(CompilerError::ParseError(_)));
    }

    #[test]
    fn nested_functions_become_top_level() {
        let src = "
def f() -> int:
    def g() -> int:
        return 1
    return g()
print(f())
";
        let (program, ts) = lower(src).unwrap();
        let names: Vec<&str> = program.func_defs().map(|f| f.name.name.as_str()).collect();

        assert_eq!(names, vec!["f", "f.g"]);
        assert!(ts.class_exists("object"));
    }

    #[test]
    fn function_of_declarations_only() {
        let (program, _) = lower("def f1():\n    x: int = 1\n\nf1()\n").unwrap();

        assert_eq!(program.func_defs().count(), 1);
    }

    #[test]
    fn binding_errors_are_reported() {
        let src = "
def f():
    global y
    pass
";
        assert_matches!(lower(src), Err(CompilerError::SemanticErrors(_)));
    }
}
