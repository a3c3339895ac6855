use clap::{App, Arg, ErrorKind};
use io::Read;
use log::{info, warn};
use std::fmt;
use std::fs;
use std::io;
use std::iter::ExactSizeIterator;
use std::path::Path;
use std::str::FromStr;

use super::pipeline;
use super::CompilerError;
use crate::asm;
use crate::backend::{cil, jvm, llvm, python, Artifact};
use crate::sem::TypeSystem;
use crate::syntax::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Wasm,
    Jvm,
    Cil,
    Llvm,
    Python,
}

impl Target {
    pub fn variants() -> impl Iterator<Item = Target> {
        vec![
            Self::Wasm,
            Self::Jvm,
            Self::Cil,
            Self::Llvm,
            Self::Python,
        ]
        .into_iter()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Wasm => write!(f, "wasm"),
            Target::Jvm => write!(f, "jvm"),
            Target::Cil => write!(f, "cil"),
            Target::Llvm => write!(f, "llvm"),
            Target::Python => write!(f, "python"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::variants()
            .find(|x| x.to_string() == s)
            .ok_or_else(|| format!("Unknown target: `{}`", s))
    }
}

#[derive(Debug)]
pub struct CompilerOptions {
    pub target: Target,
    pub filepath: Option<String>,
    pub typecheck_only: bool,
    pub dump_ast: bool,
    pub out_dir: Option<String>,
    /// Main class of the JVM and CIL output and stem of every artifact.
    pub name: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            target: Target::Wasm,
            filepath: None,
            typecheck_only: false,
            dump_ast: false,
            out_dir: None,
            name: "Main".to_string(),
        }
    }
}

impl CompilerOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct Command {}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(
        &self,
        args: impl ExactSizeIterator<Item = String>,
    ) -> Result<String, CompilerError> {
        let options = parse_options(args)?;

        let src = if let Some(filepath) = &options.filepath {
            read_from_file(filepath.as_str())?
        } else {
            read_from_stdin()?
        };

        self.compile(&options, &src)
    }

    /// Runs the passes `options` ask for and returns what goes to standard output.
    pub fn compile(&self, options: &CompilerOptions, src: &str) -> Result<String, CompilerError> {
        let mut program = pipeline::parse(src)?;

        if options.dump_ast && !options.typecheck_only {
            return dump(&program);
        }

        pipeline::check(&mut program);
        if options.dump_ast {
            return dump(&program);
        }
        if let Err(err) = pipeline::ensure_valid(&program) {
            warn!("skipping code generation: {} errors", program.errors.errors.len());
            return Err(err);
        }
        if options.typecheck_only {
            return Ok(String::new());
        }

        let ts = pipeline::transform(&mut program);
        info!("emitting {} code for {}", options.target, options.name);
        let artifacts = emit(options.target, &program, &ts, &options.name)?;
        info!("{} artifacts", artifacts.len());

        match &options.out_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                for artifact in &artifacts {
                    let path = Path::new(dir).join(&artifact.file_name);
                    fs::write(&path, &artifact.contents)?;
                    info!("wrote {}", path.display());
                }
                Ok(String::new())
            }
            None => Ok(artifacts
                .into_iter()
                .map(|artifact| artifact.contents)
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }
}

fn dump(program: &Program) -> Result<String, CompilerError> {
    let json = serde_json::to_string_pretty(program).map_err(io::Error::from)?;

    Ok(format!("{}\n", json))
}

fn emit(
    target: Target,
    program: &Program,
    ts: &TypeSystem,
    name: &str,
) -> Result<Vec<Artifact>, CompilerError> {
    let artifacts = match target {
        Target::Wasm => vec![Artifact::new(
            format!("{}.wat", name),
            asm::emit(program, ts)?,
        )],
        Target::Jvm => jvm::emit(program, ts, name)?,
        Target::Cil => vec![cil::emit(program, ts, name)?],
        Target::Llvm => vec![llvm::emit(program, ts, name)?],
        Target::Python => vec![Artifact::new(
            format!("{}.py", name),
            python::emit(program)?,
        )],
    };
    Ok(artifacts)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_options(
    args: impl ExactSizeIterator<Item = String>,
) -> Result<CompilerOptions, CompilerError> {
    let mut options = CompilerOptions::new();

    let target_possible_values = Target::variants()
        .map(|t| t.to_string())
        .collect::<Vec<_>>();
    let target_possible_values: Vec<&str> =
        target_possible_values.iter().map(AsRef::as_ref).collect();

    let matches = App::new("chocopyc")
        .arg(
            Arg::with_name("emit")
                .long("emit")
                .takes_value(true)
                .possible_values(&target_possible_values),
        )
        .arg(
            Arg::with_name("typecheck-only")
                .long("typecheck-only")
                .help("Stops after semantic analysis"),
        )
        .arg(
            Arg::with_name("dump-ast")
                .long("dump-ast")
                .help("Prints the AST as JSON, typed with --typecheck-only"),
        )
        .arg(
            Arg::with_name("out-dir")
                .long("out-dir")
                .takes_value(true)
                .help("Writes the generated files into this directory"),
        )
        .arg(
            Arg::with_name("name")
                .long("name")
                .takes_value(true)
                .help("Name of the main class and the generated files"),
        )
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input file to use")
                .required(false)
                .index(1),
        )
        .get_matches_from_safe(args)
        .map_err(|err| match err.kind {
            ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => err.exit(),
            _ => err.message,
        })?;

    if let Some(target) = matches.value_of("emit") {
        options.target = target.parse::<Target>()?;
    }
    options.typecheck_only = matches.is_present("typecheck-only");
    options.dump_ast = matches.is_present("dump-ast");
    options.out_dir = matches.value_of("out-dir").map(str::to_string);

    if let Some(filepath) = matches.value_of("INPUT") {
        options.filepath = Some(filepath.to_string());

        if let Some(stem) = Path::new(filepath).file_stem().and_then(|s| s.to_str()) {
            if is_identifier(stem) {
                options.name = stem.to_string();
            }
        }
    }

    if let Some(name) = matches.value_of("name") {
        if !is_identifier(name) {
            return Err(CompilerError::InvalidOption(format!(
                "`{}` is not a valid name",
                name
            )));
        }
        options.name = name.to_string();
    }

    Ok(options)
}

fn read_from_stdin() -> Result<String, io::Error> {
    let mut content = String::new();

    io::stdin().read_to_string(&mut content)?;

    Ok(content)
}

fn read_from_file(filename: &str) -> io::Result<String> {
    fs::read_to_string(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parse(args: &[&str]) -> Result<CompilerOptions, CompilerError> {
        let args: Vec<String> = std::iter::once("chocopyc")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        parse_options(args.into_iter())
    }

    #[test]
    fn defaults() {
        let options = parse(&[]).unwrap();

        assert_eq!(options.target, Target::Wasm);
        assert_eq!(options.name, "Main");
        assert!(options.filepath.is_none());
        assert!(!options.typecheck_only);
    }

    #[test]
    fn name_from_input_stem() {
        let options = parse(&["--emit", "jvm", "tests/fib.py"]).unwrap();

        assert_eq!(options.target, Target::Jvm);
        assert_eq!(options.name, "fib");

        let options = parse(&["my-program.py"]).unwrap();
        assert_eq!(options.name, "Main");
    }

    #[test]
    fn invalid_options() {
        assert_matches!(parse(&["--name", "1x"]), Err(CompilerError::InvalidOption(_)));
        assert_matches!(parse(&["--emit", "x86"]), Err(CompilerError::InvalidOption(_)));
        assert_eq!("llvm".parse::<Target>(), Ok(Target::Llvm));
        assert_eq!(
            Target::variants().map(|t| t.to_string()).collect::<Vec<_>>(),
            vec!["wasm", "jvm", "cil", "llvm", "python"]
        );
    }

    #[test]
    fn typecheck_only_reports_errors() {
        let command = Command::new();
        let options = CompilerOptions {
            typecheck_only: true,
            ..CompilerOptions::new()
        };

        assert_eq!(command.compile(&options, "x: int = 1\n").unwrap(), "");
        let err = command.compile(&options, "print(y)\n").unwrap_err();
        assert_eq!(err.to_string(), "Unknown identifier: y. Line 1 Col 7");
    }

    #[test]
    fn dump_ast_is_json() {
        let command = Command::new();
        let options = CompilerOptions {
            dump_ast: true,
            typecheck_only: true,
            ..CompilerOptions::new()
        };

        let out = command.compile(&options, "x: int = 1\nx = True\n").unwrap();
        assert!(out.contains("\"kind\": \"Program\""));
        assert!(out.contains("\"message\": \"Expected type int; got type bool\""));
    }

    #[test]
    fn python_to_stdout() {
        let command = Command::new();
        let options = CompilerOptions {
            target: Target::Python,
            ..CompilerOptions::new()
        };

        let out = command.compile(&options, "print(1 + 2)\n").unwrap();
        assert!(out.ends_with("print((1 + 2))\n"));
    }
}
