//! Native compiler backends
//!
//! The compiler is a black box: it reads one intermediate archive and
//! writes one packaged artifact. Its exit code is informational only;
//! the pipeline judges success by the artifact's length.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::CompilerConfig;
use crate::error::CompilerError;

/// One compiler invocation
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    /// Intermediate archive holding the bytecode entries
    pub input: &'a Path,
    /// Artifact path to write
    pub output: &'a Path,
    /// Request packaged (container) output
    pub packaged: bool,
}

/// What a compiler reported after running
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutcome {
    /// Exit code, if the backend has one
    pub exit_code: Option<i32>,
    /// Captured diagnostic output
    pub log: String,
}

/// Converts an intermediate archive into a platform-loadable artifact
pub trait NativeCompiler: Send + Sync {
    /// Compile `request.input` into `request.output`
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutcome, CompilerError>;
}

/// Runs an external program for every compilation
#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    program: PathBuf,
    args: Vec<String>,
    packaged_flag: Option<String>,
}

impl ExternalCompiler {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            packaged_flag: config.packaged_flag.clone(),
        }
    }

    /// Argument list with placeholders substituted
    pub fn command_args(&self, request: &CompileRequest<'_>) -> Vec<String> {
        let input = request.input.display().to_string();
        let output = request.output.display().to_string();

        let mut args = Vec::with_capacity(self.args.len() + 1);
        if request.packaged {
            if let Some(flag) = &self.packaged_flag {
                args.push(flag.clone());
            }
        }
        args.extend(
            self.args
                .iter()
                .map(|arg| arg.replace("{input}", &input).replace("{output}", &output)),
        );
        args
    }
}

impl NativeCompiler for ExternalCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutcome, CompilerError> {
        let output = Command::new(&self.program)
            .args(self.command_args(request))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CompilerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| CompilerError::Undecodable { stream: "stdout" })?;
        let stderr = String::from_utf8(output.stderr)
            .map_err(|_| CompilerError::Undecodable { stream: "stderr" })?;

        let mut log = stdout;
        if !stderr.is_empty() {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&stderr);
        }

        Ok(CompileOutcome {
            exit_code: output.status.code(),
            log,
        })
    }
}

/// Copies the intermediate archive to the output unchanged.
///
/// For hosts whose platform loader consumes packaged bytecode directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompiler;

impl NativeCompiler for PassthroughCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutcome, CompilerError> {
        let bytes = fs::copy(request.input, request.output)?;
        Ok(CompileOutcome {
            exit_code: Some(0),
            log: format!("copied {} bytes", bytes),
        })
    }
}
