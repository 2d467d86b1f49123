//! Contract verifier
//!
//! Static safety verification and calling-interface extraction for untrusted
//! contract modules written in a restricted Python dialect.
//!
//! ## Architecture
//!
//! - **parser**: layout-aware lexer and recursive descent parser producing the AST
//! - **ast**: closed syntax tree, visitor and printer
//! - **verify**: top-level, import allowlist and identifier denylist checks
//! - **schema**: parameter classification and the lifecycle function rule
//! - **pipeline**: the stage machine tying the passes together
//! - **invoke**: binding host invocation requests against a schema
//! - **config**: the verification policy
//!
//! ## Verification Flow
//!
//! ```text
//! Source → Parser → AST → Top-Level → Imports → Identifiers → Verified → Schema
//! ```

pub mod ast;
pub mod parser;
pub mod verify;
pub mod schema;
pub mod pipeline;
pub mod invoke;
pub mod source;
pub mod error;
pub mod config;
pub mod consts;

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub use config::Policy;
pub use error::{Error, Result};
pub use invoke::{bind, BoundCall, Invocation, InvokeError};
pub use pipeline::{Outcome, RejectedAt, Stage, VerifiedModule, Verifier};
pub use schema::{check_init_func, FunctionSchema, ParamKind, Schema, SchemaParam};
pub use source::{Excerpt, SourceModule};
pub use verify::{ImportForm, Violation};

/// Verdict for one file of a batch
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub result: Result<Schema>,
}

impl FileReport {
    pub fn is_accepted(&self) -> bool {
        self.result.is_ok()
    }
}

/// Verify a module and extract its schema
pub fn verify_source(source: &str, policy: &Policy) -> Result<Schema> {
    let verifier = Verifier::new(policy.clone());
    Ok(verifier.verify_and_extract(source)?)
}

/// Verify a module file and extract its schema
pub fn verify_file(path: impl AsRef<Path>, verifier: &Verifier) -> Result<Schema> {
    let path = path.as_ref();
    log::debug!("verifying {}", path.display());
    verifier.verify_and_extract_file(path)
}

/// Verify several files; one report per file, in input order
pub fn verify_files<P: AsRef<Path>>(paths: &[P], verifier: &Verifier) -> Vec<FileReport> {
    paths
        .iter()
        .map(|path| FileReport {
            path: path.as_ref().to_path_buf(),
            result: verify_file(path, verifier),
        })
        .collect()
}

/// Verify every contract module below `dir`, in file name order
pub fn verify_dir(dir: impl AsRef<Path>, verifier: &Verifier) -> Result<Vec<FileReport>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir.as_ref()).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let is_contract = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .map_or(false, |ext| ext == consts::CONTRACT_FILE_EXTENSION);
        if is_contract {
            paths.push(entry.into_path());
        }
    }
    log::debug!("found {} contract module(s) in {}", paths.len(), dir.as_ref().display());
    Ok(verify_files(&paths, verifier))
}
