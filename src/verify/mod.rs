//! Safety checks over a parsed contract module
//!
//! Three independent passes, each stopping at its first finding:
//!
//! - **toplevel**: only declarations may appear at module level
//! - **imports**: every imported module must be on the allowlist, at any depth
//! - **identifiers**: no denylisted name may be referenced or bound, at any depth

use std::fmt;

use crate::ast::{IdentifierRole, Module};
use crate::config::Policy;
use crate::parser::ParseError;
use crate::source::{Excerpt, SourceModule};

mod identifiers;
mod imports;
mod toplevel;

pub use identifiers::check_identifiers;
pub use imports::check_imports;
pub use toplevel::{check_top_level, classify, TopLevelKind};

pub type VerifyResult<T> = Result<T, Violation>;

/// Which import statement form named the rejected module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportForm {
    /// `import a.b`
    Import,
    /// `from a.b import c`
    ImportFrom,
    /// `from . import c`, `from ..a import c`
    RelativeImport,
}

impl fmt::Display for ImportForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ImportForm::Import => "import",
            ImportForm::ImportFrom => "from-import",
            ImportForm::RelativeImport => "relative from-import",
        };
        f.write_str(text)
    }
}

/// Reason a module was rejected. Every variant except `MalformedSource`
/// carries the rendered source region of the offending node.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("top-level: only imports, function definitions and constant expressions are allowed at module level, found {kind}\n{excerpt}")]
    TopLevel { kind: String, excerpt: Excerpt },

    #[error("imports: {form} of module '{module}' is not allowed\n{excerpt}")]
    Import { module: String, form: ImportForm, excerpt: Excerpt },

    #[error("identifiers: identifier '{name}' is not allowed ({})\n{excerpt}", .role.describe())]
    Identifier { name: String, role: IdentifierRole, excerpt: Excerpt },

    #[error("schema: parameter '{parameter}' of '{function}' starts with reserved prefix '{prefix}' but is not a reserved parameter\n{excerpt}")]
    ArgumentNaming { function: String, parameter: String, prefix: String, excerpt: Excerpt },

    #[error("schema: lifecycle function '{function}' may only declare reserved parameters, found '{parameter}'\n{excerpt}")]
    InitSignature { function: String, parameter: String, excerpt: Excerpt },

    #[error("malformed source: {0}")]
    MalformedSource(#[from] ParseError),
}

impl Violation {
    /// Short machine-readable name of the violation kind
    pub fn code(&self) -> &'static str {
        match self {
            Violation::TopLevel { .. } => "top_level",
            Violation::Import { .. } => "import",
            Violation::Identifier { .. } => "identifier",
            Violation::ArgumentNaming { .. } => "argument_naming",
            Violation::InitSignature { .. } => "init_signature",
            Violation::MalformedSource(_) => "malformed_source",
        }
    }

    pub fn excerpt(&self) -> Option<&Excerpt> {
        match self {
            Violation::TopLevel { excerpt, .. }
            | Violation::Import { excerpt, .. }
            | Violation::Identifier { excerpt, .. }
            | Violation::ArgumentNaming { excerpt, .. }
            | Violation::InitSignature { excerpt, .. } => Some(excerpt),
            Violation::MalformedSource(_) => None,
        }
    }

    /// First source line the violation points at
    pub fn line(&self) -> usize {
        match self {
            Violation::MalformedSource(error) => error.location().line,
            other => other.excerpt().map(Excerpt::line).unwrap_or(0),
        }
    }
}

/// Run all three checks in order
pub fn verify(module: &Module, source: &SourceModule, policy: &Policy) -> VerifyResult<()> {
    log::debug!("verify start: statements={}", module.body.len());
    check_top_level(module, source)?;
    check_imports(module, source, policy)?;
    check_identifiers(module, source, policy)?;
    log::debug!("verify end: ok");
    Ok(())
}
