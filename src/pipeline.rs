//! Verification pipeline
//!
//! ```text
//! Unparsed → Parsed → TopLevelOk → ImportsOk → IdentifiersOk → Verified → SchemaExtracted | Done
//!     ↓         ↓          ↓            ↓              ↓             ↓
//!                              Rejected(at stage)
//! ```
//!
//! Each stage runs only if the previous one accepted the module. The first
//! violation moves the run to `Rejected`, which is terminal.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::ast::Module;
use crate::config::Policy;
use crate::parser::{self, Parser};
use crate::schema::Schema;
use crate::source::SourceModule;
use crate::verify::{self, Violation, VerifyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unparsed,
    Parsed,
    TopLevelOk,
    ImportsOk,
    IdentifiersOk,
    Verified,
    SchemaExtracted,
    /// Verified without schema extraction
    Done,
    /// Terminal; records the last stage the module reached before rejection
    Rejected { at: RejectedAt },
}

/// Stage that was running when a module was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedAt {
    Parsing,
    TopLevel,
    Imports,
    Identifiers,
    Schema,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::SchemaExtracted | Stage::Done | Stage::Rejected { .. })
    }

    /// Next stage after a successful step
    fn advance(self) -> Stage {
        match self {
            Stage::Unparsed => Stage::Parsed,
            Stage::Parsed => Stage::TopLevelOk,
            Stage::TopLevelOk => Stage::ImportsOk,
            Stage::ImportsOk => Stage::IdentifiersOk,
            Stage::IdentifiersOk => Stage::Verified,
            other => other,
        }
    }

    /// Step that runs while in this stage
    fn step(self) -> Option<RejectedAt> {
        match self {
            Stage::Unparsed => Some(RejectedAt::Parsing),
            Stage::Parsed => Some(RejectedAt::TopLevel),
            Stage::TopLevelOk => Some(RejectedAt::Imports),
            Stage::ImportsOk => Some(RejectedAt::Identifiers),
            Stage::Verified => Some(RejectedAt::Schema),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Rejected { at } => write!(f, "Rejected({:?})", at),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A module that passed every safety check. Only the pipeline creates
/// these, so holding one proves verification succeeded.
#[derive(Debug, Clone)]
pub struct VerifiedModule {
    source: SourceModule,
    module: Module,
    policy: Arc<Policy>,
}

impl VerifiedModule {
    pub fn source(&self) -> &SourceModule {
        &self.source
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn extract_schema(&self) -> VerifyResult<Schema> {
        Schema::extract(self)
    }
}

/// Final state of one pipeline run together with its result
#[derive(Debug)]
pub struct Outcome<T> {
    pub final_stage: Stage,
    pub result: VerifyResult<T>,
}

impl<T> Outcome<T> {
    pub fn is_accepted(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs the checks under one policy. Cheap to clone and safe to share
/// across threads.
#[derive(Debug, Clone)]
pub struct Verifier {
    policy: Arc<Policy>,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::reference()
    }
}

impl Verifier {
    pub fn new(policy: Policy) -> Self {
        Self { policy: Arc::new(policy) }
    }

    pub fn with_shared_policy(policy: Arc<Policy>) -> Self {
        Self { policy }
    }

    /// Verifier using the process-wide reference policy
    pub fn reference() -> Self {
        Self::with_shared_policy(Policy::reference())
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Verify only; the verdict is the verified module or the first violation
    pub fn verify(&self, text: &str) -> VerifyResult<VerifiedModule> {
        self.verify_source(SourceModule::new(text))
    }

    pub fn verify_source(&self, source: SourceModule) -> VerifyResult<VerifiedModule> {
        self.run_verification(source).result
    }

    /// Verify, then extract the schema. No partial schema on failure.
    pub fn verify_and_extract(&self, text: &str) -> VerifyResult<Schema> {
        self.run(SourceModule::new(text), true).result.map(|schema| schema.unwrap_or_default())
    }

    pub fn verify_file(&self, path: impl AsRef<Path>) -> crate::Result<VerifiedModule> {
        let source = SourceModule::from_file(path)?;
        Ok(self.verify_source(source)?)
    }

    pub fn verify_and_extract_file(&self, path: impl AsRef<Path>) -> crate::Result<Schema> {
        let source = SourceModule::from_file(path)?;
        let outcome = self.run(source, true);
        Ok(outcome.result?.unwrap_or_default())
    }

    fn run_verification(&self, source: SourceModule) -> Outcome<VerifiedModule> {
        let mut stage = Stage::Unparsed;
        let result = self.drive(&mut stage, source);
        Outcome { final_stage: stage, result }
    }

    /// Run the pipeline to a terminal stage. With `extract` the run ends in
    /// `SchemaExtracted` and yields the schema; without, it ends in `Done`.
    pub fn run(&self, source: SourceModule, extract: bool) -> Outcome<Option<Schema>> {
        let mut stage = Stage::Unparsed;
        let result = self.drive(&mut stage, source).and_then(|verified| {
            if !extract {
                stage = Stage::Done;
                return Ok(None);
            }
            match verified.extract_schema() {
                Ok(schema) => {
                    stage = Stage::SchemaExtracted;
                    Ok(Some(schema))
                }
                Err(violation) => {
                    stage = reject(stage, &violation);
                    Err(violation)
                }
            }
        });
        log::debug!("pipeline finished at {}", stage);
        Outcome { final_stage: stage, result }
    }

    fn drive(&self, stage: &mut Stage, source: SourceModule) -> VerifyResult<VerifiedModule> {
        let module = parser::with_parser_stack(|| self.check(stage, &source))?;
        *stage = stage.advance();
        log::trace!("stage {}", stage);
        Ok(VerifiedModule {
            source,
            module,
            policy: Arc::clone(&self.policy),
        })
    }

    /// Parse and run the three checks; the tree is deep-walked, so this
    /// runs on the parser's stack.
    fn check(&self, stage: &mut Stage, source: &SourceModule) -> VerifyResult<Module> {
        let module = self.step(stage, || {
            Parser::new(source.text())
                .and_then(Parser::parse)
                .map_err(Violation::from)
        })?;
        self.step(stage, || verify::check_top_level(&module, source))?;
        self.step(stage, || verify::check_imports(&module, source, &self.policy))?;
        self.step(stage, || verify::check_identifiers(&module, source, &self.policy))?;
        Ok(module)
    }

    fn step<T>(&self, stage: &mut Stage, run: impl FnOnce() -> VerifyResult<T>) -> VerifyResult<T> {
        match run() {
            Ok(value) => {
                let next = stage.advance();
                log::trace!("stage {} -> {}", stage, next);
                *stage = next;
                Ok(value)
            }
            Err(violation) => {
                *stage = reject(*stage, &violation);
                Err(violation)
            }
        }
    }
}

fn reject(stage: Stage, violation: &Violation) -> Stage {
    let at = stage.step().unwrap_or(RejectedAt::Schema);
    log::debug!("rejected at {:?}: {}", at, violation.code());
    Stage::Rejected { at }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_stage(text: &str, extract: bool) -> Stage {
        Verifier::reference().run(SourceModule::new(text), extract).final_stage
    }

    #[test]
    fn test_stage_progression() {
        assert_eq!(final_stage("def hi():\n    return 'hi'\n", false), Stage::Done);
        assert_eq!(final_stage("def hi():\n    return 'hi'\n", true), Stage::SchemaExtracted);
    }

    #[test]
    fn test_accepted_module_reaches_verified() {
        for text in ["def hi() -> str: return \"hi\"\n", "import math\n", ""] {
            let outcome = Verifier::reference().run_verification(SourceModule::new(text));
            assert_eq!(outcome.final_stage, Stage::Verified, "for {:?}", text);
            assert!(outcome.is_accepted());
        }

        let mut stage = Stage::Unparsed;
        let mut seen = vec![stage];
        while stage != Stage::Verified {
            stage = stage.advance();
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                Stage::Unparsed,
                Stage::Parsed,
                Stage::TopLevelOk,
                Stage::ImportsOk,
                Stage::IdentifiersOk,
                Stage::Verified,
            ]
        );
    }

    #[test]
    fn test_rejection_stage_recorded() {
        let cases = [
            ("def (:\n", RejectedAt::Parsing),
            ("x = 1\n", RejectedAt::TopLevel),
            ("import sys\n", RejectedAt::Imports),
            ("def f():\n    return eval\n", RejectedAt::Identifiers),
            ("def init(x):\n    pass\n", RejectedAt::Schema),
        ];
        for (text, at) in cases {
            let stage = final_stage(text, true);
            assert_eq!(stage, Stage::Rejected { at }, "for {:?}", text);
            assert!(stage.is_terminal());
        }
    }

    #[test]
    fn test_schema_violation_ignored_without_extraction() {
        assert_eq!(final_stage("def init(x):\n    pass\n", false), Stage::Done);
    }

    #[test]
    fn test_verified_module_exposes_tree() {
        let verified = Verifier::reference().verify("import math\ndef f():\n    pass\n").expect("verified");
        assert_eq!(verified.module().body.len(), 2);
        assert_eq!(verified.source().lines().len(), 3);
    }

    #[test]
    fn test_verifier_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Verifier>();
        assert_send_sync::<VerifiedModule>();
    }
}
