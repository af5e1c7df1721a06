//! Ownership and hot-swapping of the active program.
//!
//! A new program is fully built (compiled, loaded, reflected and planned)
//! before the old one is released. A failed attempt never touches the active
//! program; it only updates the diagnostics.

use std::fs;
use std::path::Path;
use std::time::{Instant, SystemTime};

use crate::assemble::ShaderAssembler;
use crate::backend::RenderBackend;
use crate::binding::BindingPlan;
use crate::compile::{CompileFailure, ProgramCompiler};
use crate::error::RenderError;
use crate::program::ShaderProgram;
use crate::staleness::{modified_time, StalenessTracker};
use crate::types::{ChannelKind, CHANNEL_COUNT};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgramState {
    Uninitialized,
    Compiling,
    Active,
    CompileFailed,
}

/// The program currently used for drawing, with its binding plan.
pub struct ActiveProgram<P> {
    pub program: P,
    pub plan: BindingPlan,
    pub compiled_at: SystemTime,
}

/// Inputs for one compile attempt.
pub struct CompileInputs<'a> {
    pub source: &'a Path,
    pub binary: &'a Path,
    pub assembler: &'a ShaderAssembler,
    pub compiler: &'a dyn ProgramCompiler,
    pub kinds: [Option<ChannelKind>; CHANNEL_COUNT],
}

/// What an [`update`](ProgramManager::update) call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Unchanged,
    Swapped,
    /// The attempt failed; the previous program, if any, is still active.
    Failed,
}

/// Identifies a source revision; `None` stands for a missing file.
type Revision = Option<SystemTime>;

pub struct ProgramManager<P> {
    state: ProgramState,
    active: Option<ActiveProgram<P>>,
    staleness: StalenessTracker,
    failed_revision: Option<Revision>,
    forced: bool,
    diagnostics: String,
}

impl<P: ShaderProgram> ProgramManager<P> {
    pub fn new() -> Self {
        Self {
            state: ProgramState::Uninitialized,
            active: None,
            staleness: StalenessTracker::new(),
            failed_revision: None,
            forced: false,
            diagnostics: String::new(),
        }
    }

    pub fn state(&self) -> ProgramState {
        self.state
    }

    pub fn active(&self) -> Option<&ActiveProgram<P>> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveProgram<P>> {
        self.active.as_mut()
    }

    /// Diagnostics of the most recent compile attempt.
    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    /// Makes the next [`update`](ProgramManager::update) compile regardless of timestamps.
    pub fn invalidate(&mut self) {
        self.forced = true;
    }

    /// Drops the active program and forgets every timestamp.
    pub fn reset(&mut self) {
        if let Some(old) = self.active.take() {
            drop(old);
            tracing::debug!("released active program");
        }
        self.state = ProgramState::Uninitialized;
        self.staleness.invalidate();
        self.failed_revision = None;
        self.forced = false;
    }

    fn wants_compile(&self, revision: Revision) -> bool {
        if self.forced {
            return true;
        }
        if self.failed_revision == Some(revision) {
            return false;
        }
        match revision {
            Some(modified) => self.staleness.is_stale(modified),
            None => true,
        }
    }

    /// Recompiles when the source is stale and swaps in the result.
    ///
    /// Recoverable failures are reported as [`UpdateOutcome::Failed`]; an `Err`
    /// means the backend itself is no longer usable.
    pub fn update<B>(
        &mut self,
        backend: &mut B,
        inputs: &CompileInputs<'_>,
    ) -> Result<UpdateOutcome, RenderError>
    where
        B: RenderBackend<Program = P>,
    {
        let revision = modified_time(inputs.source);
        if !self.wants_compile(revision) {
            return Ok(UpdateOutcome::Unchanged);
        }
        self.forced = false;

        let previous = self.state;
        self.state = ProgramState::Compiling;
        let started = Instant::now();

        match build_program(backend, inputs, revision) {
            Ok((program, plan, diagnostics)) => {
                let next = ActiveProgram {
                    program,
                    plan,
                    compiled_at: SystemTime::now(),
                };
                let replaced = self.active.replace(next);
                let swapped_out = replaced.is_some();
                drop(replaced);

                if let Some(modified) = revision {
                    self.staleness.record(modified);
                }
                self.failed_revision = None;
                self.diagnostics = diagnostics;
                self.state = ProgramState::Active;
                tracing::info!(
                    path = %inputs.source.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    replaced = swapped_out,
                    "shader program activated"
                );
                Ok(UpdateOutcome::Swapped)
            }
            Err(err) if err.is_recoverable() => {
                self.failed_revision = Some(revision);
                self.diagnostics = err.diagnostics();
                self.state = if self.active.is_some() {
                    ProgramState::Active
                } else {
                    ProgramState::CompileFailed
                };
                tracing::warn!(
                    path = %inputs.source.display(),
                    keeping_previous = self.active.is_some(),
                    "shader compile failed: {}",
                    self.diagnostics
                );
                Ok(UpdateOutcome::Failed)
            }
            Err(err) => {
                self.state = previous;
                Err(err)
            }
        }
    }
}

impl<P: ShaderProgram> Default for ProgramManager<P> {
    fn default() -> Self {
        Self::new()
    }
}

fn build_program<B: RenderBackend>(
    backend: &mut B,
    inputs: &CompileInputs<'_>,
    revision: Revision,
) -> Result<(B::Program, BindingPlan, String), RenderError> {
    if revision.is_none() {
        return Err(RenderError::SourceMissing {
            path: inputs.source.to_path_buf(),
        });
    }

    let assembled = inputs.assembler.write(&inputs.kinds)?;
    let outcome = inputs.compiler.compile(&assembled, inputs.binary);
    if !outcome.success {
        if outcome.failure == Some(CompileFailure::SourceMissing) {
            return Err(RenderError::SourceMissing { path: assembled });
        }
        let diagnostics = if outcome.diagnostics.is_empty() {
            format!("compiler failed: {:?}", outcome.failure)
        } else {
            outcome.diagnostics
        };
        return Err(RenderError::compile(diagnostics));
    }

    let binary_path = outcome.binary.as_deref().unwrap_or(inputs.binary);
    let binary = fs::read(binary_path).map_err(|err| {
        RenderError::compile(format!(
            "failed to read compiled program {}: {err}",
            binary_path.display()
        ))
    })?;

    let program = backend.load_program(&binary)?;
    let plan = BindingPlan::build(program.parameters())?;
    tracing::debug!(
        parameters = program.parameters().len(),
        bound = plan.len(),
        techniques = program.techniques().len(),
        "reflected shader program"
    );
    Ok((program, plan, outcome.diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Fixture};

    #[test]
    fn first_failure_leaves_no_program() {
        let fixture = Fixture::new("param Time float\nerror: bad token\n");
        let mut backend = fixture.backend();
        let mut manager = ProgramManager::new();

        let outcome = manager.update(&mut backend, &fixture.inputs()).expect("update");
        assert_eq!(outcome, UpdateOutcome::Failed);
        assert_eq!(manager.state(), ProgramState::CompileFailed);
        assert!(manager.active().is_none());
        assert!(manager.diagnostics().contains("bad token"));
    }

    #[test]
    fn swap_builds_new_before_disposing_old() {
        let fixture = Fixture::new("param Time float\n");
        let mut backend = fixture.backend();
        let mut manager = ProgramManager::new();
        manager.update(&mut backend, &fixture.inputs()).expect("first");

        fixture.edit_source("param Time float\nparam Resolution vec3\n", 20);
        let outcome = manager.update(&mut backend, &fixture.inputs()).expect("second");
        assert_eq!(outcome, UpdateOutcome::Swapped);

        let events = fixture.events();
        let loaded_second = events.iter().position(|e| *e == Event::Loaded(2)).expect("loaded 2");
        let disposed_first = events
            .iter()
            .position(|e| *e == Event::Disposed(1))
            .expect("disposed 1");
        assert!(loaded_second < disposed_first);
        assert_eq!(manager.active().map(|a| a.plan.len()), Some(2));
    }

    #[test]
    fn failure_keeps_previous_program_and_is_not_retried() {
        let fixture = Fixture::new("param Time float\n");
        let mut backend = fixture.backend();
        let mut manager = ProgramManager::new();
        manager.update(&mut backend, &fixture.inputs()).expect("first");

        fixture.edit_source("error: missing semicolon\n", 20);
        let outcome = manager.update(&mut backend, &fixture.inputs()).expect("broken");
        assert_eq!(outcome, UpdateOutcome::Failed);
        assert_eq!(manager.state(), ProgramState::Active);
        assert!(!manager.diagnostics().is_empty());
        assert!(!fixture.events().contains(&Event::Disposed(1)));

        let compiles = fixture.compile_count();
        let again = manager.update(&mut backend, &fixture.inputs()).expect("memo");
        assert_eq!(again, UpdateOutcome::Unchanged);
        assert_eq!(fixture.compile_count(), compiles);
    }

    #[test]
    fn unchanged_source_is_not_recompiled_until_invalidated() {
        let fixture = Fixture::new("param Time float\n");
        let mut backend = fixture.backend();
        let mut manager = ProgramManager::new();
        manager.update(&mut backend, &fixture.inputs()).expect("first");

        let unchanged = manager.update(&mut backend, &fixture.inputs()).expect("second");
        assert_eq!(unchanged, UpdateOutcome::Unchanged);
        assert_eq!(fixture.compile_count(), 1);

        manager.invalidate();
        let forced = manager.update(&mut backend, &fixture.inputs()).expect("forced");
        assert_eq!(forced, UpdateOutcome::Swapped);
        assert_eq!(fixture.compile_count(), 2);
    }

    #[test]
    fn incompatible_known_parameter_rejects_new_program() {
        let fixture = Fixture::new("param Time float\n");
        let mut backend = fixture.backend();
        let mut manager = ProgramManager::new();
        manager.update(&mut backend, &fixture.inputs()).expect("first");

        fixture.edit_source("param Time vec4\n", 20);
        let outcome = manager.update(&mut backend, &fixture.inputs()).expect("second");
        assert_eq!(outcome, UpdateOutcome::Failed);
        // The rejected program is dropped; the first stays active.
        assert!(fixture.events().contains(&Event::Disposed(2)));
        assert!(!fixture.events().contains(&Event::Disposed(1)));
    }

    #[test]
    fn missing_source_is_recoverable() {
        let fixture = Fixture::new("param Time float\n");
        fixture.remove_source();
        let mut backend = fixture.backend();
        let mut manager = ProgramManager::new();
        let outcome = manager.update(&mut backend, &fixture.inputs()).expect("update");
        assert_eq!(outcome, UpdateOutcome::Failed);
        assert!(manager.diagnostics().contains("missing"));
        assert_eq!(fixture.compile_count(), 0);
    }
}
