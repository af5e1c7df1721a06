//! Headless assemble + compile pass for editors and CI.

use std::path::PathBuf;

use anyhow::Result;
use liveconfig::ResolvedConfig;
use renderer::{
    ChannelKind, CompileFailure, ExternalCompiler, ProgramCompiler, RenderError, ShaderAssembler,
    CHANNEL_COUNT,
};
use serde::Serialize;

use crate::cli::{CheckArgs, GlobalArgs, ReportFormat};
use crate::paths::AppPaths;
use crate::run::{apply_overrides, channel_kind, compiler_settings, load_project};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStage {
    Assemble,
    Compile,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub success: bool,
    pub stage: CheckStage,
    pub failure: Option<String>,
    pub diagnostics: String,
    pub assembled: Option<PathBuf>,
    pub binary: Option<PathBuf>,
}

impl CheckReport {
    fn assemble_failed(failure: &str, diagnostics: String) -> Self {
        Self {
            success: false,
            stage: CheckStage::Assemble,
            failure: Some(failure.to_string()),
            diagnostics,
            assembled: None,
            binary: None,
        }
    }

    pub fn render_text(&self) -> String {
        let mut text = if self.success {
            match &self.binary {
                Some(binary) => format!("ok: compiled {}", binary.display()),
                None => "ok".to_string(),
            }
        } else {
            format!(
                "error: {} failed ({})",
                match self.stage {
                    CheckStage::Assemble => "assemble",
                    CheckStage::Compile => "compile",
                },
                self.failure.as_deref().unwrap_or("unknown")
            )
        };
        if !self.diagnostics.is_empty() {
            text.push('\n');
            text.push_str(&self.diagnostics);
        }
        text
    }
}

fn failure_name(failure: &CompileFailure) -> &'static str {
    match failure {
        CompileFailure::SourceMissing => "source_missing",
        CompileFailure::Diagnostics => "diagnostics",
        CompileFailure::Launch => "launch",
        CompileFailure::TimedOut => "timed_out",
        CompileFailure::MissingBinary => "missing_binary",
    }
}

fn configured_kinds(config: &ResolvedConfig) -> [Option<ChannelKind>; CHANNEL_COUNT] {
    let mut kinds = [None; CHANNEL_COUNT];
    for channel in &config.channels {
        if let Some(slot) = kinds.get_mut(channel.slot) {
            *slot = Some(channel_kind(channel.kind));
        }
    }
    kinds
}

/// Assembles the template with the configured channels and compiles it once.
pub fn check_project(config: &ResolvedConfig, compiler: &dyn ProgramCompiler) -> CheckReport {
    if !config.source.is_file() {
        return CheckReport::assemble_failed(
            "source_missing",
            format!("shader source not found: {}", config.source.display()),
        );
    }

    let assembler = ShaderAssembler::new(&config.template, &config.source, &config.scratch);
    let assembled = match assembler.write(&configured_kinds(config)) {
        Ok(path) => path,
        Err(err) => {
            let failure = match &err {
                RenderError::SourceMissing { path } if *path == config.template => {
                    "template_missing"
                }
                RenderError::SourceMissing { .. } => "source_missing",
                RenderError::TemplateMalformed { .. } => "template_malformed",
                _ => "io",
            };
            return CheckReport::assemble_failed(failure, err.to_string());
        }
    };

    let binary = config.scratch.join(renderer::assemble::PROGRAM_BINARY_NAME);
    let outcome = compiler.compile(&assembled, &binary);
    tracing::debug!(
        success = outcome.success,
        failure = ?outcome.failure,
        "check compile finished"
    );
    CheckReport {
        success: outcome.success,
        stage: CheckStage::Compile,
        failure: outcome.failure.as_ref().map(|f| failure_name(f).to_string()),
        diagnostics: outcome.diagnostics,
        assembled: Some(assembled),
        binary: outcome.binary,
    }
}

/// Runs the check and prints the report. Returns whether the compile succeeded.
pub fn run_check(global: &GlobalArgs, args: CheckArgs) -> Result<bool> {
    let paths = AppPaths::discover()?;
    let mut project = load_project(global, &paths)?;
    apply_overrides(&mut project.config, &args.overrides);

    let compiler = ExternalCompiler::new(compiler_settings(&project.config.compiler));
    let report = check_project(&project.config, &compiler);

    match args.format {
        ReportFormat::Text => println!("{}", report.render_text()),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(report.success)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;

    use liveconfig::EditorConfig;
    use renderer::CompileOutcome;

    use super::*;

    const TEMPLATE: &str = "[insert Channel defines here]\n#include \"pixelshader.glsl\"\n";

    struct CopyCompiler {
        sources: RefCell<Vec<String>>,
    }

    impl ProgramCompiler for CopyCompiler {
        fn compile(&self, source: &Path, dest: &Path) -> CompileOutcome {
            let text = fs::read_to_string(source).unwrap_or_default();
            self.sources.borrow_mut().push(text.clone());
            if text.contains("broken") {
                return CompileOutcome::failed(CompileFailure::Diagnostics, "line 1: broken");
            }
            fs::write(dest, b"binary").unwrap();
            CompileOutcome::succeeded(dest.to_path_buf(), String::new())
        }
    }

    fn project(root: &Path, template: &str) -> ResolvedConfig {
        let config = EditorConfig::default().resolve(root);
        fs::create_dir_all(config.template.parent().unwrap()).unwrap();
        fs::write(&config.template, template).unwrap();
        fs::create_dir_all(&config.scratch).unwrap();
        fs::write(&config.source, "vec4 mainImage(vec2 c) { return vec4(1.0); }\n").unwrap();
        config
    }

    fn compiler() -> CopyCompiler {
        CopyCompiler {
            sources: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn compiles_with_configured_channel_declarations() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), TEMPLATE);
        let compiler = compiler();

        let report = check_project(&config, &compiler);

        assert!(report.success);
        assert_eq!(report.stage, CheckStage::Compile);
        let compiled = compiler.sources.borrow()[0].clone();
        assert!(compiled.starts_with("DECLARE_TEXTURE2D(Channel0,0)\n\n#line 1\nvec4 mainImage"));
        let binary = config.scratch.join("program.spv");
        assert_eq!(report.render_text(), format!("ok: compiled {}", binary.display()));
    }

    #[test]
    fn compile_failure_carries_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), &format!("broken\n{TEMPLATE}"));

        let report = check_project(&config, &compiler());

        assert!(!report.success);
        assert_eq!(report.failure.as_deref(), Some("diagnostics"));
        assert!(report.render_text().contains("line 1: broken"));
    }

    #[test]
    fn malformed_template_fails_before_compiling() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), "no placeholder here\n");
        let compiler = compiler();

        let report = check_project(&config, &compiler);

        assert_eq!(report.stage, CheckStage::Assemble);
        assert_eq!(report.failure.as_deref(), Some("template_malformed"));
        assert!(compiler.sources.borrow().is_empty());
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), TEMPLATE);
        fs::remove_file(&config.source).unwrap();

        let report = check_project(&config, &compiler());

        assert_eq!(report.failure.as_deref(), Some("source_missing"));
    }

    #[test]
    fn configured_source_and_scratch_are_what_gets_compiled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = project(dir.path(), TEMPLATE);
        config.source = dir.path().join("elsewhere/mine.glsl");
        config.scratch = dir.path().join("build/scratch");
        fs::create_dir_all(config.source.parent().unwrap()).unwrap();
        fs::write(&config.source, "broken user_marker\n").unwrap();
        let compiler = compiler();

        let report = check_project(&config, &compiler);

        assert!(!report.success);
        assert_eq!(report.failure.as_deref(), Some("diagnostics"));
        assert!(compiler.sources.borrow()[0].contains("broken user_marker"));
        assert_eq!(
            report.assembled.as_deref(),
            Some(config.scratch.join("program.glsl").as_path())
        );
    }

    #[test]
    fn template_without_source_include_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), "[insert Channel defines here]\n");

        let report = check_project(&config, &compiler());

        assert_eq!(report.failure.as_deref(), Some("template_malformed"));
        assert!(report.diagnostics.contains("pixelshader.glsl"));
    }

    #[test]
    fn json_report_uses_snake_case_stage() {
        let report = CheckReport::assemble_failed("template_missing", "gone".into());
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["stage"], "assemble");
        assert_eq!(value["success"], false);
    }
}
