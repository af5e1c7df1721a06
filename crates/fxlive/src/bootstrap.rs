use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use liveconfig::{ResolvedConfig, CONFIG_FILE_NAME};
use tracing::{debug, info};

use crate::defaults::{
    write_test_pattern, COMPILE_SCRIPT, DEFAULT_CONFIG, DEFAULT_PIXEL_SHADER, DEFAULT_TEMPLATE,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct BootstrapOptions {
    /// Also write `fxlive.toml`, the compiler wrapper and the test pattern.
    pub full: bool,
}

#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub created: Vec<PathBuf>,
}

impl BootstrapReport {
    pub fn created_any(&self) -> bool {
        !self.created.is_empty()
    }
}

/// Writes whatever default content is missing. Existing files are never touched.
pub fn bootstrap_project(
    config: &ResolvedConfig,
    options: BootstrapOptions,
) -> Result<BootstrapReport> {
    let mut report = BootstrapReport::default();

    fs::create_dir_all(&config.scratch).with_context(|| {
        format!("failed to create scratch directory {}", config.scratch.display())
    })?;
    write_missing(&config.template, DEFAULT_TEMPLATE, &mut report)?;
    write_missing(&config.source, DEFAULT_PIXEL_SHADER, &mut report)?;

    if options.full {
        write_missing(&config.root.join(CONFIG_FILE_NAME), DEFAULT_CONFIG, &mut report)?;
        let script = config.root.join("tools/compile-shader.sh");
        if write_missing(&script, COMPILE_SCRIPT, &mut report)? {
            make_executable(&script)?;
        }
        for channel in &config.channels {
            let is_png = channel.path.extension().and_then(|ext| ext.to_str()) == Some("png");
            if is_png && !channel.path.exists() {
                ensure_parent(&channel.path)?;
                write_test_pattern(&channel.path)?;
                info!(path = %channel.path.display(), "wrote default channel texture");
                report.created.push(channel.path.clone());
            }
        }
    }

    if report.created_any() {
        info!(files = report.created.len(), "bootstrapped default project content");
    }
    Ok(report)
}

fn write_missing(path: &Path, contents: &str, report: &mut BootstrapReport) -> Result<bool> {
    if path.exists() {
        debug!(path = %path.display(), "keeping existing file");
        return Ok(false);
    }
    ensure_parent(path)?;
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "wrote default file");
    report.created.push(path.to_path_buf());
    Ok(true)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_: &Path) -> Result<()> {
    Ok(())
}
