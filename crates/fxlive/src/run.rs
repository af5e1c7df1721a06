use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use liveconfig::{
    ChannelKindSetting, CompilerConfig, EditorConfig, ResolvedConfig, CONFIG_FILE_NAME,
};
use renderer::gpu::GpuPowerPreference;
use renderer::{
    ChannelKind, ChannelSource, ClearColor, CompilerSettings, ExternalCompiler, PreviewConfig,
    SurfaceSettings, SurfaceSize,
};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::{bootstrap_project, BootstrapOptions};
use crate::cli::{GlobalArgs, RunArgs, SourceOverrides};
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// The resolved configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct Project {
    pub config_path: Option<PathBuf>,
    pub config: ResolvedConfig,
}

/// Finds the config: `--config`, then `<root>/fxlive.toml`, then the user
/// config directory, then built-in defaults.
pub fn locate_config(global: &GlobalArgs, paths: &AppPaths) -> Option<PathBuf> {
    if let Some(explicit) = &global.config {
        return Some(explicit.clone());
    }
    [global.root.join(CONFIG_FILE_NAME), paths.user_config_file()]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

pub fn load_project(global: &GlobalArgs, paths: &AppPaths) -> Result<Project> {
    let config_path = locate_config(global, paths);
    let config = match &config_path {
        Some(path) => EditorConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            tracing::debug!(root = %global.root.display(), "no config found; using defaults");
            EditorConfig::default()
        }
    };
    Ok(Project {
        config_path,
        config: config.resolve(&global.root),
    })
}

pub fn apply_overrides(config: &mut ResolvedConfig, overrides: &SourceOverrides) {
    if let Some(source) = &overrides.source {
        config.source = source.clone();
    }
    if let Some(compiler) = &overrides.compiler {
        config.compiler.program = compiler.clone();
    }
    if overrides.no_debug {
        config.compiler.debug = false;
    }
}

pub fn channel_kind(kind: ChannelKindSetting) -> ChannelKind {
    match kind {
        ChannelKindSetting::Texture2d => ChannelKind::Texture2d,
        ChannelKindSetting::Cubemap => ChannelKind::Cubemap,
        ChannelKindSetting::Volume => ChannelKind::Volume,
    }
}

pub fn compiler_settings(config: &CompilerConfig) -> CompilerSettings {
    CompilerSettings {
        program: config.program.clone(),
        profile: config.profile.clone(),
        args: config.args.clone(),
        debug: config.debug,
        debug_flag: config.debug_flag.clone(),
        timeout: config.timeout,
    }
}

pub fn surface_settings(config: &ResolvedConfig) -> SurfaceSettings {
    SurfaceSettings {
        template: config.template.clone(),
        source: config.source.clone(),
        scratch_dir: config.scratch.clone(),
        clear_color: ClearColor::from_array(config.clear_color),
        compiler: compiler_settings(&config.compiler),
    }
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

pub fn run(global: &GlobalArgs, args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let Project {
        config_path,
        mut config,
    } = load_project(global, &paths)?;
    apply_overrides(&mut config, &args.overrides);
    tracing::debug!(
        root = %config.root.display(),
        config = ?config_path,
        user_config = %paths.config_dir().display(),
        "resolved fxlive project"
    );

    bootstrap_project(&config, BootstrapOptions::default())?;

    let (width, height) = args
        .size
        .unwrap_or((config.size[0], config.size[1]));
    let channels = config
        .channels
        .iter()
        .map(|channel| ChannelSource {
            slot: channel.slot,
            path: channel.path.clone(),
            kind: channel_kind(channel.kind),
        })
        .collect();
    let settings = surface_settings(&config);
    let compiler = ExternalCompiler::new(settings.compiler.clone());

    let preview = PreviewConfig {
        title: format!("fxlive - {}", display_relative(&config.source, &config.root)),
        size: SurfaceSize::new(width, height),
        settings,
        channels,
        power: if args.low_power {
            GpuPowerPreference::Low
        } else {
            GpuPowerPreference::High
        },
    };

    tracing::info!(
        source = %config.source.display(),
        compiler = %config.compiler.program.display(),
        "starting fxlive preview"
    );
    renderer::run_preview(preview, Box::new(compiler))
}

pub fn print_where(global: &GlobalArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let project = load_project(global, &paths)?;
    let config = &project.config;
    println!("Project:");
    println!("  root:      {}", config.root.display());
    match &project.config_path {
        Some(path) => println!("  config:    {}", path.display()),
        None => println!("  config:    (built-in defaults)"),
    }
    println!("  user dir:  {}", paths.config_dir().display());
    println!("Paths:");
    println!("  template:  {}", config.template.display());
    println!("  source:    {}", config.source.display());
    println!("  scratch:   {}", config.scratch.display());
    println!("  assets:    {}", config.assets.display());
    println!("Compiler:");
    println!("  program:   {}", config.compiler.program.display());
    println!("  profile:   {}", config.compiler.profile);
    println!("  timeout:   {:?}", config.compiler.timeout);
    for channel in &config.channels {
        println!(
            "Channel{}:  {:?} {}",
            channel.slot,
            channel.kind,
            channel.path.display()
        );
    }
    Ok(())
}

pub fn init(global: &GlobalArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let project = load_project(global, &paths)?;
    let report = bootstrap_project(&project.config, BootstrapOptions { full: true })?;
    if report.created_any() {
        println!("Created:");
        for path in &report.created {
            println!("  {}", display_relative(path, &project.config.root));
        }
    } else {
        println!("Nothing to do; all default files already exist.");
    }
    Ok(())
}
