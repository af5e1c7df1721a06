use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "fxlive",
    author,
    version,
    about = "Live pixel-shader preview with hot reload",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Project root; relative config paths resolve against it.
    #[arg(long, env = "FXLIVE_ROOT", default_value = ".", global = true)]
    pub root: PathBuf,

    /// Config file to use instead of `<root>/fxlive.toml`.
    #[arg(long, env = "FXLIVE_CONFIG", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
}

/// Overrides shared by the preview and the headless check.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceOverrides {
    /// Pixel shader to watch instead of the configured one.
    #[arg(long, value_name = "PATH")]
    pub source: Option<PathBuf>,

    /// Compiler executable to run instead of the configured one.
    #[arg(long, value_name = "PROGRAM")]
    pub compiler: Option<PathBuf>,

    /// Do not append the compiler's debug flag.
    #[arg(long)]
    pub no_debug: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: SourceOverrides,

    /// Initial window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<(u32, u32)>,

    /// Prefer an integrated GPU.
    #[arg(long)]
    pub low_power: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the preview window (the default when no subcommand is given).
    Run,
    /// Assemble and compile the shader once, print diagnostics and exit.
    Check(CheckArgs),
    /// Write the default template, shader, config and assets into the project root.
    Init,
    /// Print the resolved project paths and config location.
    Where,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub overrides: SourceOverrides,

    /// Report format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("size must be greater than zero".into());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_surface_size() {
        assert_eq!(parse_surface_size("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_surface_size(" 640X360 ").unwrap(), (640, 360));
        assert!(parse_surface_size("1280").is_err());
        assert!(parse_surface_size("0x720").is_err());
        assert!(parse_surface_size("widexhigh").is_err());
    }

    #[test]
    fn check_accepts_json_format_and_global_root() {
        let cli = Cli::try_parse_from([
            "fxlive", "check", "--format", "json", "--root", "/tmp/demo",
        ])
        .expect("parse");
        assert_eq!(cli.global.root, PathBuf::from("/tmp/demo"));
        match cli.command {
            Some(Command::Check(args)) => assert_eq!(args.format, ReportFormat::Json),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn bare_invocation_runs_the_preview() {
        let cli =
            Cli::try_parse_from(["fxlive", "--size", "800x600", "--no-debug"]).expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.run.size, Some((800, 600)));
        assert!(cli.run.overrides.no_debug);
    }
}
