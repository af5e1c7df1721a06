//! Runs the offline shader compiler as a child process.
//!
//! The compiler contract is narrow: it receives the assembled
//! source path and the destination path, and any output on stderr means the
//! compile failed. Exit codes are logged but never trusted on their own.

use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};

/// Default bound on how long a single compile may run.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How to launch the external compiler.
#[derive(Clone, Debug, PartialEq)]
pub struct CompilerSettings {
    /// Executable name or path.
    pub program: PathBuf,
    /// Substituted for `{profile}` in `args`.
    pub profile: String,
    /// Argument template; `{source}`, `{dest}` and `{profile}` are substituted.
    pub args: Vec<String>,
    /// Appends `debug_flag` to the arguments when set.
    pub debug: bool,
    pub debug_flag: String,
    /// Upper bound on the compiler's run time; the child is killed afterwards.
    pub timeout: Duration,
}

impl CompilerSettings {
    /// Expands the argument template for one invocation.
    pub fn arguments(&self, source: &Path, dest: &Path) -> Vec<String> {
        let source = source.display().to_string();
        let dest = dest.display().to_string();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{source}", &source)
                    .replace("{dest}", &dest)
                    .replace("{profile}", &self.profile)
            })
            .collect();
        if self.debug && !self.debug_flag.is_empty() {
            args.push(self.debug_flag.clone());
        }
        args
    }
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("tools/compile-shader.sh"),
            profile: "vulkan1.0".to_string(),
            args: vec![
                "{source}".to_string(),
                "{dest}".to_string(),
                "/Profile:{profile}".to_string(),
            ],
            debug: true,
            debug_flag: "/Debug".to_string(),
            timeout: DEFAULT_COMPILE_TIMEOUT,
        }
    }
}

/// Why a compile attempt did not yield a loadable binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileFailure {
    SourceMissing,
    /// The compiler wrote to stderr.
    Diagnostics,
    /// The compiler could not be started.
    Launch,
    TimedOut,
    /// The compiler reported nothing but produced no binary.
    MissingBinary,
}

/// Result of one compiler invocation.
#[derive(Clone, Debug)]
pub struct CompileOutcome {
    pub success: bool,
    /// Stdout lines followed by stderr lines, joined with `\n`.
    pub diagnostics: String,
    pub binary: Option<PathBuf>,
    pub failure: Option<CompileFailure>,
}

impl CompileOutcome {
    pub fn succeeded(binary: PathBuf, diagnostics: String) -> Self {
        Self {
            success: true,
            diagnostics,
            binary: Some(binary),
            failure: None,
        }
    }

    pub fn failed(failure: CompileFailure, diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostics: diagnostics.into(),
            binary: None,
            failure: Some(failure),
        }
    }
}

/// Anything that can turn an assembled source file into a program binary.
pub trait ProgramCompiler {
    fn compile(&self, source: &Path, dest: &Path) -> CompileOutcome;
}

/// Invokes a compiler executable according to [`CompilerSettings`].
#[derive(Clone, Debug)]
pub struct ExternalCompiler {
    settings: CompilerSettings,
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl ExternalCompiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    fn timed_out(&self, child: &mut Child, dest: &Path) -> CompileOutcome {
        kill_process_group(child);
        remove_stale_binary(dest);
        tracing::warn!(
            timeout_ms = self.settings.timeout.as_millis() as u64,
            "shader compiler timed out"
        );
        CompileOutcome::failed(
            CompileFailure::TimedOut,
            format!("compiler did not finish within {:?}", self.settings.timeout),
        )
    }
}

/// Kills the compiler and everything it started. Reader threads are left to
/// finish on their own once the pipes close.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(child.id()) {
            if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                tracing::debug!(error = %err, "failed to signal compiler process group");
            }
        }
    }
    if let Err(err) = child.kill() {
        tracing::debug!(error = %err, "compiler already exited");
    }
    let _ = child.wait();
}

impl ProgramCompiler for ExternalCompiler {
    fn compile(&self, source: &Path, dest: &Path) -> CompileOutcome {
        if !source.is_file() {
            return CompileOutcome::failed(
                CompileFailure::SourceMissing,
                format!("shader source not found: {}", source.display()),
            );
        }

        remove_stale_binary(dest);

        let args = self.settings.arguments(source, dest);
        tracing::debug!(
            program = %self.settings.program.display(),
            args = ?args,
            "launching shader compiler"
        );

        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut command = Command::new(&self.settings.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so a timeout also reaches anything the compiler forks.
            command.process_group(0);
        }
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return CompileOutcome::failed(
                    CompileFailure::Launch,
                    format!(
                        "failed to launch compiler {}: {err}",
                        self.settings.program.display()
                    ),
                );
            }
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, Stream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, Stream::Stderr, tx.clone());
        }
        drop(tx);

        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();
        let mut collect = |wait: Duration| -> bool {
            match rx.recv_timeout(wait) {
                Ok((Stream::Stdout, line)) => {
                    stdout_lines.push(line);
                    true
                }
                Ok((Stream::Stderr, line)) => {
                    stderr_lines.push(line);
                    true
                }
                Err(RecvTimeoutError::Timeout) => true,
                Err(RecvTimeoutError::Disconnected) => false,
            }
        };

        let mut pipes_open = true;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "failed to poll shader compiler");
                    break None;
                }
            }
            if Instant::now() >= deadline {
                return self.timed_out(&mut child, dest);
            }
            if pipes_open {
                pipes_open = collect(POLL_INTERVAL);
            } else {
                thread::sleep(POLL_INTERVAL);
            }
        };

        // The child has exited; a forked helper may still hold the pipes, so
        // draining shares the same deadline.
        while pipes_open {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.timed_out(&mut child, dest);
            }
            pipes_open = collect(remaining.min(POLL_INTERVAL * 10));
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            elapsed_ms,
            exit = ?status.and_then(|status| status.code()),
            stderr_lines = stderr_lines.len(),
            "shader compiler finished"
        );

        let has_errors = !stderr_lines.is_empty();
        let diagnostics = stdout_lines
            .into_iter()
            .chain(stderr_lines)
            .collect::<Vec<_>>()
            .join("\n");

        if has_errors {
            remove_stale_binary(dest);
            return CompileOutcome::failed(CompileFailure::Diagnostics, diagnostics);
        }
        if !dest.is_file() {
            let message = if diagnostics.is_empty() {
                format!("compiler produced no binary at {}", dest.display())
            } else {
                format!(
                    "{diagnostics}\ncompiler produced no binary at {}",
                    dest.display()
                )
            };
            return CompileOutcome::failed(CompileFailure::MissingBinary, message);
        }
        CompileOutcome::succeeded(dest.to_path_buf(), diagnostics)
    }
}

fn spawn_line_reader<R>(pipe: R, stream: Stream, tx: Sender<(Stream, String)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines().map_while(Result::ok) {
            if tx.send((stream, line)).is_err() {
                break;
            }
        }
    });
}

fn remove_stale_binary(dest: &Path) {
    if dest.exists() {
        if let Err(err) = fs::remove_file(dest) {
            tracing::warn!(path = %dest.display(), error = %err, "failed to remove stale binary");
        }
    }
}
