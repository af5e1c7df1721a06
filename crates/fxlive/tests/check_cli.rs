#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const TEMPLATE: &str =
    "#version 450\n[insert Channel defines here]\n#include \"pixelshader.glsl\"\n";

fn fxlive(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fxlive"))
        .env("FXLIVE_CONFIG_DIR", root.join("user-config"))
        .env_remove("FXLIVE_CONFIG")
        .env_remove("FXLIVE_ROOT")
        .env("RUST_LOG", "warn")
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("failed to run fxlive")
}

/// Lays out a project whose compiler is a shell script.
fn project_with_compiler(script: &str) -> TempDir {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("common")).unwrap();
    fs::create_dir_all(root.path().join("scratch")).unwrap();
    fs::write(root.path().join("common/shader.glsl"), TEMPLATE).unwrap();
    fs::write(
        root.path().join("scratch/pixelshader.glsl"),
        "vec4 mainImage(vec2 c) { return vec4(1.0); }\n",
    )
    .unwrap();
    let script_path = root.path().join("fake-compiler.sh");
    fs::write(&script_path, script).unwrap();
    fs::write(
        root.path().join("fxlive.toml"),
        format!(
            r#"version = 1

[compiler]
program = "sh"
args = ["{}", "{{source}}", "{{dest}}"]
debug = false
timeout = "5s"

[[channels]]
slot = 1
kind = "cube"
path = "cubemaps/sky"
"#,
            script_path.display()
        ),
    )
    .unwrap();
    root
}

#[test]
fn check_reports_success_as_json() {
    let root = project_with_compiler("cp \"$1\" \"$2\"\necho done\n");

    let output = fxlive(root.path(), &["check", "--format", "json"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["success"], true);
    assert_eq!(report["stage"], "compile");
    assert_eq!(report["diagnostics"], "done");

    let assembled = fs::read_to_string(root.path().join("scratch/program.glsl")).unwrap();
    assert!(assembled.contains("DECLARE_CUBEMAP(Channel1,1)\n"));
    assert!(!assembled.contains("[insert Channel defines here]"));
    assert!(root.path().join("scratch/program.spv").is_file());
}

#[test]
fn check_exits_nonzero_on_compiler_errors() {
    let root = project_with_compiler("echo 'program.glsl:2: error: syntax error' >&2\nexit 1\n");

    let output = fxlive(root.path(), &["check"]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("error: compile failed (diagnostics)"), "stdout: {stdout}");
    assert!(stdout.contains("syntax error"));
}

#[test]
fn check_compiles_the_configured_source_path() {
    let root = project_with_compiler("cp \"$1\" \"$2\"\n");
    fs::create_dir_all(root.path().join("shaders")).unwrap();
    fs::write(
        root.path().join("shaders/mine.glsl"),
        "vec4 mainImage(vec2 c) { return vec4(0.5); } // from mine\n",
    )
    .unwrap();
    let config = fs::read_to_string(root.path().join("fxlive.toml")).unwrap();
    let config = config.replacen(
        "[compiler]",
        "[paths]\nsource = \"shaders/mine.glsl\"\nscratch = \"build\"\n\n[compiler]",
        1,
    );
    fs::write(root.path().join("fxlive.toml"), config).unwrap();

    let output = fxlive(root.path(), &["check", "--format", "json"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let assembled = fs::read_to_string(root.path().join("build/program.glsl")).unwrap();
    assert!(assembled.contains("// from mine"));
    assert!(!assembled.contains("#include"));
    assert!(root.path().join("build/program.spv").is_file());
}

#[test]
fn init_writes_defaults_once() {
    let root = TempDir::new().unwrap();

    let first = fxlive(root.path(), &["init"]);
    assert!(first.status.success(), "stderr: {}", String::from_utf8_lossy(&first.stderr));
    for path in [
        "fxlive.toml",
        "common/shader.glsl",
        "scratch/pixelshader.glsl",
        "tools/compile-shader.sh",
        "assets/textures/test.png",
    ] {
        assert!(root.path().join(path).is_file(), "{path} missing");
    }

    fs::write(root.path().join("scratch/pixelshader.glsl"), "// edited\n").unwrap();
    let second = fxlive(root.path(), &["init"]);
    assert!(second.status.success());
    assert!(String::from_utf8_lossy(&second.stdout).contains("Nothing to do"));
    assert_eq!(
        fs::read_to_string(root.path().join("scratch/pixelshader.glsl")).unwrap(),
        "// edited\n"
    );
}

#[test]
fn where_names_the_project_config() {
    let root = project_with_compiler("exit 0\n");

    let output = fxlive(root.path(), &["where"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&root.path().join("fxlive.toml").display().to_string()));
    assert!(stdout.contains("Channel1"));
}
