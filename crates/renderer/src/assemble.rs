//! Builds the complete program source from the template, the user's pixel
//! shader and the bound channels.
//!
//! The template carries a single placeholder line which is replaced by one
//! declaration macro per bound channel slot, e.g. `DECLARE_TEXTURE2D(Channel0,0)`,
//! and a single `#include "pixelshader.glsl"` line which is replaced by the text
//! of the configured source file. Inlining the source keeps the compiled program
//! tied to the file that is being watched, wherever it lives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::RenderError;
use crate::types::{ChannelKind, CHANNEL_COUNT};

/// Marker replaced by the channel declarations.
pub const CHANNEL_PLACEHOLDER: &str = "[insert Channel defines here]";

/// Template line replaced by the user's pixel shader.
pub const SOURCE_INCLUDE: &str = "#include \"pixelshader.glsl\"";

/// File name of the assembled source inside the scratch directory.
pub const ASSEMBLED_SOURCE_NAME: &str = "program.glsl";

/// File name of the compiled binary inside the scratch directory.
pub const PROGRAM_BINARY_NAME: &str = "program.spv";

fn declaration_macro(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Texture2d => "DECLARE_TEXTURE2D",
        ChannelKind::Cubemap => "DECLARE_CUBEMAP",
        ChannelKind::Volume => "DECLARE_TEXTURE3D",
    }
}

/// One newline-terminated declaration per bound slot, ascending.
pub fn channel_declarations(kinds: &[Option<ChannelKind>; CHANNEL_COUNT]) -> String {
    let mut block = String::new();
    for (index, kind) in kinds.iter().enumerate() {
        if let Some(kind) = kind {
            block.push_str(&format!(
                "{}(Channel{index},{index})\n",
                declaration_macro(*kind)
            ));
        }
    }
    block
}

fn malformed(template_path: &Path, marker: &str, found: usize) -> RenderError {
    RenderError::TemplateMalformed {
        path: template_path.to_path_buf(),
        reason: format!("expected exactly one '{marker}' marker, found {found}"),
    }
}

/// Splices the user source over the include line.
///
/// `#line` directives keep compiler diagnostics in the user's numbering while
/// inside the source.
fn inline_source(template: &str, user_source: &str) -> String {
    let mut out = String::with_capacity(template.len() + user_source.len() + 32);
    for (index, line) in template.split_inclusive('\n').enumerate() {
        if line.trim() != SOURCE_INCLUDE {
            out.push_str(line);
            continue;
        }
        out.push_str("#line 1\n");
        out.push_str(user_source);
        if !user_source.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("#line {}\n", index + 2));
    }
    out
}

/// Substitutes the user source and the channel block into `template`.
///
/// `template_path` is only used for error reporting.
pub fn assemble(
    template: &str,
    template_path: &Path,
    user_source: &str,
    kinds: &[Option<ChannelKind>; CHANNEL_COUNT],
) -> Result<String, RenderError> {
    let channels = template.matches(CHANNEL_PLACEHOLDER).count();
    if channels != 1 {
        return Err(malformed(template_path, CHANNEL_PLACEHOLDER, channels));
    }
    let includes = template
        .lines()
        .filter(|line| line.trim() == SOURCE_INCLUDE)
        .count();
    if includes != 1 {
        return Err(malformed(template_path, SOURCE_INCLUDE, includes));
    }

    let declared = template.replacen(CHANNEL_PLACEHOLDER, &channel_declarations(kinds), 1);
    Ok(inline_source(&declared, user_source))
}

fn read_input(path: &Path, what: &str) -> Result<String, RenderError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(RenderError::SourceMissing {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(RenderError::resource(
            format!("{what} read {}", path.display()),
            err,
        )),
    }
}

/// Reads the template and the user source from disk and writes the assembled
/// program to the scratch directory.
#[derive(Clone, Debug)]
pub struct ShaderAssembler {
    template_path: PathBuf,
    source_path: PathBuf,
    scratch_dir: PathBuf,
}

impl ShaderAssembler {
    pub fn new(
        template_path: impl Into<PathBuf>,
        source_path: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            template_path: template_path.into(),
            source_path: source_path.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.scratch_dir.join(ASSEMBLED_SOURCE_NAME)
    }

    /// Assembles and writes the program, returning the path that was written.
    pub fn write(
        &self,
        kinds: &[Option<ChannelKind>; CHANNEL_COUNT],
    ) -> Result<PathBuf, RenderError> {
        let template = read_input(&self.template_path, "template")?;
        let user_source = read_input(&self.source_path, "shader source")?;
        let assembled = assemble(&template, &self.template_path, &user_source, kinds)?;

        fs::create_dir_all(&self.scratch_dir).map_err(|err| {
            RenderError::resource(
                format!("scratch directory {}", self.scratch_dir.display()),
                err,
            )
        })?;
        let output = self.output_path();
        fs::write(&output, assembled).map_err(|err| {
            RenderError::resource(format!("assembled source {}", output.display()), err)
        })?;

        tracing::debug!(
            path = %output.display(),
            source = %self.source_path.display(),
            "assembled shader program"
        );
        Ok(output)
    }
}
