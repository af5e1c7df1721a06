//! Recording backend and scripted compiler used by the pipeline tests.
//!
//! The fake "binary" is plain text: `param <Name> <type>` declares a parameter,
//! `technique <name> <passes>` a technique, and any line starting with `error`
//! makes the fake compiler fail with that line as its diagnostics.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use crate::assemble::{ShaderAssembler, CHANNEL_PLACEHOLDER, SOURCE_INCLUDE};
use crate::backend::RenderBackend;
use crate::channels::{ChannelTexture, TextureExtent};
use crate::compile::{CompileFailure, CompileOutcome, CompilerSettings, ProgramCompiler};
use crate::device::{DeviceHub, DeviceLease};
use crate::error::RenderError;
use crate::host::LiveSurface;
use crate::lifecycle::CompileInputs;
use crate::program::{
    check_assignment, ParameterDesc, ParameterIndex, ParameterSet, ParameterType, ParameterValue,
    Pass, ShaderProgram, Technique,
};
use crate::types::{
    ChannelKind, ClearColor, RasterizerState, SamplerState, SurfaceSettings, SurfaceSize,
};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AssignedValue {
    Float(f32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Matrix4([[f32; 4]; 4]),
    Texture(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Event {
    BackBuffer(SurfaceSize),
    BeginFrame,
    Clear(ClearColor),
    Sampler(SamplerState),
    Rasterizer(RasterizerState),
    BindQuad,
    ApplyPass { program: u32, technique: usize, pass: usize },
    Draw(u32),
    FinishFrame,
    Loaded(u32),
    Disposed(u32),
    Assign { program: u32, name: String, value: AssignedValue },
}

pub(crate) type EventLog = Rc<RefCell<Vec<Event>>>;

#[derive(Debug)]
pub(crate) struct FakeTexture {
    id: u32,
    extent: TextureExtent,
}

impl FakeTexture {
    pub(crate) fn new(id: u32, extent: TextureExtent) -> Self {
        Self { id, extent }
    }

    pub(crate) fn placeholder_id(kind: ChannelKind) -> u32 {
        match kind {
            ChannelKind::Texture2d => 9000,
            ChannelKind::Cubemap => 9001,
            ChannelKind::Volume => 9002,
        }
    }
}

impl ChannelTexture for FakeTexture {
    fn extent(&self) -> TextureExtent {
        self.extent
    }
}

pub(crate) struct FakeProgram {
    id: u32,
    params: ParameterSet,
    techniques: Vec<Technique>,
    log: EventLog,
}

impl ShaderProgram for FakeProgram {
    type Texture = FakeTexture;

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    fn assign(
        &mut self,
        index: ParameterIndex,
        value: ParameterValue<'_, FakeTexture>,
    ) -> Result<(), RenderError> {
        check_assignment(&self.params, index, &value)?;
        let name = self
            .params
            .get(index)
            .map(|desc| desc.name.clone())
            .unwrap_or_default();
        let value = match value {
            ParameterValue::Float(v) => AssignedValue::Float(v),
            ParameterValue::Vec3(v) => AssignedValue::Vec3(v),
            ParameterValue::Vec4(v) => AssignedValue::Vec4(v),
            ParameterValue::Matrix4(v) => AssignedValue::Matrix4(v),
            ParameterValue::Texture(texture) => AssignedValue::Texture(texture.id),
        };
        self.log.borrow_mut().push(Event::Assign {
            program: self.id,
            name,
            value,
        });
        Ok(())
    }
}

impl Drop for FakeProgram {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Event::Disposed(self.id));
    }
}

fn parse_type(token: &str) -> ParameterType {
    match token {
        "float" => ParameterType::Float,
        "vec3" => ParameterType::Vec3,
        "vec4" => ParameterType::Vec4,
        "mat4" => ParameterType::Matrix4,
        other => match other.parse::<ChannelKind>() {
            Ok(kind) => ParameterType::Texture(kind),
            Err(_) => ParameterType::Other(other.to_string()),
        },
    }
}

fn parse_program(text: &str) -> (Vec<ParameterDesc>, Vec<Technique>) {
    let mut params = Vec::new();
    let mut techniques = Vec::new();
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["param", name, ty] => params.push(ParameterDesc {
                name: (*name).to_string(),
                ty: parse_type(ty),
            }),
            ["technique", name, passes] => {
                let passes = passes.parse::<usize>().unwrap_or(1);
                techniques.push(Technique {
                    name: (*name).to_string(),
                    passes: (0..passes)
                        .map(|index| Pass {
                            name: format!("p{index}"),
                        })
                        .collect(),
                });
            }
            _ => {}
        }
    }
    if techniques.is_empty() {
        techniques.push(Technique {
            name: "main".into(),
            passes: vec![Pass { name: "p0".into() }],
        });
    }
    (params, techniques)
}

#[derive(Clone)]
pub(crate) struct RecordingOptions {
    log: EventLog,
    fail_next_frame: Rc<Cell<bool>>,
    next_program: Rc<Cell<u32>>,
}

pub(crate) struct RecordingBackend {
    _lease: DeviceLease<()>,
    size: SurfaceSize,
    log: EventLog,
    fail_next_frame: Rc<Cell<bool>>,
    next_program: Rc<Cell<u32>>,
    placeholders: HashMap<ChannelKind, Arc<FakeTexture>>,
    current_program: Option<u32>,
}

impl RecordingBackend {
    fn record(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }
}

impl RenderBackend for RecordingBackend {
    type Device = ();
    type Options = RecordingOptions;
    type Texture = FakeTexture;
    type Program = FakeProgram;
    type Quad = ();

    fn create(
        lease: DeviceLease<()>,
        size: SurfaceSize,
        options: &RecordingOptions,
    ) -> Result<Self, RenderError> {
        options.log.borrow_mut().push(Event::BackBuffer(size));
        Ok(Self {
            _lease: lease,
            size,
            log: Rc::clone(&options.log),
            fail_next_frame: Rc::clone(&options.fail_next_frame),
            next_program: Rc::clone(&options.next_program),
            placeholders: HashMap::new(),
            current_program: None,
        })
    }

    fn back_buffer_size(&self) -> SurfaceSize {
        self.size
    }

    fn recreate_back_buffer(&mut self, size: SurfaceSize) -> Result<(), RenderError> {
        self.size = size;
        self.record(Event::BackBuffer(size));
        Ok(())
    }

    fn create_quad(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    fn load_program(&mut self, binary: &[u8]) -> Result<FakeProgram, RenderError> {
        let text = std::str::from_utf8(binary)
            .map_err(|err| RenderError::compile(format!("binary is not text: {err}")))?;
        let (params, techniques) = parse_program(text);
        let id = self.next_program.get();
        self.next_program.set(id + 1);
        self.record(Event::Loaded(id));
        Ok(FakeProgram {
            id,
            params: ParameterSet::new(params),
            techniques,
            log: Rc::clone(&self.log),
        })
    }

    fn placeholder(&mut self, kind: ChannelKind) -> Result<Arc<FakeTexture>, RenderError> {
        let texture = self.placeholders.entry(kind).or_insert_with(|| {
            let depth = if kind == ChannelKind::Cubemap { 6 } else { 1 };
            Arc::new(FakeTexture::new(
                FakeTexture::placeholder_id(kind),
                TextureExtent::new(1, 1, depth),
            ))
        });
        Ok(Arc::clone(texture))
    }

    fn begin_frame(&mut self) -> Result<(), RenderError> {
        if self.fail_next_frame.replace(false) {
            return Err(RenderError::resource("frame target", "device lost"));
        }
        self.record(Event::BeginFrame);
        Ok(())
    }

    fn clear(&mut self, color: ClearColor) {
        self.record(Event::Clear(color));
    }

    fn set_sampler_state(&mut self, state: SamplerState) {
        self.record(Event::Sampler(state));
    }

    fn set_rasterizer_state(&mut self, state: RasterizerState) {
        self.record(Event::Rasterizer(state));
    }

    fn bind_quad(&mut self, _quad: &()) {
        self.record(Event::BindQuad);
    }

    fn apply_pass(
        &mut self,
        program: &FakeProgram,
        technique: usize,
        pass: usize,
    ) -> Result<(), RenderError> {
        self.current_program = Some(program.id);
        self.record(Event::ApplyPass {
            program: program.id,
            technique,
            pass,
        });
        Ok(())
    }

    fn draw_indexed(&mut self, primitive_count: u32) -> Result<(), RenderError> {
        if self.current_program.is_none() {
            return Err(RenderError::Binding("draw without an applied pass".into()));
        }
        self.record(Event::Draw(primitive_count));
        Ok(())
    }

    fn finish_frame(&mut self) -> Result<(), RenderError> {
        self.current_program = None;
        self.record(Event::FinishFrame);
        Ok(())
    }
}

/// Treats the assembled source as its own binary.
#[derive(Clone)]
pub(crate) struct ScriptedCompiler {
    calls: Rc<Cell<usize>>,
}

impl ProgramCompiler for ScriptedCompiler {
    fn compile(&self, source: &Path, dest: &Path) -> CompileOutcome {
        self.calls.set(self.calls.get() + 1);
        let Ok(assembled) = fs::read_to_string(source) else {
            return CompileOutcome::failed(
                CompileFailure::SourceMissing,
                "assembled source missing",
            );
        };
        let errors: Vec<&str> = assembled
            .lines()
            .filter(|line| line.starts_with("error"))
            .collect();
        if !errors.is_empty() {
            return CompileOutcome::failed(CompileFailure::Diagnostics, errors.join("\n"));
        }
        match fs::write(dest, &assembled) {
            Ok(()) => CompileOutcome::succeeded(dest.to_path_buf(), String::new()),
            Err(err) => CompileOutcome::failed(CompileFailure::MissingBinary, err.to_string()),
        }
    }
}

/// A scratch project with a template, a user source and shared test doubles.
pub(crate) struct Fixture {
    _dir: TempDir,
    settings: SurfaceSettings,
    binary: PathBuf,
    assembler: ShaderAssembler,
    compiler: ScriptedCompiler,
    hub: Arc<DeviceHub<()>>,
    options: RecordingOptions,
}

impl Fixture {
    pub(crate) fn new(source: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = dir.path().join("shader.glsl");
        fs::write(
            &template,
            format!("// template\n{CHANNEL_PLACEHOLDER}\n{SOURCE_INCLUDE}\n"),
        )
        .expect("template");

        let settings = SurfaceSettings {
            template,
            source: dir.path().join("pixelshader.glsl"),
            scratch_dir: dir.path().join("scratch"),
            clear_color: ClearColor::default(),
            compiler: CompilerSettings::default(),
        };
        let assembler = ShaderAssembler::new(
            &settings.template,
            &settings.source,
            &settings.scratch_dir,
        );
        let compiler = ScriptedCompiler {
            calls: Rc::new(Cell::new(0)),
        };
        let fixture = Self {
            _dir: dir,
            binary: settings.binary_path(),
            settings,
            assembler,
            compiler,
            hub: DeviceHub::new(|| Ok(())),
            options: RecordingOptions {
                log: Rc::new(RefCell::new(Vec::new())),
                fail_next_frame: Rc::new(Cell::new(false)),
                next_program: Rc::new(Cell::new(1)),
            },
        };
        fixture.edit_source(source, 10);
        fixture
    }

    /// Rewrites the user source with a fixed modification time `secs` after the epoch.
    pub(crate) fn edit_source(&self, text: &str, secs: u64) {
        fs::write(&self.settings.source, text).expect("write source");
        let file = fs::File::options()
            .write(true)
            .open(&self.settings.source)
            .expect("open source");
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .expect("set mtime");
    }

    pub(crate) fn remove_source(&self) {
        fs::remove_file(&self.settings.source).expect("remove source");
    }

    pub(crate) fn hub(&self) -> &Arc<DeviceHub<()>> {
        &self.hub
    }

    pub(crate) fn backend(&self) -> RecordingBackend {
        let lease = self.hub.acquire().expect("lease");
        RecordingBackend::create(lease, SurfaceSize::new(800, 600), &self.options).expect("backend")
    }

    pub(crate) fn inputs(&self) -> CompileInputs<'_> {
        CompileInputs {
            source: &self.settings.source,
            binary: &self.binary,
            assembler: &self.assembler,
            compiler: &self.compiler,
            kinds: [None; crate::types::CHANNEL_COUNT],
        }
    }

    pub(crate) fn surface(&self) -> LiveSurface<RecordingBackend> {
        LiveSurface::new(
            Arc::clone(&self.hub),
            self.options.clone(),
            self.settings.clone(),
            Box::new(self.compiler.clone()),
            SurfaceSize::new(800, 600),
        )
    }

    pub(crate) fn fail_next_frame(&self) {
        self.options.fail_next_frame.set(true);
    }

    pub(crate) fn compile_count(&self) -> usize {
        self.compiler.calls.get()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.options.log.borrow().clone()
    }

    pub(crate) fn assembled(&self) -> String {
        fs::read_to_string(self.settings.assembled_path()).expect("assembled source")
    }

    pub(crate) fn assigned_names(&self, program_id: u32) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Assign { program, name, .. } if program == program_id => Some(name),
                _ => None,
            })
            .collect()
    }

    /// First value assigned to `param` by program `program_id`.
    pub(crate) fn assigned(&self, program_id: u32, param: &str) -> Option<AssignedValue> {
        self.assignments(program_id, param).into_iter().next()
    }

    pub(crate) fn last_assigned(&self, program_id: u32, param: &str) -> Option<AssignedValue> {
        self.assignments(program_id, param).pop()
    }

    fn assignments(&self, program_id: u32, param: &str) -> Vec<AssignedValue> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Assign {
                    program,
                    name,
                    value,
                } if program == program_id && name == param => Some(value),
                _ => None,
            })
            .collect()
    }
}
