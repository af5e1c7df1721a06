//! Per-frame uniform values and the plan that maps them onto a program.
//!
//! A [`BindingPlan`] is built once when a program becomes active. It lists the
//! well-known parameter names the program actually declares, so per-frame
//! binding never assigns something the program lacks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};

use crate::backend::RenderBackend;
use crate::channels::{resolution_for, Channel, ChannelSlots, TextureExtent};
use crate::error::RenderError;
use crate::program::{ParameterIndex, ParameterSet, ParameterType, ParameterValue, ShaderProgram};
use crate::types::{ChannelKind, CHANNEL_COUNT};

/// Where the value of a well-known parameter comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformSource {
    Time,
    TimeDelta,
    Date,
    Resolution,
    MatrixTransform,
    Channel(usize),
    ChannelResolution(usize),
    ChannelTime(usize),
}

impl UniformSource {
    pub fn from_name(name: &str) -> Option<Self> {
        let indexed = |prefix: &str| -> Option<usize> {
            let index: usize = name.strip_prefix(prefix)?.parse().ok()?;
            (index < CHANNEL_COUNT).then_some(index)
        };
        match name {
            "Time" => Some(UniformSource::Time),
            "TimeDelta" => Some(UniformSource::TimeDelta),
            "Date" => Some(UniformSource::Date),
            "Resolution" => Some(UniformSource::Resolution),
            "MatrixTransform" => Some(UniformSource::MatrixTransform),
            _ => indexed("ChannelResolution")
                .map(UniformSource::ChannelResolution)
                .or_else(|| indexed("ChannelTime").map(UniformSource::ChannelTime))
                .or_else(|| indexed("Channel").map(UniformSource::Channel)),
        }
    }

    fn accepts(self, ty: &ParameterType) -> bool {
        match self {
            UniformSource::Time | UniformSource::TimeDelta | UniformSource::ChannelTime(_) => {
                *ty == ParameterType::Float
            }
            UniformSource::Resolution | UniformSource::ChannelResolution(_) => {
                *ty == ParameterType::Vec3
            }
            UniformSource::Date => *ty == ParameterType::Vec4,
            UniformSource::MatrixTransform => *ty == ParameterType::Matrix4,
            UniformSource::Channel(_) => matches!(ty, ParameterType::Texture(_)),
        }
    }
}

/// Values shared by every parameter bound in one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameUniforms {
    pub time: f32,
    pub time_delta: f32,
    /// Year, month (1-12), day, seconds since local midnight.
    pub date: [f32; 4],
    /// Back buffer width, height, 1.
    pub resolution: [f32; 3],
}

/// Accumulates host frame ticks into shader time.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameClock {
    time: f32,
    delta: f32,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances by `elapsed` and returns the frame delta in seconds.
    pub fn tick(&mut self, elapsed: Duration) -> f32 {
        self.delta = elapsed.as_secs_f32();
        self.time += self.delta;
        self.delta
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn uniforms(&self, width: u32, height: u32) -> FrameUniforms {
        FrameUniforms {
            time: self.time,
            time_delta: self.delta,
            date: local_date(),
            resolution: [width as f32, height as f32, 1.0],
        }
    }
}

/// Current local date in the layout shaders expect for `Date`.
pub fn local_date() -> [f32; 4] {
    let now = Local::now();
    let seconds =
        now.num_seconds_from_midnight() as f32 + now.nanosecond() as f32 / 1_000_000_000.0;
    [now.year() as f32, now.month() as f32, now.day() as f32, seconds]
}

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn placeholder_resolution(kind: ChannelKind) -> [f32; 3] {
    let depth = if kind == ChannelKind::Cubemap { 6 } else { 1 };
    resolution_for(kind, TextureExtent::new(1, 1, depth))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PlanEntry {
    index: ParameterIndex,
    source: UniformSource,
}

/// Prebuilt mapping from a program's declared well-known parameters to their sources.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingPlan {
    entries: Vec<PlanEntry>,
    declared_channels: [Option<ChannelKind>; CHANNEL_COUNT],
}

impl BindingPlan {
    /// Fails with `CompileFailed` when a well-known name is declared with an
    /// incompatible type. Unknown names are left alone.
    pub fn build(params: &ParameterSet) -> Result<Self, RenderError> {
        let mut plan = BindingPlan::default();
        for (index, desc) in params.iter() {
            let Some(source) = UniformSource::from_name(&desc.name) else {
                continue;
            };
            if !source.accepts(&desc.ty) {
                return Err(RenderError::compile(format!(
                    "parameter '{}' is declared as {:?}, which cannot receive {:?}",
                    desc.name, desc.ty, source
                )));
            }
            if let (UniformSource::Channel(slot), ParameterType::Texture(kind)) =
                (source, &desc.ty)
            {
                plan.declared_channels[slot] = Some(*kind);
            }
            plan.entries.push(PlanEntry { index, source });
        }
        Ok(plan)
    }

    /// Number of assignments each frame will perform.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = UniformSource> + '_ {
        self.entries.iter().map(|entry| entry.source)
    }

    /// Texture kind the program expects in `slot`, if it samples it.
    pub fn declared_channel(&self, slot: usize) -> Option<ChannelKind> {
        self.declared_channels.get(slot).copied().flatten()
    }

    /// The bound channel when it fits the declaration, `None` when the slot
    /// needs a placeholder.
    fn usable_channel<'a, T: crate::channels::ChannelTexture>(
        &self,
        channels: &'a ChannelSlots<T>,
        slot: usize,
    ) -> Option<&'a Channel<T>> {
        let channel = channels.get(slot)?;
        match self.declared_channel(slot) {
            Some(kind) if kind != channel.kind() => None,
            _ => Some(channel),
        }
    }

    /// Assigns every planned parameter, returning how many were assigned.
    pub fn apply<B: RenderBackend>(
        &self,
        program: &mut B::Program,
        frame: &FrameUniforms,
        channels: &ChannelSlots<B::Texture>,
        backend: &mut B,
    ) -> Result<usize, RenderError> {
        for entry in &self.entries {
            match entry.source {
                UniformSource::Time => {
                    program.assign(entry.index, ParameterValue::Float(frame.time))?
                }
                UniformSource::TimeDelta => {
                    program.assign(entry.index, ParameterValue::Float(frame.time_delta))?
                }
                UniformSource::Date => {
                    program.assign(entry.index, ParameterValue::Vec4(frame.date))?
                }
                UniformSource::Resolution => {
                    program.assign(entry.index, ParameterValue::Vec3(frame.resolution))?
                }
                UniformSource::MatrixTransform => {
                    program.assign(entry.index, ParameterValue::Matrix4(IDENTITY))?
                }
                UniformSource::Channel(slot) => {
                    let texture: Arc<B::Texture> = match self.usable_channel(channels, slot) {
                        Some(channel) => Arc::clone(channel.texture()),
                        None => {
                            let kind = self
                                .declared_channel(slot)
                                .unwrap_or(ChannelKind::Texture2d);
                            tracing::trace!(
                                channel = slot,
                                kind = %kind,
                                "binding placeholder texture"
                            );
                            backend.placeholder(kind)?
                        }
                    };
                    program.assign(entry.index, ParameterValue::Texture(&*texture))?
                }
                UniformSource::ChannelResolution(slot) => {
                    let resolution = match self.usable_channel(channels, slot) {
                        Some(channel) => channel.resolution(),
                        None => placeholder_resolution(
                            self.declared_channel(slot)
                                .unwrap_or(ChannelKind::Texture2d),
                        ),
                    };
                    program.assign(entry.index, ParameterValue::Vec3(resolution))?
                }
                UniformSource::ChannelTime(slot) => {
                    let time = self
                        .usable_channel(channels, slot)
                        .map_or(0.0, Channel::time);
                    program.assign(entry.index, ParameterValue::Float(time))?
                }
            }
        }
        Ok(self.entries.len())
    }
}
