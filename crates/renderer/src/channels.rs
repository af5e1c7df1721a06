use std::sync::Arc;

use crate::types::{ChannelKind, CHANNEL_COUNT};

/// Dimensions of a texture that can be bound to a channel slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureExtent {
    pub width: u32,
    pub height: u32,
    /// Layer count for cubemaps (always 6), slice count for volumes, 1 otherwise.
    pub depth: u32,
}

impl TextureExtent {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
}

/// Backend texture handle that can report its own size.
pub trait ChannelTexture {
    fn extent(&self) -> TextureExtent;
}

/// A texture bound to one of the four input slots.
pub struct Channel<T> {
    texture: Arc<T>,
    kind: ChannelKind,
    time: f32,
}

impl<T: ChannelTexture> Channel<T> {
    pub fn new(texture: Arc<T>, kind: ChannelKind) -> Self {
        Self {
            texture,
            kind,
            time: 0.0,
        }
    }

    pub fn texture(&self) -> &Arc<T> {
        &self.texture
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Seconds accumulated since the channel was bound.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn advance(&mut self, delta: f32) {
        self.time += delta;
    }

    /// Resolution vector exposed to shaders as `ChannelResolutionN`.
    pub fn resolution(&self) -> [f32; 3] {
        resolution_for(self.kind, self.texture.extent())
    }
}

/// Resolution vector of a texture of the given kind.
pub fn resolution_for(kind: ChannelKind, extent: TextureExtent) -> [f32; 3] {
    match kind {
        ChannelKind::Texture2d => [extent.width as f32, extent.height as f32, 1.0],
        ChannelKind::Cubemap => [extent.width as f32, extent.width as f32, 6.0],
        ChannelKind::Volume => [
            extent.width as f32,
            extent.height as f32,
            extent.depth as f32,
        ],
    }
}

/// The fixed set of channel slots owned by a surface.
pub struct ChannelSlots<T> {
    slots: [Option<Channel<T>>; CHANNEL_COUNT],
}

impl<T: ChannelTexture> ChannelSlots<T> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Channel<T>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Replaces the channel in `index`, returning the previous occupant.
    ///
    /// Out-of-range slots are rejected by the caller; this only indexes.
    pub(crate) fn set(&mut self, index: usize, channel: Option<Channel<T>>) -> Option<Channel<T>> {
        std::mem::replace(&mut self.slots[index], channel)
    }

    /// Kinds of the bound slots, used to drive the assembler.
    pub fn kinds(&self) -> [Option<ChannelKind>; CHANNEL_COUNT] {
        std::array::from_fn(|index| self.slots[index].as_ref().map(Channel::kind))
    }

    pub fn advance(&mut self, delta: f32) {
        for channel in self.slots.iter_mut().flatten() {
            channel.advance(delta);
        }
    }

    pub fn bound(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl<T: ChannelTexture> Default for ChannelSlots<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(TextureExtent);

    impl ChannelTexture for Fake {
        fn extent(&self) -> TextureExtent {
            self.0
        }
    }

    fn fake(width: u32, height: u32, depth: u32) -> Arc<Fake> {
        Arc::new(Fake(TextureExtent::new(width, height, depth)))
    }

    #[test]
    fn resolution_depends_on_kind() {
        let flat = Channel::new(fake(64, 32, 1), ChannelKind::Texture2d);
        assert_eq!(flat.resolution(), [64.0, 32.0, 1.0]);

        let cube = Channel::new(fake(128, 128, 6), ChannelKind::Cubemap);
        assert_eq!(cube.resolution(), [128.0, 128.0, 6.0]);

        let volume = Channel::new(fake(16, 8, 4), ChannelKind::Volume);
        assert_eq!(volume.resolution(), [16.0, 8.0, 4.0]);
    }

    #[test]
    fn channel_time_accumulates_frame_deltas() {
        let mut slots = ChannelSlots::new();
        slots.set(2, Some(Channel::new(fake(1, 1, 1), ChannelKind::Texture2d)));
        slots.advance(0.25);
        slots.advance(0.5);
        let channel = slots.get(2).expect("slot 2 bound");
        assert!((channel.time() - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn kinds_report_only_bound_slots() {
        let mut slots = ChannelSlots::new();
        slots.set(1, Some(Channel::new(fake(4, 4, 6), ChannelKind::Cubemap)));
        assert_eq!(slots.kinds(), [None, Some(ChannelKind::Cubemap), None, None]);
        assert_eq!(slots.bound(), 1);

        slots.set(1, None);
        assert_eq!(slots.bound(), 0);
    }
}
