//! Per-target render resources.
//!
//! A kit owns everything one render target needs between ticks: the
//! G-buffer channels, the accumulation buffer and the output image. Kits
//! live in a [`KitArena`] indexed by [`RenderTarget`] and are replaced
//! wholesale on resize.

use std::fmt;

/// Render targets driven by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// Interactive view at the requested resolution
    Main,
    /// Fixed-size material/scene thumbnails
    Icon,
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderTarget::Main => f.write_str("main"),
            RenderTarget::Icon => f.write_str("icon"),
        }
    }
}

/// Target size in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub(crate) fn pack(self) -> u64 {
        ((self.width as u64) << 32) | self.height as u64
    }

    pub(crate) fn unpack(v: u64) -> Self {
        Self { width: (v >> 32) as u32, height: v as u32 }
    }
}

/// G-buffer channels, one `vec4` per pixel each. Order matches the
/// `CH_*` constants of the shader passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Channel {
    /// distance, pixel hash, blend code, material id
    Depth = 0,
    /// normal, alive flag
    Normal,
    CamOrigin,
    CamDir,
    /// shadow ray origin, light index
    LightOrigin,
    /// shadow ray direction, distance to the sample
    LightDir,
    /// shadow hit distance and material
    LightDepth,
    Params0,
    Params1,
    Params2,
    Params3,
    Params4,
    Params5,
    Direct,
    Radiance,
    /// throughput, pdf of the last sampled direction
    Throughput,
    /// absorption coefficient, bounce
    Absorption,
    Accum,
}

/// Number of G-buffer channels.
pub const CHANNEL_COUNT: usize = 18;

impl Channel {
    pub const PARAMS: [Channel; 6] =
        [Channel::Params0, Channel::Params1, Channel::Params2, Channel::Params3, Channel::Params4, Channel::Params5];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Resources of one allocated target.
pub trait RenderKit {
    fn extent(&self) -> Extent;
}

/// Kits indexed by target.
#[derive(Debug)]
pub struct KitArena<K> {
    main: Option<K>,
    icon: Option<K>,
}

impl<K> Default for KitArena<K> {
    fn default() -> Self {
        Self { main: None, icon: None }
    }
}

impl<K: RenderKit> KitArena<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: RenderTarget) -> Option<&K> {
        match target {
            RenderTarget::Main => self.main.as_ref(),
            RenderTarget::Icon => self.icon.as_ref(),
        }
    }

    pub fn get_mut(&mut self, target: RenderTarget) -> Option<&mut K> {
        match target {
            RenderTarget::Main => self.main.as_mut(),
            RenderTarget::Icon => self.icon.as_mut(),
        }
    }

    /// Install a kit, returning the one it replaces.
    pub fn insert(&mut self, target: RenderTarget, kit: K) -> Option<K> {
        self.slot(target).replace(kit)
    }

    /// Tear down the kit of `target`.
    pub fn remove(&mut self, target: RenderTarget) -> Option<K> {
        self.slot(target).take()
    }

    pub fn extent(&self, target: RenderTarget) -> Option<Extent> {
        self.get(target).map(RenderKit::extent)
    }

    fn slot(&mut self, target: RenderTarget) -> &mut Option<K> {
        match target {
            RenderTarget::Main => &mut self.main,
            RenderTarget::Icon => &mut self.icon,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(Extent);

    impl RenderKit for Fake {
        fn extent(&self) -> Extent {
            self.0
        }
    }

    #[test]
    fn test_channel_layout() {
        assert_eq!(Channel::Params0.index(), 7);
        assert_eq!(Channel::Params5.index(), 12);
        assert_eq!(Channel::Accum.index(), CHANNEL_COUNT - 1);
    }

    #[test]
    fn test_extent_pack() {
        let e = Extent::new(1920, 1080);
        assert_eq!(Extent::unpack(e.pack()), e);
        assert_eq!(e.pixels(), 1920 * 1080);
        assert!(Extent::default().is_empty());
    }

    #[test]
    fn test_arena_replace() {
        let mut arena = KitArena::new();
        assert!(arena.insert(RenderTarget::Main, Fake(Extent::new(4, 4))).is_none());
        let old = arena.insert(RenderTarget::Main, Fake(Extent::new(8, 8)));
        assert_eq!(old.map(|k| k.0), Some(Extent::new(4, 4)));
        assert_eq!(arena.extent(RenderTarget::Main), Some(Extent::new(8, 8)));
        assert!(arena.get(RenderTarget::Icon).is_none());
        assert!(arena.remove(RenderTarget::Main).is_some());
        assert!(arena.extent(RenderTarget::Main).is_none());
    }
}
