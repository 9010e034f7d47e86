use crate::error::{BuildError, BuildResult};
use glam::{Vec2, Vec3};
use half::f16;
use image::{Rgb32FImage, Rgba32FImage, RgbaImage};
use std::f32::consts::{PI, TAU};
use std::sync::OnceLock;

/// Rec. 709 luminance weights. Fixed so exported tables only depend on pixel data.
pub const LUMINANCE_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Borrowed texel storage in one of the layouts an environment texture can arrive in.
#[derive(Clone, Copy, Debug)]
pub enum Texels<'a> {
    Rgb32F(&'a [f32]),
    Rgba32F(&'a [f32]),
    Rgba16F(&'a [f16]),
    /// 8-bit RGBA; `srgb` requests decoding to linear before weighting.
    Rgba8 { data: &'a [u8], srgb: bool },
}

impl Texels<'_> {
    pub fn channels(&self) -> usize {
        match self {
            Texels::Rgb32F(_) => 3,
            Texels::Rgba32F(_) | Texels::Rgba16F(_) | Texels::Rgba8 { .. } => 4,
        }
    }

    /// Number of scalar components in the buffer.
    pub fn len(&self) -> usize {
        match self {
            Texels::Rgb32F(data) | Texels::Rgba32F(data) => data.len(),
            Texels::Rgba16F(data) => data.len(),
            Texels::Rgba8 { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear RGB of texel `index`. Alpha is ignored.
    #[inline]
    pub fn color(&self, index: usize) -> Vec3 {
        let base = index * self.channels();
        match self {
            Texels::Rgb32F(data) | Texels::Rgba32F(data) => {
                Vec3::new(data[base], data[base + 1], data[base + 2])
            }
            Texels::Rgba16F(data) => {
                Vec3::new(data[base].to_f32(), data[base + 1].to_f32(), data[base + 2].to_f32())
            }
            Texels::Rgba8 { data, srgb } => {
                if *srgb {
                    let lut = srgb_to_linear_lut();
                    Vec3::new(
                        lut[data[base] as usize],
                        lut[data[base + 1] as usize],
                        lut[data[base + 2] as usize],
                    )
                } else {
                    Vec3::new(data[base] as f32, data[base + 1] as f32, data[base + 2] as f32) / 255.0
                }
            }
        }
    }
}

/// Read-only view of an equirectangular environment map, row-major with the top row first.
///
/// Row 0 sits at the +Y pole, the middle row at the horizon. The caller keeps ownership of the
/// pixel data; the view only lives for the duration of a build.
#[derive(Clone, Copy, Debug)]
pub struct EnvironmentMap<'a> {
    width: u32,
    height: u32,
    texels: Texels<'a>,
}

impl<'a> EnvironmentMap<'a> {
    /// Validates the extent against the buffer length.
    pub fn new(width: u32, height: u32, texels: Texels<'a>) -> BuildResult<Self> {
        if width == 0 || height == 0 {
            return Err(BuildError::EmptyExtent { width, height });
        }
        let texel_count = (width as usize)
            .checked_mul(height as usize)
            .ok_or(BuildError::ExtentOverflow { width, height })?;
        let expected =
            texel_count.checked_mul(texels.channels()).ok_or(BuildError::ExtentOverflow { width, height })?;
        if texels.len() != expected {
            return Err(BuildError::LengthMismatch { expected, actual: texels.len() });
        }
        Ok(Self { width, height, texels })
    }

    pub fn rgb32f(width: u32, height: u32, data: &'a [f32]) -> BuildResult<Self> {
        Self::new(width, height, Texels::Rgb32F(data))
    }

    pub fn rgba32f(width: u32, height: u32, data: &'a [f32]) -> BuildResult<Self> {
        Self::new(width, height, Texels::Rgba32F(data))
    }

    pub fn rgba16f(width: u32, height: u32, data: &'a [f16]) -> BuildResult<Self> {
        Self::new(width, height, Texels::Rgba16F(data))
    }

    pub fn rgba8(width: u32, height: u32, data: &'a [u8], srgb: bool) -> BuildResult<Self> {
        Self::new(width, height, Texels::Rgba8 { data, srgb })
    }

    pub fn from_rgb32f_image(image: &'a Rgb32FImage) -> BuildResult<Self> {
        Self::rgb32f(image.width(), image.height(), image.as_raw())
    }

    pub fn from_rgba32f_image(image: &'a Rgba32FImage) -> BuildResult<Self> {
        Self::rgba32f(image.width(), image.height(), image.as_raw())
    }

    pub fn from_rgba8_image(image: &'a RgbaImage, srgb: bool) -> BuildResult<Self> {
        Self::rgba8(image.width(), image.height(), image.as_raw(), srgb)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn texels(&self) -> Texels<'a> {
        self.texels
    }

    pub fn color(&self, x: u32, y: u32) -> Vec3 {
        self.texels.color(y as usize * self.width as usize + x as usize)
    }

    /// Raw bytes of the texel buffer, used for change detection.
    pub(crate) fn content_bytes(&self) -> &'a [u8] {
        match self.texels {
            Texels::Rgb32F(data) | Texels::Rgba32F(data) => bytemuck::cast_slice(data),
            Texels::Rgba16F(data) => bytemuck::cast_slice(data),
            Texels::Rgba8 { data, .. } => data,
        }
    }

    /// Hash of extent, layout and pixel content.
    pub fn content_hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.width.to_le_bytes());
        hasher.update(&self.height.to_le_bytes());
        let layout: u8 = match self.texels {
            Texels::Rgb32F(_) => 0,
            Texels::Rgba32F(_) => 1,
            Texels::Rgba16F(_) => 2,
            Texels::Rgba8 { srgb: false, .. } => 3,
            Texels::Rgba8 { srgb: true, .. } => 4,
        };
        hasher.update(&[layout]);
        hasher.update(self.content_bytes());
        hasher.finalize()
    }
}

/// Owned RGB float image, used for generated environments.
#[derive(Clone, Debug)]
pub struct HdrImage {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
}

impl HdrImage {
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Vec3) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&f(x, y).to_array());
            }
        }
        Self { width, height, pixels }
    }

    /// Sky-to-ground gradient with a small warm sun, the engine's fallback environment.
    pub fn neutral_gradient(width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1).max(1) as f32;
        let max_y = height.saturating_sub(1).max(1) as f32;
        Self::from_fn(width, height, |x, y| {
            let u = x as f32 / max_x;
            let v = y as f32 / max_y;
            let horizon = (1.0 - (2.0 * (v - 0.5)).abs()).clamp(0.0, 1.0);
            let sky = Vec3::new(0.25, 0.35, 0.6) * (1.0 - v) + Vec3::new(0.65, 0.7, 0.9) * v;
            let sun_dir = Vec2::new(u - 0.2, v - 0.35);
            let sun = ((1.0 - sun_dir.length() * 6.0).max(0.0)).powf(12.0);
            let ground = Vec3::new(0.08, 0.07, 0.05) * (1.0 - horizon) + Vec3::new(0.2, 0.18, 0.16) * horizon;
            let mut color = sky * (0.6 + 0.4 * horizon) + ground * (1.0 - horizon);
            color += Vec3::new(1.0, 0.9, 0.75) * sun * 8.0;
            color
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn view(&self) -> BuildResult<EnvironmentMap<'_>> {
        EnvironmentMap::rgb32f(self.width, self.height, &self.pixels)
    }
}

/// Polar angle at the centre of row `y`.
#[inline]
pub fn row_theta(y: u32, height: u32) -> f32 {
    PI * (y as f32 + 0.5) / height as f32
}

/// Solid angle subtended by a texel in row `y`, using the row-centre `sin(theta)`.
#[inline]
pub fn texel_solid_angle(y: u32, width: u32, height: u32) -> f32 {
    (TAU / width as f32) * (PI / height as f32) * row_theta(y, height).sin()
}

/// Maps a direction (y up) to equirectangular uv in `[0,1]^2`.
pub fn direction_to_uv(direction: Vec3) -> Vec2 {
    let d = direction.normalize_or_zero();
    let theta = d.y.clamp(-1.0, 1.0).acos();
    let phi = d.z.atan2(d.x);
    Vec2::new((phi + PI) / TAU, theta / PI)
}

pub fn uv_to_direction(uv: Vec2) -> Vec3 {
    let phi = uv.x * TAU - PI;
    let theta = uv.y * PI;
    let sin_theta = theta.sin();
    Vec3::new(sin_theta * phi.cos(), theta.cos(), sin_theta * phi.sin())
}

/// Texel containing `uv`, clamped to the extent.
pub fn uv_to_texel(uv: Vec2, width: u32, height: u32) -> (u32, u32) {
    let x = ((uv.x * width as f32).max(0.0) as u32).min(width - 1);
    let y = ((uv.y * height as f32).max(0.0) as u32).min(height - 1);
    (x, y)
}

fn srgb_to_linear_lut() -> &'static [f32; 256] {
    static LUT: OnceLock<[f32; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = [0.0f32; 256];
        for (i, value) in lut.iter_mut().enumerate() {
            let c = i as f32 / 255.0;
            *value = if c <= 0.04045 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) };
        }
        lut
    })
}
