use crate::alias_table::{AliasEntry, AliasTable};
use crate::config::BuildOptions;
use crate::environment::{direction_to_uv, texel_solid_angle, uv_to_direction, uv_to_texel, EnvironmentMap};
use crate::error::BuildResult;
use crate::importance::extract_weights;
use glam::{Vec2, Vec3};
use rand::Rng;
use serde::Serialize;
use std::f32::consts::PI;
use std::time::Instant;

/// Floor for `sin(theta)` when converting uv densities to solid angle near the poles.
const MIN_SIN_THETA: f32 = 1e-7;

/// A texel chosen by [`EnvironmentSampler::sample`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TexelSample {
    pub index: usize,
    pub x: u32,
    pub y: u32,
    /// Density with respect to solid angle, treating the texel as a constant patch.
    pub pdf: f32,
}

/// A direction chosen by [`EnvironmentSampler::sample_direction`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvironmentSample {
    pub direction: Vec3,
    pub uv: Vec2,
    pub texel: usize,
    /// Density with respect to solid angle at `direction`.
    pub pdf: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct BuildStats {
    pub width: u32,
    pub height: u32,
    pub texels: usize,
    pub luminance_integral: f64,
    pub clamped_texels: usize,
    pub parallel: bool,
    pub build_ms: f64,
}

/// Importance sampler over an equirectangular environment map.
///
/// Immutable after [`EnvironmentSampler::build`]; every query takes `&self` and can run from any
/// number of threads at once.
#[derive(Clone, Debug)]
pub struct EnvironmentSampler {
    width: u32,
    height: u32,
    table: AliasTable,
    /// Normalised probability mass per texel (`w_i / S`, or `1 / n` for a black map).
    texel_pmf: Vec<f32>,
    luminance_integral: f64,
    stats: BuildStats,
}

impl EnvironmentSampler {
    pub fn build(map: &EnvironmentMap<'_>, options: &BuildOptions) -> BuildResult<Self> {
        let start = Instant::now();
        let texels = map.texel_count();
        let parallel = options.use_parallel(texels);

        let field = extract_weights(map, options)?;
        let table = AliasTable::build(&field.weights, field.sum, options.effective_epsilon())?;
        let luminance_integral = table.total_weight();

        // The weight array is consumed here; only the normalised masses outlive the build.
        let mut texel_pmf = field.weights;
        if field.sum > 0.0 {
            let inv_sum = 1.0 / field.sum;
            for mass in &mut texel_pmf {
                *mass = (*mass as f64 * inv_sum) as f32;
            }
        } else {
            texel_pmf.fill(1.0 / texels as f32);
        }

        let stats = BuildStats {
            width: map.width(),
            height: map.height(),
            texels,
            luminance_integral,
            clamped_texels: field.clamped_texels,
            parallel,
            build_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        log::debug!(
            "[ibl] built {}x{} sampler: integral {:.6}, {} clamped texel(s), {:.3} ms{}",
            stats.width,
            stats.height,
            stats.luminance_integral,
            stats.clamped_texels,
            stats.build_ms,
            if parallel { " (parallel)" } else { "" }
        );
        if luminance_integral == 0.0 {
            log::debug!("[ibl] environment carries no luminance; sampling falls back to uniform texels");
        }

        Ok(Self { width: map.width(), height: map.height(), table, texel_pmf, luminance_integral, stats })
    }

    /// Draws a texel proportionally to its weight.
    pub fn sample(&self, u1: f64, u2: f64) -> TexelSample {
        let index = self.table.sample(u1, u2);
        let (x, y) = self.texel_coords(index);
        TexelSample { index, x, y, pdf: self.texel_pdf(index) }
    }

    /// Draws a direction, jittered uniformly in uv inside the chosen texel.
    pub fn sample_direction(&self, u1: f64, u2: f64) -> EnvironmentSample {
        let (texel, jitter_x, jitter_y) = self.table.sample_with_remainder(u1, u2);
        let (x, y) = self.texel_coords(texel);
        let uv = Vec2::new(
            ((x as f64 + jitter_x) / self.width as f64) as f32,
            ((y as f64 + jitter_y) / self.height as f64) as f32,
        );
        let direction = uv_to_direction(uv);
        EnvironmentSample { direction, uv, texel, pdf: self.uv_density(texel, uv.y) }
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> EnvironmentSample {
        let u1: f64 = rng.gen();
        let u2: f64 = rng.gen();
        self.sample_direction(u1, u2)
    }

    /// Density [`EnvironmentSampler::sample_direction`] assigns to `direction`.
    pub fn pdf(&self, direction: Vec3) -> f32 {
        let uv = direction_to_uv(direction);
        let (x, y) = uv_to_texel(uv, self.width, self.height);
        self.uv_density(self.texel_index(x, y), uv.y)
    }

    /// Solid-angle density of choosing texel `index` with [`EnvironmentSampler::sample`].
    /// Indices past the last texel have density `0.0`.
    pub fn texel_pdf(&self, index: usize) -> f32 {
        let Some(&mass) = self.texel_pmf.get(index) else {
            return 0.0;
        };
        let (_, y) = self.texel_coords(index);
        let solid_angle = texel_solid_angle(y, self.width, self.height);
        if solid_angle > 0.0 {
            mass / solid_angle
        } else {
            0.0
        }
    }

    /// Discrete probability of drawing texel `index`; `0.0` past the last texel.
    pub fn texel_probability(&self, index: usize) -> f32 {
        self.texel_pmf.get(index).copied().unwrap_or(0.0)
    }

    /// Sum of all texel weights before normalisation. Zero means the map holds no usable light.
    pub fn luminance_integral(&self) -> f64 {
        self.luminance_integral
    }

    pub fn is_degenerate(&self) -> bool {
        self.luminance_integral == 0.0
    }

    pub fn entries(&self) -> &[AliasEntry] {
        self.table.entries()
    }

    pub fn table(&self) -> &AliasTable {
        &self.table
    }

    /// Alias entries as bytes for a verbatim storage-buffer upload.
    pub fn as_bytes(&self) -> &[u8] {
        self.table.as_bytes()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.texel_pmf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texel_pmf.is_empty()
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    fn texel_coords(&self, index: usize) -> (u32, u32) {
        let width = self.width as usize;
        ((index % width) as u32, (index / width) as u32)
    }

    fn texel_index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Uniform-in-uv density of a texel mapped to solid angle at polar coordinate `v`.
    fn uv_density(&self, index: usize, v: f32) -> f32 {
        let mass = self.texel_pmf[index];
        if mass <= 0.0 {
            return 0.0;
        }
        let sin_theta = (PI * v).sin().max(MIN_SIN_THETA);
        mass * self.len() as f32 / (2.0 * PI * PI * sin_theta)
    }
}
