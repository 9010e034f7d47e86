use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Options for building an environment sampling table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Remaining shares within this distance of 1.0 are treated as exactly 1.0 while pairing.
    #[serde(default = "BuildOptions::default_epsilon")]
    pub epsilon: f64,
    /// Maps with at least this many texels extract weights on the rayon pool.
    #[serde(default = "BuildOptions::default_parallel_min_texels")]
    pub parallel_min_texels: usize,
}

impl BuildOptions {
    pub const DEFAULT_EPSILON: f64 = 1e-6;

    const fn default_epsilon() -> f64 {
        Self::DEFAULT_EPSILON
    }

    const fn default_parallel_min_texels() -> usize {
        16_384
    }

    /// Runs every build on the calling thread.
    pub fn serial() -> Self {
        Self { parallel_min_texels: usize::MAX, ..Self::default() }
    }

    /// Epsilon clamped to a usable range; out-of-range values fall back to the default.
    pub fn effective_epsilon(&self) -> f64 {
        if self.epsilon.is_finite() && (0.0..0.5).contains(&self.epsilon) {
            self.epsilon
        } else {
            log::warn!(
                "[ibl] alias epsilon {} out of range [0, 0.5); using {}",
                self.epsilon,
                Self::DEFAULT_EPSILON
            );
            Self::DEFAULT_EPSILON
        }
    }

    pub fn use_parallel(&self, texels: usize) -> bool {
        cfg!(feature = "parallel") && texels >= self.parallel_min_texels
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { epsilon: Self::default_epsilon(), parallel_min_texels: Self::default_parallel_min_texels() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default = "BenchConfig::default_sample_count")]
    pub sample_count: usize,
    #[serde(default = "BenchConfig::default_seed")]
    pub seed: u64,
    #[serde(default = "BenchConfig::default_extents")]
    pub extents: Vec<[u32; 2]>,
}

impl BenchConfig {
    const fn default_sample_count() -> usize {
        1_000_000
    }

    const fn default_seed() -> u64 {
        0x6b65_7374
    }

    fn default_extents() -> Vec<[u32; 2]> {
        vec![[64, 32], [2048, 1024]]
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            sample_count: Self::default_sample_count(),
            seed: Self::default_seed(),
            extents: Self::default_extents(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IblConfig {
    #[serde(default)]
    pub build: BuildOptions,
    #[serde(default)]
    pub bench: BenchConfig,
}

impl IblConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[ibl] config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "build": {{ "epsilon": 1e-4 }}, "bench": {{ "extents": [[8, 4]] }} }}"#)
            .expect("write config");
        let cfg = IblConfig::load(file.path()).expect("load config");
        assert_eq!(cfg.build.epsilon, 1e-4);
        assert_eq!(cfg.build.parallel_min_texels, 16_384);
        assert_eq!(cfg.bench.extents, vec![[8, 4]]);
        assert_eq!(cfg.bench.sample_count, 1_000_000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cfg = IblConfig::load_or_default(dir.path().join("absent.json"));
        assert_eq!(cfg, IblConfig::default());
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(file, "{{ not json").expect("write config");
        let err = IblConfig::load(file.path()).expect_err("parse must fail");
        assert!(format!("{err:#}").contains("Failed to parse config file"), "unexpected error: {err:#}");
    }

    #[test]
    fn out_of_range_epsilon_uses_default() {
        let options = BuildOptions { epsilon: f64::NAN, ..BuildOptions::default() };
        assert_eq!(options.effective_epsilon(), BuildOptions::DEFAULT_EPSILON);
        let options = BuildOptions { epsilon: 0.75, ..BuildOptions::default() };
        assert_eq!(options.effective_epsilon(), BuildOptions::DEFAULT_EPSILON);
        let options = BuildOptions { epsilon: 1e-3, ..BuildOptions::default() };
        assert_eq!(options.effective_epsilon(), 1e-3);
    }

    #[test]
    fn serial_options_never_go_parallel() {
        assert!(!BuildOptions::serial().use_parallel(usize::MAX - 1));
    }
}
