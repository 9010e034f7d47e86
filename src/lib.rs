pub mod alias_table;
pub mod config;
pub mod environment;
pub mod error;
pub mod importance;
pub mod registry;
pub mod sampler;

pub use alias_table::{AliasEntry, AliasTable};
pub use config::{BuildOptions, IblConfig};
pub use environment::{EnvironmentMap, HdrImage, Texels};
pub use error::{BuildError, BuildResult, RegistryError};
pub use registry::{EnvironmentRegistry, PublishedSampler};
pub use sampler::{BuildStats, EnvironmentSample, EnvironmentSampler, TexelSample};

/// Builds the alias table and luminance integral for an environment map with default options.
pub fn build_sampler(map: &EnvironmentMap<'_>) -> BuildResult<EnvironmentSampler> {
    EnvironmentSampler::build(map, &BuildOptions::default())
}
