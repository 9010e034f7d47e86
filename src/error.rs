use std::collections::TryReserveError;

/// Errors raised while building an environment sampling table.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("environment extent {width}x{height} is empty")]
    EmptyExtent { width: u32, height: u32 },

    #[error("texel buffer holds {actual} components, expected {expected} for the given extent")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("environment extent {width}x{height} overflows addressable memory")]
    ExtentOverflow { width: u32, height: u32 },

    #[error("alias table needs at least one weight")]
    NoWeights,

    #[error("{texels} texels cannot be addressed by 32-bit alias indices")]
    TableTooLarge { texels: usize },

    #[error("failed to allocate {what} for {texels} texels: {source}")]
    Allocation {
        what: &'static str,
        texels: usize,
        #[source]
        source: TryReserveError,
    },
}

/// Errors raised by [`crate::registry::EnvironmentRegistry`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("environment '{0}' is not registered")]
    UnknownEnvironment(String),

    #[error("environment '{0}' is already registered")]
    DuplicateEnvironment(String),

    #[error("failed to build sampler for environment '{key}': {source}")]
    Build {
        key: String,
        #[source]
        source: BuildError,
    },
}

pub type BuildResult<T> = Result<T, BuildError>;

/// Allocates `len` copies of `value`, surfacing allocation failure instead of aborting.
pub(crate) fn try_alloc<T: Clone>(
    what: &'static str,
    texels: usize,
    len: usize,
    value: T,
) -> BuildResult<Vec<T>> {
    let mut buffer = try_with_capacity(what, texels, len)?;
    buffer.resize(len, value);
    Ok(buffer)
}

pub(crate) fn try_with_capacity<T>(what: &'static str, texels: usize, capacity: usize) -> BuildResult<Vec<T>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(capacity).map_err(|source| BuildError::Allocation { what, texels, source })?;
    Ok(buffer)
}
