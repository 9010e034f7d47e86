use crate::config::BuildOptions;
use crate::environment::{EnvironmentMap, HdrImage};
use crate::error::{BuildError, RegistryError};
use crate::sampler::EnvironmentSampler;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

const DEFAULT_KEY: &str = "environment::default";
const DEFAULT_WIDTH: u32 = 256;
const DEFAULT_HEIGHT: u32 = 128;

/// Published sampler for one environment.
///
/// Readers take an [`Arc`] snapshot and sample from it without further locking. Replacing the
/// sampler swaps the pointer; the previous sampler is freed once the last snapshot is dropped.
pub struct PublishedSampler {
    current: RwLock<Arc<EnvironmentSampler>>,
    content_hash: RwLock<blake3::Hash>,
    generation: AtomicU64,
}

impl PublishedSampler {
    fn new(sampler: EnvironmentSampler, content_hash: blake3::Hash) -> Self {
        Self {
            current: RwLock::new(Arc::new(sampler)),
            content_hash: RwLock::new(content_hash),
            generation: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Arc<EnvironmentSampler> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of times the sampler has been replaced.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn content_hash(&self) -> blake3::Hash {
        *self.content_hash.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, sampler: EnvironmentSampler, content_hash: blake3::Hash) -> Arc<EnvironmentSampler> {
        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, Arc::new(sampler))
        };
        *self.content_hash.write().unwrap_or_else(PoisonError::into_inner) = content_hash;
        self.generation.fetch_add(1, Ordering::AcqRel);
        previous
    }
}

#[derive(Clone, Debug)]
pub struct EnvironmentDefinition {
    key: String,
    label: String,
}

impl EnvironmentDefinition {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

struct EnvironmentEntry {
    definition: EnvironmentDefinition,
    published: Arc<PublishedSampler>,
    ref_count: usize,
    permanent: bool,
}

/// Keeps one importance sampler per loaded environment.
pub struct EnvironmentRegistry {
    environments: HashMap<String, EnvironmentEntry>,
    default_key: String,
    options: BuildOptions,
    revision: u64,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::with_options(BuildOptions::default())
    }

    /// Creates a registry holding the generated neutral-gradient environment.
    pub fn with_options(options: BuildOptions) -> Self {
        let mut registry = Self {
            environments: HashMap::new(),
            default_key: DEFAULT_KEY.to_string(),
            options,
            revision: 0,
        };
        let image = HdrImage::neutral_gradient(DEFAULT_WIDTH, DEFAULT_HEIGHT);
        match image.view().and_then(|map| registry.build(&map).map(|sampler| (sampler, map.content_hash()))) {
            Ok((sampler, hash)) => {
                registry.environments.insert(
                    DEFAULT_KEY.to_string(),
                    EnvironmentEntry {
                        definition: EnvironmentDefinition {
                            key: DEFAULT_KEY.to_string(),
                            label: "Neutral Gradient".to_string(),
                        },
                        published: Arc::new(PublishedSampler::new(sampler, hash)),
                        ref_count: 1,
                        permanent: true,
                    },
                );
                registry.bump_revision();
            }
            Err(err) => log::error!("[environment] failed to build default environment: {err}"),
        }
        registry
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.environments.keys()
    }

    pub fn definition(&self, key: &str) -> Option<&EnvironmentDefinition> {
        self.environments.get(key).map(|entry| &entry.definition)
    }

    /// Builds and publishes a new environment with a reference count of one.
    pub fn register(
        &mut self,
        key: &str,
        label: &str,
        map: &EnvironmentMap<'_>,
    ) -> Result<Arc<PublishedSampler>, RegistryError> {
        if self.environments.contains_key(key) {
            return Err(RegistryError::DuplicateEnvironment(key.to_string()));
        }
        let sampler = self.build(map).map_err(|source| RegistryError::Build { key: key.to_string(), source })?;
        let published = Arc::new(PublishedSampler::new(sampler, map.content_hash()));
        self.environments.insert(
            key.to_string(),
            EnvironmentEntry {
                definition: EnvironmentDefinition { key: key.to_string(), label: label.to_string() },
                published: published.clone(),
                ref_count: 1,
                permanent: false,
            },
        );
        self.bump_revision();
        log::info!("[environment] registered '{key}' ({}x{})", map.width(), map.height());
        Ok(published)
    }

    /// Rebuilds the sampler of `key` from new pixel data and swaps it in.
    ///
    /// Nothing is published if the build fails. Returns `false` when the content matches the
    /// currently published map and no rebuild was needed.
    pub fn replace(&mut self, key: &str, map: &EnvironmentMap<'_>) -> Result<bool, RegistryError> {
        let published = self
            .environments
            .get(key)
            .map(|entry| entry.published.clone())
            .ok_or_else(|| RegistryError::UnknownEnvironment(key.to_string()))?;
        let content_hash = map.content_hash();
        if published.content_hash() == content_hash {
            log::debug!("[environment] '{key}' unchanged; keeping published sampler");
            return Ok(false);
        }
        let sampler = self.build(map).map_err(|source| RegistryError::Build { key: key.to_string(), source })?;
        let previous = published.publish(sampler, content_hash);
        log::info!(
            "[environment] replaced '{key}' (generation {}, {} reader(s) still hold the previous sampler)",
            published.generation(),
            Arc::strong_count(&previous) - 1
        );
        self.bump_revision();
        Ok(true)
    }

    /// Adds one reference. The permanent default is not counted.
    pub fn retain(&mut self, key: &str) -> Result<(), RegistryError> {
        let entry =
            self.environments.get_mut(key).ok_or_else(|| RegistryError::UnknownEnvironment(key.to_string()))?;
        if !entry.permanent {
            entry.ref_count = entry.ref_count.saturating_add(1);
        }
        Ok(())
    }

    /// Drops one reference. Non-permanent environments leave the registry at zero; samplers
    /// already handed out stay alive until their last holder drops them.
    pub fn release(&mut self, key: &str) -> bool {
        let Some(entry) = self.environments.get_mut(key) else {
            return false;
        };
        if entry.permanent {
            return true;
        }
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 {
            self.environments.remove(key);
            self.bump_revision();
            log::debug!("[environment] released '{key}'");
        }
        true
    }

    pub fn ref_count(&self, key: &str) -> Option<usize> {
        self.environments.get(key).map(|entry| entry.ref_count)
    }

    pub fn handle(&self, key: &str) -> Option<Arc<PublishedSampler>> {
        self.environments.get(key).map(|entry| entry.published.clone())
    }

    /// Snapshot of the sampler currently published for `key`.
    pub fn sampler(&self, key: &str) -> Option<Arc<EnvironmentSampler>> {
        self.environments.get(key).map(|entry| entry.published.current())
    }

    pub fn version(&self) -> u64 {
        self.revision
    }

    fn bump_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn build(&self, map: &EnvironmentMap<'_>) -> Result<EnvironmentSampler, BuildError> {
        EnvironmentSampler::build(map, &self.options)
    }
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry key for a display name, e.g. `"Bright Sky 01"` -> `environment::bright_sky_01`.
pub fn environment_key(name: &str) -> Option<String> {
    let sanitized: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '_' })
        .collect();
    if sanitized.is_empty() {
        None
    } else {
        Some(format!("environment::{sanitized}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_rgb(width: u32, height: u32, value: f32) -> Vec<f32> {
        vec![value; (width * height * 3) as usize]
    }

    #[test]
    fn environment_key_sanitizes_names() {
        assert_eq!(environment_key("Bright Sky 01").as_deref(), Some("environment::bright_sky_01"));
        assert_eq!(environment_key(""), None);
    }

    #[test]
    fn default_environment_is_permanent() {
        let mut registry = EnvironmentRegistry::with_options(BuildOptions::serial());
        let key = registry.default_key().to_string();
        let sampler = registry.sampler(&key).expect("default sampler");
        assert_eq!((sampler.width(), sampler.height()), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert!(sampler.luminance_integral() > 0.0);
        assert!(registry.release(&key));
        assert!(registry.release(&key));
        assert!(registry.sampler(&key).is_some(), "default environment survives releases");
    }

    #[test]
    fn default_environment_ref_count_is_fixed() {
        let mut registry = EnvironmentRegistry::with_options(BuildOptions::serial());
        let key = registry.default_key().to_string();
        let initial = registry.ref_count(&key);
        assert_eq!(initial, Some(1));
        for _ in 0..3 {
            registry.retain(&key).expect("retain default");
        }
        assert_eq!(registry.ref_count(&key), initial);
        assert!(registry.release(&key));
        assert_eq!(registry.ref_count(&key), initial);
    }

    #[test]
    fn release_drops_entry_at_zero() {
        let mut registry = EnvironmentRegistry::with_options(BuildOptions::serial());
        let data = flat_rgb(4, 2, 1.0);
        let map = EnvironmentMap::rgb32f(4, 2, &data).unwrap();
        registry.register("environment::temp", "Temp", &map).expect("register");
        registry.retain("environment::temp").expect("retain");
        assert_eq!(registry.ref_count("environment::temp"), Some(2));

        let held = registry.sampler("environment::temp").expect("snapshot");
        assert!(registry.release("environment::temp"));
        assert_eq!(registry.ref_count("environment::temp"), Some(1));
        assert!(registry.release("environment::temp"));
        assert_eq!(registry.ref_count("environment::temp"), None);
        assert!(!registry.release("environment::temp"));
        assert_eq!(held.width(), 4, "snapshot outlives registry entry");
    }

    #[test]
    fn duplicate_and_unknown_keys_are_errors() {
        let mut registry = EnvironmentRegistry::with_options(BuildOptions::serial());
        let data = flat_rgb(2, 2, 1.0);
        let map = EnvironmentMap::rgb32f(2, 2, &data).unwrap();
        registry.register("environment::a", "A", &map).expect("register");
        assert!(matches!(
            registry.register("environment::a", "A", &map),
            Err(RegistryError::DuplicateEnvironment(_))
        ));
        assert!(matches!(registry.replace("environment::b", &map), Err(RegistryError::UnknownEnvironment(_))));
        assert!(matches!(registry.retain("environment::b"), Err(RegistryError::UnknownEnvironment(_))));
    }

    #[test]
    fn replace_skips_identical_content() {
        let mut registry = EnvironmentRegistry::with_options(BuildOptions::serial());
        let data = flat_rgb(4, 2, 1.0);
        let map = EnvironmentMap::rgb32f(4, 2, &data).unwrap();
        let handle = registry.register("environment::sky", "Sky", &map).expect("register");
        let version = registry.version();
        assert!(!registry.replace("environment::sky", &map).expect("replace"));
        assert_eq!(handle.generation(), 0);
        assert_eq!(registry.version(), version);
    }
}
