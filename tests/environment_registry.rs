use kestrel_ibl::{BuildOptions, EnvironmentMap, EnvironmentRegistry, RegistryError};
use std::sync::Arc;
use std::thread;

fn hot_texel_map(width: u32, height: u32, hot: usize) -> Vec<f32> {
    let mut data = vec![0.0f32; (width * height * 3) as usize];
    data[hot * 3..hot * 3 + 3].copy_from_slice(&[5.0, 5.0, 5.0]);
    data
}

#[test]
fn replacement_swaps_sampler_while_readers_sample() {
    let mut registry = EnvironmentRegistry::with_options(BuildOptions::serial());
    let first = hot_texel_map(8, 4, 10);
    let map = EnvironmentMap::rgb32f(8, 4, &first).unwrap();
    let handle = registry.register("environment::studio", "Studio", &map).expect("register");

    let original = handle.current();
    let original_weak = Arc::downgrade(&original);
    assert_eq!(original.sample(0.3, 0.7).index, 10);

    let second = hot_texel_map(8, 4, 21);
    let replacement = EnvironmentMap::rgb32f(8, 4, &second).unwrap();
    thread::scope(|scope| {
        for worker in 0..4u32 {
            let handle = handle.clone();
            scope.spawn(move || {
                for step in 0..2_000u32 {
                    let snapshot = handle.current();
                    let u1 = ((step * 31 + worker) % 997) as f64 / 997.0;
                    let sample = snapshot.sample(u1, 0.5);
                    assert!(sample.index == 10 || sample.index == 21, "unexpected texel {}", sample.index);
                    assert!(sample.pdf > 0.0);
                }
            });
        }
        assert!(registry.replace("environment::studio", &replacement).expect("replace"));
    });

    assert_eq!(handle.generation(), 1);
    assert_eq!(registry.sampler("environment::studio").unwrap().sample(0.3, 0.7).index, 21);
    assert!(original_weak.upgrade().is_some(), "snapshot still held by this test");
    drop(original);
    assert!(original_weak.upgrade().is_none(), "previous sampler released after its last reader");
}

#[test]
fn unknown_key_leaves_published_samplers_untouched() {
    let mut registry = EnvironmentRegistry::with_options(BuildOptions::serial());
    let data = hot_texel_map(4, 2, 3);
    let map = EnvironmentMap::rgb32f(4, 2, &data).unwrap();
    let handle = registry.register("environment::probe", "Probe", &map).expect("register");
    let before = handle.current();

    let err = registry.replace("environment::missing", &map).expect_err("unknown key");
    assert!(matches!(err, RegistryError::UnknownEnvironment(ref key) if key == "environment::missing"));
    assert!(Arc::ptr_eq(&before, &handle.current()));
    assert_eq!(handle.generation(), 0);
}

#[test]
fn version_tracks_registry_changes() {
    let mut registry = EnvironmentRegistry::with_options(BuildOptions::serial());
    let initial = registry.version();
    let data = hot_texel_map(4, 2, 0);
    let map = EnvironmentMap::rgb32f(4, 2, &data).unwrap();
    registry.register("environment::a", "A", &map).unwrap();
    assert_eq!(registry.version(), initial + 1);

    let brighter = hot_texel_map(4, 2, 5);
    let map = EnvironmentMap::rgb32f(4, 2, &brighter).unwrap();
    registry.replace("environment::a", &map).unwrap();
    assert_eq!(registry.version(), initial + 2);

    assert!(registry.release("environment::a"));
    assert_eq!(registry.version(), initial + 3);
    assert!(registry.definition("environment::a").is_none());
    assert_eq!(registry.keys().count(), 1, "only the default environment remains");
}
