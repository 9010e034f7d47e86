use anyhow::{anyhow, bail, Context, Result};
use kestrel_ibl::config::IblConfig;
use kestrel_ibl::{EnvironmentSampler, HdrImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::env;
use std::fs;
use std::hint::black_box;
use std::path::PathBuf;
use std::time::Instant;

struct Args {
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    samples: Option<usize>,
    seed: Option<u64>,
    extents: Vec<[u32; 2]>,
    serial: bool,
}

#[derive(Debug, Serialize)]
struct CaseReport {
    width: u32,
    height: u32,
    texels: usize,
    build_ms: f64,
    build_ns_per_texel: f64,
    samples: usize,
    sample_ns: f64,
    luminance_integral: f64,
    parallel: bool,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    seed: u64,
    cases: Vec<CaseReport>,
}

fn usage() {
    eprintln!(
        "\
Usage: ibl_bench [--config <path>] [--output <path>] [--samples <n>] [--seed <n>] \\
       [--extent <width>x<height>]... [--serial]

Defaults:
  --samples 1000000
  --extent 64x32 --extent 2048x1024
"
    );
}

fn parse_extent(value: &str) -> Result<[u32; 2]> {
    let (width, height) =
        value.split_once(['x', 'X']).ok_or_else(|| anyhow!("extent '{value}' must look like 2048x1024"))?;
    let width: u32 = width.parse().with_context(|| format!("invalid extent width in '{value}'"))?;
    let height: u32 = height.parse().with_context(|| format!("invalid extent height in '{value}'"))?;
    if width == 0 || height == 0 {
        bail!("extent '{value}' must be non-empty");
    }
    Ok([width, height])
}

fn parse_args() -> Result<Args> {
    let mut parsed =
        Args { config: None, output: None, samples: None, seed: None, extents: Vec::new(), serial: false };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().context("--config requires a path")?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--output" => {
                let value = args.next().context("--output requires a path")?;
                parsed.output = Some(PathBuf::from(value));
            }
            "--samples" => {
                let value = args.next().context("--samples requires a value")?;
                parsed.samples = Some(value.parse().context("invalid --samples")?);
            }
            "--seed" => {
                let value = args.next().context("--seed requires a value")?;
                parsed.seed = Some(value.parse().context("invalid --seed")?);
            }
            "--extent" => {
                let value = args.next().context("--extent requires <width>x<height>")?;
                parsed.extents.push(parse_extent(&value)?);
            }
            "--serial" => {
                parsed.serial = true;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => {
                return Err(anyhow!("unknown argument '{other}'"));
            }
        }
    }
    Ok(parsed)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run_bench() {
        eprintln!("[ibl_bench] {err:?}");
        std::process::exit(1);
    }
}

fn run_bench() -> Result<()> {
    let args = parse_args()?;
    let mut config = match &args.config {
        Some(path) => IblConfig::load(path)?,
        None => IblConfig::default(),
    };
    if let Some(samples) = args.samples {
        config.bench.sample_count = samples;
    }
    if let Some(seed) = args.seed {
        config.bench.seed = seed;
    }
    if !args.extents.is_empty() {
        config.bench.extents = args.extents.clone();
    }
    if args.serial {
        config.build.parallel_min_texels = usize::MAX;
    }

    let mut rng = StdRng::seed_from_u64(config.bench.seed);
    let mut cases = Vec::with_capacity(config.bench.extents.len());
    for &[width, height] in &config.bench.extents {
        let image = HdrImage::neutral_gradient(width, height);
        let map = image.view()?;

        let start = Instant::now();
        let sampler = EnvironmentSampler::build(&map, &config.build)
            .with_context(|| format!("building {width}x{height} sampler"))?;
        let build_ms = start.elapsed().as_secs_f64() * 1000.0;

        let sample_count = config.bench.sample_count.max(1);
        let start = Instant::now();
        let mut pdf_sum = 0.0f64;
        for _ in 0..sample_count {
            let sample = sampler.sample_direction(rng.gen(), rng.gen());
            pdf_sum += sample.pdf as f64;
        }
        black_box(pdf_sum);
        let sample_ns = start.elapsed().as_secs_f64() * 1e9 / sample_count as f64;

        let texels = sampler.len();
        let case = CaseReport {
            width,
            height,
            texels,
            build_ms,
            build_ns_per_texel: build_ms * 1e6 / texels as f64,
            samples: sample_count,
            sample_ns,
            luminance_integral: sampler.luminance_integral(),
            parallel: sampler.stats().parallel,
        };
        log::info!(
            "[ibl_bench] {width}x{height}: build {:.3} ms ({:.2} ns/texel), sample {:.1} ns",
            case.build_ms,
            case.build_ns_per_texel,
            case.sample_ns
        );
        cases.push(case);
    }

    if let (Some(first), Some(last)) = (cases.first(), cases.last()) {
        if cases.len() > 1 {
            println!(
                "[ibl_bench] {}x more texels: build cost per texel x{:.2}, sample cost x{:.2}",
                last.texels / first.texels.max(1),
                last.build_ns_per_texel / first.build_ns_per_texel.max(f64::EPSILON),
                last.sample_ns / first.sample_ns.max(f64::EPSILON)
            );
        }
    }

    if let Some(path) = &args.output {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let report = BenchReport { seed: config.bench.seed, cases };
        let json = serde_json::to_string_pretty(&report).context("serializing bench report")?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("[ibl_bench] report written to {}", path.display());
    }
    Ok(())
}
