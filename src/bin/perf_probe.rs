use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use image::{ImageBuffer, Rgba, RgbaImage};
use stratum::decode;
use stratum::processing::curve::CurvePoint;
use stratum::{BlendMode, EditorEngine, EngineConfig, FilterParameters, FrameScope, ToneLut};

const SYNTHETIC_SIZE: u32 = 1024;

fn median_ms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

fn time_ms(samples: &mut Vec<f64>, f: impl FnOnce()) {
    let t0 = Instant::now();
    f();
    samples.push(t0.elapsed().as_secs_f64() * 1000.0);
}

fn synthetic_image(size: u32) -> RgbaImage {
    ImageBuffer::from_fn(size, size, |x, y| {
        Rgba([
            (x * 255 / size) as u8,
            (y * 255 / size) as u8,
            ((x ^ y) & 0xff) as u8,
            255,
        ])
    })
}

fn build_filters() -> FilterParameters {
    FilterParameters::default()
        .with_brightness(115.0)
        .with_contrast(120.0)
        .with_saturation(130.0)
        .with_hue_rotate(12.0)
        .with_tone_curve(ToneLut::from_curve(
            CurvePoint::new(0.3, 0.6),
            CurvePoint::new(0.7, 0.25),
        ))
}

fn build_engine(path: Option<&PathBuf>) -> Result<EditorEngine> {
    let config = EngineConfig::default();
    let mut engine = match path {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("read failed for {}", path.display()))?;
            let named_animated = decode::is_animated_name(&path.to_string_lossy());
            if named_animated != decode::looks_animated(&bytes) {
                tracing::warn!(
                    path = %path.display(),
                    named_animated,
                    "file extension disagrees with its contents; decoding by contents"
                );
            }
            EditorEngine::from_bytes(config, &bytes)
                .with_context(|| format!("decode failed for {}", path.display()))?
        }
        None => EditorEngine::new(config, synthetic_image(SYNTHETIC_SIZE))?,
    };

    let (w, h) = engine.dimensions();
    let overlay = ImageBuffer::from_fn(w, h, |x, _| Rgba([255, 128, 0, (x % 256) as u8]));
    let id = engine.add_image_layer("overlay", overlay)?;
    engine.set_blend_mode(id, BlendMode::SoftLight)?;
    engine.set_layer_opacity(id, 70.0)?;
    engine.add_adjustment_layer("grade", build_filters())?;
    let hue = engine.add_adjustment_layer(
        "hue",
        FilterParameters::default().with_grayscale(40.0).with_sepia(20.0),
    )?;
    engine.set_blend_mode(hue, BlendMode::Color)?;
    Ok(engine)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args();
    let _bin = args.next();
    let path = args.next().map(PathBuf::from);
    let rounds = args
        .next()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(10);

    let mut engine = build_engine(path.as_ref())?;
    let (w, h) = engine.dimensions();
    match &path {
        Some(p) => eprintln!("Using {} ({w}x{h}, {} frames)", p.display(), engine.frame_count()),
        None => eprintln!("Using synthetic {w}x{h} image"),
    }

    let mut composite_samples = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        time_ms(&mut composite_samples, || {
            let _ = engine.composite();
        });
    }

    let filters = build_filters().with_blur(2.0);
    let mut filter_samples = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        let base = engine.composite();
        time_ms(&mut filter_samples, || {
            let _ = stratum::processing::apply_filters(&base, &filters);
        });
    }

    engine.set_active_layer(Some(stratum::LayerId(1)))?;
    let bake_start = Instant::now();
    engine.apply_filters(&filters, FrameScope::All)?;
    let bake_ms = bake_start.elapsed().as_secs_f64() * 1000.0;

    println!("METRIC size={w}x{h}");
    println!("METRIC frames={}", engine.frame_count());
    println!("METRIC layers={}", engine.layers().len());
    println!(
        "METRIC composite_ms_median={:.2}",
        median_ms(&composite_samples)
    );
    println!("METRIC filter_ms_median={:.2}", median_ms(&filter_samples));
    println!("METRIC bake_all_frames_ms={:.2}", bake_ms);

    Ok(())
}
