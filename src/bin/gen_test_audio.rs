use std::f32::consts::PI;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

struct Args {
    out: PathBuf,
    sample_rate: u32,
    seconds: f32,
}

fn parse_args() -> Args {
    let mut out = PathBuf::from("assets/test/kick_hats_120bpm.wav");
    let mut sample_rate = 44_100u32;
    let mut seconds = 20.0f32;

    let mut it = std::env::args().skip(1);
    while let Some(k) = it.next() {
        let v = it.next();
        match (k.as_str(), v) {
            ("--out", Some(p)) => out = PathBuf::from(p),
            ("--sample-rate", Some(v)) => {
                if let Ok(sr) = v.parse::<u32>() {
                    sample_rate = sr.clamp(8_000, 192_000);
                }
            }
            ("--seconds", Some(v)) => {
                if let Ok(s) = v.parse::<f32>() {
                    seconds = s.clamp(1.0, 600.0);
                }
            }
            _ => {}
        }
    }
    Args {
        out,
        sample_rate,
        seconds,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args();
    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }

    let samples = make_fixture(args.sample_rate, args.seconds);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: args.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.out, spec)
        .with_context(|| format!("create {}", args.out.display()))?;
    for s in &samples {
        writer.write_sample(to_i16(*s))?;
    }
    writer.finalize().context("finalize wav")?;

    tracing::info!(
        path = %args.out.display(),
        sample_rate = args.sample_rate,
        samples = samples.len(),
        "generated test audio"
    );
    Ok(())
}

/// Kick on every beat, hats on off-beats, and a slow pad so the mid bands move.
fn make_fixture(sr: u32, seconds: f32) -> Vec<f32> {
    let n = (seconds * sr as f32).round() as usize;
    let beat = 60.0 / 120.0;
    (0..n)
        .map(|i| {
            let t = i as f32 / sr as f32;
            let phase = t % beat;
            let off_phase = (t + beat * 0.5) % beat;

            // Pitch drops from 120 Hz to 45 Hz over the hit.
            let kick_env = (-phase * 18.0).exp();
            let kick_freq = 45.0 + 75.0 * (-phase * 30.0).exp();
            let kick = (2.0 * PI * kick_freq * phase).sin() * kick_env * 0.9;

            let hat_env = (-off_phase * 90.0).exp();
            let hat = pseudo_noise(i as u32) * hat_env * 0.3;

            let pad = (2.0 * PI * 220.0 * t).sin() * 0.08 + (2.0 * PI * 330.0 * t).sin() * 0.05;
            kick + hat + pad
        })
        .collect()
}

fn pseudo_noise(x: u32) -> f32 {
    let mut n = x.wrapping_mul(374_761_393);
    n ^= n >> 13;
    n = n.wrapping_mul(1_274_126_177);
    n ^= n >> 16;
    let v = (n & 0x00FF_FFFF) as f32 / 16_777_215.0;
    v * 2.0 - 1.0
}

fn to_i16(x: f32) -> i16 {
    (x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
