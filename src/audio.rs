use crate::config::AudioSource;
use crate::error::AudioError;
use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use std::f32::consts::PI;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub const FFT_SIZE: usize = 2048;
pub const MAGNITUDE_BINS: usize = FFT_SIZE / 2;
const HOP: usize = 512;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;
const STALE_AFTER_MS: u64 = 500;

/// Anything that can hand the analyzer its most recent magnitude frame.
pub trait MagnitudeSource {
    fn label(&self) -> &str;
    fn sample_rate(&self) -> u32;
    /// Copies the latest frame into `out`. Returns false when there is no live audio.
    fn pull_latest(&self, out: &mut Vec<u8>) -> bool;
}

pub struct SilentSource;

impl MagnitudeSource for SilentSource {
    fn label(&self) -> &str {
        "silent"
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn pull_latest(&self, out: &mut Vec<u8>) -> bool {
        out.clear();
        false
    }
}

/// Seqlock-published magnitude frame. One writer (the FFT thread), any readers.
pub struct AtomicMagnitudes {
    seq: AtomicU64,
    words: Box<[AtomicU32]>,
    len: AtomicUsize,
    updated_ms: AtomicU64,
}

impl AtomicMagnitudes {
    pub fn new(capacity: usize) -> Self {
        Self {
            seq: AtomicU64::new(0),
            words: (0..capacity.div_ceil(4)).map(|_| AtomicU32::new(0)).collect(),
            len: AtomicUsize::new(0),
            updated_ms: AtomicU64::new(0),
        }
    }

    pub fn store(&self, mags: &[u8]) {
        let len = mags.len().min(self.words.len() * 4);
        self.seq.fetch_add(1, Ordering::Release); // odd => write in progress
        for (dst, chunk) in self.words.iter().zip(mags[..len].chunks(4)) {
            let mut b = [0u8; 4];
            b[..chunk.len()].copy_from_slice(chunk);
            dst.store(u32::from_le_bytes(b), Ordering::Relaxed);
        }
        self.len.store(len, Ordering::Relaxed);
        self.updated_ms.store(now_ms(), Ordering::Relaxed);
        self.seq.fetch_add(1, Ordering::Release); // even => stable
    }

    /// False if nothing has been published yet.
    pub fn load_into(&self, out: &mut Vec<u8>) -> bool {
        loop {
            let v1 = self.seq.load(Ordering::Acquire);
            if v1 & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let len = self.len.load(Ordering::Relaxed);
            out.clear();
            for w in self.words.iter().take(len.div_ceil(4)) {
                out.extend_from_slice(&w.load(Ordering::Relaxed).to_le_bytes());
            }
            out.truncate(len);
            let v2 = self.seq.load(Ordering::Acquire);
            if v1 == v2 {
                return v1 != 0;
            }
        }
    }

    pub fn age_ms(&self) -> u64 {
        let t = self.updated_ms.load(Ordering::Relaxed);
        if t == 0 {
            return u64::MAX;
        }
        now_ms().saturating_sub(t)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_millis(0))
        .as_millis() as u64
}

/// Windowed FFT producing byte-quantized decibel magnitudes.
pub struct MagnitudeAnalyzer {
    fft: Arc<dyn rustfft::Fft<f32>>,
    hann: Vec<f32>,
    buf: Vec<Complex<f32>>,
}

impl MagnitudeAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let hann = (0..FFT_SIZE)
            .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / (FFT_SIZE as f32)).cos())
            .collect();
        Self {
            fft,
            hann,
            buf: vec![Complex { re: 0.0, im: 0.0 }; FFT_SIZE],
        }
    }

    /// `ring` is a circular window of FFT_SIZE samples whose oldest sample sits at `start`.
    pub fn process(&mut self, ring: &[f32], start: usize, out: &mut [u8]) {
        let n = FFT_SIZE;
        for i in 0..n {
            let s = ring.get((start + i) % ring.len().max(1)).copied().unwrap_or(0.0);
            self.buf[i] = Complex {
                re: s * self.hann[i],
                im: 0.0,
            };
        }
        self.fft.process(&mut self.buf);
        for (dst, c) in out.iter_mut().zip(self.buf.iter().take(MAGNITUDE_BINS)) {
            *dst = quantize_db(c.norm() / n as f32);
        }
    }
}

impl Default for MagnitudeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a linear magnitude onto 0..255 across [-100 dB, -30 dB].
pub fn quantize_db(magnitude: f32) -> u8 {
    if magnitude <= 0.0 || !magnitude.is_finite() {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    (((db - MIN_DB) / (MAX_DB - MIN_DB)) * 255.0).clamp(0.0, 255.0) as u8
}

pub fn list_devices() -> anyhow::Result<()> {
    let host = cpal::default_host();
    let mut out = io::stdout();
    writeln!(out, "Input devices:")?;
    for dev in host.input_devices().context("enumerate input devices")? {
        let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
        writeln!(out, "  - {}", name)?;
    }
    writeln!(out, "Output devices:")?;
    for dev in host.output_devices().context("enumerate output devices")? {
        let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
        writeln!(out, "  - {}", name)?;
    }
    Ok(())
}

enum AudioBackend {
    Capture(cpal::Stream),
    Playback(cpal::Stream),
    Paced(thread::JoinHandle<()>),
}

pub struct AudioSystem {
    backend: Option<AudioBackend>,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    analyzer_handle: Option<thread::JoinHandle<()>>,
    magnitudes: Arc<AtomicMagnitudes>,
    label: String,
    pub sample_rate_hz: u32,
}

/// Opens the configured source, degrading to silence (with a reason) on failure.
pub fn open_source(
    source: AudioSource,
    device_query: Option<&str>,
    file: Option<&Path>,
) -> (Box<dyn MagnitudeSource>, Option<String>) {
    let opened = match (source, file) {
        (AudioSource::None, _) => return (Box::new(SilentSource), None),
        (AudioSource::Mic, _) => AudioSystem::new_mic(device_query),
        (AudioSource::File, Some(path)) => AudioSystem::new_file(path),
        (AudioSource::File, None) => {
            return (
                Box::new(SilentSource),
                Some("--source file needs --audio-file".to_string()),
            );
        }
    };
    match opened {
        Ok(sys) => (Box::new(sys), None),
        Err(err) => {
            warn!(%err, "audio unavailable, continuing silent");
            (Box::new(SilentSource), Some(format!("audio off: {err}")))
        }
    }
}

impl AudioSystem {
    pub fn new_mic(device_query: Option<&str>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = select_input_device(&host, device_query)?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;
        let sample_rate_hz = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.clone().into();

        let rb = HeapRb::<f32>::new((sample_rate_hz as usize).saturating_mul(4));
        let (mut prod, cons) = rb.split();

        let err_fn = |err| warn!(%err, "input stream error");
        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            ),
            fmt => return Err(AudioError::UnsupportedFormat(format!("{fmt:?}"))),
        }
        .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;

        let label = device.name().unwrap_or_else(|_| "mic".to_string());
        info!(device = %label, sample_rate_hz, "microphone capture started");
        Ok(Self::spawn(
            AudioBackend::Capture(stream),
            cons,
            sample_rate_hz,
            Arc::new(AtomicBool::new(false)),
            format!("mic: {label}"),
        ))
    }

    /// Plays a WAV file and analyzes exactly the samples being played.
    pub fn new_file(path: &Path) -> Result<Self, AudioError> {
        let (samples, file_rate) = decode_wav(path)?;
        let samples: Arc<[f32]> = samples.into();
        let finished = Arc::new(AtomicBool::new(false));
        let label = format!(
            "file: {}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );

        let host = cpal::default_host();
        let output = host
            .default_output_device()
            .and_then(|d| d.default_output_config().ok().map(|c| (d, c)));

        if let Some((device, supported)) = output {
            if supported.sample_format() == SampleFormat::F32 {
                let rate = supported.sample_rate().0;
                let channels = supported.channels() as usize;
                let config: cpal::StreamConfig = supported.into();
                let rb = HeapRb::<f32>::new((rate as usize).saturating_mul(4));
                let (mut prod, cons) = rb.split();
                let mut cursor = PlaybackCursor::new(Arc::clone(&samples), file_rate, rate);
                let done = Arc::clone(&finished);
                let stream = device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            for frame in data.chunks_mut(channels.max(1)) {
                                match cursor.next_sample() {
                                    Some(s) => {
                                        frame.fill(s);
                                        let _ = prod.try_push(s);
                                    }
                                    None => {
                                        frame.fill(0.0);
                                        done.store(true, Ordering::Relaxed);
                                    }
                                }
                            }
                        },
                        |err| warn!(%err, "output stream error"),
                        None,
                    )
                    .map_err(|e| AudioError::NoDevice(e.to_string()));
                match stream.and_then(|s| {
                    s.play()
                        .map(|_| s)
                        .map_err(|e| AudioError::NoDevice(e.to_string()))
                }) {
                    Ok(stream) => {
                        info!(%label, rate, "file playback started");
                        return Ok(Self::spawn(
                            AudioBackend::Playback(stream),
                            cons,
                            rate,
                            finished,
                            label,
                        ));
                    }
                    Err(err) => warn!(%err, "output device unusable, analyzing without playback"),
                }
            } else {
                warn!(
                    format = ?supported.sample_format(),
                    "output format unsupported, analyzing without playback"
                );
            }
        }

        // No usable output device: feed the analyzer at real-time pace.
        let rb = HeapRb::<f32>::new((file_rate as usize).saturating_mul(4));
        let (mut prod, cons) = rb.split();
        let done = Arc::clone(&finished);
        let feeder = thread::spawn(move || {
            let chunk = (file_rate as usize / 100).max(1);
            for block in samples.chunks(chunk) {
                if done.load(Ordering::Relaxed) {
                    return;
                }
                for s in block {
                    let _ = prod.try_push(*s);
                }
                thread::sleep(Duration::from_millis(10));
            }
            done.store(true, Ordering::Relaxed);
        });
        Ok(Self::spawn(
            AudioBackend::Paced(feeder),
            cons,
            file_rate,
            finished,
            format!("{label} (muted)"),
        ))
    }

    fn spawn(
        backend: AudioBackend,
        mut cons: ringbuf::HeapCons<f32>,
        sample_rate_hz: u32,
        finished: Arc<AtomicBool>,
        label: String,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let magnitudes = Arc::new(AtomicMagnitudes::new(MAGNITUDE_BINS));
        let mags_for_thread = Arc::clone(&magnitudes);
        let stop_for_thread = Arc::clone(&stop);
        let analyzer_handle =
            thread::spawn(move || analyze_loop(&mut cons, &stop_for_thread, &mags_for_thread));
        Self {
            backend: Some(backend),
            stop,
            finished,
            analyzer_handle: Some(analyzer_handle),
            magnitudes,
            label,
            sample_rate_hz,
        }
    }
}

impl MagnitudeSource for AudioSystem {
    fn label(&self) -> &str {
        &self.label
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate_hz
    }

    fn pull_latest(&self, out: &mut Vec<u8>) -> bool {
        if self.finished.load(Ordering::Relaxed) || self.magnitudes.age_ms() > STALE_AFTER_MS {
            out.clear();
            return false;
        }
        self.magnitudes.load_into(out)
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.finished.store(true, Ordering::Relaxed);
        if let Some(h) = self.analyzer_handle.take() {
            let _ = h.join();
        }
        match self.backend.take() {
            Some(AudioBackend::Capture(stream)) | Some(AudioBackend::Playback(stream)) => {
                let _ = stream.pause();
            }
            Some(AudioBackend::Paced(feeder)) => {
                let _ = feeder.join();
            }
            None => {}
        }
        info!(source = %self.label, "audio stopped");
    }
}

fn select_input_device(
    host: &cpal::Host,
    device_query: Option<&str>,
) -> Result<cpal::Device, AudioError> {
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::NoDevice(e.to_string()))?
        .collect::<Vec<_>>();

    if let Some(want) = device_query.map(|s| s.to_lowercase()) {
        return devices
            .into_iter()
            .find(|d| {
                d.name()
                    .map(|n| n.to_lowercase().contains(&want))
                    .unwrap_or(false)
            })
            .ok_or_else(|| AudioError::NoDevice(format!("no input device matching {want}")));
    }

    host.default_input_device()
        .ok_or_else(|| AudioError::NoDevice("no default input device".to_string()))
}

fn push_interleaved<T: Sample<Float = f32> + Copy>(
    data: &[T],
    channels: usize,
    prod: &mut ringbuf::HeapProd<f32>,
) {
    let channels = channels.max(1);
    for frame in data.chunks(channels) {
        let acc: f32 = frame.iter().map(|s| s.to_float_sample()).sum();
        let _ = prod.try_push(acc / channels as f32);
    }
}

/// Decodes a WAV file to mono f32 samples.
pub fn decode_wav(path: &Path) -> Result<(Vec<f32>, u32), AudioError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };
    let mono = interleaved
        .chunks(channels)
        .map(|f| f.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Linear-interpolating resampler over a decoded file.
struct PlaybackCursor {
    samples: Arc<[f32]>,
    pos: f64,
    step: f64,
}

impl PlaybackCursor {
    fn new(samples: Arc<[f32]>, file_rate: u32, device_rate: u32) -> Self {
        Self {
            samples,
            pos: 0.0,
            step: file_rate as f64 / device_rate.max(1) as f64,
        }
    }

    fn next_sample(&mut self) -> Option<f32> {
        let i = self.pos as usize;
        let a = *self.samples.get(i)?;
        let b = self.samples.get(i + 1).copied().unwrap_or(a);
        let frac = (self.pos - i as f64) as f32;
        self.pos += self.step;
        Some(a + (b - a) * frac)
    }
}

fn analyze_loop(cons: &mut ringbuf::HeapCons<f32>, stop: &AtomicBool, out: &AtomicMagnitudes) {
    let mut ring = vec![0.0f32; FFT_SIZE];
    let mut write_pos = 0usize;
    let mut filled = 0usize;
    let mut since_last = 0usize;
    let mut analyzer = MagnitudeAnalyzer::new();
    let mut mags = vec![0u8; MAGNITUDE_BINS];

    while !stop.load(Ordering::Relaxed) {
        let mut got_any = false;
        while let Some(s) = cons.try_pop() {
            got_any = true;
            ring[write_pos] = s;
            write_pos = (write_pos + 1) % FFT_SIZE;
            filled = (filled + 1).min(FFT_SIZE);
            since_last += 1;
            if filled == FFT_SIZE && since_last >= HOP {
                since_last = 0;
                analyzer.process(&ring, write_pos, &mut mags);
                out.store(&mags);
            }
        }
        if !got_any {
            thread::sleep(Duration::from_millis(1));
        }
    }
}
