mod halfblock;

pub use halfblock::HalfBlockRenderer;

use crate::analysis::{BAND_COUNT, BandEnergy};
use std::io::Write;

pub struct Frame<'a> {
    pub term_cols: u16,
    pub term_rows: u16,
    pub visual_rows: u16,
    pub pixel_width: usize,
    pub pixel_height: usize,
    pub pixels_rgba: &'a [u8],
    pub hud: &'a str,
    pub hud_rows: u16,
    /// Drawn as a colored strip at the start of the first HUD row.
    pub meters: Option<&'a BandEnergy>,
    pub overlay: Option<&'a str>,
    pub sync_updates: bool,
}

pub trait Renderer {
    fn name(&self) -> &'static str;
    fn render(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()>;
}

const METER_GLYPHS: [char; 8] = [
    '\u{2581}', '\u{2582}', '\u{2583}', '\u{2584}', '\u{2585}', '\u{2586}', '\u{2587}', '\u{2588}',
];

/// One glyph per band, height following its energy.
pub fn band_meter(audio: &BandEnergy) -> String {
    audio
        .bands
        .iter()
        .map(|v| {
            let i = (v.clamp(0.0, 1.0) * (METER_GLYPHS.len() - 1) as f32).round() as usize;
            METER_GLYPHS[i]
        })
        .collect()
}

/// Low bands warm, high bands cool.
pub fn meter_color(band: usize) -> (u8, u8, u8) {
    let t = band as f32 / (BAND_COUNT - 1) as f32;
    let r = (255.0 * (1.0 - t) + 80.0 * t) as u8;
    let g = (120.0 + 100.0 * (1.0 - (2.0 * t - 1.0).abs())) as u8;
    let b = (60.0 * (1.0 - t) + 255.0 * t) as u8;
    (r, g, b)
}

/// Hard-wraps `text` to `max_w` columns, keeping blank lines.
pub fn wrap_popup_lines(text: &str, max_w: usize) -> Vec<String> {
    let max_w = max_w.max(1);
    let mut lines = Vec::new();
    for raw in text.lines() {
        if raw.is_empty() {
            lines.push(String::new());
            continue;
        }
        let chars: Vec<char> = raw.chars().collect();
        for chunk in chars.chunks(max_w) {
            lines.push(chunk.iter().collect());
        }
    }
    lines
}

/// Centered help/status box over a dimmed backdrop. The first line is the title.
pub fn draw_overlay_popup(
    out: &mut dyn Write,
    term_cols: u16,
    term_rows: u16,
    text: &str,
) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        return Ok(());
    }
    let cols = term_cols as usize;
    let rows = term_rows as usize;
    if cols < 8 || rows < 4 {
        return Ok(());
    }

    let lines = wrap_popup_lines(text, cols.saturating_sub(6));
    if lines.is_empty() {
        return Ok(());
    }
    let widest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let box_w = (widest + 4).clamp(4, cols.saturating_sub(2));
    let inner_w = box_w - 4;
    let body_h = lines.len().min(rows.saturating_sub(3).max(1));
    let box_h = (body_h + 2).clamp(3, rows.saturating_sub(1));

    let left = cols.saturating_sub(box_w) / 2 + 1;
    let top = rows.saturating_sub(box_h) / 2 + 1;
    let edge = "-".repeat(box_w - 2);

    // EL2 per row rather than writing spaces, so the right edge never wraps.
    out.write_all(b"\x1b[0m\x1b[38;2;210;220;236m\x1b[48;2;3;3;8m")?;
    for row in 1..=rows {
        write!(out, "\x1b[{row};1H\x1b[2K")?;
    }

    out.write_all(b"\x1b[0m\x1b[38;2;232;238;255m\x1b[48;2;12;10;22m")?;
    write!(out, "\x1b[{top};{left}H+{edge}+")?;
    for (i, line) in lines.iter().take(body_h).enumerate() {
        let row = top + 1 + i;
        write!(out, "\x1b[{row};{left}H| {:inner_w$} |", "")?;
        if i == 0 {
            write!(
                out,
                "\x1b[{row};{}H\x1b[1m\x1b[38;2;190;160;255m{line}\x1b[22m\x1b[38;2;232;238;255m",
                left + 2
            )?;
        } else {
            write!(out, "\x1b[{row};{}H{line}", left + 2)?;
        }
    }
    write!(out, "\x1b[{};{left}H+{edge}+", top + box_h - 1)?;
    out.write_all(b"\x1b[0m")?;
    Ok(())
}
