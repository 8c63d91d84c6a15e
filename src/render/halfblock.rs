use crate::render::{Frame, Renderer, band_meter, draw_overlay_popup, meter_color};
use std::io::Write;

const HALF_BLOCK: char = '\u{2580}';

type Rgb = (u8, u8, u8);

/// Two pixels per cell: foreground paints the top half, background the bottom.
pub struct HalfBlockRenderer {
    last_fg: Option<Rgb>,
    last_bg: Option<Rgb>,
}

impl Default for HalfBlockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HalfBlockRenderer {
    pub fn new() -> Self {
        Self {
            last_fg: None,
            last_bg: None,
        }
    }

    fn pixel(frame: &Frame<'_>, x: usize, y: usize) -> Rgb {
        let i = (y * frame.pixel_width + x) * 4;
        let p = &frame.pixels_rgba[i..i + 3];
        (p[0], p[1], p[2])
    }

    fn set_colors(&mut self, out: &mut dyn Write, fg: Rgb, bg: Rgb) -> std::io::Result<()> {
        if self.last_fg != Some(fg) {
            write!(out, "\x1b[38;2;{};{};{}m", fg.0, fg.1, fg.2)?;
            self.last_fg = Some(fg);
        }
        if self.last_bg != Some(bg) {
            write!(out, "\x1b[48;2;{};{};{}m", bg.0, bg.1, bg.2)?;
            self.last_bg = Some(bg);
        }
        Ok(())
    }

    fn paint_field(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> std::io::Result<()> {
        for row in 0..frame.visual_rows as usize {
            for x in 0..frame.pixel_width {
                let top = Self::pixel(frame, x, row * 2);
                let bottom = Self::pixel(frame, x, row * 2 + 1);
                self.set_colors(out, top, bottom)?;
                write!(out, "{HALF_BLOCK}")?;
            }
            out.write_all(b"\r\n")?;
        }
        Ok(())
    }

    fn paint_hud(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> std::io::Result<()> {
        let cols = frame.term_cols as usize;
        let mut lines = frame.hud.lines();
        for i in 0..frame.hud_rows as usize {
            write!(out, "\x1b[{};1H\x1b[0m\x1b[2K", frame.visual_rows as usize + i + 1)?;
            let mut budget = cols;
            if i == 0 {
                if let Some(audio) = frame.meters {
                    let meter = band_meter(audio);
                    for (band, glyph) in meter.chars().enumerate().take(budget) {
                        let (r, g, b) = meter_color(band);
                        write!(out, "\x1b[38;2;{r};{g};{b}m{glyph}")?;
                    }
                    out.write_all(b"\x1b[0m ")?;
                    budget = budget.saturating_sub(meter.chars().count() + 1);
                }
            }
            if let Some(line) = lines.next() {
                let clipped: String = line.chars().take(budget).collect();
                write!(out, "{clipped}")?;
            }
        }
        Ok(())
    }
}

impl Renderer for HalfBlockRenderer {
    fn name(&self) -> &'static str {
        "halfblock"
    }

    fn render(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()> {
        let cols = frame.term_cols as usize;
        let rows = frame.visual_rows as usize;
        let (w, h) = (frame.pixel_width, frame.pixel_height);
        if cols == 0 || rows == 0 || w == 0 || h == 0 {
            return Ok(());
        }
        // Geometry must be exact; a resize race can briefly disagree.
        if w != cols || h != rows * 2 || frame.pixels_rgba.len() < w * h * 4 {
            return Ok(());
        }

        if frame.sync_updates {
            out.write_all(b"\x1b[?2026h")?;
        }
        // Home, reset, autowrap off while painting full-width rows.
        out.write_all(b"\x1b[H\x1b[0m\x1b[?7l")?;
        self.last_fg = None;
        self.last_bg = None;

        self.paint_field(frame, out)?;
        self.paint_hud(frame, out)?;
        if let Some(text) = frame.overlay {
            draw_overlay_popup(out, frame.term_cols, frame.term_rows, text)?;
        }

        out.write_all(b"\x1b[?7h")?;
        if frame.sync_updates {
            out.write_all(b"\x1b[?2026l")?;
        }
        out.flush()?;
        Ok(())
    }
}
