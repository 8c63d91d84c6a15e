use pointcloud_visualizer::analysis::BandEnergy;
use pointcloud_visualizer::render::{
    Frame, HalfBlockRenderer, Renderer, band_meter, meter_color, wrap_popup_lines,
};
use pointcloud_visualizer::terminal::Viewport;

/// Build a solid-color RGBA pixel buffer.
fn solid_pixels(w: usize, h: usize, r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut buf = vec![0u8; w * h * 4];
    for px in buf.chunks_exact_mut(4) {
        px[0] = r;
        px[1] = g;
        px[2] = b;
        px[3] = 255;
    }
    buf
}

/// Build a gradient pixel buffer (varies across x).
fn gradient_pixels(w: usize, h: usize) -> Vec<u8> {
    let mut buf = vec![0u8; w * h * 4];
    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 4;
            let t = (x as f32 / w.max(1) as f32 * 255.0) as u8;
            buf[i] = t;
            buf[i + 1] = 128;
            buf[i + 2] = 255 - t;
            buf[i + 3] = 255;
        }
    }
    buf
}

fn make_frame<'a>(
    cols: u16,
    visual_rows: u16,
    pw: usize,
    ph: usize,
    pixels: &'a [u8],
    sync: bool,
) -> Frame<'a> {
    Frame {
        term_cols: cols,
        term_rows: visual_rows + 2,
        visual_rows,
        pixel_width: pw,
        pixel_height: ph,
        pixels_rgba: pixels,
        hud: "FPS 30 | coh 0.70",
        hud_rows: 1,
        meters: None,
        overlay: None,
        sync_updates: sync,
    }
}

// ── HalfBlock renderer ─────────────────────────────────────────────────────

#[test]
fn halfblock_renders_gradient_frame() {
    let cols = 8u16;
    let rows = 4u16;
    let pw = cols as usize;
    let ph = (rows as usize) * 2;
    let pixels = gradient_pixels(pw, ph);
    let frame = make_frame(cols, rows, pw, ph, &pixels, true);
    let mut out = Vec::new();
    let mut renderer = HalfBlockRenderer::new();
    renderer.render(&frame, &mut out).unwrap();
    let s = String::from_utf8_lossy(&out);
    assert!(s.contains("\x1b[?2026h"), "missing sync-begin");
    assert!(s.contains("\x1b[?2026l"), "missing sync-end");
    assert!(s.contains("\u{2580}"), "missing half-block char");
    assert!(s.contains("38;2;"), "missing FG escape");
    assert!(s.contains("48;2;"), "missing BG escape");
    assert!(s.contains("FPS 30"), "HUD text missing");
}

#[test]
fn halfblock_reuses_colors_on_solid_frames() {
    let pixels = solid_pixels(6, 6, 200, 100, 50);
    let frame = make_frame(6, 3, 6, 6, &pixels, false);
    let mut out = Vec::new();
    HalfBlockRenderer::new().render(&frame, &mut out).unwrap();
    let s = String::from_utf8_lossy(&out);
    assert_eq!(s.matches("38;2;200;100;50").count(), 1, "fg should be set once");
    assert!(s.contains("\x1b[?7l") && s.contains("\x1b[?7h"));
    assert!(!s.contains("\x1b[?2026h"));
}

#[test]
fn halfblock_name() {
    assert_eq!(HalfBlockRenderer::new().name(), "halfblock");
}

#[test]
fn halfblock_skips_dimension_mismatch() {
    // pixel_height should be visual_rows*2, but give visual_rows*1
    let cols = 4u16;
    let rows = 4u16;
    let pixels = solid_pixels(4, 4, 100, 100, 100);
    let frame = make_frame(cols, rows, 4, 4, &pixels, false);
    let mut out = Vec::new();
    HalfBlockRenderer::new().render(&frame, &mut out).unwrap();
    assert!(out.is_empty(), "expected empty output for dimension mismatch");
}

#[test]
fn halfblock_skips_zero_size() {
    let pixels = solid_pixels(1, 1, 0, 0, 0);
    let frame = make_frame(0, 0, 0, 0, &pixels, false);
    let mut out = Vec::new();
    HalfBlockRenderer::new().render(&frame, &mut out).unwrap();
    assert!(out.is_empty(), "expected empty output for zero-size frame");
}

#[test]
fn halfblock_draws_meters_and_overlay() {
    let pixels = solid_pixels(40, 16, 10, 10, 10);
    let audio = BandEnergy::from_bands([0.0, 0.2, 0.4, 0.6, 0.8, 1.0, 1.0, 0.0], 0.0);
    let mut frame = make_frame(40, 8, 40, 16, &pixels, false);
    frame.meters = Some(&audio);
    frame.overlay = Some("Help Title\nsecond line");
    let mut out = Vec::new();
    HalfBlockRenderer::new().render(&frame, &mut out).unwrap();
    let s = String::from_utf8_lossy(&out);
    assert!(s.contains('\u{2588}'), "full meter glyph missing");
    assert!(s.contains("Help Title"), "overlay title missing");
    assert!(s.contains("second line"));
}

// ── HUD helpers ─────────────────────────────────────────────────────────────

#[test]
fn band_meter_has_one_glyph_per_band() {
    let m = band_meter(&BandEnergy::SILENT);
    assert_eq!(m.chars().count(), 8);
    assert!(m.chars().all(|c| c == '\u{2581}'));
    let full = band_meter(&BandEnergy::from_bands([1.0; 8], 0.0));
    assert!(full.chars().all(|c| c == '\u{2588}'));
}

#[test]
fn meter_colors_run_warm_to_cool() {
    let (r0, _, b0) = meter_color(0);
    let (r7, _, b7) = meter_color(7);
    assert!(r0 > r7 && b7 > b0);
}

#[test]
fn popup_lines_wrap_and_keep_blanks() {
    let lines = wrap_popup_lines("abcdefgh\n\nxy", 3);
    assert_eq!(lines, vec!["abc", "def", "gh", "", "xy"]);
}

// ── Viewport ────────────────────────────────────────────────────────────────

#[test]
fn viewport_reserves_hud_rows() {
    let v = Viewport::new(80, 24, 3);
    assert_eq!(v.visual_rows, 21);
    assert_eq!((v.pixel_width(), v.pixel_height()), (80, 42));

    let tiny = Viewport::new(10, 2, 5);
    assert_eq!(tiny.hud_rows, 1);
    assert_eq!(tiny.visual_rows, 1);
}
