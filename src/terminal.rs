use anyhow::Context;
use crossterm::{
    ExecutableCommand, cursor,
    terminal::{self, ClearType},
};
use std::io::{Stdout, Write, stdout};

/// Raw mode + alternate screen for the lifetime of the guard.
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    pub fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode().context("enable raw mode")?;
        // Constructed before the remaining steps so Drop undoes raw mode on failure.
        let guard = Self { _private: () };

        let mut out = stdout();
        out.execute(terminal::EnterAlternateScreen)
            .context("enter alternate screen")?;
        out.execute(terminal::Clear(ClearType::All))
            .context("clear screen")?;
        out.execute(cursor::Hide).context("hide cursor")?;
        Ok(guard)
    }

    pub fn stdout() -> Stdout {
        stdout()
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut out = stdout();
        let _ = out.write_all(b"\x1b[?2026l\x1b[?7h\x1b[0m");
        let _ = out.flush();
        let _ = out.execute(cursor::Show);
        let _ = out.execute(terminal::LeaveAlternateScreen);
    }
}

/// Pixel field for a terminal of `cols` x `rows` with `hud_rows` reserved at the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub cols: u16,
    pub rows: u16,
    pub visual_rows: u16,
    pub hud_rows: u16,
}

impl Viewport {
    pub fn new(cols: u16, rows: u16, hud_rows: u16) -> Self {
        let hud_rows = hud_rows.min(rows.saturating_sub(1));
        Self {
            cols,
            rows,
            visual_rows: rows.saturating_sub(hud_rows),
            hud_rows,
        }
    }

    pub fn pixel_width(&self) -> usize {
        self.cols as usize
    }

    /// Half-block cells carry two pixel rows each.
    pub fn pixel_height(&self) -> usize {
        self.visual_rows as usize * 2
    }

    pub fn aspect(&self) -> f32 {
        self.pixel_width().max(1) as f32 / self.pixel_height().max(1) as f32
    }
}
