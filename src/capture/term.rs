//! Terminal-program capture via an isolated, invisible display surface.
//!
//! Terminal applications are run inside a pseudo-terminal and rendered by
//! an in-process VT100 emulator, so a TUI can be captured pixel-for-pixel
//! without any window ever appearing on the operator's screen. Two
//! contracts are offered, selected by [`TerminalMode`]:
//! - `Rendered`: the emulated screen drawn to a PNG with font8x8 glyphs
//! - `Ansi`: the raw byte stream with ANSI escape codes preserved
//!
//! The PTY, the child process, and the emulator state are torn down
//! deterministically on `end_session`, and opportunistically when setup
//! fails partway.

use font8x8::{
    BASIC_FONTS, BLOCK_FONTS, BOX_FONTS, GREEK_FONTS, HIRAGANA_FONTS, LATIN_FONTS, MISC_FONTS,
    UnicodeFonts,
};
use image::{ImageBuffer, Rgb};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use vte::{Params, Parser as AnsiParser, Perform};

use super::adapter::{AdapterCore, CaptureAdapter, EventStep};
use super::types::{CaptureError, CaptureKind, CaptureOptions, CaptureResult};

const FONT_WIDTH: u32 = 8;
const FONT_HEIGHT: u32 = 16;
const PIXEL_SCALE: u32 = 2;
/// Width of a terminal cell in pixels
pub const CELL_WIDTH: u32 = FONT_WIDTH * PIXEL_SCALE;
/// Height of a terminal cell in pixels
pub const CELL_HEIGHT: u32 = FONT_HEIGHT * PIXEL_SCALE;

const QUIET_WINDOW: Duration = Duration::from_millis(180);
/// Maximum wait for the first render (apps that output continuously)
const MAX_INITIAL_RENDER_WAIT: Duration = Duration::from_secs(3);
/// Maximum wait for the screen to settle after an input
const MAX_INPUT_RENDER_WAIT: Duration = Duration::from_secs(2);
const PROCESS_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

const ANSI_COLORS: [[u8; 3]; 8] = [
    [0, 0, 0],
    [205, 49, 49],
    [13, 188, 121],
    [229, 229, 16],
    [36, 114, 200],
    [188, 63, 188],
    [17, 168, 205],
    [229, 229, 229],
];

const ANSI_BRIGHT_COLORS: [[u8; 3]; 8] = [
    [102, 102, 102],
    [241, 76, 76],
    [35, 209, 139],
    [245, 245, 67],
    [59, 142, 234],
    [214, 112, 214],
    [41, 184, 219],
    [255, 255, 255],
];

/// Which contract the terminal adapter fulfills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMode {
    /// Emulate and render the screen to a PNG screenshot
    Rendered,
    /// Capture the raw ANSI byte stream as text
    Ansi,
}

/// Terminal size preset for common configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalSize {
    /// 80x24 - classic VT100
    Compact,
    /// 120x40 - typical modern terminal
    Standard,
    /// 160x50 - large widescreen terminal
    Large,
    /// 200x60 - extra large
    ExtraLarge,
    /// Custom dimensions
    Custom(u16, u16),
}

impl TerminalSize {
    /// Dimensions as (cols, rows)
    pub fn dimensions(&self) -> (u16, u16) {
        match self {
            TerminalSize::Compact => (80, 24),
            TerminalSize::Standard => (120, 40),
            TerminalSize::Large => (160, 50),
            TerminalSize::ExtraLarge => (200, 60),
            TerminalSize::Custom(cols, rows) => (*cols, *rows),
        }
    }

    /// Parse from string (e.g. "80x24", "compact", "standard")
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "compact" | "small" | "minimal" => Some(TerminalSize::Compact),
            "standard" | "default" | "normal" => Some(TerminalSize::Standard),
            "large" | "wide" => Some(TerminalSize::Large),
            "xl" | "extralarge" | "extra-large" => Some(TerminalSize::ExtraLarge),
            custom => {
                let parts: Vec<&str> = custom.split('x').collect();
                if parts.len() == 2 {
                    let cols = parts[0].parse().ok()?;
                    let rows = parts[1].parse().ok()?;
                    Some(TerminalSize::Custom(cols, rows))
                } else {
                    None
                }
            }
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        TerminalSize::Standard
    }
}

fn clamp_u16_to_u8(value: u16) -> u8 {
    value.min(255) as u8
}

/// Brighten a color for bold text
fn brighten_color(color: [u8; 3]) -> [u8; 3] {
    [
        color[0].saturating_add(64).max(color[0].saturating_mul(4) / 3),
        color[1].saturating_add(64).max(color[1].saturating_mul(4) / 3),
        color[2].saturating_add(64).max(color[2].saturating_mul(4) / 3),
    ]
}

fn xterm_256_to_rgb(idx: u8) -> [u8; 3] {
    match idx {
        0..=7 => ANSI_COLORS[idx as usize],
        8..=15 => ANSI_BRIGHT_COLORS[(idx - 8) as usize],
        16..=231 => {
            let normalized = idx - 16;
            let r = normalized / 36;
            let g = (normalized % 36) / 6;
            let b = normalized % 6;
            let scale = [0, 95, 135, 175, 215, 255];
            [scale[r as usize], scale[g as usize], scale[b as usize]]
        }
        232..=255 => {
            let shade = 8 + (idx - 232) * 10;
            [shade, shade, shade]
        }
    }
}

fn glyph_bitmap(ch: char) -> [u8; 16] {
    fn expand(glyph: [u8; 8]) -> [u8; 16] {
        let mut out = [0u8; 16];
        for (idx, row) in glyph.iter().enumerate() {
            let target = idx * 2;
            out[target] = *row;
            out[target + 1] = *row;
        }
        out
    }

    if let Some(glyph) = BASIC_FONTS.get(ch) { return expand(glyph); }
    if let Some(glyph) = BOX_FONTS.get(ch) { return expand(glyph); }
    if let Some(glyph) = BLOCK_FONTS.get(ch) { return expand(glyph); }
    if let Some(glyph) = LATIN_FONTS.get(ch) { return expand(glyph); }
    if let Some(glyph) = GREEK_FONTS.get(ch) { return expand(glyph); }
    if let Some(glyph) = HIRAGANA_FONTS.get(ch) { return expand(glyph); }
    if let Some(glyph) = MISC_FONTS.get(ch) { return expand(glyph); }

    // Braille (U+2800-U+28FF) - used by ratatui Canvas for plotting
    if let Some(braille) = render_braille(ch) { return braille; }

    [0; 16]
}

/// Render a Braille character (U+2800-U+28FF) to an 8x16 bitmap.
/// Braille: 2 cols x 4 rows of dots. Bits 0-2,6 = left col, bits 3-5,7 = right col.
fn render_braille(ch: char) -> Option<[u8; 16]> {
    let code = ch as u32;
    if !(0x2800..=0x28FF).contains(&code) {
        return None;
    }

    let pattern = (code - 0x2800) as u8;
    let mut bitmap = [0u8; 16];
    let left = 0b00001110u8;
    let right = 0b01110000u8;

    if pattern & 0x01 != 0 { bitmap[1] |= left; bitmap[2] |= left; }
    if pattern & 0x02 != 0 { bitmap[5] |= left; bitmap[6] |= left; }
    if pattern & 0x04 != 0 { bitmap[9] |= left; bitmap[10] |= left; }
    if pattern & 0x40 != 0 { bitmap[13] |= left; bitmap[14] |= left; }

    if pattern & 0x08 != 0 { bitmap[1] |= right; bitmap[2] |= right; }
    if pattern & 0x10 != 0 { bitmap[5] |= right; bitmap[6] |= right; }
    if pattern & 0x20 != 0 { bitmap[9] |= right; bitmap[10] |= right; }
    if pattern & 0x80 != 0 { bitmap[13] |= right; bitmap[14] |= right; }

    Some(bitmap)
}

/// Text attributes for a single cell
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellAttributes {
    pub bold: bool,
    pub underline: bool,
    pub inverse: bool,
}

/// Saved state for the alternate screen buffer
#[derive(Debug, Clone)]
struct SavedScreen {
    cells: Vec<Vec<char>>,
    fg_colors: Vec<Vec<[u8; 3]>>,
    bg_colors: Vec<Vec<[u8; 3]>>,
    attributes: Vec<Vec<CellAttributes>>,
    cursor_x: u32,
    cursor_y: u32,
}

/// Emulated terminal screen: the character grid, per-cell colors and
/// attributes, cursor state, and the alternate screen buffer.
#[derive(Debug, Clone)]
pub struct ScreenBuffer {
    pub width: u32,
    pub height: u32,
    cells: Vec<Vec<char>>,
    fg_colors: Vec<Vec<[u8; 3]>>,
    bg_colors: Vec<Vec<[u8; 3]>>,
    attributes: Vec<Vec<CellAttributes>>,
    cursor_x: u32,
    cursor_y: u32,
    current_fg: [u8; 3],
    current_bg: [u8; 3],
    current_attrs: CellAttributes,
    default_fg: [u8; 3],
    default_bg: [u8; 3],
    saved_cursor: Option<(u32, u32)>,
    alternate_screen: Option<Box<SavedScreen>>,
    in_alternate_screen: bool,
}

impl ScreenBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let mut cells = Vec::with_capacity(height as usize);
        let mut fg_colors = Vec::with_capacity(height as usize);
        let mut bg_colors = Vec::with_capacity(height as usize);
        let mut attributes = Vec::with_capacity(height as usize);

        for _ in 0..height {
            cells.push(vec![' '; width as usize]);
            fg_colors.push(vec![[255, 255, 255]; width as usize]);
            bg_colors.push(vec![[0, 0, 0]; width as usize]);
            attributes.push(vec![CellAttributes::default(); width as usize]);
        }

        Self {
            width,
            height,
            cells,
            fg_colors,
            bg_colors,
            attributes,
            cursor_x: 0,
            cursor_y: 0,
            current_fg: [255, 255, 255],
            current_bg: [0, 0, 0],
            current_attrs: CellAttributes::default(),
            default_fg: [255, 255, 255],
            default_bg: [0, 0, 0],
            saved_cursor: None,
            alternate_screen: None,
            in_alternate_screen: false,
        }
    }

    pub fn clear(&mut self) {
        for y in 0..self.height {
            for x in 0..self.width {
                self.cells[y as usize][x as usize] = ' ';
                self.fg_colors[y as usize][x as usize] = self.default_fg;
                self.bg_colors[y as usize][x as usize] = self.default_bg;
                self.attributes[y as usize][x as usize] = CellAttributes::default();
            }
        }
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.saved_cursor = None;
        self.reset_attributes();
    }

    pub fn write_char(&mut self, ch: char) {
        if ch == '\n' {
            self.cursor_y += 1;
            self.cursor_x = 0;
        } else if ch == '\r' {
            self.cursor_x = 0;
        } else if ch == '\t' {
            self.cursor_x = ((self.cursor_x / 8) + 1) * 8;
        } else {
            if self.cursor_x < self.width && self.cursor_y < self.height {
                let row = self.cursor_y as usize;
                let col = self.cursor_x as usize;
                self.cells[row][col] = ch;
                self.fg_colors[row][col] = self.current_fg;
                self.bg_colors[row][col] = self.current_bg;
                self.attributes[row][col] = self.current_attrs;
            }
            self.cursor_x += 1;
        }

        // Line wrap
        if self.cursor_x >= self.width {
            self.cursor_x = 0;
            self.cursor_y += 1;
        }

        // Scroll
        if self.cursor_y >= self.height {
            self.cells.remove(0);
            self.fg_colors.remove(0);
            self.bg_colors.remove(0);
            self.attributes.remove(0);

            self.cells.push(vec![' '; self.width as usize]);
            self.fg_colors.push(vec![[255, 255, 255]; self.width as usize]);
            self.bg_colors.push(vec![[0, 0, 0]; self.width as usize]);
            self.attributes
                .push(vec![CellAttributes::default(); self.width as usize]);

            self.cursor_y = self.height - 1;
        }
    }

    pub fn move_cursor(&mut self, x: u32, y: u32) {
        self.cursor_x = x.min(self.width.saturating_sub(1));
        self.cursor_y = y.min(self.height.saturating_sub(1));
    }

    pub fn move_cursor_rel(&mut self, dx: i32, dy: i32) {
        let new_x = (self.cursor_x as i32 + dx).clamp(0, self.width.saturating_sub(1) as i32);
        let new_y = (self.cursor_y as i32 + dy).clamp(0, self.height.saturating_sub(1) as i32);
        self.cursor_x = new_x as u32;
        self.cursor_y = new_y as u32;
    }

    pub fn set_fg_color(&mut self, color: [u8; 3]) {
        self.current_fg = color;
    }

    pub fn set_bg_color(&mut self, color: [u8; 3]) {
        self.current_bg = color;
    }

    pub fn reset_attributes(&mut self) {
        self.current_fg = self.default_fg;
        self.current_bg = self.default_bg;
        self.current_attrs = CellAttributes::default();
    }

    pub fn reset_fg(&mut self) {
        self.current_fg = self.default_fg;
    }

    pub fn reset_bg(&mut self) {
        self.current_bg = self.default_bg;
    }

    pub fn set_bold(&mut self, enabled: bool) {
        self.current_attrs.bold = enabled;
    }

    pub fn set_underline(&mut self, enabled: bool) {
        self.current_attrs.underline = enabled;
    }

    pub fn set_inverse(&mut self, enabled: bool) {
        self.current_attrs.inverse = enabled;
    }

    /// Enter the alternate screen buffer (vim, less, htop, ...)
    pub fn enter_alternate_screen(&mut self) {
        if self.in_alternate_screen {
            return;
        }

        let saved = SavedScreen {
            cells: self.cells.clone(),
            fg_colors: self.fg_colors.clone(),
            bg_colors: self.bg_colors.clone(),
            attributes: self.attributes.clone(),
            cursor_x: self.cursor_x,
            cursor_y: self.cursor_y,
        };
        self.alternate_screen = Some(Box::new(saved));
        self.in_alternate_screen = true;

        self.clear();
    }

    /// Leave the alternate screen buffer and restore the previous state
    pub fn leave_alternate_screen(&mut self) {
        if !self.in_alternate_screen {
            return;
        }

        if let Some(saved) = self.alternate_screen.take() {
            self.cells = saved.cells;
            self.fg_colors = saved.fg_colors;
            self.bg_colors = saved.bg_colors;
            self.attributes = saved.attributes;
            self.cursor_x = saved.cursor_x;
            self.cursor_y = saved.cursor_y;
        }
        self.in_alternate_screen = false;
    }

    pub fn clear_line_from_cursor(&mut self) {
        if self.cursor_y >= self.height {
            return;
        }
        for x in self.cursor_x..self.width {
            let idx = x as usize;
            let row = self.cursor_y as usize;
            self.cells[row][idx] = ' ';
            self.fg_colors[row][idx] = self.current_fg;
            self.bg_colors[row][idx] = self.current_bg;
            self.attributes[row][idx] = CellAttributes::default();
        }
    }

    pub fn clear_from_cursor(&mut self) {
        let start_row = self.cursor_y;
        for y in start_row..self.height {
            let start_col = if y == start_row { self.cursor_x } else { 0 };
            for x in start_col..self.width {
                let row = y as usize;
                let col = x as usize;
                self.cells[row][col] = ' ';
                self.fg_colors[row][col] = self.current_fg;
                self.bg_colors[row][col] = self.current_bg;
                self.attributes[row][col] = CellAttributes::default();
            }
        }
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = Some((self.cursor_x, self.cursor_y));
    }

    pub fn restore_cursor(&mut self) {
        if let Some((x, y)) = self.saved_cursor {
            self.cursor_x = x.min(self.width.saturating_sub(1));
            self.cursor_y = y.min(self.height.saturating_sub(1));
        }
    }

    pub fn backspace(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        }
    }

    /// Render the screen to an RGB image
    pub fn render_to_image(&self) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
        let img_width = self.width * FONT_WIDTH * PIXEL_SCALE;
        let img_height = self.height * FONT_HEIGHT * PIXEL_SCALE;

        let mut img = ImageBuffer::new(img_width, img_height);

        for y in 0..self.height {
            for x in 0..self.width {
                let ch = self.cells[y as usize][x as usize];
                let mut fg = self.fg_colors[y as usize][x as usize];
                let mut bg = self.bg_colors[y as usize][x as usize];
                let attrs = self.attributes[y as usize][x as usize];

                if attrs.inverse {
                    std::mem::swap(&mut fg, &mut bg);
                }
                if attrs.bold {
                    fg = brighten_color(fg);
                }

                let bitmap = glyph_bitmap(ch);

                for py in 0..FONT_HEIGHT {
                    let row = bitmap[py as usize];
                    for px in 0..FONT_WIDTH {
                        // font8x8 stores the leftmost pixel in the least significant bit
                        let bit = (row >> px) & 1;
                        let mut color = if bit == 1 { fg } else { bg };

                        if attrs.underline && py >= FONT_HEIGHT - 2 {
                            color = fg;
                        }

                        for sy in 0..PIXEL_SCALE {
                            for sx in 0..PIXEL_SCALE {
                                let img_x = x * FONT_WIDTH * PIXEL_SCALE + px * PIXEL_SCALE + sx;
                                let img_y = y * FONT_HEIGHT * PIXEL_SCALE + py * PIXEL_SCALE + sy;
                                if img_x < img_width && img_y < img_height {
                                    img.put_pixel(img_x, img_y, Rgb(color));
                                }
                            }
                        }
                    }
                }
            }
        }

        img
    }

    /// Dump the screen as visible text
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity((self.width as usize + 1) * self.height as usize);
        for row in &self.cells {
            for ch in row {
                out.push(*ch);
            }
            out.push('\n');
        }
        out
    }

    #[cfg(test)]
    fn cell(&self, x: u32, y: u32) -> (char, [u8; 3], [u8; 3]) {
        (
            self.cells[y as usize][x as usize],
            self.fg_colors[y as usize][x as usize],
            self.bg_colors[y as usize][x as usize],
        )
    }
}

struct ScreenPerformer<'a> {
    screen: &'a mut ScreenBuffer,
}

impl<'a> ScreenPerformer<'a> {
    fn param_or(params: &Params, index: usize, default: u16) -> u16 {
        params
            .iter()
            .nth(index)
            .and_then(|p| p.first())
            .copied()
            .filter(|v| *v != 0)
            .unwrap_or(default)
    }

    fn handle_sgr(&mut self, params: &Params) {
        if params.is_empty() {
            self.screen.reset_attributes();
            return;
        }

        let values: Vec<u16> = params.iter().flat_map(|chunk| chunk.iter().copied()).collect();
        if values.is_empty() {
            self.screen.reset_attributes();
            return;
        }

        let mut i = 0;
        while i < values.len() {
            let value = values[i];
            match value {
                0 => self.screen.reset_attributes(),
                1 => self.screen.set_bold(true),
                4 => self.screen.set_underline(true),
                7 => self.screen.set_inverse(true),
                22 => self.screen.set_bold(false),
                24 => self.screen.set_underline(false),
                27 => self.screen.set_inverse(false),
                30..=37 => self.screen.set_fg_color(ANSI_COLORS[(value - 30) as usize]),
                40..=47 => self.screen.set_bg_color(ANSI_COLORS[(value - 40) as usize]),
                90..=97 => self
                    .screen
                    .set_fg_color(ANSI_BRIGHT_COLORS[(value - 90) as usize]),
                100..=107 => self
                    .screen
                    .set_bg_color(ANSI_BRIGHT_COLORS[(value - 100) as usize]),
                38 | 48 => {
                    let is_fg = value == 38;
                    if i + 1 >= values.len() {
                        break;
                    }
                    let mode = values[i + 1];
                    match mode {
                        2 => {
                            if i + 4 >= values.len() {
                                break;
                            }
                            let r = clamp_u16_to_u8(values[i + 2]);
                            let g = clamp_u16_to_u8(values[i + 3]);
                            let b = clamp_u16_to_u8(values[i + 4]);
                            let color = [r, g, b];
                            if is_fg {
                                self.screen.set_fg_color(color);
                            } else {
                                self.screen.set_bg_color(color);
                            }
                            i += 5;
                            continue;
                        }
                        5 => {
                            if i + 2 >= values.len() {
                                break;
                            }
                            let idx = values[i + 2] as u8;
                            let color = xterm_256_to_rgb(idx);
                            if is_fg {
                                self.screen.set_fg_color(color);
                            } else {
                                self.screen.set_bg_color(color);
                            }
                            i += 3;
                            continue;
                        }
                        _ => {
                            i += 2;
                            continue;
                        }
                    }
                }
                39 => self.screen.reset_fg(),
                49 => self.screen.reset_bg(),
                _ => {}
            }
            i += 1;
        }
    }
}

impl<'a> Perform for ScreenPerformer<'a> {
    fn print(&mut self, c: char) {
        self.screen.write_char(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.screen.write_char('\n'),
            b'\r' => self.screen.write_char('\r'),
            b'\t' => self.screen.write_char('\t'),
            0x08 => self.screen.backspace(),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, action: char) {
        let private_mode = intermediates.iter().any(|b| *b == b'?');

        match action {
            'H' | 'f' => {
                let row = Self::param_or(params, 0, 1).saturating_sub(1);
                let col = Self::param_or(params, 1, 1).saturating_sub(1);
                self.screen.move_cursor(u32::from(col), u32::from(row));
            }
            'A' => {
                let value = Self::param_or(params, 0, 1) as i32;
                self.screen.move_cursor_rel(0, -value);
            }
            'B' => {
                let value = Self::param_or(params, 0, 1) as i32;
                self.screen.move_cursor_rel(0, value);
            }
            'C' => {
                let value = Self::param_or(params, 0, 1) as i32;
                self.screen.move_cursor_rel(value, 0);
            }
            'D' => {
                let value = Self::param_or(params, 0, 1) as i32;
                self.screen.move_cursor_rel(-value, 0);
            }
            'J' => {
                let mode = Self::param_or(params, 0, 0);
                match mode {
                    0 => self.screen.clear_from_cursor(),
                    1 => {} // unsupported
                    2 | 3 => self.screen.clear(),
                    _ => {}
                }
            }
            'K' => self.screen.clear_line_from_cursor(),
            'm' => self.handle_sgr(params),
            's' => self.screen.save_cursor(),
            'u' => self.screen.restore_cursor(),
            'h' if private_mode => {
                let mode = Self::param_or(params, 0, 0);
                match mode {
                    47 | 1047 | 1049 => self.screen.enter_alternate_screen(),
                    _ => {}
                }
            }
            'l' if private_mode => {
                let mode = Self::param_or(params, 0, 0);
                match mode {
                    47 | 1047 | 1049 => self.screen.leave_alternate_screen(),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, byte: u8) {
        match byte {
            b'7' => self.screen.save_cursor(),
            b'8' => self.screen.restore_cursor(),
            b'c' => self.screen.clear(),
            _ => {}
        }
    }
}

/// ANSI escape-sequence interpreter feeding a [`ScreenBuffer`], while
/// also retaining the raw byte stream for ANSI-text captures.
pub struct AnsiInterpreter {
    screen: ScreenBuffer,
    parser: AnsiParser,
    raw: Vec<u8>,
}

impl AnsiInterpreter {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen: ScreenBuffer::new(width, height),
            parser: AnsiParser::new(),
            raw: Vec::new(),
        }
    }

    pub fn process_byte(&mut self, byte: u8) {
        self.raw.push(byte);
        let mut performer = ScreenPerformer {
            screen: &mut self.screen,
        };
        self.parser.advance(&mut performer, byte);
    }

    pub fn screen(&self) -> &ScreenBuffer {
        &self.screen
    }

    /// The raw byte stream received so far, lossily decoded
    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

/// The invisible display surface: a PTY pair, the child process running
/// inside it, a reader thread, and the ANSI interpreter.
///
/// Resources acquired during construction are recorded and released in
/// reverse on shutdown, including when construction fails partway.
pub struct PtySurface {
    interpreter: AnsiInterpreter,
    rx: Receiver<Vec<u8>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
    _master: Box<dyn MasterPty + Send>,
    cols: u16,
    rows: u16,
}

impl PtySurface {
    /// Spawn `command` inside a fresh PTY of the given size and wait for
    /// the initial render to settle.
    pub fn spawn(command: &str, size: TerminalSize) -> Result<Self, CaptureError> {
        let (cols, rows) = size.dimensions();
        let mut interpreter = AnsiInterpreter::new(u32::from(cols), u32::from(rows));

        let mut words = command.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| CaptureError::TargetNotFound("empty command".to_string()))?;
        let args: Vec<&str> = words.collect();

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CaptureError::Internal(format!("failed to open PTY: {}", e)))?;

        let resolved = resolve_binary_path(program);
        let program_path = resolved
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string());

        let mut cmd = CommandBuilder::new(program_path.clone());
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLUMNS", cols.to_string());
        cmd.env("LINES", rows.to_string());
        for arg in &args {
            cmd.arg(arg);
        }

        // From here on, every acquired resource must be released if a
        // later step fails: dropping the pair/child/master handles closes
        // the PTY, and a spawned child is killed explicitly below.
        let child = match pair.slave.spawn_command(cmd) {
            Ok(child) => child,
            Err(e) => {
                return Err(CaptureError::TargetNotFound(format!(
                    "failed to spawn '{}': {}",
                    program_path, e
                )));
            }
        };
        drop(pair.slave);

        let reader = match pair.master.try_clone_reader() {
            Ok(reader) => reader,
            Err(e) => {
                let mut child = child;
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Internal(format!(
                    "failed to clone PTY reader: {}",
                    e
                )));
            }
        };
        let writer = match pair.master.take_writer() {
            Ok(writer) => writer,
            Err(e) => {
                let mut child = child;
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Internal(format!(
                    "failed to take PTY writer: {}",
                    e
                )));
            }
        };

        let rx = spawn_reader(reader);
        drain_until_quiet(&rx, &mut interpreter, QUIET_WINDOW, MAX_INITIAL_RENDER_WAIT);

        Ok(Self {
            interpreter,
            rx,
            writer: Some(writer),
            child,
            _master: pair.master,
            cols,
            rows,
        })
    }

    /// Send one logical input (key name or literal text) and wait for
    /// the screen to settle again.
    pub fn send_input(&mut self, input: &str) -> Result<(), CaptureError> {
        let sequence = parse_input(input);
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| CaptureError::Internal("PTY writer already closed".to_string()))?;
        writer
            .write_all(&sequence)
            .and_then(|_| writer.flush())
            .map_err(|e| CaptureError::Internal(format!("failed to send '{}': {}", input, e)))?;
        drain_until_quiet(&self.rx, &mut self.interpreter, QUIET_WINDOW, MAX_INPUT_RENDER_WAIT);
        Ok(())
    }

    /// Absorb any pending output without sending anything
    pub fn settle(&mut self) {
        drain_until_quiet(&self.rx, &mut self.interpreter, QUIET_WINDOW, MAX_INPUT_RENDER_WAIT);
    }

    /// Render the current screen to PNG bytes
    pub fn screenshot_png(&self) -> Result<Vec<u8>, CaptureError> {
        let img = self.interpreter.screen().render_to_image();
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| CaptureError::Internal(format!("failed to encode PNG: {}", e)))?;
        Ok(png)
    }

    /// The raw ANSI stream received so far
    pub fn ansi_text(&self) -> String {
        self.interpreter.raw_text()
    }

    /// The screen as visible text (escapes stripped)
    pub fn plain_text(&self) -> String {
        self.interpreter.screen().to_text()
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// Drain remaining output and terminate the child. Safe to call on a
    /// surface whose child already exited.
    pub fn shutdown(mut self) {
        // Reverse acquisition order: writer, then pending output, then child
        self.writer.take();

        let start = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => {
                    drain_until_quiet(&self.rx, &mut self.interpreter, QUIET_WINDOW, QUIET_WINDOW);
                    return;
                }
                Ok(None) => {}
                Err(_) => break,
            }
            if start.elapsed() >= PROCESS_DRAIN_TIMEOUT {
                break;
            }
            match self.rx.recv_timeout(Duration::from_millis(60)) {
                Ok(chunk) => {
                    for byte in chunk {
                        self.interpreter.process_byte(byte);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Capture adapter for terminal programs: the PTY surface plus the
/// rendered/ANSI contract selection.
pub struct TerminalAdapter {
    core: AdapterCore,
    mode: TerminalMode,
    size: TerminalSize,
    surface: Option<PtySurface>,
}

impl TerminalAdapter {
    pub fn new(options: CaptureOptions, mode: TerminalMode) -> Self {
        Self {
            core: AdapterCore::new(options),
            mode,
            size: crate::config::get().defaults.terminal_size,
            surface: None,
        }
    }

    pub fn with_size(mut self, size: TerminalSize) -> Self {
        self.size = size;
        self
    }

    fn command_of(target: &str) -> &str {
        target.strip_prefix("tui:").unwrap_or(target).trim()
    }

    /// Capture the active surface, or spin a throwaway one up for a
    /// single shot.
    fn capture_surface(
        &mut self,
        target: &str,
        options: Option<&CaptureOptions>,
        event: Option<&str>,
    ) -> CaptureResult {
        let opts = options.cloned().unwrap_or_else(|| self.core.options.clone());
        if let Err(e) = opts.validate() {
            return CaptureResult::failed(self.capture_kind(), e);
        }

        let command = Self::command_of(target);
        let one_shot = self.surface.is_none();

        if one_shot {
            match PtySurface::spawn(command, self.size) {
                Ok(surface) => self.surface = Some(surface),
                Err(e) => return CaptureResult::failed(self.capture_kind(), e),
            }
        }

        if opts.wait_before > 0.0 {
            thread::sleep(Duration::from_secs_f64(opts.wait_before));
        }

        let kind = self.capture_kind();
        let result = match self.surface.as_mut() {
            Some(surface) => {
                surface.settle();
                match self.mode {
                    TerminalMode::Rendered => Self::rendered_result(surface, &self.core),
                    TerminalMode::Ansi => Self::ansi_result(surface, &self.core),
                }
            }
            None => Err(CaptureError::Internal(
                "terminal surface unavailable".to_string(),
            )),
        };

        let mut result = match result {
            Ok(r) => r,
            Err(e) => CaptureResult::failed(kind, e),
        };

        if one_shot {
            if let Some(surface) = self.surface.take() {
                surface.shutdown();
            }
        }

        result = result.with_meta("command", serde_json::Value::String(command.to_string()));
        if let Some(event) = event {
            result = result.with_event(event);
        }
        result
    }

    fn rendered_result(
        surface: &mut PtySurface,
        core: &AdapterCore,
    ) -> Result<CaptureResult, CaptureError> {
        let png = surface.screenshot_png()?;
        let path = core.output_path("terminal", CaptureKind::Screenshot)?;
        std::fs::write(&path, &png)?;
        let (cols, rows) = surface.dimensions();
        Ok(CaptureResult::file(CaptureKind::Screenshot, &path)
            .with_meta("terminal_cols", serde_json::json!(cols))
            .with_meta("terminal_rows", serde_json::json!(rows))
            .with_meta(
                "pixel_size",
                serde_json::json!(format!(
                    "{}x{}",
                    u32::from(cols) * CELL_WIDTH,
                    u32::from(rows) * CELL_HEIGHT
                )),
            ))
    }

    fn ansi_result(
        surface: &mut PtySurface,
        core: &AdapterCore,
    ) -> Result<CaptureResult, CaptureError> {
        let text = surface.ansi_text();
        let path = core.output_path("terminal", CaptureKind::Ansi)?;
        std::fs::write(&path, &text)?;
        Ok(CaptureResult::text(CaptureKind::Ansi, text).with_path(&path))
    }

}

impl CaptureAdapter for TerminalAdapter {
    fn source(&self) -> &'static str {
        "terminal"
    }

    fn capture_kind(&self) -> CaptureKind {
        match self.mode {
            TerminalMode::Rendered => CaptureKind::Screenshot,
            TerminalMode::Ansi => CaptureKind::Ansi,
        }
    }

    fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AdapterCore {
        &mut self.core
    }

    fn capture(&mut self, target: &str, options: Option<&CaptureOptions>) -> CaptureResult {
        let result = self.capture_surface(target, options, None);
        self.core.record(result)
    }

    /// Terminal events: `key:<name>` and `input:<text>` are written to
    /// the PTY, `wait:<secs>` pauses; all are followed by a capture.
    fn capture_on_event(
        &mut self,
        target: &str,
        step: &EventStep,
        options: Option<&CaptureOptions>,
    ) -> CaptureResult {
        let had_session = self.surface.is_some();
        if !had_session {
            // One-shot event capture: bring a surface up just for this call
            match PtySurface::spawn(Self::command_of(target), self.size) {
                Ok(surface) => self.surface = Some(surface),
                Err(e) => {
                    let result = CaptureResult::failed(self.capture_kind(), e);
                    return self.core.record(result);
                }
            }
        }

        let acted = match (step.event.as_str(), step.selector.as_deref()) {
            ("key", Some(key)) => {
                let send = match self.surface.as_mut() {
                    Some(surface) => surface.send_input(key),
                    None => Ok(()),
                };
                send.map(|_| format!("key:{}", key))
            }
            ("input", Some(text)) => {
                let send = match self.surface.as_mut() {
                    Some(surface) => match surface.send_input(text) {
                        Ok(()) => surface.send_input("enter"),
                        Err(e) => Err(e),
                    },
                    None => Ok(()),
                };
                send.map(|_| format!("input:{}", text))
            }
            ("wait", selector) => {
                let secs = selector.and_then(|s| s.parse::<f64>().ok()).unwrap_or(1.0);
                thread::sleep(Duration::from_secs_f64(secs));
                Ok(format!("wait:{}", secs))
            }
            _ => Ok(step.event.clone()),
        };

        let result = match acted {
            Ok(event_label) => self.capture_surface(target, options, Some(&event_label)),
            Err(e) => CaptureResult::failed(self.capture_kind(), e),
        };
        let result = self.core.record(result);

        if !had_session {
            if let Some(surface) = self.surface.take() {
                surface.shutdown();
            }
        }
        result
    }

    fn start_session(&mut self, target: &str) -> bool {
        if self.surface.is_some() {
            return true;
        }
        match PtySurface::spawn(Self::command_of(target), self.size) {
            Ok(surface) => {
                self.surface = Some(surface);
                self.core.session_active = true;
                true
            }
            Err(e) => {
                eprintln!("Warning: failed to start terminal session: {}", e);
                self.core.session_active = false;
                false
            }
        }
    }

    fn end_session(&mut self) -> Vec<CaptureResult> {
        if let Some(surface) = self.surface.take() {
            surface.shutdown();
        }
        self.core.session_active = false;
        self.core.history().to_vec()
    }

    fn can_handle(&self, target: &str) -> bool {
        let lower = target.to_lowercase();
        lower.starts_with("tui:")
            || ["ratatui", "crossterm", "termion", "ncurses", "cursive"]
                .iter()
                .any(|m| lower.contains(m))
    }
}

impl Drop for TerminalAdapter {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.take() {
            surface.shutdown();
        }
    }
}

/// Parse an input string into the bytes to send to the PTY
fn parse_input(input: &str) -> Vec<u8> {
    let input_lower = input.to_lowercase();
    let input_lower = input_lower.trim();

    match input_lower {
        "up" => b"\x1b[A".to_vec(),
        "down" => b"\x1b[B".to_vec(),
        "right" => b"\x1b[C".to_vec(),
        "left" => b"\x1b[D".to_vec(),
        "home" => b"\x1b[H".to_vec(),
        "end" => b"\x1b[F".to_vec(),
        "pageup" | "page_up" | "pgup" => b"\x1b[5~".to_vec(),
        "pagedown" | "page_down" | "pgdn" => b"\x1b[6~".to_vec(),
        "insert" | "ins" => b"\x1b[2~".to_vec(),
        "delete" | "del" => b"\x1b[3~".to_vec(),
        "enter" | "return" => vec![b'\r'],
        "space" => vec![b' '],
        "tab" => vec![b'\t'],
        "backspace" | "bs" => vec![0x7f],
        "escape" | "esc" => vec![0x1b],
        "f1" => b"\x1bOP".to_vec(),
        "f2" => b"\x1bOQ".to_vec(),
        "f3" => b"\x1bOR".to_vec(),
        "f4" => b"\x1bOS".to_vec(),
        "f5" => b"\x1b[15~".to_vec(),
        "f6" => b"\x1b[17~".to_vec(),
        "f7" => b"\x1b[18~".to_vec(),
        "f8" => b"\x1b[19~".to_vec(),
        "f9" => b"\x1b[20~".to_vec(),
        "f10" => b"\x1b[21~".to_vec(),
        "f11" => b"\x1b[23~".to_vec(),
        "f12" => b"\x1b[24~".to_vec(),
        s if s.starts_with("ctrl+") || s.starts_with("ctrl-") || s.starts_with("c-") => {
            let key = s.split(&['+', '-'][..]).last().unwrap_or("");
            if key.len() == 1 {
                let ch = key.chars().next().unwrap().to_ascii_lowercase();
                if ch.is_ascii_lowercase() {
                    vec![(ch as u8) - b'a' + 1]
                } else {
                    input.as_bytes().to_vec()
                }
            } else if key == "space" {
                vec![0x00]
            } else {
                input.as_bytes().to_vec()
            }
        }
        s if s.starts_with("alt+") || s.starts_with("alt-") || s.starts_with("m-") => {
            let key = s.split(&['+', '-'][..]).last().unwrap_or("");
            let mut result = vec![0x1b];
            result.extend(key.as_bytes());
            result
        }
        _ => input.as_bytes().to_vec(),
    }
}

fn spawn_reader(mut reader: Box<dyn Read + Send>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(size) => {
                    if tx.send(buffer[..size].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) => match err.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    _ => break,
                },
            }
        }
    });
    rx
}

/// Drain output until quiet or max time reached; handles apps that
/// output continuously (animations).
fn drain_until_quiet(
    rx: &Receiver<Vec<u8>>,
    interpreter: &mut AnsiInterpreter,
    quiet_window: Duration,
    max_wait: Duration,
) {
    let start = Instant::now();
    let mut last_activity = Instant::now();

    loop {
        if start.elapsed() >= max_wait {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(chunk) => {
                for byte in chunk {
                    interpreter.process_byte(byte);
                }
                last_activity = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_activity.elapsed() >= quiet_window {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Final drain of any remaining data
    while let Ok(chunk) = rx.try_recv() {
        for byte in chunk {
            interpreter.process_byte(byte);
        }
    }
}

fn resolve_binary_path(command: &str) -> Option<PathBuf> {
    let path = Path::new(command);

    let looks_like_path = path.is_absolute()
        || command.contains(std::path::MAIN_SEPARATOR)
        || command.starts_with("./")
        || command.starts_with(".\\");

    if !looks_like_path {
        return None;
    }

    if path.exists() {
        std::fs::canonicalize(path).ok()
    } else {
        Some(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glyph_bitmaps_are_scaled_consistently() {
        let bitmap = glyph_bitmap('A');
        assert!(
            bitmap.iter().any(|row| *row != 0),
            "bitmap should contain lit pixels"
        );
        for pair in bitmap.chunks_exact(2) {
            assert_eq!(
                pair[0], pair[1],
                "each row should be doubled to fill the cell height"
            );
        }
    }

    #[test]
    fn rendered_pixels_follow_font_bitmaps() {
        let mut screen = ScreenBuffer::new(1, 2);
        let fg = [200, 210, 220];
        let bg = [10, 20, 30];
        screen.set_fg_color(fg);
        screen.set_bg_color(bg);
        screen.write_char('R');
        let (ch, cell_fg, cell_bg) = screen.cell(0, 0);
        assert_eq!(ch, 'R');
        assert_eq!(cell_fg, fg);
        assert_eq!(cell_bg, bg);

        let bitmap = glyph_bitmap('R');
        let image = screen.render_to_image();

        for (py, row) in bitmap.iter().enumerate() {
            for px in 0..FONT_WIDTH as usize {
                let expected_bit = (row >> px) & 1;
                let sample_x = px as u32 * PIXEL_SCALE;
                let sample_y = py as u32 * PIXEL_SCALE;
                let pixel = image.get_pixel(sample_x, sample_y).0;
                if expected_bit == 1 {
                    assert_eq!(pixel, fg, "expected foreground at ({px}, {py})");
                } else {
                    assert_eq!(pixel, bg, "expected background at ({px}, {py})");
                }
            }
        }
    }

    #[test]
    fn interpreter_applies_sgr_colors() {
        let mut interp = AnsiInterpreter::new(10, 2);
        for byte in b"\x1b[31mX" {
            interp.process_byte(*byte);
        }
        let (ch, fg, _) = interp.screen().cell(0, 0);
        assert_eq!(ch, 'X');
        assert_eq!(fg, ANSI_COLORS[1]);
    }

    #[test]
    fn interpreter_retains_raw_stream() {
        let mut interp = AnsiInterpreter::new(10, 2);
        for byte in b"\x1b[2Jhello" {
            interp.process_byte(*byte);
        }
        assert_eq!(interp.raw_text(), "\x1b[2Jhello");
        assert!(interp.screen().to_text().contains("hello"));
    }

    #[test]
    fn alternate_screen_roundtrip() {
        let mut screen = ScreenBuffer::new(8, 2);
        screen.write_char('a');
        screen.enter_alternate_screen();
        screen.write_char('b');
        assert!(screen.to_text().contains('b'));
        assert!(!screen.to_text().contains('a'));
        screen.leave_alternate_screen();
        assert!(screen.to_text().contains('a'));
    }

    #[test]
    fn terminal_size_parse() {
        assert_eq!(TerminalSize::parse("compact"), Some(TerminalSize::Compact));
        assert_eq!(
            TerminalSize::parse("100x30"),
            Some(TerminalSize::Custom(100, 30))
        );
        assert_eq!(TerminalSize::parse("bogus"), None);
    }

    #[test]
    fn input_parsing_maps_keys() {
        assert_eq!(parse_input("up"), b"\x1b[A".to_vec());
        assert_eq!(parse_input("enter"), vec![b'\r']);
        assert_eq!(parse_input("ctrl+c"), vec![3]);
        assert_eq!(parse_input("x"), b"x".to_vec());
    }

    #[test]
    #[cfg(unix)]
    fn one_shot_rendered_capture_of_echo() {
        let dir = tempfile::TempDir::new().unwrap();
        let opts = CaptureOptions::default()
            .output_dir(dir.path())
            .wait_before(0.0);
        let mut adapter =
            TerminalAdapter::new(opts, TerminalMode::Rendered).with_size(TerminalSize::Compact);
        let result = adapter.capture("echo pty-hello", None);
        assert!(result.success, "error: {:?}", result.error);
        let path = result.content_path.as_ref().unwrap();
        assert!(path.exists());
        // PNG magic
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(&bytes[0..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    #[cfg(unix)]
    fn missing_binary_fails_without_panic() {
        let dir = tempfile::TempDir::new().unwrap();
        let opts = CaptureOptions::default()
            .output_dir(dir.path())
            .wait_before(0.0);
        let mut adapter = TerminalAdapter::new(opts, TerminalMode::Ansi);
        let result = adapter.capture("definitely-not-a-real-binary-xyz", None);
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
