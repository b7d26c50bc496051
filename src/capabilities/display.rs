//! `display` namespace: drawing on the RGB565 panel.
//!
//! Convention: [`ErrorConvention::Raise`]. Colour arguments are masked to
//! 16 bits, coordinates and sizes saturate to the `i16` range, `backlight` and `rgb`
//! clamp their inputs, and `setfont` rejects unknown font ids.

use std::{cell::RefCell, rc::Rc};

use mlua::Value;

use crate::bridge::{ErrorConvention, Namespace, NativeError, truthy};

/// Packed RGB565 colour.
pub type Color = u16;

pub const WIDTH: u16 = 800;
pub const HEIGHT: u16 = 480;

pub const BLACK: Color = 0x0000;
pub const WHITE: Color = 0xFFFF;
pub const RED: Color = 0xF800;
pub const GREEN: Color = 0x07E0;
pub const BLUE: Color = 0x001F;
pub const YELLOW: Color = 0xFFE0;
pub const CYAN: Color = 0x07FF;
pub const MAGENTA: Color = 0xF81F;
pub const ORANGE: Color = 0xFD20;
pub const PINK: Color = 0xFE19;
pub const PURPLE: Color = 0x8010;
pub const GRAY: Color = 0x8410;
pub const DARKGRAY: Color = 0x4208;
pub const LIGHTGRAY: Color = 0xC618;

const PALETTE: [(&str, Color); 14] = [
    ("BLACK", BLACK),
    ("WHITE", WHITE),
    ("RED", RED),
    ("GREEN", GREEN),
    ("BLUE", BLUE),
    ("YELLOW", YELLOW),
    ("CYAN", CYAN),
    ("MAGENTA", MAGENTA),
    ("ORANGE", ORANGE),
    ("PINK", PINK),
    ("PURPLE", PURPLE),
    ("GRAY", GRAY),
    ("DARKGRAY", DARKGRAY),
    ("LIGHTGRAY", LIGHTGRAY),
];

pub fn rgb565(r: u8, g: u8, b: u8) -> Color {
    ((u16::from(r) & 0xF8) << 8) | ((u16::from(g) & 0xFC) << 3) | (u16::from(b) >> 3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Font {
    #[default]
    Default = 0,
    Inter20 = 1,
    Garamond20 = 2,
}

impl Font {
    pub const COUNT: i64 = 3;

    pub fn from_id(id: i64) -> Option<Font> {
        match id {
            0 => Some(Font::Default),
            1 => Some(Font::Inter20),
            2 => Some(Font::Garamond20),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        self as i64
    }
}

/// Text handed to the driver; glyph rendering belongs to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRun {
    pub x: i32,
    pub y: i32,
    pub text: String,
    pub color: Color,
    pub background: Option<Color>,
    pub font: Font,
}

/// Panel driver. Shape primitives default to pixel-level implementations.
pub trait DisplayDriver {
    fn init(&mut self) -> Result<(), NativeError>;
    fn width(&self) -> u16;
    fn height(&self) -> u16;
    fn set_pixel(&mut self, x: i32, y: i32, color: Color);
    fn pixel(&self, x: i32, y: i32) -> Color;
    fn text(&mut self, run: TextRun);
    fn set_backlight(&mut self, percent: u8);
    fn set_font(&mut self, font: Font);
    fn font(&self) -> Font;

    fn clear(&mut self, color: Color) {
        let (w, h) = (i32::from(self.width()), i32::from(self.height()));
        self.fill_rect(0, 0, w, h, color);
    }

    fn hline(&mut self, x: i32, y: i32, w: i32, color: Color) {
        for dx in 0..w.max(0) {
            self.set_pixel(x.saturating_add(dx), y, color);
        }
    }

    fn vline(&mut self, x: i32, y: i32, h: i32, color: Color) {
        for dy in 0..h.max(0) {
            self.set_pixel(x, y.saturating_add(dy), color);
        }
    }

    fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color) {
        for dy in 0..h.max(0) {
            self.hline(x, y.saturating_add(dy), w, color);
        }
    }

    fn rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color, filled: bool) {
        if filled {
            self.fill_rect(x, y, w, h, color);
            return;
        }
        self.hline(x, y, w, color);
        self.hline(x, y + h - 1, w, color);
        self.vline(x, y, h, color);
        self.vline(x + w - 1, y, h, color);
    }

    fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: Color) {
        let (mut x, mut y) = (i64::from(x0), i64::from(y0));
        let (x1, y1) = (i64::from(x1), i64::from(y1));
        let dx = (x1 - x).abs();
        let dy = -(y1 - y).abs();
        let sx = if x < x1 { 1 } else { -1 };
        let sy = if y < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.set_pixel(x as i32, y as i32, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn circle(&mut self, cx: i32, cy: i32, r: i32, color: Color, filled: bool) {
        if r < 0 {
            return;
        }
        let (mut x, mut y, mut err) = (r, 0, 1 - r);
        while x >= y {
            if filled {
                self.hline(cx - x, cy + y, 2 * x + 1, color);
                self.hline(cx - x, cy - y, 2 * x + 1, color);
                self.hline(cx - y, cy + x, 2 * y + 1, color);
                self.hline(cx - y, cy - x, 2 * y + 1, color);
            } else {
                for (px, py) in [(x, y), (y, x), (-y, x), (-x, y), (-x, -y), (-y, -x), (y, -x), (x, -y)] {
                    self.set_pixel(cx + px, cy + py, color);
                }
            }
            y += 1;
            if err < 0 {
                err += 2 * y + 1;
            } else {
                x -= 1;
                err += 2 * (y - x) + 1;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn triangle(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, x2: i32, y2: i32, color: Color, filled: bool) {
        if !filled {
            self.line(x0, y0, x1, y1, color);
            self.line(x1, y1, x2, y2, color);
            self.line(x2, y2, x0, y0, color);
            return;
        }
        let edge = |ax: i64, ay: i64, bx: i64, by: i64, px: i64, py: i64| (bx - ax) * (py - ay) - (by - ay) * (px - ax);
        let (ax, ay, bx, by, cx, cy) = (
            i64::from(x0),
            i64::from(y0),
            i64::from(x1),
            i64::from(y1),
            i64::from(x2),
            i64::from(y2),
        );
        let area = edge(ax, ay, bx, by, cx, cy);
        let (min_x, max_x) = (x0.min(x1).min(x2).max(0), x0.max(x1).max(x2).min(i32::from(self.width()) - 1));
        let (min_y, max_y) = (y0.min(y1).min(y2).max(0), y0.max(y1).max(y2).min(i32::from(self.height()) - 1));
        for py in min_y..=max_y {
            for px in min_x..=max_x {
                let (px64, py64) = (i64::from(px), i64::from(py));
                let w0 = edge(bx, by, cx, cy, px64, py64);
                let w1 = edge(cx, cy, ax, ay, px64, py64);
                let w2 = edge(ax, ay, bx, by, px64, py64);
                let inside = if area >= 0 {
                    w0 >= 0 && w1 >= 0 && w2 >= 0
                } else {
                    w0 <= 0 && w1 <= 0 && w2 <= 0
                };
                if inside {
                    self.set_pixel(px, py, color);
                }
            }
        }
    }

    fn image(&mut self, x: i32, y: i32, w: i32, h: i32, pixels: &[Color]) {
        for (idx, color) in pixels.iter().take((w.max(0) * h.max(0)) as usize).enumerate() {
            let idx = idx as i32;
            self.set_pixel(x + idx % w, y + idx / w, *color);
        }
    }
}

/// In-memory panel used when no hardware is attached.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    pixels: Vec<Color>,
    pub backlight: u8,
    pub initialized: bool,
    font: Font,
    pub texts: Vec<TextRun>,
}

impl Framebuffer {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![BLACK; usize::from(width) * usize::from(height)],
            backlight: 100,
            initialized: false,
            font: Font::Default,
            texts: Vec::new(),
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= i32::from(self.width) || y >= i32::from(self.height) {
            return None;
        }
        Some(y as usize * usize::from(self.width) + x as usize)
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new(WIDTH, HEIGHT)
    }
}

impl DisplayDriver for Framebuffer {
    fn init(&mut self) -> Result<(), NativeError> {
        self.initialized = true;
        Ok(())
    }

    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        if let Some(idx) = self.index(x, y) {
            self.pixels[idx] = color;
        }
    }

    fn pixel(&self, x: i32, y: i32) -> Color {
        self.index(x, y).map_or(BLACK, |idx| self.pixels[idx])
    }

    fn text(&mut self, run: TextRun) {
        self.texts.push(run);
    }

    fn set_backlight(&mut self, percent: u8) {
        self.backlight = percent;
    }

    fn set_font(&mut self, font: Font) {
        self.font = font;
    }

    fn font(&self) -> Font {
        self.font
    }

    fn clear(&mut self, color: Color) {
        self.pixels.fill(color);
        self.texts.clear();
    }

    fn hline(&mut self, x: i32, y: i32, w: i32, color: Color) {
        if y < 0 || y >= i32::from(self.height) {
            return;
        }
        let start = x.max(0);
        let end = x.saturating_add(w).min(i32::from(self.width));
        for px in start..end {
            self.set_pixel(px, y, color);
        }
    }

    fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color) {
        let start = y.max(0);
        let end = y.saturating_add(h).min(i32::from(self.height));
        for py in start..end {
            self.hline(x, py, w, color);
        }
    }
}

fn color(value: i64) -> Color {
    value as Color
}

fn coord(value: i64) -> i32 {
    value.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i32
}

fn channel(value: i64) -> u8 {
    value.clamp(0, 255) as u8
}

pub fn namespace(display: Rc<RefCell<dyn DisplayDriver>>) -> Namespace {
    let mut ns = Namespace::new("display", ErrorConvention::Raise);
    for (name, value) in PALETTE {
        ns = ns.constant(name, value);
    }
    ns = ns
        .constant("WIDTH", WIDTH)
        .constant("HEIGHT", HEIGHT)
        .constant("FONT_DEFAULT", Font::Default.id())
        .constant("FONT_INTER_20", Font::Inter20.id())
        .constant("FONT_GARAMOND_20", Font::Garamond20.id());

    let d = display;
    ns.function("init", {
        let d = d.clone();
        move |_, ()| {
            d.borrow_mut().init()?;
            Ok(true)
        }
    })
    .function("clear", {
        let d = d.clone();
        move |_, c: Option<i64>| {
            d.borrow_mut().clear(c.map_or(BLACK, color));
            Ok(())
        }
    })
    .function("pixel", {
        let d = d.clone();
        move |_, (x, y, c): (i64, i64, i64)| {
            d.borrow_mut().set_pixel(coord(x), coord(y), color(c));
            Ok(())
        }
    })
    .function("getpixel", {
        let d = d.clone();
        move |_, (x, y): (i64, i64)| Ok(i64::from(d.borrow().pixel(coord(x), coord(y))))
    })
    .function("line", {
        let d = d.clone();
        move |_, (x0, y0, x1, y1, c): (i64, i64, i64, i64, i64)| {
            d.borrow_mut().line(coord(x0), coord(y0), coord(x1), coord(y1), color(c));
            Ok(())
        }
    })
    .function("hline", {
        let d = d.clone();
        move |_, (x, y, w, c): (i64, i64, i64, i64)| {
            d.borrow_mut().hline(coord(x), coord(y), coord(w), color(c));
            Ok(())
        }
    })
    .function("vline", {
        let d = d.clone();
        move |_, (x, y, h, c): (i64, i64, i64, i64)| {
            d.borrow_mut().vline(coord(x), coord(y), coord(h), color(c));
            Ok(())
        }
    })
    .function("rect", {
        let d = d.clone();
        move |_, (x, y, w, h, c, filled): (i64, i64, i64, i64, i64, Value)| {
            d.borrow_mut()
                .rect(coord(x), coord(y), coord(w), coord(h), color(c), truthy(&filled));
            Ok(())
        }
    })
    .function("circle", {
        let d = d.clone();
        move |_, (cx, cy, r, c, filled): (i64, i64, i64, i64, Value)| {
            d.borrow_mut()
                .circle(coord(cx), coord(cy), coord(r), color(c), truthy(&filled));
            Ok(())
        }
    })
    .function("fill_circle", {
        let d = d.clone();
        move |_, (cx, cy, r, c): (i64, i64, i64, i64)| {
            d.borrow_mut().circle(coord(cx), coord(cy), coord(r), color(c), true);
            Ok(())
        }
    })
    .function("triangle", {
        let d = d.clone();
        move |_, (x0, y0, x1, y1, x2, y2, c, filled): (i64, i64, i64, i64, i64, i64, i64, Value)| {
            d.borrow_mut().triangle(
                coord(x0),
                coord(y0),
                coord(x1),
                coord(y1),
                coord(x2),
                coord(y2),
                color(c),
                truthy(&filled),
            );
            Ok(())
        }
    })
    .function("text", {
        let d = d.clone();
        move |_, (x, y, text, c, bg): (i64, i64, String, i64, Option<i64>)| {
            let mut display = d.borrow_mut();
            let font = display.font();
            display.text(TextRun {
                x: coord(x),
                y: coord(y),
                text,
                color: color(c),
                background: bg.map(color),
                font,
            });
            Ok(())
        }
    })
    .function("text_font", {
        let d = d.clone();
        // An unknown font id falls back to the default font.
        move |_, (x, y, text, c, font): (i64, i64, String, i64, Option<i64>)| {
            let font = font.and_then(Font::from_id).unwrap_or_default();
            d.borrow_mut().text(TextRun {
                x: coord(x),
                y: coord(y),
                text,
                color: color(c),
                background: None,
                font,
            });
            Ok(())
        }
    })
    .function("setfont", {
        let d = d.clone();
        move |_, id: i64| {
            let font = Font::from_id(id).ok_or_else(|| {
                NativeError::invalid(format!(
                    "Invalid font ID: {id} (valid: 0-{})",
                    Font::COUNT - 1
                ))
            })?;
            d.borrow_mut().set_font(font);
            Ok(())
        }
    })
    .function("getfont", {
        let d = d.clone();
        move |_, ()| Ok(d.borrow().font().id())
    })
    .function("image", {
        let d = d.clone();
        move |_, (x, y, w, h, data): (i64, i64, i64, i64, mlua::String)| {
            if w < 0 || h < 0 {
                return Err(NativeError::invalid(format!(
                    "Invalid image size: {w}x{h}"
                )));
            }
            let expected = w.saturating_mul(h).saturating_mul(2);
            let bytes = data.as_bytes();
            let payload: &[u8] = &bytes;
            if (payload.len() as i64) < expected {
                return Err(NativeError::invalid(format!(
                    "Image data too short: expected {expected} bytes, got {}",
                    payload.len()
                )));
            }
            let pixels: Vec<Color> = payload
                .chunks_exact(2)
                .take((expected / 2) as usize)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            d.borrow_mut()
                .image(coord(x), coord(y), coord(w), coord(h), &pixels);
            Ok(())
        }
    })
    .function("backlight", {
        let d = d.clone();
        move |_, percent: i64| {
            d.borrow_mut().set_backlight(percent.clamp(0, 100) as u8);
            Ok(())
        }
    })
    .function("size", {
        let d = d.clone();
        move |_, ()| {
            let display = d.borrow();
            Ok((i64::from(display.width()), i64::from(display.height())))
        }
    })
    .function("rgb", |_, (r, g, b): (i64, i64, i64)| {
        Ok(i64::from(rgb565(channel(r), channel(g), channel(b))))
    })
}
