// SPDX-License-Identifier: MPL-2.0

//! On-screen display
//!
//! The pipelines call [`Compositor::composite`] on every output-sized frame
//! before it is encoded. [`OsdCompositor`] draws a darkened band in the
//! lower-left corner with the local time and the latest telemetry. Text is
//! rasterized from a TrueType font into the luma plane; without a usable
//! font only the band is drawn.

use super::frame::FrameBuffer;
use crate::constants::osd::{BAND_LUMA_SCALE, FONT_PX_1080P, MARGIN_1080P};
use ab_glyph::{FontVec, PxScale};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_text_mut, text_size};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Overlay hook applied to output frames
pub trait Compositor: Send + Sync {
    /// Draw onto `frame`. Implementations must go through
    /// [`FrameBuffer::make_writable`] so shared storage is never touched.
    fn composite(&self, frame: &mut FrameBuffer);
}

/// Compositor that leaves frames untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompositor;

impl Compositor for NoopCompositor {
    fn composite(&self, _frame: &mut FrameBuffer) {}
}

/// Latest position/speed reported by the host
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed_kmh: Option<f64>,
}

impl Telemetry {
    /// Text of the telemetry line
    pub fn line(&self) -> String {
        let coord = |value: Option<f64>| match value {
            Some(v) => format!("{:.6}", v),
            None => "--".to_string(),
        };
        let speed = match self.speed_kmh {
            Some(v) => format!("{:.1}", v),
            None => "--".to_string(),
        };
        format!(
            "LAT {} LON {} SPD {} KM/H",
            coord(self.latitude),
            coord(self.longitude),
            speed
        )
    }
}

/// Timestamp + telemetry overlay
pub struct OsdCompositor {
    enabled: AtomicBool,
    telemetry: Mutex<Telemetry>,
    font: Option<FontVec>,
}

impl OsdCompositor {
    /// Overlay without a font; only the band is drawn until
    /// [`with_font_file`](Self::with_font_file) succeeds
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            telemetry: Mutex::new(Telemetry::default()),
            font: None,
        }
    }

    /// Load the TrueType/OpenType font used for the text lines
    ///
    /// A missing or invalid file is logged and leaves the overlay band-only.
    pub fn with_font_file(mut self, path: &Path) -> Self {
        match load_font(path) {
            Ok(font) => {
                info!(path = %path.display(), "OSD font loaded");
                self.font = Some(font);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "OSD font unavailable, drawing band only"),
        }
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            debug!(enabled, "OSD toggled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, latitude: f64, longitude: f64) {
        let mut telemetry = self.telemetry.lock().unwrap_or_else(PoisonError::into_inner);
        telemetry.latitude = Some(latitude);
        telemetry.longitude = Some(longitude);
    }

    pub fn set_speed(&self, speed_kmh: f64) {
        self.telemetry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .speed_kmh = Some(speed_kmh);
    }

    pub fn telemetry(&self) -> Telemetry {
        *self.telemetry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The two overlay lines for the current instant
    pub fn lines(&self) -> [String; 2] {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        [now, self.telemetry().line()]
    }
}

impl fmt::Debug for OsdCompositor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsdCompositor")
            .field("enabled", &self.is_enabled())
            .field("telemetry", &self.telemetry())
            .field("has_font", &self.has_font())
            .finish()
    }
}

impl Default for OsdCompositor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Compositor for OsdCompositor {
    fn composite(&self, frame: &mut FrameBuffer) {
        if !self.is_enabled() {
            return;
        }
        let lines = self.lines();
        match frame.make_writable() {
            Ok(image) => {
                let (width, height) = (image.width(), image.height());
                let (luma, _) = image.planes_mut();
                draw_overlay(luma, width, height, &lines, self.font.as_ref());
            }
            Err(e) => warn!(error = %e, "Skipping OSD on frame"),
        }
    }
}

fn load_font(path: &Path) -> Result<FontVec, String> {
    let data = std::fs::read(path).map_err(|e| format!("Failed to read font: {}", e))?;
    FontVec::try_from_vec(data).map_err(|e| format!("Failed to parse font: {}", e))
}

/// Band and text geometry for a frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    font_px: u32,
    margin: u32,
    padding: u32,
}

impl Layout {
    fn for_height(height: u32) -> Self {
        let font_px = (height * FONT_PX_1080P / 1080).max(MIN_FONT_PX);
        Self {
            font_px,
            margin: (height * MARGIN_1080P / 1080).max(2),
            padding: font_px / 4,
        }
    }

    fn line_height(&self) -> u32 {
        self.font_px + self.font_px / 4
    }

    fn text_width(&self, line: &str, font: Option<&FontVec>) -> u32 {
        match font {
            Some(font) => text_size(self.scale(), font, line).0,
            // Rough advance of a proportional sans face
            None => line.chars().count() as u32 * self.font_px / 2,
        }
    }

    fn scale(&self) -> PxScale {
        PxScale::from(self.font_px as f32)
    }
}

const MIN_FONT_PX: u32 = 8;
const TEXT_LUMA: u8 = 235;

/// Darken the band in place, then blend the text into it
///
/// The band is staged in a [`GrayImage`] so the glyph rasterizer can
/// antialias against the darkened background.
fn draw_overlay(luma: &mut [u8], width: u32, height: u32, lines: &[String], font: Option<&FontVec>) {
    let layout = Layout::for_height(height);
    let longest = lines
        .iter()
        .map(|line| layout.text_width(line, font))
        .max()
        .unwrap_or(0);

    let band_w = (longest + 2 * layout.padding).min(width.saturating_sub(layout.margin));
    let band_h = (lines.len() as u32 * layout.line_height() + 2 * layout.padding)
        .min(height.saturating_sub(layout.margin));
    if band_w == 0 || band_h == 0 {
        return;
    }
    let x0 = layout.margin.min(width - band_w);
    let y0 = height.saturating_sub(layout.margin + band_h);

    let offset = |x: u32, y: u32| ((y0 + y) * width + x0 + x) as usize;
    let mut band = GrayImage::from_fn(band_w, band_h, |x, y| {
        Luma([((luma[offset(x, y)] as u32 * BAND_LUMA_SCALE) >> 8) as u8])
    });

    if let Some(font) = font {
        for (i, line) in lines.iter().enumerate() {
            let top = layout.padding + i as u32 * layout.line_height();
            draw_text_mut(
                &mut band,
                Luma([TEXT_LUMA]),
                layout.padding as i32,
                top as i32,
                layout.scale(),
                font,
                line,
            );
        }
    }

    for (y, row) in band.as_raw().chunks_exact(band_w as usize).enumerate() {
        let start = offset(0, y as u32);
        luma[start..start + row.len()].copy_from_slice(row);
    }
}
