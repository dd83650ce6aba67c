//! Drawing detection results onto frames

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use camera_capture::frame::VideoFrame;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as DrawRect;
use tracing::{info, warn};

use crate::analysis::FrameEvaluation;
use crate::detector::Rect;

const FACE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const EYE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const WARNING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const EYE_LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

const ALERT_TEXT: &str = "ALERT: DROWSINESS DETECTED!";
const NOT_LOADED_TEXT: &str = "Model/Cascade not loaded";
const NO_EYES_TEXT: &str = "No Eyes Detected";

const ALERT_BORDER: u32 = 8;
const STATUS_BAR_HEIGHT: u32 = 12;

/// Renders rectangles, labels and warnings. Label text needs a font; the
/// geometric marks are drawn either way.
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// Load the label font from disk. An unreadable font disables labels.
    pub fn from_font_path(path: Option<&str>) -> Self {
        let Some(path) = path else {
            info!("No annotation font configured, labels disabled");
            return Self::default();
        };
        match load_font(Path::new(path)) {
            Ok(font) => Self::new(Some(font)),
            Err(e) => {
                warn!("Failed to load font {}: {}, labels disabled", path, e);
                Self::default()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw `evaluation` onto a copy of `frame`
    pub fn render(&self, frame: &VideoFrame, evaluation: &FrameEvaluation, alert: bool) -> VideoFrame {
        let Some(mut canvas) = frame.to_rgb_image() else {
            return frame.clone();
        };

        if evaluation.degraded {
            let (width, _) = canvas.dimensions();
            draw_filled_rect_mut(
                &mut canvas,
                DrawRect::at(0, 0).of_size(width.max(1), STATUS_BAR_HEIGHT),
                WARNING_COLOR,
            );
            self.label(&mut canvas, NOT_LOADED_TEXT, 50, 50, 28.0, WARNING_COLOR);
        }

        for face in &evaluation.faces {
            draw_box(&mut canvas, &face.rect, FACE_COLOR);
            self.label(&mut canvas, face.yawn_label(), face.rect.x, face.rect.y - 30, 22.0, WARNING_COLOR);

            for eye in face.eye_readings() {
                draw_box(&mut canvas, &eye.rect, EYE_COLOR);
                self.label(&mut canvas, eye.label(), eye.rect.x, eye.rect.y - 20, 16.0, EYE_LABEL_COLOR);
            }

            if face.eyes_missing() {
                self.label(&mut canvas, NO_EYES_TEXT, face.rect.x, face.rect.bottom() + 8, 22.0, WARNING_COLOR);
            }
        }

        if alert {
            draw_border(&mut canvas, ALERT_BORDER, WARNING_COLOR);
            self.label(&mut canvas, ALERT_TEXT, 50, 50, 32.0, WARNING_COLOR);
        }

        VideoFrame::from_rgb_image(canvas, frame.timestamp_ns, frame.sequence)
    }

    fn label(&self, canvas: &mut RgbImage, text: &str, x: i32, y: i32, size: f32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(canvas, color, x, y.max(0), PxScale::from(size), font, text);
        }
    }
}

fn load_font(path: &Path) -> Result<FontArc, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    FontArc::try_from_vec(bytes).map_err(|e| e.to_string())
}

/// Two-pixel hollow rectangle
fn draw_box(canvas: &mut RgbImage, rect: &Rect, color: Rgb<u8>) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    draw_hollow_rect_mut(canvas, DrawRect::at(rect.x, rect.y).of_size(rect.width, rect.height), color);
    if rect.width > 2 && rect.height > 2 {
        draw_hollow_rect_mut(
            canvas,
            DrawRect::at(rect.x + 1, rect.y + 1).of_size(rect.width - 2, rect.height - 2),
            color,
        );
    }
}

fn draw_border(canvas: &mut RgbImage, thickness: u32, color: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    let t = thickness.min(width).min(height).max(1);
    let (w, h) = (width as i32, height as i32);
    draw_filled_rect_mut(canvas, DrawRect::at(0, 0).of_size(width, t), color);
    draw_filled_rect_mut(canvas, DrawRect::at(0, h - t as i32).of_size(width, t), color);
    draw_filled_rect_mut(canvas, DrawRect::at(0, 0).of_size(t, height), color);
    draw_filled_rect_mut(canvas, DrawRect::at(w - t as i32, 0).of_size(t, height), color);
}
