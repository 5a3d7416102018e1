//! Human-facing feedback for the interactive loop.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rollcall_core::FaceRegion;
use rollcall_hw::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

const KNOWN_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOUR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
/// Height of the label banner drawn above each box.
const LABEL_HEIGHT: u32 = 14;

/// Tried in order when no font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("cannot write preview {}: {source}", path.display())]
    Preview {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot read font {}: {source}", path.display())]
    FontRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid font {}", path.display())]
    FontInvalid { path: PathBuf },
}

/// One face as it should be shown to the operator.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub region: FaceRegion,
    /// Matched label, or "Unknown".
    pub label: String,
    pub confidence: f32,
}

impl Annotation {
    fn is_known(&self) -> bool {
        self.label != "Unknown"
    }

    fn colour(&self) -> Rgb<u8> {
        if self.is_known() {
            KNOWN_COLOUR
        } else {
            UNKNOWN_COLOUR
        }
    }
}

pub trait Overlay {
    fn render(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<(), OverlayError>;
}

/// Load the font used for preview labels.
///
/// An explicit path must load. Without one the usual system locations are
/// tried and `None` means labels are drawn as bare banners.
pub fn load_font(path: Option<&Path>) -> Result<Option<FontVec>, OverlayError> {
    if let Some(path) = path {
        return read_font(path).map(Some);
    }
    for candidate in SYSTEM_FONTS {
        let candidate = Path::new(candidate);
        if !candidate.exists() {
            continue;
        }
        match read_font(candidate) {
            Ok(font) => {
                tracing::debug!(path = %candidate.display(), "preview font loaded");
                return Ok(Some(font));
            }
            Err(e) => tracing::debug!(error = %e, "skipping system font"),
        }
    }
    Ok(None)
}

fn read_font(path: &Path) -> Result<FontVec, OverlayError> {
    let bytes = std::fs::read(path).map_err(|source| OverlayError::FontRead {
        path: path.to_path_buf(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| OverlayError::FontInvalid {
        path: path.to_path_buf(),
    })
}

/// Prints what is in view whenever it changes and optionally keeps an
/// annotated preview image on disk.
pub struct TerminalOverlay {
    preview_path: Option<PathBuf>,
    font: Option<FontVec>,
    last_line: Option<String>,
}

impl TerminalOverlay {
    pub fn new(preview_path: Option<PathBuf>, font: Option<FontVec>) -> Self {
        Self {
            preview_path,
            font,
            last_line: None,
        }
    }
}

impl Overlay for TerminalOverlay {
    fn render(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<(), OverlayError> {
        let line = describe(annotations);
        if self.last_line.as_deref() != Some(line.as_str()) {
            println!("{line}");
            self.last_line = Some(line);
        }

        if let Some(path) = &self.preview_path {
            let mut preview = frame.image.clone();
            for annotation in annotations {
                annotate(&mut preview, annotation, self.font.as_ref());
            }
            preview.save(path).map_err(|source| OverlayError::Preview {
                path: path.clone(),
                source,
            })?;
        }

        Ok(())
    }
}

fn describe(annotations: &[Annotation]) -> String {
    if annotations.is_empty() {
        return "no faces in view".to_string();
    }
    let faces: Vec<String> = annotations
        .iter()
        .map(|a| {
            if a.is_known() {
                format!("{} ({:.2})", a.label, a.confidence)
            } else {
                a.label.clone()
            }
        })
        .collect();
    format!("in view: {}", faces.join(", "))
}

/// Region clamped to the image as `(left, top, width, height)`, or `None`
/// for an empty image.
fn clamp_region(image: &RgbImage, region: &FaceRegion) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(h - 1);
    let (left, right) = (clamp_x(region.x), clamp_x(region.x + region.width));
    let (top, bottom) = (clamp_y(region.y), clamp_y(region.y + region.height));
    Some((left, top, right - left + 1, bottom - top + 1))
}

/// Draw a box outline `thickness` pixels wide, clipped to the image.
fn draw_box(image: &mut RgbImage, region: &FaceRegion, colour: Rgb<u8>, thickness: u32) {
    let Some((left, top, width, height)) = clamp_region(image, region) else {
        return;
    };
    for t in 0..thickness {
        let (w, h) = (width.saturating_sub(2 * t), height.saturating_sub(2 * t));
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((left + t) as i32, (top + t) as i32).of_size(w, h);
        draw_hollow_rect_mut(image, rect, colour);
    }
}

/// Box plus a filled banner carrying the label, placed above the box when
/// there is room and inside its top edge otherwise.
fn annotate(image: &mut RgbImage, annotation: &Annotation, font: Option<&FontVec>) {
    let colour = annotation.colour();
    draw_box(image, &annotation.region, colour, BOX_THICKNESS);

    let Some((left, top, width, _)) = clamp_region(image, &annotation.region) else {
        return;
    };
    let scale = PxScale::from(LABEL_HEIGHT as f32);
    let banner_width = match font {
        Some(font) => text_size(scale, font, &annotation.label).0 + 4,
        None => width,
    }
    .clamp(1, image.width() - left);
    let banner_top = top.saturating_sub(LABEL_HEIGHT);
    let banner_height = LABEL_HEIGHT.min(image.height() - banner_top);

    draw_filled_rect_mut(
        image,
        Rect::at(left as i32, banner_top as i32).of_size(banner_width, banner_height),
        colour,
    );
    if let Some(font) = font {
        draw_text_mut(
            image,
            TEXT_COLOUR,
            left as i32 + 2,
            banner_top as i32,
            scale,
            font,
            &annotation.label,
        );
    }
}
