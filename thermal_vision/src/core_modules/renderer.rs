// THEORY:
// The `Renderer` is the only stage that produces pixels for humans. It draws the
// final detections on the *original* image, never the filtered one, so the reader
// sees the component in context.
//
// Key architectural principles:
// 1.  **Pure Function of the Record**: Drawing takes an image plus a list of
//     `Annotation`s and nothing else. A saved `InspectionRecord` therefore
//     re-renders to the same picture without rerunning detection. This is what
//     makes hand-editing the JSON and then redrawing work.
// 2.  **Explicit Output Locations**: The caller names the directory. The renderer
//     never creates directories and never guesses paths beyond the
//     `<base>_boxed.<ext>` naming rule.
// 3.  **Text Always Drawn**: Labels use the bundled DejaVu Sans unless the config
//     names another font file, so every boxed image carries its label text.

use crate::config::RenderConfig;
use crate::core_modules::fault_label::RecordedLabel;
use crate::core_modules::record::{Annotation, InspectionRecord};
use crate::error::{InspectionError, Result};
use ab_glyph::{FontArc, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

/// Gap between a box's top edge and the bottom of its label.
const LABEL_GAP: i32 = 10;
const GLOBAL_LABEL_X: i32 = 10;
/// Baseline of the global label.
const GLOBAL_LABEL_BASELINE: i32 = 30;

/// Bitstream Vera license, see `assets/DejaVuSans-LICENSE.txt`.
static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// Yellow for potential faults and full-wire overloads, red for everything else.
pub fn box_color(label: &RecordedLabel) -> Rgb<u8> {
    if label.is_warning_colored() { YELLOW } else { RED }
}

/// `"{label} ({confidence:.2})"`, or just the label when there is no confidence.
pub fn label_text(label: &RecordedLabel, confidence: Option<f64>) -> String {
    match confidence {
        Some(c) => format!("{label} ({c:.2})"),
        None => label.to_string(),
    }
}

/// `<dir>/<stem>_boxed.<ext>` for a source image, with `png` standing in for
/// extensions the encoder does not support.
pub fn boxed_image_path(dir: &Path, source_image: &Path) -> PathBuf {
    let stem = source_image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let extension = source_image
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .filter(|e| ImageFormat::from_extension(e).is_some_and(|f| f.writing_enabled()))
        .unwrap_or_else(|| "png".to_string());
    dir.join(format!("{stem}_boxed.{extension}"))
}

pub struct Renderer {
    config: RenderConfig,
    font: FontArc,
}

impl Renderer {
    /// Fails only when `font_path` is set and cannot be read or parsed.
    pub fn new(config: RenderConfig) -> Result<Self> {
        let font = match &config.font_path {
            Some(path) => load_font(path)?,
            None => FontArc::try_from_slice(DEFAULT_FONT).map_err(|e| InspectionError::Font {
                path: PathBuf::from("<bundled DejaVuSans.ttf>"),
                reason: e.to_string(),
            })?,
        };
        Ok(Self { config, font })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Draws annotations onto `image`. With no annotations, the global label is
    /// written in the top-left corner instead.
    pub fn draw(&self, image: &mut RgbImage, annotations: &[Annotation], global_label: &RecordedLabel) {
        for annotation in annotations {
            self.draw_box(image, annotation);
        }
        if annotations.is_empty() {
            let scale = self.config.global_label_scale;
            let top = (GLOBAL_LABEL_BASELINE - scale as i32).max(0);
            self.draw_label(image, GLOBAL_LABEL_X, top, scale, global_label.as_str());
        }
    }

    fn draw_box(&self, image: &mut RgbImage, annotation: &Annotation) {
        let b = annotation.bbox;
        let color = box_color(&annotation.label);

        // Outline covers x..=x+w and y..=y+h, thickening inward.
        for inset in 0..self.config.line_thickness as i64 {
            let width = b.width + 1 - 2 * inset;
            let height = b.height + 1 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at((b.x + inset) as i32, (b.y + inset) as i32)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        let scale = self.config.box_label_scale;
        let top = (b.y as i32 - LABEL_GAP - scale as i32).max(0);
        let text = label_text(&annotation.label, annotation.confidence);
        self.draw_label(image, b.x as i32, top, scale, &text);
    }

    fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, scale: f32, text: &str) {
        draw_text_mut(image, YELLOW, x, y, PxScale::from(scale), &self.font, text);
    }

    /// Draws on a copy of `original` and writes it next to the other boxed images.
    /// Falls back to PNG if the source extension cannot be written.
    pub fn render_to(
        &self,
        original: &RgbImage,
        annotations: &[Annotation],
        global_label: &RecordedLabel,
        dir: &Path,
        source_image: &Path,
    ) -> Result<PathBuf> {
        let mut canvas = original.clone();
        self.draw(&mut canvas, annotations, global_label);
        save_boxed(&canvas, dir, source_image)
    }

    /// Re-renders one record. The output lands next to the JSON file.
    pub fn redraw_record(&self, json_path: &Path) -> Result<PathBuf> {
        let record = InspectionRecord::read(json_path)?;
        if !record.image.is_file() {
            return Err(InspectionError::MissingImage {
                path: record.image.clone(),
            });
        }
        let original = image::open(&record.image)
            .map_err(|e| InspectionError::image_load(&record.image, e))?
            .to_rgb8();

        let json_dir = std::path::absolute(json_path)
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        let out = self.render_to(
            &original,
            &record.annotations(),
            &record.label,
            &json_dir,
            &record.image,
        )?;
        tracing::info!(record = %json_path.display(), boxed = %out.display(), "refreshed boxed image");
        Ok(out)
    }

    /// Re-renders every `*.json` in `dir`, in name order. One bad record does not
    /// stop the others.
    pub fn redraw_directory(&self, dir: &Path) -> Result<Vec<(PathBuf, Result<PathBuf>)>> {
        let entries = std::fs::read_dir(dir).map_err(|e| InspectionError::io(dir, e))?;
        let mut records: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
            .collect();
        records.sort();

        if records.is_empty() {
            tracing::warn!(dir = %dir.display(), "no JSON records to refresh");
        }

        Ok(records
            .into_iter()
            .map(|path| {
                let outcome = self.redraw_record(&path);
                if let Err(e) = &outcome {
                    tracing::warn!(record = %path.display(), error = %e, "failed to refresh record");
                }
                (path, outcome)
            })
            .collect())
    }
}

fn load_font(path: &Path) -> Result<FontArc> {
    let bytes = std::fs::read(path).map_err(|e| InspectionError::io(path, e))?;
    FontArc::try_from_vec(bytes).map_err(|e| InspectionError::Font {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn save_boxed(canvas: &RgbImage, dir: &Path, source_image: &Path) -> Result<PathBuf> {
    let path = boxed_image_path(dir, source_image);
    match canvas.save(&path) {
        Ok(()) => Ok(path),
        Err(e) => {
            let fallback = path.with_extension("png");
            if fallback == path {
                return Err(InspectionError::image_save(&path, e));
            }
            tracing::warn!(path = %path.display(), error = %e, "falling back to PNG");
            canvas
                .save_with_format(&fallback, ImageFormat::Png)
                .map_err(|e| InspectionError::image_save(&fallback, e))?;
            Ok(fallback)
        }
    }
}
