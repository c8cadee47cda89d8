use crate::processing::post::Detection;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use std::path::Path;

const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_PADDING: u32 = 2;
// Rough advance per character relative to the font size, used without a font
const LABEL_CHAR_WIDTH_RATIO: f32 = 0.55;

/// Box colour for a class. Stable across requests.
pub fn class_color(class_id: u32) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// Draws detections onto RGB images.
///
/// Label text needs a font; without one the coloured label strip is still
/// drawn so boxes remain identifiable by colour.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    pub fn from_font_path(path: Option<&Path>) -> anyhow::Result<Self> {
        let font = match path {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    anyhow::anyhow!("Failed to read font {}: {}", path.display(), e)
                })?;
                let font = FontVec::try_from_vec(bytes)
                    .map_err(|e| anyhow::anyhow!("Invalid font {}: {}", path.display(), e))?;
                tracing::info!(path = %path.display(), "Loaded label font");
                Some(font)
            }
            None => {
                tracing::warn!(
                    "FONT_PATH not set, detections are drawn as coloured boxes without label text"
                );
                None
            }
        };
        Ok(Self::new(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    #[tracing::instrument(skip_all, fields(count = detections.len()))]
    pub fn draw(&self, image: &mut RgbImage, detections: &[Detection]) {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let line_width = line_width(width, height);
        let font_size = font_size(width, height);

        for detection in detections {
            self.draw_detection(image, detection, line_width, font_size);
        }
    }

    fn draw_detection(
        &self,
        image: &mut RgbImage,
        detection: &Detection,
        line_width: u32,
        font_size: f32,
    ) {
        let (width, height) = image.dimensions();
        let max_x = width as i32 - 1;
        let max_y = height as i32 - 1;

        let x_min = (detection.x1.round() as i32).clamp(0, max_x);
        let y_min = (detection.y1.round() as i32).clamp(0, max_y);
        let x_max = (detection.x2.round() as i32).clamp(0, max_x);
        let y_max = (detection.y2.round() as i32).clamp(0, max_y);

        if x_min >= x_max || y_min >= y_max {
            return;
        }

        let color = class_color(detection.cls);

        // Nested hollow rects, shrinking inwards
        for t in 0..line_width as i32 {
            let w = x_max - x_min + 1 - 2 * t;
            let h = y_max - y_min + 1 - 2 * t;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x_min + t, y_min + t).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        let label = format!("{} {:.2}", detection.name, detection.conf);
        let scale = PxScale::from(font_size);

        let (text_width, text_height) = match &self.font {
            Some(font) => text_size(scale, font, &label),
            None => (
                (label.chars().count() as f32 * font_size * LABEL_CHAR_WIDTH_RATIO) as u32,
                font_size as u32,
            ),
        };

        let strip_width = (text_width + 2 * LABEL_PADDING).min(width - x_min as u32);
        let strip_height = (text_height + 2 * LABEL_PADDING).min(height);

        // Above the box when it fits, otherwise inside its top edge
        let strip_y = if y_min >= strip_height as i32 {
            y_min - strip_height as i32
        } else {
            y_min
        };

        if strip_width == 0 || strip_height == 0 {
            return;
        }

        let strip = Rect::at(x_min, strip_y).of_size(strip_width, strip_height);
        draw_filled_rect_mut(image, strip, color);

        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                TEXT_COLOR,
                x_min + LABEL_PADDING as i32,
                strip_y + LABEL_PADDING as i32,
                scale,
                font,
                &label,
            );
        }
    }
}

/// Box outline thickness, proportional to the image size.
fn line_width(width: u32, height: u32) -> u32 {
    (((width + height) as f32 / 2.0 * 0.003).round() as u32).max(2)
}

fn font_size(width: u32, height: u32) -> f32 {
    ((width + height) as f32 / 2.0 * 0.035).round().max(12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn detection(x1: f32, y1: f32, x2: f32, y2: f32, cls: u32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            conf: 0.87,
            cls,
            name: "person".to_string(),
        }
    }

    #[test]
    fn test_line_width_and_font_scale_with_image() {
        assert_eq!(line_width(100, 100), 2);
        assert_eq!(line_width(1920, 1080), 5);
        assert_eq!(font_size(100, 100), 12.0);
        assert_eq!(font_size(1920, 1080), 53.0);
    }

    #[test]
    fn test_class_color_wraps_palette() {
        assert_eq!(class_color(0), Rgb([0xFF, 0x38, 0x38]));
        assert_eq!(class_color(20), class_color(0));
        assert_ne!(class_color(1), class_color(0));
    }

    #[test]
    fn test_draws_box_outline_without_touching_interior() {
        let mut image = RgbImage::from_pixel(100, 100, BLACK);
        Annotator::default().draw(&mut image, &[detection(40.0, 40.0, 80.0, 80.0, 0)]);

        let color = class_color(0);
        assert_eq!(*image.get_pixel(40, 60), color, "left edge");
        assert_eq!(*image.get_pixel(41, 60), color, "second line of the outline");
        assert_eq!(*image.get_pixel(80, 60), color, "right edge");
        assert_eq!(*image.get_pixel(60, 80), color, "bottom edge");
        assert_eq!(*image.get_pixel(60, 60), BLACK, "interior untouched");
        assert_eq!(*image.get_pixel(90, 90), BLACK, "outside untouched");
    }

    #[test]
    fn test_label_strip_above_box() {
        let mut image = RgbImage::from_pixel(100, 100, BLACK);
        Annotator::default().draw(&mut image, &[detection(40.0, 40.0, 80.0, 80.0, 3)]);

        // 12px font + 2 * 2px padding = 16px strip over y 24..40
        assert_eq!(*image.get_pixel(42, 30), class_color(3));
        assert_eq!(*image.get_pixel(42, 20), BLACK);
    }

    #[test]
    fn test_label_strip_moves_inside_at_top_edge() {
        let mut image = RgbImage::from_pixel(100, 100, BLACK);
        Annotator::default().draw(&mut image, &[detection(10.0, 2.0, 90.0, 90.0, 5)]);

        assert_eq!(*image.get_pixel(20, 10), class_color(5));
    }

    #[test]
    fn test_no_detections_leaves_image_unchanged() {
        let original = RgbImage::from_fn(32, 32, |x, y| Rgb([x as u8, y as u8, 7]));
        let mut image = original.clone();
        Annotator::default().draw(&mut image, &[]);
        assert_eq!(image, original);
    }

    #[test]
    fn test_degenerate_and_out_of_bounds_boxes_do_not_panic() {
        let mut image = RgbImage::from_pixel(50, 50, BLACK);
        Annotator::default().draw(
            &mut image,
            &[
                detection(10.0, 10.0, 10.0, 30.0, 0),
                detection(-100.0, -100.0, 500.0, 500.0, 1),
                detection(49.0, 49.0, 49.5, 49.5, 2),
            ],
        );
        assert_eq!(*image.get_pixel(0, 25), class_color(1));
    }

    #[test]
    fn test_missing_font_path_is_an_error() {
        let err = Annotator::from_font_path(Some(Path::new("/nonexistent/font.ttf")));
        assert!(err.is_err());
        assert!(!Annotator::from_font_path(None).unwrap().has_font());
    }
}
