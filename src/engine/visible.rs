//! Visible signature placement and artwork.

use std::{path::Path, str::FromStr};

use image::{
    imageops::{self, FilterType},
    ImageFormat, Rgba, RgbaImage,
};
use serde::{Deserialize, Serialize};

use super::glyphs;
use crate::errors::{PdfSignError, PdfSignErrorKind, PdfSignResult};

/// Artwork is rendered at least this many pixels per point.
pub const MIN_SCALE: f32 = 5.0;

const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// A signature rectangle on a page, in PDF user space units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisibleElement {
    /// 1-based page number.
    pub page: u32,
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
}

impl VisibleElement {
    pub fn width(self: &Self) -> f32 {
        (self.urx - self.llx).abs()
    }

    pub fn height(self: &Self) -> f32 {
        (self.ury - self.lly).abs()
    }

    /// Pixel size of the artwork rendered at `scale`.
    pub fn canvas_size(self: &Self, scale: f32) -> (u32, u32) {
        let px = |v: f32| ((v * scale).round() as u32).max(1);
        (px(self.width()), px(self.height()))
    }

    /// Placement arguments for the signer.
    pub fn args(self: &Self) -> Vec<String> {
        vec![
            "-V".to_owned(),
            "-pg".to_owned(),
            self.page.to_string(),
            "-llx".to_owned(),
            self.llx.to_string(),
            "-lly".to_owned(),
            self.lly.to_string(),
            "-urx".to_owned(),
            self.urx.to_string(),
            "-ury".to_owned(),
            self.ury.to_string(),
        ]
    }
}

/// Parses `page,llx,lly,urx,ury`.
impl FromStr for VisibleElement {
    type Err = PdfSignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            PdfSignError::new(
                PdfSignErrorKind::ConfigurationError,
                format!("expected page,llx,lly,urx,ury, found {:?}", s),
            )
        };

        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [page, llx, lly, urx, ury] = parts.as_slice() else {
            return Err(invalid());
        };
        let coord = |v: &str| v.parse::<f32>().map_err(|_| invalid());

        let element = Self {
            page: page.parse().map_err(|_| invalid())?,
            llx: coord(*llx)?,
            lly: coord(*lly)?,
            urx: coord(*urx)?,
            ury: coord(*ury)?,
        };
        if element.page == 0 || element.width() == 0.0 || element.height() == 0.0 {
            return Err(invalid());
        }

        Ok(element)
    }
}

/// Ratio between an element and the configured full-size signature, never
/// below [`MIN_SCALE`].
pub fn scale_factor(element_width: f32, base_width: f32) -> f32 {
    if base_width <= 0.0 || !element_width.is_finite() {
        return MIN_SCALE;
    }
    (element_width / base_width).max(MIN_SCALE)
}

/// Escapes text for the signer's argument parser, which expands `$` and
/// splits on quotes.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '"' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Fits `layer` inside `width`x`height` keeping its aspect ratio.
fn fit(layer: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let ratio = (width as f32 / layer.width() as f32).min(height as f32 / layer.height() as f32);
    let w = ((layer.width() as f32 * ratio).round() as u32).clamp(1, width);
    let h = ((layer.height() as f32 * ratio).round() as u32).clamp(1, height);
    imageops::resize(layer, w, h, FilterType::Triangle)
}

/// Composites the artwork of one element onto a transparent canvas.
///
/// The background is stretched over the whole canvas; the signature image
/// is fitted and centered on top of it.
pub fn compose(
    element: &VisibleElement,
    scale: f32,
    background: Option<&RgbaImage>,
    signature: Option<&RgbaImage>,
) -> RgbaImage {
    let (width, height) = element.canvas_size(scale);
    let mut canvas = RgbaImage::new(width, height);

    if let Some(background) = background.filter(|bg| bg.width() > 0 && bg.height() > 0) {
        let layer = imageops::resize(background, width, height, FilterType::Triangle);
        imageops::overlay(&mut canvas, &layer, 0, 0);
    }

    if let Some(signature) = signature.filter(|sig| sig.width() > 0 && sig.height() > 0) {
        let layer = fit(signature, width, height);
        let x = (width - layer.width()) / 2;
        let y = (height - layer.height()) / 2;
        imageops::overlay(&mut canvas, &layer, x as i64, y as i64);
    }

    canvas
}

/// Draws `text` on one line, `font_size` points tall or smaller when it
/// does not fit, centered on a transparent canvas the size of the element.
pub fn render_text(text: &str, element: &VisibleElement, scale: f32, font_size: f32) -> RgbaImage {
    let (width, height) = element.canvas_size(scale);
    let mut canvas = RgbaImage::new(width, height);

    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() {
        return canvas;
    }

    // one pixel of spacing right of and below each glyph
    let (cell_w, cell_h) = (glyphs::WIDTH + 1, glyphs::HEIGHT + 1);
    let mut line = RgbaImage::new(cell_w * chars.len() as u32, cell_h);
    for (x, y, pixel) in line.enumerate_pixels_mut() {
        let glyph = glyphs::glyph(chars[(x / cell_w) as usize]);
        if glyphs::is_set(&glyph, x % cell_w, y) {
            *pixel = INK;
        }
    }

    let wanted = font_size * scale / cell_h as f32;
    let fits = (width as f32 / line.width() as f32).min(height as f32 / line.height() as f32);
    let unit = wanted.min(fits);
    let w = ((line.width() as f32 * unit).round() as u32).clamp(1, width);
    let h = ((line.height() as f32 * unit).round() as u32).clamp(1, height);

    let layer = imageops::resize(&line, w, h, FilterType::Nearest);
    imageops::overlay(&mut canvas, &layer, ((width - w) / 2) as i64, ((height - h) / 2) as i64);
    canvas
}

/// The signature image with the signer name drawn over it.
pub fn name_image(
    element: &VisibleElement,
    scale: f32,
    signature: Option<&RgbaImage>,
    text: &str,
    font_size: f32,
) -> RgbaImage {
    let mut canvas = compose(element, scale, None, signature);
    let name = render_text(text, element, scale, font_size);
    imageops::overlay(&mut canvas, &name, 0, 0);
    canvas
}

pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbaImage, PdfSignError> {
    let path = path.as_ref();
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|err| {
            PdfSignError::new(
                PdfSignErrorKind::ResourceError,
                format!("{}: {}", path.display(), err),
            )
        })
}

pub fn save_png<P: AsRef<Path>>(canvas: &RgbaImage, path: P) -> Result<(), PdfSignError> {
    canvas
        .save_with_format(path, ImageFormat::Png)
        .map_app_err(PdfSignErrorKind::ResourceError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(width: f32, height: f32) -> VisibleElement {
        VisibleElement {
            page: 1,
            llx: 10.0,
            lly: 20.0,
            urx: 10.0 + width,
            ury: 20.0 + height,
        }
    }

    #[test]
    fn parse_element() {
        let parsed: VisibleElement = "2, 10,20 ,110,70".parse().unwrap();
        assert_eq!(parsed.page, 2);
        assert_eq!(parsed.width(), 100.0);
        assert_eq!(parsed.height(), 50.0);

        assert!("1,2,3".parse::<VisibleElement>().is_err());
        assert!("0,0,0,10,10".parse::<VisibleElement>().is_err());
        assert!("1,0,0,0,10".parse::<VisibleElement>().is_err());
        assert!("1,a,0,10,10".parse::<VisibleElement>().is_err());
    }

    #[test]
    fn placement_args() {
        assert_eq!(
            element(100.0, 50.0).args(),
            vec!["-V", "-pg", "1", "-llx", "10", "-lly", "20", "-urx", "110", "-ury", "70"]
        );
    }

    #[test]
    fn scale_has_a_floor() {
        assert_eq!(scale_factor(350.0, 350.0), MIN_SCALE);
        assert_eq!(scale_factor(3500.0, 350.0), 10.0);
        assert_eq!(scale_factor(100.0, 0.0), MIN_SCALE);
    }

    #[test]
    fn canvas_follows_scale() {
        let el = element(120.0, 40.0);
        let scale = scale_factor(el.width(), 350.0);

        let canvas = compose(&el, scale, None, None);

        assert_eq!(canvas.dimensions(), (600, 200));
        assert_eq!(
            (canvas.width() as f32 / scale, canvas.height() as f32 / scale),
            (el.width(), el.height())
        );
        assert!(canvas.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn layers_are_composited() {
        let el = element(20.0, 10.0);
        let background = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let signature = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255]));

        let canvas = compose(&el, MIN_SCALE, Some(&background), Some(&signature));

        assert_eq!(canvas.dimensions(), (100, 50));
        // signature is fitted to 50x50 and centered
        assert_eq!(canvas.get_pixel(50, 25), &Rgba([0, 0, 255, 255]));
        assert_eq!(canvas.get_pixel(5, 25), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn text_is_rendered_at_scale() {
        let el = element(100.0, 30.0);

        let canvas = render_text("Alice", &el, MIN_SCALE, 10.0);

        assert_eq!(canvas.dimensions(), (500, 150));
        let inked: Vec<(u32, u32)> = canvas
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[3] == 255)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!inked.is_empty());
        // a 50px cell, its last row is spacing
        let top = inked.iter().map(|(_, y)| *y).min().unwrap();
        let bottom = inked.iter().map(|(_, y)| *y).max().unwrap();
        assert!(bottom - top < 50);
        assert!(bottom - top >= 35);
    }

    #[test]
    fn long_text_is_shrunk_to_fit() {
        let el = element(20.0, 10.0);
        let canvas = render_text(&"W".repeat(40), &el, MIN_SCALE, 10.0);

        assert_eq!(canvas.dimensions(), (100, 50));
        assert!(canvas.pixels().any(|p| p.0[3] == 255));
    }

    #[test]
    fn blank_text_draws_nothing() {
        let canvas = render_text("  ", &element(20.0, 10.0), MIN_SCALE, 10.0);
        assert!(canvas.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn name_is_drawn_over_the_signature() {
        let el = element(20.0, 10.0);
        let signature = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255]));

        let canvas = name_image(&el, MIN_SCALE, Some(&signature), "I", 10.0);

        assert_eq!(canvas.dimensions(), (100, 50));
        assert!(canvas.pixels().any(|p| *p == INK));
        assert!(canvas.pixels().any(|p| *p == Rgba([0, 0, 255, 255])));
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_text(r#"John "JD" Doe"#), r#"John \"JD\" Doe"#);
        assert_eq!(escape_text("cost $5"), r"cost \$5");
        assert_eq!(escape_text("plain"), "plain");
    }

    #[test]
    fn png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canvas.png");
        let canvas = compose(&element(10.0, 10.0), MIN_SCALE, None, None);

        save_png(&canvas, &path).unwrap();

        assert_eq!(load_image(&path).unwrap().dimensions(), (50, 50));
        assert_eq!(
            load_image(dir.path().join("missing.png")).unwrap_err().kind,
            PdfSignErrorKind::ResourceError
        );
    }
}
