use std::io::Cursor;

use image::RgbaImage;

pub const JPEG_QUALITY: u8 = 95;

// ── Choices ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionChoice {
    Original,
    Fhd,
    Hd,
    Half,
    Double,
    Custom,
}

impl ResolutionChoice {
    pub const ALL: [ResolutionChoice; 6] = [
        ResolutionChoice::Original,
        ResolutionChoice::Fhd,
        ResolutionChoice::Hd,
        ResolutionChoice::Half,
        ResolutionChoice::Double,
        ResolutionChoice::Custom,
    ];

    /// Output dimensions for a source of `src_w x src_h`. Custom falls back to
    /// the source size when a dimension is unset.
    pub fn target_size(self, src_w: u32, src_h: u32, custom: (u32, u32)) -> (u32, u32) {
        match self {
            ResolutionChoice::Original => (src_w, src_h),
            ResolutionChoice::Fhd => (1920, 1080),
            ResolutionChoice::Hd => (1280, 720),
            ResolutionChoice::Half => (
                (src_w as f32 / 2.0).round() as u32,
                (src_h as f32 / 2.0).round() as u32,
            ),
            ResolutionChoice::Double => (src_w * 2, src_h * 2),
            ResolutionChoice::Custom => (
                if custom.0 > 0 { custom.0 } else { src_w },
                if custom.1 > 0 { custom.1 } else { src_h },
            ),
        }
    }

    pub fn describe(self, src_w: u32, src_h: u32) -> String {
        match self {
            ResolutionChoice::Original => format!("Original ({src_w} × {src_h})"),
            ResolutionChoice::Fhd => "1920 × 1080".to_string(),
            ResolutionChoice::Hd => "1280 × 720".to_string(),
            ResolutionChoice::Half => {
                let (w, h) = self.target_size(src_w, src_h, (0, 0));
                format!("50% ({w} × {h})")
            }
            ResolutionChoice::Double => format!("200% ({} × {})", src_w * 2, src_h * 2),
            ResolutionChoice::Custom => "Custom".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Jpeg,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 2] = [ExportFormat::Png, ExportFormat::Jpeg];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExportFormat::Png => "PNG (lossless)",
            ExportFormat::Jpeg => "JPG (quality 95)",
        }
    }
}

// ── Rasterization ───────────────────────────────────────────────────────────

/// Resample the displayed result to the chosen dimensions and encode it.
/// Pure client-side work on the already-fetched raster; no server round-trip.
pub fn render_export(
    result: &RgbaImage,
    resolution: ResolutionChoice,
    custom: (u32, u32),
    format: ExportFormat,
) -> Result<(Vec<u8>, (u32, u32)), image::ImageError> {
    let (src_w, src_h) = (result.width(), result.height());
    let (w, h) = resolution.target_size(src_w, src_h, custom);

    let scaled;
    let img = if (w, h) == (src_w, src_h) {
        result
    } else {
        scaled = image::imageops::resize(result, w, h, image::imageops::FilterType::Lanczos3);
        &scaled
    };

    let mut buf = Cursor::new(Vec::new());
    match format {
        ExportFormat::Png => {
            img.write_to(&mut buf, image::ImageFormat::Png)?;
        }
        ExportFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = image::DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
            rgb.write_with_encoder(encoder)?;
        }
    }
    Ok((buf.into_inner(), (w, h)))
}

/// Filename encoding the output dimensions and a timestamp.
pub fn export_filename(w: u32, h: u32, format: ExportFormat, ts: u128) -> String {
    format!("cutout_{w}x{h}_{ts}.{}", format.extension())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_and_double_scale_exactly() {
        assert_eq!(
            ResolutionChoice::Half.target_size(800, 600, (0, 0)),
            (400, 300)
        );
        assert_eq!(
            ResolutionChoice::Double.target_size(800, 600, (0, 0)),
            (1600, 1200)
        );
    }

    #[test]
    fn half_rounds_odd_dimensions() {
        assert_eq!(
            ResolutionChoice::Half.target_size(801, 601, (0, 0)),
            (401, 301)
        );
    }

    #[test]
    fn presets_ignore_source_size() {
        assert_eq!(
            ResolutionChoice::Fhd.target_size(123, 45, (0, 0)),
            (1920, 1080)
        );
        assert_eq!(
            ResolutionChoice::Hd.target_size(123, 45, (0, 0)),
            (1280, 720)
        );
    }

    #[test]
    fn custom_falls_back_to_source_for_unset_dimensions() {
        assert_eq!(
            ResolutionChoice::Custom.target_size(800, 600, (1024, 0)),
            (1024, 600)
        );
        assert_eq!(
            ResolutionChoice::Custom.target_size(800, 600, (0, 0)),
            (800, 600)
        );
    }

    #[test]
    fn render_export_resizes_and_encodes_png() {
        let img = RgbaImage::from_pixel(800, 600, image::Rgba([10, 20, 30, 255]));
        let (bytes, (w, h)) =
            render_export(&img, ResolutionChoice::Half, (0, 0), ExportFormat::Png).unwrap();
        assert_eq!((w, h), (400, 300));
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 300));
    }

    #[test]
    fn render_export_original_jpeg_keeps_dimensions() {
        let img = RgbaImage::from_pixel(64, 48, image::Rgba([200, 100, 50, 255]));
        let (bytes, (w, h)) =
            render_export(&img, ResolutionChoice::Original, (0, 0), ExportFormat::Jpeg).unwrap();
        assert_eq!((w, h), (64, 48));
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn filename_encodes_dimensions_and_timestamp() {
        assert_eq!(
            export_filename(400, 300, ExportFormat::Jpeg, 1700000000000),
            "cutout_400x300_1700000000000.jpg"
        );
        assert_eq!(
            export_filename(1920, 1080, ExportFormat::Png, 7),
            "cutout_1920x1080_7.png"
        );
    }
}
