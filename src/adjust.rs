use image::RgbaImage;

// ── Adjustment parameters ───────────────────────────────────────────────────

/// Transient UI state for the color/blur controls. The backend is the
/// authority for the final composited output; these values are only sent
/// along and, while no mask exists, approximated client-side for preview.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdjustParams {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub background: [u8; 3],
    pub edge_blur: u32,
}

impl Default for AdjustParams {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            background: [255, 255, 255],
            edge_blur: 0,
        }
    }
}

/// Parse a `#rrggbb` hex string into an 8-bit RGB triple.
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let s = s.strip_prefix('#').unwrap_or(s);
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&s[0..2], 16).ok()?;
    let g = u8::from_str_radix(&s[2..4], 16).ok()?;
    let b = u8::from_str_radix(&s[4..6], 16).ok()?;
    Some([r, g, b])
}

pub fn format_hex_color(c: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

// ── Client-side preview ─────────────────────────────────────────────────────

/// Brightness/contrast/saturation approximation for the no-mask preview.
/// Brightness is a plain multiplier, contrast pivots around mid-gray, and
/// saturation mixes each channel with the pixel's luma. The preview canvas is
/// filled with the background color first, so source transparency shows the
/// chosen color; the adjustments apply to the image only, not the fill.
pub fn apply_preview(src: &RgbaImage, params: &AdjustParams) -> RgbaImage {
    let bg = params.background;
    let mut out = src.clone();
    for px in out.pixels_mut() {
        let [r, g, b, a] = px.0;
        let mut ch = [r as f32, g as f32, b as f32];

        for v in &mut ch {
            *v *= params.brightness;
        }
        for v in &mut ch {
            *v = (*v - 128.0) * params.contrast + 128.0;
        }
        let luma = 0.299 * ch[0] + 0.587 * ch[1] + 0.114 * ch[2];
        for v in &mut ch {
            *v = luma + (*v - luma) * params.saturation;
        }

        let alpha = a as f32 / 255.0;
        px.0 = [
            (ch[0].clamp(0.0, 255.0) * alpha + bg[0] as f32 * (1.0 - alpha)) as u8,
            (ch[1].clamp(0.0, 255.0) * alpha + bg[1] as f32 * (1.0 - alpha)) as u8,
            (ch[2].clamp(0.0, 255.0) * alpha + bg[2] as f32 * (1.0 - alpha)) as u8,
            255,
        ];
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────
