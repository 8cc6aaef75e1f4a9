use eframe::egui;
use image::RgbaImage;
use tracing::warn;

// ── Annotation model ────────────────────────────────────────────────────────

pub const REMOVE_THRESHOLD: f32 = 15.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointLabel {
    Background = 0,
    Foreground = 1,
}

impl PointLabel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointAnnotation {
    pub x: f32,
    pub y: f32,
    pub label: PointLabel,
}

/// Axis-aligned box in image pixel space, normalized so `x1<=x2, y1<=y2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn from_corners(a: egui::Pos2, b: egui::Pos2) -> Self {
        Self {
            x1: a.x.min(b.x),
            y1: a.y.min(b.y),
            x2: a.x.max(b.x),
            y2: a.y.max(b.y),
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

// ── Tool / interaction state ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Tool {
    Positive,
    Negative,
    Box,
}

#[derive(Clone, Copy, Debug)]
pub enum DragState {
    None,
    /// Box drag in progress; anchor is in image space.
    Drawing { anchor: egui::Pos2 },
}

// ── Session ─────────────────────────────────────────────────────────────────

/// Everything tied to one uploaded image. Replaced wholesale on a new upload,
/// which is what invalidates the previous backend session.
pub struct Session {
    pub id: String,
    pub image: RgbaImage,
    pub points: Vec<PointAnnotation>,
    pub bbox: Option<BoundingBox>,
    pub mask: Option<RgbaImage>,
}

impl Session {
    pub fn new(id: String, image: RgbaImage) -> Self {
        Self {
            id,
            image,
            points: Vec::new(),
            bbox: None,
            mask: None,
        }
    }

    pub fn image_size(&self) -> egui::Vec2 {
        egui::vec2(self.image.width() as f32, self.image.height() as f32)
    }

    pub fn add_point(&mut self, x: f32, y: f32, label: PointLabel) {
        self.points.push(PointAnnotation { x, y, label });
    }

    /// Remove the first point within `REMOVE_THRESHOLD` of `(x, y)`, scanning
    /// in reverse insertion order so the most recently added point wins among
    /// overlaps. Returns true if a point was removed.
    pub fn remove_point_near(&mut self, x: f32, y: f32) -> bool {
        for i in (0..self.points.len()).rev() {
            let p = self.points[i];
            let dist = ((p.x - x).powi(2) + (p.y - y).powi(2)).sqrt();
            if dist <= REMOVE_THRESHOLD {
                self.points.remove(i);
                return true;
            }
        }
        false
    }

    pub fn has_annotations(&self) -> bool {
        !self.points.is_empty() || self.bbox.is_some()
    }

    pub fn clear_annotations(&mut self) {
        self.points.clear();
        self.bbox = None;
        self.mask = None;
    }

    /// Cache a freshly decoded mask. The backend aligns masks to the source
    /// dimensions; if they disagree the mask is resampled to fit rather than
    /// rendered misaligned.
    pub fn set_mask(&mut self, mask: RgbaImage) {
        let (w, h) = (self.image.width(), self.image.height());
        if mask.width() != w || mask.height() != h {
            warn!(
                mask_w = mask.width(),
                mask_h = mask.height(),
                image_w = w,
                image_h = h,
                "mask dimensions do not match source image, resampling"
            );
            self.mask = Some(image::imageops::resize(
                &mask,
                w,
                h,
                image::imageops::FilterType::Nearest,
            ));
        } else {
            self.mask = Some(mask);
        }
    }
}

// ── View transform ──────────────────────────────────────────────────────────

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 5.0;
pub const ZOOM_STEP: f32 = 0.2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Source,
    Result,
}

/// Display-only zoom/pan for one canvas. Never touches stored pixel data or
/// annotation coordinates.
#[derive(Clone, Copy, Debug)]
pub struct ViewTransform {
    pub zoom: f32,
    pub pan: egui::Vec2,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: egui::Vec2::ZERO,
        }
    }
}

impl ViewTransform {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn zoom_by(&mut self, delta: f32) {
        self.zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Zoom keeping the point under the cursor visually fixed. `offset` is the
    /// cursor position relative to the canvas center.
    pub fn zoom_at(&mut self, offset: egui::Vec2, delta: f32) {
        let old_zoom = self.zoom;
        let new_zoom = (old_zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
        if new_zoom == old_zoom {
            return;
        }
        let rel = offset - self.pan;
        self.pan -= rel * (new_zoom / old_zoom - 1.0);
        self.zoom = new_zoom;
    }

    pub fn pan_by(&mut self, delta: egui::Vec2) {
        self.pan += delta;
    }

    /// Convert image-space coords to screen-space.
    pub fn image_to_screen(
        &self,
        canvas_rect: egui::Rect,
        image_size: egui::Vec2,
        img_pos: egui::Pos2,
    ) -> egui::Pos2 {
        let center = canvas_rect.center();
        center + self.pan + (img_pos.to_vec2() - image_size * 0.5) * self.zoom
    }

    /// Convert screen-space coords to image-space.
    pub fn screen_to_image(
        &self,
        canvas_rect: egui::Rect,
        image_size: egui::Vec2,
        screen_pos: egui::Pos2,
    ) -> egui::Pos2 {
        let center = canvas_rect.center();
        let rel = screen_pos - center - self.pan;
        egui::pos2(
            rel.x / self.zoom + image_size.x * 0.5,
            rel.y / self.zoom + image_size.y * 0.5,
        )
    }

    pub fn image_rect_on_screen(
        &self,
        canvas_rect: egui::Rect,
        image_size: egui::Vec2,
    ) -> egui::Rect {
        let top_left = self.image_to_screen(canvas_rect, image_size, egui::Pos2::ZERO);
        let bot_right =
            self.image_to_screen(canvas_rect, image_size, image_size.to_pos2());
        egui::Rect::from_min_max(top_left, bot_right)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_session() -> Session {
        Session::new("s1".into(), RgbaImage::new(800, 600))
    }

    #[test]
    fn add_then_remove_restores_point_set() {
        let mut s = blank_session();
        s.add_point(100.0, 100.0, PointLabel::Foreground);
        let before = s.points.clone();
        s.add_point(300.0, 200.0, PointLabel::Background);
        assert!(s.remove_point_near(305.0, 195.0));
        assert_eq!(s.points, before);
    }

    #[test]
    fn removal_prefers_most_recently_added() {
        let mut s = blank_session();
        s.add_point(100.0, 100.0, PointLabel::Foreground);
        s.add_point(105.0, 100.0, PointLabel::Background);
        assert!(s.remove_point_near(102.0, 100.0));
        assert_eq!(s.points.len(), 1);
        assert_eq!(s.points[0].label, PointLabel::Foreground);
    }

    #[test]
    fn removal_outside_threshold_is_a_noop() {
        let mut s = blank_session();
        s.add_point(100.0, 100.0, PointLabel::Foreground);
        assert!(!s.remove_point_near(130.0, 100.0));
        assert_eq!(s.points.len(), 1);
    }

    #[test]
    fn bbox_is_normalized_regardless_of_drag_direction() {
        let b = BoundingBox::from_corners(egui::pos2(200.0, 300.0), egui::pos2(50.0, 80.0));
        assert!(b.x1 <= b.x2 && b.y1 <= b.y2);
        assert_eq!(b.as_array(), [50.0, 80.0, 200.0, 300.0]);

        let b = BoundingBox::from_corners(egui::pos2(10.0, 250.0), egui::pos2(90.0, 20.0));
        assert_eq!(b.as_array(), [10.0, 20.0, 90.0, 250.0]);
    }

    #[test]
    fn zoom_is_always_clamped() {
        let mut v = ViewTransform::default();
        for _ in 0..100 {
            v.zoom_by(ZOOM_STEP);
        }
        assert_eq!(v.zoom, MAX_ZOOM);
        for _ in 0..100 {
            v.zoom_by(-ZOOM_STEP);
        }
        assert_eq!(v.zoom, MIN_ZOOM);
    }

    #[test]
    fn zoom_at_cursor_keeps_image_point_fixed() {
        let canvas = egui::Rect::from_min_size(egui::pos2(10.0, 40.0), egui::vec2(900.0, 700.0));
        let image_size = egui::vec2(800.0, 600.0);
        let cursor = egui::pos2(250.0, 410.0);

        let mut v = ViewTransform {
            zoom: 1.7,
            pan: egui::vec2(-35.0, 60.0),
        };
        for delta in [ZOOM_STEP, ZOOM_STEP, -ZOOM_STEP, 0.9, -2.0] {
            let before = v.screen_to_image(canvas, image_size, cursor);
            let offset = cursor - canvas.center();
            v.zoom_at(offset, delta);
            let after = v.screen_to_image(canvas, image_size, cursor);
            assert!(
                (before - after).length() < 1e-2,
                "cursor point drifted: {before:?} -> {after:?} at zoom {}",
                v.zoom
            );
        }
    }

    #[test]
    fn zoom_at_is_noop_when_clamped_zoom_unchanged() {
        let mut v = ViewTransform {
            zoom: MAX_ZOOM,
            pan: egui::vec2(12.0, -7.0),
        };
        v.zoom_at(egui::vec2(100.0, 50.0), ZOOM_STEP);
        assert_eq!(v.zoom, MAX_ZOOM);
        assert_eq!(v.pan, egui::vec2(12.0, -7.0));
    }

    #[test]
    fn screen_image_round_trip() {
        let canvas = egui::Rect::from_min_size(egui::pos2(0.0, 0.0), egui::vec2(640.0, 480.0));
        let image_size = egui::vec2(800.0, 600.0);
        let v = ViewTransform {
            zoom: 0.5,
            pan: egui::vec2(20.0, -14.0),
        };
        let img = egui::pos2(123.0, 456.0);
        let back = v.screen_to_image(canvas, image_size, v.image_to_screen(canvas, image_size, img));
        assert!((back - img).length() < 1e-3);
    }

    #[test]
    fn mask_with_mismatched_dimensions_is_reconciled() {
        let mut s = blank_session();
        s.set_mask(RgbaImage::new(400, 300));
        let mask = s.mask.as_ref().unwrap();
        assert_eq!((mask.width(), mask.height()), (800, 600));
    }

    #[test]
    fn clear_annotations_drops_points_box_and_mask() {
        let mut s = blank_session();
        s.add_point(1.0, 2.0, PointLabel::Foreground);
        s.bbox = Some(BoundingBox::from_corners(
            egui::pos2(0.0, 0.0),
            egui::pos2(10.0, 10.0),
        ));
        s.set_mask(RgbaImage::new(800, 600));
        s.clear_annotations();
        assert!(s.points.is_empty());
        assert!(s.bbox.is_none());
        assert!(s.mask.is_none());
        assert!(!s.has_annotations());
    }
}
