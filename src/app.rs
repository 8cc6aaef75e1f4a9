use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::{Duration, Instant};

use eframe::egui;
use image::RgbaImage;
use tracing::{info, warn};

use crate::adjust::{self, AdjustParams};
use crate::api::{
    self, AdjustRequest, ApiClient, ApiEvent, ModelInfo, SegmentRequest,
};
use crate::debounce::Debouncer;
use crate::export::{self, ExportFormat, ResolutionChoice};
use crate::state::{
    BoundingBox, DragState, PointLabel, Session, Side, Tool, ViewTransform, ZOOM_STEP,
};

const ADJUST_QUIET: Duration = Duration::from_millis(300);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

const POSITIVE_COLOR: egui::Color32 = egui::Color32::from_rgb(0x00, 0xff, 0x88);
const NEGATIVE_COLOR: egui::Color32 = egui::Color32::from_rgb(0xff, 0x33, 0x66);
const MASK_TINT: egui::Color32 = egui::Color32::from_rgba_premultiplied(0, 102, 54, 102);

// ── Status line ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StatusKind {
    Info,
    Success,
    Error,
}

struct StatusMessage {
    text: String,
    kind: StatusKind,
    shown_at: Instant,
}

// ── App ─────────────────────────────────────────────────────────────────────

pub struct StudioApp {
    client: ApiClient,
    tx: Sender<ApiEvent>,
    rx: Receiver<ApiEvent>,

    session: Option<Session>,
    result: Option<RgbaImage>,

    source_texture: Option<egui::TextureHandle>,
    mask_texture: Option<egui::TextureHandle>,
    result_texture: Option<egui::TextureHandle>,

    tool: Tool,
    drag: DragState,
    source_view: ViewTransform,
    result_view: ViewTransform,

    adjust: AdjustParams,
    bg_hex: String,
    debouncer: Debouncer<AdjustParams>,

    models: Vec<ModelInfo>,
    cuda_available: Option<bool>,
    models_failed: bool,
    model_size: String,

    upload_in_flight: bool,
    segment_in_flight: bool,

    status: Option<StatusMessage>,

    export_open: bool,
    export_resolution: ResolutionChoice,
    export_format: ExportFormat,
    custom_width: u32,
    custom_height: u32,
}

impl StudioApp {
    pub fn new(client: ApiClient, ctx: &egui::Context) -> Self {
        let (tx, rx) = channel();
        api::spawn_list_models(client.clone(), tx.clone(), ctx.clone());

        Self {
            client,
            tx,
            rx,
            session: None,
            result: None,
            source_texture: None,
            mask_texture: None,
            result_texture: None,
            tool: Tool::Positive,
            drag: DragState::None,
            source_view: ViewTransform::default(),
            result_view: ViewTransform::default(),
            adjust: AdjustParams::default(),
            bg_hex: adjust::format_hex_color(AdjustParams::default().background),
            debouncer: Debouncer::new(ADJUST_QUIET),
            models: Vec::new(),
            cuda_available: None,
            models_failed: false,
            model_size: "small".to_string(),
            upload_in_flight: false,
            segment_in_flight: false,
            status: None,
            export_open: false,
            export_resolution: ResolutionChoice::Original,
            export_format: ExportFormat::Png,
            custom_width: 0,
            custom_height: 0,
        }
    }

    fn show_status(&mut self, text: impl Into<String>, kind: StatusKind) {
        self.status = Some(StatusMessage {
            text: text.into(),
            kind,
            shown_at: Instant::now(),
        });
    }

    // ── Network flows ───────────────────────────────────────────────────────

    fn begin_upload(&mut self, ctx: &egui::Context, path: PathBuf) {
        if self.upload_in_flight {
            return;
        }
        info!(path = %path.display(), "uploading image");
        self.upload_in_flight = true;
        self.show_status("Uploading image…", StatusKind::Info);
        api::spawn_upload(self.client.clone(), self.tx.clone(), ctx.clone(), path);
    }

    fn begin_segment(&mut self, ctx: &egui::Context) {
        if let Some(msg) = segment_precondition_error(self.session.as_ref()) {
            self.show_status(msg, StatusKind::Error);
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        let req = SegmentRequest {
            session_id: session.id.clone(),
            points: session
                .points
                .iter()
                .map(|p| [p.x, p.y, p.label.as_u8() as f32])
                .collect(),
            bbox: session.bbox.map(|b| b.as_array()),
            model_size: self.model_size.clone(),
        };
        self.segment_in_flight = true;
        self.show_status("Running segmentation…", StatusKind::Info);
        api::spawn_segment(self.client.clone(), self.tx.clone(), ctx.clone(), req);
    }

    fn begin_adjust_commit(&mut self, ctx: &egui::Context, params: AdjustParams) {
        let Some(session) = &self.session else {
            return;
        };
        let req = AdjustRequest {
            session_id: session.id.clone(),
            brightness: params.brightness,
            contrast: params.contrast,
            saturation: params.saturation,
            background_color: params.background,
            edge_blur: params.edge_blur,
        };
        self.show_status("Processing adjustments…", StatusKind::Info);
        api::spawn_adjust(self.client.clone(), self.tx.clone(), ctx.clone(), req);
    }

    /// Debounce fire: commit to the server when a mask exists, otherwise
    /// recompute the client-side approximation.
    fn apply_adjustments(&mut self, ctx: &egui::Context, params: AdjustParams) {
        let Some(session) = &self.session else {
            return;
        };
        if session.mask.is_some() {
            self.begin_adjust_commit(ctx, params);
        } else {
            self.result = Some(adjust::apply_preview(&session.image, &params));
            self.result_texture = None;
        }
    }

    fn on_adjust_changed(&mut self, ctx: &egui::Context) {
        self.debouncer.schedule(self.adjust, Instant::now());
        if let Some(deadline) = self.debouncer.next_deadline() {
            ctx.request_repaint_after(deadline.saturating_duration_since(Instant::now()));
        }
    }

    // ── Event channel ───────────────────────────────────────────────────────

    fn poll_events(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                ApiEvent::ModelsLoaded(Ok(resp)) => {
                    self.cuda_available = Some(resp.cuda_available);
                    if let Some(current) = resp.current_model {
                        self.model_size = current;
                    }
                    self.models = resp.models;
                    self.models_failed = false;
                }
                ApiEvent::ModelsLoaded(Err(err)) => {
                    warn!(%err, "could not load model info");
                    self.models_failed = true;
                }
                ApiEvent::Uploaded(Ok(uploaded)) => {
                    self.upload_in_flight = false;
                    info!(session_id = %uploaded.session_id, "image uploaded");
                    // New session: every piece of prior state is discarded.
                    self.session = Some(Session::new(uploaded.session_id, uploaded.image));
                    self.result = None;
                    self.source_texture = None;
                    self.mask_texture = None;
                    self.result_texture = None;
                    self.drag = DragState::None;
                    self.source_view.reset();
                    self.result_view.reset();
                    self.debouncer.cancel();
                    self.show_status(
                        "Image uploaded! Mark the subject with the tools.",
                        StatusKind::Success,
                    );
                }
                ApiEvent::Uploaded(Err(err)) => {
                    self.upload_in_flight = false;
                    self.show_status(format!("Upload failed: {err}"), StatusKind::Error);
                }
                ApiEvent::Segmented { session_id, result } => {
                    self.segment_in_flight = false;
                    if !self.session_matches(&session_id) {
                        warn!(%session_id, "discarding segmentation for a stale session");
                        continue;
                    }
                    match result {
                        Ok(outcome) => {
                            if let Some(session) = &mut self.session {
                                session.set_mask(outcome.mask);
                            }
                            self.mask_texture = None;
                            self.show_status(
                                format!("Segmentation done! Score: {:.3}", outcome.score),
                                StatusKind::Success,
                            );
                            // A mask now exists, so the commit path takes over.
                            self.begin_adjust_commit(ctx, self.adjust);
                        }
                        Err(err) => {
                            self.show_status(
                                format!("Segmentation failed: {err}"),
                                StatusKind::Error,
                            );
                        }
                    }
                }
                ApiEvent::Adjusted { session_id, result } => {
                    if !self.session_matches(&session_id) {
                        warn!(%session_id, "discarding adjustment for a stale session");
                        continue;
                    }
                    match result {
                        Ok(img) => {
                            self.result = Some(img);
                            self.result_texture = None;
                            self.show_status("Adjustments applied!", StatusKind::Success);
                        }
                        Err(err) => {
                            // Keep whatever is currently displayed.
                            warn!(%err, "adjustment call failed");
                        }
                    }
                }
            }
        }
    }

    fn session_matches(&self, session_id: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.id == session_id)
    }

    // ── Textures ────────────────────────────────────────────────────────────

    fn ensure_textures(&mut self, ctx: &egui::Context) {
        if self.source_texture.is_none() {
            if let Some(session) = &self.session {
                self.source_texture = Some(load_texture(ctx, "source", &session.image));
            }
        }
        if self.mask_texture.is_none() {
            if let Some(mask) = self.session.as_ref().and_then(|s| s.mask.as_ref()) {
                self.mask_texture = Some(mask_overlay_texture(ctx, mask));
            }
        }
        if self.result_texture.is_none() {
            if let Some(result) = &self.result {
                self.result_texture = Some(load_texture(ctx, "result", result));
            }
        }
    }

    // ── Canvas interaction ──────────────────────────────────────────────────

    /// Shared per-side zoom and pan handling. Returns true while panning so
    /// tool interactions can be suppressed.
    fn view_controls(
        ctx: &egui::Context,
        response: &egui::Response,
        view: &mut ViewTransform,
    ) -> bool {
        let shift = ctx.input(|i| i.modifiers.shift);
        let panning = response.dragged_by(egui::PointerButton::Middle)
            || (shift && response.dragged_by(egui::PointerButton::Primary));
        if panning {
            view.pan_by(response.drag_delta());
        }

        let scroll = ctx.input(|i| i.raw_scroll_delta.y);
        if scroll != 0.0 && response.hovered() {
            if let Some(cursor) = response.hover_pos() {
                let delta = if scroll > 0.0 { ZOOM_STEP } else { -ZOOM_STEP };
                view.zoom_at(cursor - response.rect.center(), delta);
            }
        }
        panning
    }

    fn zoom_header(&mut self, ui: &mut egui::Ui, title: &str, side: Side) {
        let view = match side {
            Side::Source => &mut self.source_view,
            Side::Result => &mut self.result_view,
        };
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new(title).strong());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(format!("{:.0}%", view.zoom * 100.0));
                if ui.button("⟳").on_hover_text("Reset view").clicked() {
                    view.reset();
                }
                if ui.button("−").clicked() {
                    view.zoom_by(-ZOOM_STEP);
                }
                if ui.button("+").clicked() {
                    view.zoom_by(ZOOM_STEP);
                }
            });
        });
    }

    fn source_canvas(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let canvas_rect = response.rect;
        painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

        let panning = Self::view_controls(ctx, &response, &mut self.source_view);

        let Some(session) = &mut self.session else {
            painter.text(
                canvas_rect.center(),
                egui::Align2::CENTER_CENTER,
                "Drop an image here or use Upload",
                egui::FontId::proportional(16.0),
                egui::Color32::GRAY,
            );
            return;
        };
        let image_size = session.image_size();
        let view = self.source_view;
        let img_rect = view.image_rect_on_screen(canvas_rect, image_size);

        if let Some(tex) = &self.source_texture {
            painter.image(
                tex.id(),
                img_rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }
        if let Some(tex) = &self.mask_texture {
            painter.image(
                tex.id(),
                img_rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }

        // Point and box interaction, original-image pixel space throughout.
        let shift = ctx.input(|i| i.modifiers.shift);
        if !panning && !shift {
            let hover_img = response
                .hover_pos()
                .map(|p| view.screen_to_image(canvas_rect, image_size, p));

            let secondary_pressed = response.hovered()
                && ctx.input(|i| i.pointer.button_pressed(egui::PointerButton::Secondary));
            if secondary_pressed {
                if let Some(pos) = hover_img {
                    if session.remove_point_near(pos.x, pos.y) {
                        self.status = Some(StatusMessage {
                            text: "Point removed".to_string(),
                            kind: StatusKind::Info,
                            shown_at: Instant::now(),
                        });
                    }
                }
            }

            let primary_pressed = response.hovered()
                && ctx.input(|i| i.pointer.button_pressed(egui::PointerButton::Primary));
            match self.tool {
                Tool::Positive | Tool::Negative => {
                    if primary_pressed {
                        if let Some(pos) = hover_img {
                            let label = if self.tool == Tool::Positive {
                                PointLabel::Foreground
                            } else {
                                PointLabel::Background
                            };
                            session.add_point(pos.x, pos.y, label);
                        }
                    }
                }
                Tool::Box => {
                    if response.drag_started_by(egui::PointerButton::Primary) {
                        if let Some(pos) = hover_img {
                            self.drag = DragState::Drawing { anchor: pos };
                            session.bbox = Some(BoundingBox::from_corners(pos, pos));
                        }
                    }
                    if response.dragged_by(egui::PointerButton::Primary) {
                        if let DragState::Drawing { anchor } = self.drag {
                            let current = response
                                .hover_pos()
                                .or(ctx.input(|i| i.pointer.latest_pos()))
                                .map(|p| view.screen_to_image(canvas_rect, image_size, p));
                            if let Some(pos) = current {
                                session.bbox = Some(BoundingBox::from_corners(anchor, pos));
                            }
                        }
                    }
                    if response.drag_stopped_by(egui::PointerButton::Primary) {
                        self.drag = DragState::None;
                    }
                }
            }
        }

        // Overlay rendering: pure function of the current annotation state.
        let zoom = view.zoom;
        for point in &session.points {
            let center =
                view.image_to_screen(canvas_rect, image_size, egui::pos2(point.x, point.y));
            let color = match point.label {
                PointLabel::Foreground => POSITIVE_COLOR,
                PointLabel::Background => NEGATIVE_COLOR,
            };
            painter.circle_filled(
                center,
                14.0 * zoom,
                egui::Color32::from_white_alpha(77),
            );
            painter.circle(
                center,
                10.0 * zoom,
                color,
                egui::Stroke::new(3.0 * zoom, egui::Color32::WHITE),
            );
            painter.circle_filled(center, 3.0 * zoom, egui::Color32::WHITE);
        }

        if let Some(bbox) = session.bbox {
            let min = view.image_to_screen(canvas_rect, image_size, egui::pos2(bbox.x1, bbox.y1));
            let max = view.image_to_screen(canvas_rect, image_size, egui::pos2(bbox.x2, bbox.y2));
            draw_box(&painter, egui::Rect::from_min_max(min, max), zoom);
        }
    }

    fn result_canvas(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let canvas_rect = response.rect;
        painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

        Self::view_controls(ctx, &response, &mut self.result_view);

        let Some(result) = &self.result else {
            painter.text(
                canvas_rect.center(),
                egui::Align2::CENTER_CENTER,
                "Result appears here after segmentation",
                egui::FontId::proportional(16.0),
                egui::Color32::GRAY,
            );
            return;
        };
        let image_size = egui::vec2(result.width() as f32, result.height() as f32);
        let img_rect = self
            .result_view
            .image_rect_on_screen(canvas_rect, image_size);
        if let Some(tex) = &self.result_texture {
            painter.image(
                tex.id(),
                img_rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }
    }

    // ── Panels ──────────────────────────────────────────────────────────────

    fn toolbar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.horizontal(|ui| {
            let upload = ui.add_enabled(!self.upload_in_flight, egui::Button::new("Upload…"));
            if upload.clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .add_filter("Images", &["png", "jpg", "jpeg", "webp", "bmp"])
                    .pick_file()
                {
                    self.begin_upload(ctx, path);
                }
            }
            ui.separator();

            ui.selectable_value(&mut self.tool, Tool::Positive, "＋ Point");
            ui.selectable_value(&mut self.tool, Tool::Negative, "− Point");
            ui.selectable_value(&mut self.tool, Tool::Box, "Box");
            ui.separator();

            let segment = ui.add_enabled(!self.segment_in_flight, egui::Button::new("Segment"));
            if segment.clicked() {
                self.begin_segment(ctx);
            }
            if ui.button("Clear").clicked() {
                if let Some(session) = &mut self.session {
                    session.clear_annotations();
                    self.mask_texture = None;
                    self.show_status("Annotations reset", StatusKind::Info);
                }
            }
            if ui.button("Export…").clicked() {
                if let Some(result) = &self.result {
                    self.custom_width = result.width();
                    self.custom_height = result.height();
                    self.export_open = true;
                } else {
                    self.show_status("Generate a result first!", StatusKind::Error);
                }
            }
            ui.separator();

            egui::ComboBox::from_id_salt("model_size")
                .selected_text(&self.model_size)
                .show_ui(ui, |ui| {
                    if self.models.is_empty() {
                        for id in ["tiny", "small", "base_plus", "large"] {
                            ui.selectable_value(&mut self.model_size, id.to_string(), id);
                        }
                    } else {
                        for model in &self.models {
                            ui.selectable_value(
                                &mut self.model_size,
                                model.id.clone(),
                                format!(
                                    "{} — {}, {} quality, {} GB VRAM",
                                    model.name, model.speed, model.quality, model.vram_gb
                                ),
                            );
                        }
                    }
                });
            match self.cuda_available {
                Some(true) => {
                    ui.colored_label(POSITIVE_COLOR, "CUDA (GPU)");
                }
                Some(false) => {
                    ui.colored_label(egui::Color32::YELLOW, "CPU only");
                }
                None if self.models_failed => {
                    ui.colored_label(egui::Color32::LIGHT_RED, "model info unavailable");
                }
                None => {}
            }
        });
    }

    fn adjustments_panel(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.heading("Adjustments");
        let mut changed = false;

        ui.label("Brightness");
        changed |= ui
            .add(egui::Slider::new(&mut self.adjust.brightness, 0.0..=2.0))
            .changed();
        ui.label("Contrast");
        changed |= ui
            .add(egui::Slider::new(&mut self.adjust.contrast, 0.0..=2.0))
            .changed();
        ui.label("Saturation");
        changed |= ui
            .add(egui::Slider::new(&mut self.adjust.saturation, 0.0..=2.0))
            .changed();
        ui.separator();

        ui.label("Background color");
        ui.horizontal(|ui| {
            let mut color = self.adjust.background;
            if ui.color_edit_button_srgb(&mut color).changed() {
                self.adjust.background = color;
                self.bg_hex = adjust::format_hex_color(color);
                changed = true;
            }
            let hex_edit = ui.add(
                egui::TextEdit::singleline(&mut self.bg_hex).desired_width(70.0),
            );
            if hex_edit.changed() {
                if let Some(rgb) = adjust::parse_hex_color(&self.bg_hex) {
                    self.adjust.background = rgb;
                    changed = true;
                }
            }
        });
        ui.separator();

        ui.label("Edge blur");
        changed |= ui
            .add(egui::Slider::new(&mut self.adjust.edge_blur, 0..=30))
            .changed();

        if changed {
            self.on_adjust_changed(ctx);
        }

        ui.separator();
        ui.collapsing("Controls", |ui| {
            ui.label("Left click: place point / drag box");
            ui.label("Right click: remove nearby point");
            ui.label("Scroll: zoom at cursor");
            ui.label("Middle drag or Shift+drag: pan");
        });
    }

    fn status_bar(&mut self, ui: &mut egui::Ui) {
        let expired = self.status.as_ref().is_some_and(|s| {
            s.kind != StatusKind::Error && s.shown_at.elapsed() > STATUS_TIMEOUT
        });
        if expired {
            self.status = None;
        }
        if let Some(status) = &self.status {
            let color = match status.kind {
                StatusKind::Info => egui::Color32::LIGHT_GRAY,
                StatusKind::Success => POSITIVE_COLOR,
                StatusKind::Error => egui::Color32::LIGHT_RED,
            };
            ui.colored_label(color, &status.text);
            if status.kind != StatusKind::Error {
                ui.ctx().request_repaint_after(STATUS_TIMEOUT);
            }
        } else {
            ui.label("");
        }
    }

    fn export_window(&mut self, ctx: &egui::Context) {
        if !self.export_open {
            return;
        }
        let (src_w, src_h) = match &self.result {
            Some(result) => (result.width(), result.height()),
            None => {
                self.export_open = false;
                return;
            }
        };

        let mut open = self.export_open;
        let mut do_export = false;
        egui::Window::new("Export")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                ui.label("Resolution");
                for choice in ResolutionChoice::ALL {
                    ui.radio_value(
                        &mut self.export_resolution,
                        choice,
                        choice.describe(src_w, src_h),
                    );
                }
                if self.export_resolution == ResolutionChoice::Custom {
                    ui.horizontal(|ui| {
                        ui.label("W:");
                        ui.add(egui::DragValue::new(&mut self.custom_width).range(1..=16384));
                        ui.label("H:");
                        ui.add(egui::DragValue::new(&mut self.custom_height).range(1..=16384));
                    });
                }
                ui.separator();

                ui.label("Format");
                for format in ExportFormat::ALL {
                    ui.radio_value(&mut self.export_format, format, format.label());
                }
                ui.separator();

                if ui.button("Save…").clicked() {
                    do_export = true;
                }
            });
        self.export_open = open;

        if do_export {
            self.export_open = false;
            self.run_export();
        }
    }

    fn run_export(&mut self) {
        let Some(result) = &self.result else {
            self.show_status("Generate a result first!", StatusKind::Error);
            return;
        };
        let custom = (self.custom_width, self.custom_height);
        match export::render_export(result, self.export_resolution, custom, self.export_format) {
            Ok((bytes, (w, h))) => {
                let name = export::export_filename(w, h, self.export_format, api::now_millis());
                let Some(path) = rfd::FileDialog::new().set_file_name(&name).save_file() else {
                    return;
                };
                match std::fs::write(&path, bytes) {
                    Ok(()) => {
                        info!(path = %path.display(), w, h, "exported result");
                        self.show_status(
                            format!(
                                "Saved! ({w}×{h}, {})",
                                self.export_format.extension().to_uppercase()
                            ),
                            StatusKind::Success,
                        );
                    }
                    Err(err) => {
                        self.show_status(format!("Could not save file: {err}"), StatusKind::Error);
                    }
                }
            }
            Err(err) => {
                self.show_status(format!("Export failed: {err}"), StatusKind::Error);
            }
        }
    }
}

// ── eframe App impl ─────────────────────────────────────────────────────────

impl eframe::App for StudioApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_events(ctx);

        if let Some(params) = self.debouncer.poll(Instant::now()) {
            self.apply_adjustments(ctx, params);
        }

        // Only the first file of a multi-file drop is used.
        let dropped = ctx.input(|i| {
            i.raw
                .dropped_files
                .first()
                .and_then(|f| f.path.clone())
        });
        if let Some(path) = dropped {
            self.begin_upload(ctx, path);
        }

        self.ensure_textures(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.toolbar(ui, ctx);
        });
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            self.status_bar(ui);
        });
        egui::SidePanel::right("adjustments")
            .default_width(220.0)
            .show(ctx, |ui| {
                self.adjustments_panel(ui, ctx);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.columns(2, |columns| {
                self.zoom_header(&mut columns[0], "Source", Side::Source);
                self.source_canvas(&mut columns[0], ctx);
                self.zoom_header(&mut columns[1], "Result", Side::Result);
                self.result_canvas(&mut columns[1], ctx);
            });
        });

        self.export_window(ctx);
    }
}

/// Local preconditions for the segmentation trigger. A failure here is
/// surfaced immediately and never reaches the network.
fn segment_precondition_error(session: Option<&Session>) -> Option<&'static str> {
    match session {
        None => Some("Upload an image first!"),
        Some(s) if !s.has_annotations() => Some("Add points or a bounding box first!"),
        Some(_) => None,
    }
}

// ── Painting helpers ────────────────────────────────────────────────────────

fn load_texture(ctx: &egui::Context, name: &str, img: &RgbaImage) -> egui::TextureHandle {
    let size = [img.width() as usize, img.height() as usize];
    let color_image = egui::ColorImage::from_rgba_unmultiplied(size, img.as_raw());
    ctx.load_texture(name, color_image, egui::TextureOptions::LINEAR)
}

/// Build the semi-transparent green overlay from a grayscale mask raster.
fn mask_overlay_texture(ctx: &egui::Context, mask: &RgbaImage) -> egui::TextureHandle {
    let size = [mask.width() as usize, mask.height() as usize];
    let mut color_image = egui::ColorImage::new(size, egui::Color32::TRANSPARENT);
    for (px, out) in mask.pixels().zip(color_image.pixels.iter_mut()) {
        if px.0[0] > 127 {
            *out = MASK_TINT;
        }
    }
    ctx.load_texture("mask", color_image, egui::TextureOptions::LINEAR)
}

/// Triple-stroke box (dark halo, colored main, white inner) with corner marks.
fn draw_box(painter: &egui::Painter, rect: egui::Rect, zoom: f32) {
    painter.rect_stroke(
        rect,
        0.0,
        egui::Stroke::new(7.0 * zoom, egui::Color32::from_black_alpha(128)),
        egui::StrokeKind::Middle,
    );
    painter.rect_stroke(
        rect,
        0.0,
        egui::Stroke::new(4.0 * zoom, POSITIVE_COLOR),
        egui::StrokeKind::Middle,
    );
    painter.rect_stroke(
        rect,
        0.0,
        egui::Stroke::new(2.0 * zoom, egui::Color32::WHITE),
        egui::StrokeKind::Middle,
    );

    let corner = 20.0 * zoom;
    let stroke = egui::Stroke::new(4.0 * zoom, POSITIVE_COLOR);
    let (min, max) = (rect.min, rect.max);
    let corners = [
        (min, egui::vec2(corner, 0.0), egui::vec2(0.0, corner)),
        (
            egui::pos2(max.x, min.y),
            egui::vec2(-corner, 0.0),
            egui::vec2(0.0, corner),
        ),
        (
            egui::pos2(min.x, max.y),
            egui::vec2(corner, 0.0),
            egui::vec2(0.0, -corner),
        ),
        (max, egui::vec2(-corner, 0.0), egui::vec2(0.0, -corner)),
    ];
    for (pos, dx, dy) in corners {
        painter.line_segment([pos, pos + dx], stroke);
        painter.line_segment([pos, pos + dy], stroke);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{SegmentedMask, UploadedImage};
    use image::{Rgba, RgbaImage};

    fn test_app() -> (StudioApp, egui::Context) {
        let ctx = egui::Context::default();
        let app = StudioApp::new(ApiClient::new("http://unused.invalid"), &ctx);
        (app, ctx)
    }

    fn annotated_session(id: &str) -> Session {
        let mut session = Session::new(id.into(), RgbaImage::new(8, 8));
        session.add_point(1.0, 2.0, PointLabel::Foreground);
        session.bbox = Some(BoundingBox::from_corners(
            egui::pos2(0.0, 0.0),
            egui::pos2(4.0, 4.0),
        ));
        session.set_mask(RgbaImage::new(8, 8));
        session
    }

    #[test]
    fn segmentation_requires_a_session() {
        assert_eq!(
            segment_precondition_error(None),
            Some("Upload an image first!")
        );
    }

    #[test]
    fn segmentation_requires_at_least_one_annotation() {
        let session = Session::new("s".into(), RgbaImage::new(10, 10));
        assert_eq!(
            segment_precondition_error(Some(&session)),
            Some("Add points or a bounding box first!")
        );
    }

    #[test]
    fn single_positive_point_passes_preconditions() {
        let mut session = Session::new("s".into(), RgbaImage::new(10, 10));
        session.add_point(5.0, 5.0, PointLabel::Foreground);
        assert_eq!(segment_precondition_error(Some(&session)), None);
    }

    #[test]
    fn box_alone_passes_preconditions() {
        let mut session = Session::new("s".into(), RgbaImage::new(10, 10));
        session.bbox = Some(BoundingBox::from_corners(
            egui::pos2(1.0, 1.0),
            egui::pos2(8.0, 8.0),
        ));
        assert_eq!(segment_precondition_error(Some(&session)), None);
    }

    #[test]
    fn new_upload_resets_annotations_mask_views_and_result() {
        let (mut app, ctx) = test_app();
        app.session = Some(annotated_session("old"));
        app.result = Some(RgbaImage::new(8, 8));
        app.source_view.zoom_by(ZOOM_STEP);
        app.source_view.pan_by(egui::vec2(30.0, -10.0));
        app.result_view.zoom_by(-ZOOM_STEP);
        app.result_view.pan_by(egui::vec2(-5.0, 12.0));
        app.upload_in_flight = true;

        app.tx
            .send(ApiEvent::Uploaded(Ok(UploadedImage {
                session_id: "new".into(),
                image: RgbaImage::new(16, 16),
            })))
            .unwrap();
        app.poll_events(&ctx);

        let session = app.session.as_ref().unwrap();
        assert_eq!(session.id, "new");
        assert!(session.points.is_empty());
        assert!(session.bbox.is_none());
        assert!(session.mask.is_none());
        assert!(app.result.is_none());
        assert!(!app.upload_in_flight);
        for view in [app.source_view, app.result_view] {
            assert_eq!(view.zoom, 1.0);
            assert_eq!(view.pan, egui::Vec2::ZERO);
        }
    }

    #[test]
    fn segmentation_for_current_session_caches_the_mask() {
        let (mut app, ctx) = test_app();
        let mut session = Session::new("current".into(), RgbaImage::new(8, 8));
        session.add_point(4.0, 4.0, PointLabel::Foreground);
        app.session = Some(session);
        app.segment_in_flight = true;

        app.tx
            .send(ApiEvent::Segmented {
                session_id: "current".into(),
                result: Ok(SegmentedMask {
                    mask: RgbaImage::new(8, 8),
                    score: 0.9,
                }),
            })
            .unwrap();
        app.poll_events(&ctx);

        assert!(app.session.as_ref().unwrap().mask.is_some());
        assert!(!app.segment_in_flight);
    }

    #[test]
    fn stale_segmentation_response_is_discarded() {
        let (mut app, ctx) = test_app();
        app.session = Some(Session::new("current".into(), RgbaImage::new(8, 8)));
        app.segment_in_flight = true;

        app.tx
            .send(ApiEvent::Segmented {
                session_id: "stale".into(),
                result: Ok(SegmentedMask {
                    mask: RgbaImage::new(8, 8),
                    score: 0.5,
                }),
            })
            .unwrap();
        app.poll_events(&ctx);

        assert!(app.session.as_ref().unwrap().mask.is_none());
        assert!(!app.segment_in_flight);
    }

    #[test]
    fn stale_adjustment_response_leaves_displayed_result_untouched() {
        let (mut app, ctx) = test_app();
        app.session = Some(Session::new("current".into(), RgbaImage::new(4, 4)));
        let sentinel = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        app.result = Some(sentinel.clone());

        app.tx
            .send(ApiEvent::Adjusted {
                session_id: "stale".into(),
                result: Ok(RgbaImage::new(9, 9)),
            })
            .unwrap();
        app.poll_events(&ctx);

        assert_eq!(app.result, Some(sentinel));
    }
}
