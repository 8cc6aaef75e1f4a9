use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::{SystemTime, UNIX_EPOCH};

use eframe::egui;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Backend(String),
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("could not decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("could not read file: {0}")]
    Io(#[from] std::io::Error),
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub vram_gb: u32,
    pub speed: String,
    pub quality: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    pub cuda_available: bool,
    pub current_model: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub image_url: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SegmentRequest {
    pub session_id: String,
    /// `[x, y, label]` triples in image pixel space.
    pub points: Vec<[f32; 3]>,
    pub bbox: Option<[f32; 4]>,
    pub model_size: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SegmentResponse {
    pub mask_url: String,
    pub score: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct AdjustRequest {
    pub session_id: String,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub background_color: [u8; 3],
    pub edge_blur: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AdjustResponse {
    pub result_url: String,
}

/// Every response carries `success`; failures carry `error` and are surfaced
/// verbatim. Payload fields sit beside the flag, so on success the same value
/// deserializes into the typed response.
pub(crate) fn decode_envelope<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, ApiError> {
    let success = value
        .get("success")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !success {
        let msg = value
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown server error")
            .to_string();
        return Err(ApiError::Backend(msg));
    }
    Ok(serde_json::from_value(value)?)
}

// ── Client ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");
        let value: serde_json::Value = self.http.get(&url).send()?.json()?;
        decode_envelope(value)
    }

    fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "POST");
        let value: serde_json::Value = self.http.post(&url).json(body).send()?.json()?;
        decode_envelope(value)
    }

    pub fn list_models(&self) -> Result<ModelsResponse, ApiError> {
        self.get_json("/api/models")
    }

    pub fn upload(&self, path: &std::path::Path) -> Result<UploadResponse, ApiError> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let part = reqwest::blocking::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::blocking::multipart::Form::new().part("file", part);
        let url = format!("{}/api/upload", self.base_url);
        debug!(%url, "POST multipart");
        let value: serde_json::Value = self.http.post(&url).multipart(form).send()?.json()?;
        decode_envelope(value)
    }

    pub fn segment(&self, req: &SegmentRequest) -> Result<SegmentResponse, ApiError> {
        self.post_json("/api/segment", req)
    }

    pub fn apply_adjustments(&self, req: &AdjustRequest) -> Result<AdjustResponse, ApiError> {
        self.post_json("/api/apply-adjustments", req)
    }

    /// Fetch and decode a server-hosted raster. `path` is the relative URL the
    /// backend returned; a timestamp query defeats intermediary caching.
    pub fn fetch_image(&self, path: &str) -> Result<RgbaImage, ApiError> {
        let url = image_url(&self.base_url, path, now_millis());
        debug!(%url, "GET image");
        let bytes = self.http.get(&url).send()?.bytes()?;
        Ok(image::load_from_memory(&bytes)?.to_rgba8())
    }
}

pub(crate) fn image_url(base: &str, path: &str, ts: u128) -> String {
    format!("{base}{path}?t={ts}")
}

pub(crate) fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

// ── Background jobs ─────────────────────────────────────────────────────────

pub struct UploadedImage {
    pub session_id: String,
    pub image: RgbaImage,
}

pub struct SegmentedMask {
    pub mask: RgbaImage,
    pub score: f32,
}

/// Completions posted back to the UI thread. Segment/adjust results are
/// tagged with the session they were issued for so a response that outlives
/// its session can be recognized and dropped.
pub enum ApiEvent {
    ModelsLoaded(Result<ModelsResponse, ApiError>),
    Uploaded(Result<UploadedImage, ApiError>),
    Segmented {
        session_id: String,
        result: Result<SegmentedMask, ApiError>,
    },
    Adjusted {
        session_id: String,
        result: Result<RgbaImage, ApiError>,
    },
}

fn post(tx: &Sender<ApiEvent>, ctx: &egui::Context, event: ApiEvent) {
    if tx.send(event).is_err() {
        warn!("UI channel closed, dropping API event");
    }
    ctx.request_repaint();
}

pub fn spawn_list_models(client: ApiClient, tx: Sender<ApiEvent>, ctx: egui::Context) {
    std::thread::spawn(move || {
        let result = client.list_models();
        post(&tx, &ctx, ApiEvent::ModelsLoaded(result));
    });
}

pub fn spawn_upload(client: ApiClient, tx: Sender<ApiEvent>, ctx: egui::Context, path: PathBuf) {
    std::thread::spawn(move || {
        let result = client.upload(&path).and_then(|resp| {
            let image = client.fetch_image(&resp.image_url)?;
            Ok(UploadedImage {
                session_id: resp.session_id,
                image,
            })
        });
        post(&tx, &ctx, ApiEvent::Uploaded(result));
    });
}

pub fn spawn_segment(
    client: ApiClient,
    tx: Sender<ApiEvent>,
    ctx: egui::Context,
    req: SegmentRequest,
) {
    std::thread::spawn(move || {
        let session_id = req.session_id.clone();
        let result = client.segment(&req).and_then(|resp| {
            let mask = client.fetch_image(&resp.mask_url)?;
            Ok(SegmentedMask {
                mask,
                score: resp.score,
            })
        });
        post(&tx, &ctx, ApiEvent::Segmented { session_id, result });
    });
}

pub fn spawn_adjust(
    client: ApiClient,
    tx: Sender<ApiEvent>,
    ctx: egui::Context,
    req: AdjustRequest,
) {
    std::thread::spawn(move || {
        let session_id = req.session_id.clone();
        let result = client
            .apply_adjustments(&req)
            .and_then(|resp| client.fetch_image(&resp.result_url));
        post(&tx, &ctx, ApiEvent::Adjusted { session_id, result });
    });
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_decodes_success_payload() {
        let value = json!({
            "success": true,
            "session_id": "abc",
            "image_url": "/uploads/abc.png"
        });
        let resp: UploadResponse = decode_envelope(value).unwrap();
        assert_eq!(resp.session_id, "abc");
        assert_eq!(resp.image_url, "/uploads/abc.png");
    }

    #[test]
    fn envelope_surfaces_backend_error_verbatim() {
        let value = json!({ "success": false, "error": "Obrázek nebyl nalezen" });
        let err = decode_envelope::<UploadResponse>(value).unwrap_err();
        assert!(matches!(err, ApiError::Backend(ref m) if m == "Obrázek nebyl nalezen"));
    }

    #[test]
    fn envelope_treats_missing_success_flag_as_error() {
        // Some backend error paths reply with only {"error": ...}.
        let value = json!({ "error": "bad request" });
        let err = decode_envelope::<UploadResponse>(value).unwrap_err();
        assert!(matches!(err, ApiError::Backend(ref m) if m == "bad request"));
    }

    #[test]
    fn segment_request_serializes_point_triples() {
        let req = SegmentRequest {
            session_id: "s".into(),
            points: vec![[10.0, 20.0, 1.0], [30.0, 40.0, 0.0]],
            bbox: None,
            model_size: "small".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["points"], json!([[10.0, 20.0, 1.0], [30.0, 40.0, 0.0]]));
        assert_eq!(v["bbox"], json!(null));
        assert_eq!(v["model_size"], "small");
    }

    #[test]
    fn adjust_request_carries_rgb_triple_and_blur() {
        let req = AdjustRequest {
            session_id: "s".into(),
            brightness: 1.2,
            contrast: 0.9,
            saturation: 1.0,
            background_color: [0, 128, 255],
            edge_blur: 5,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["background_color"], json!([0, 128, 255]));
        assert_eq!(v["edge_blur"], 5);
    }

    #[test]
    fn image_urls_are_cache_busted() {
        assert_eq!(
            image_url("http://localhost:5001", "/outputs/m.png", 42),
            "http://localhost:5001/outputs/m.png?t=42"
        );
    }
}
