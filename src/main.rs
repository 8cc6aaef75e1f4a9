use eframe::egui;

mod adjust;
mod api;
mod app;
mod debounce;
mod export;
mod state;

const DEFAULT_API_URL: &str = "http://localhost:5001";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cutout_studio=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let base_url = args
        .get(1)
        .cloned()
        .or_else(|| std::env::var("CUTOUT_API_URL").ok())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    tracing::info!(%base_url, "starting cutout-studio");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 860.0])
            .with_title("cutout-studio"),
        ..Default::default()
    };

    let client = api::ApiClient::new(&base_url);
    eframe::run_native(
        "cutout-studio",
        options,
        Box::new(move |cc| Ok(Box::new(app::StudioApp::new(client, &cc.egui_ctx)))),
    )
    .expect("Failed to run eframe");
}
