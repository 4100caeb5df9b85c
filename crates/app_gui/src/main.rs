use anyhow::{Context, Result};
use eframe::{App, Frame, NativeOptions, egui};
use labeler_core::{ReviewSession, SessionConfig};
use rfd::FileDialog;
use std::path::{Path, PathBuf};

const APP_TITLE: &str = "Image Labeler";
const DEFAULT_CONFIG_FILE: &str = "labeler.toml";

fn main() {
    tracing_subscriber::fmt::init();

    // Startup failures (bad config, unreadable folder, zero images) are
    // reported before any window exists.
    let session = match build_session() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Cannot start review: {e:#}");
            std::process::exit(1);
        }
    };

    let options = NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1000.0, 600.0]),
        ..Default::default()
    };
    if let Err(e) = eframe::run_native(
        APP_TITLE,
        options,
        Box::new(|_cc| {
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(Box::new(UiApp::new(session)))
        }),
    ) {
        eprintln!("Application stopped with error: {e}");
    }
}

/// Reads the config file (first CLI argument, or `labeler.toml`), asks for
/// an input folder if the file didn't name one, and scans it.
fn build_session() -> Result<ReviewSession> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let mut config =
        SessionConfig::from_file(&config_path).with_context(|| format!("loading {config_path}"))?;

    if config.input_dir.as_os_str().is_empty() {
        let dir = FileDialog::new()
            .set_title("Choose the folder to review")
            .set_directory(".")
            .pick_folder()
            .context("no input folder chosen")?;
        config.input_dir = dir;
    }

    Ok(ReviewSession::start(config)?)
}

/// A user gesture collected during one frame and applied after the frame is
/// built, so every handler receives its target explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
enum UiAction {
    Prev,
    Next,
    Assign(String),
    Export,
}

struct UiApp {
    session: ReviewSession,
    status: String,
    texture: Option<egui::TextureHandle>,
    /// Path the texture slot was last loaded for, kept even when decoding
    /// failed so a broken image is not retried every frame.
    texture_path: Option<PathBuf>,
}

impl UiApp {
    fn new(session: ReviewSession) -> Self {
        Self {
            session,
            status: String::new(),
            texture: None,
            texture_path: None,
        }
    }

    /// Returns the texture for the image under the cursor, decoding it only
    /// when the cursor moved since the last frame.
    fn current_texture(&mut self, ctx: &egui::Context) -> Option<egui::TextureHandle> {
        let path = self.session.current_image().to_path_buf();
        if self.texture_path.as_deref() != Some(path.as_path()) {
            self.texture = load_texture(ctx, &path);
            self.texture_path = Some(path);
        }
        self.texture.clone()
    }

    /// Applies one user action to the session and updates the status line.
    fn handle_action(&mut self, action: UiAction) {
        match action {
            UiAction::Prev => {
                self.session.navigate_prev();
            }
            UiAction::Next => {
                self.session.navigate_next();
            }
            UiAction::Assign(label) => {
                let name = self.session.current_file_name();
                match self.session.assign_label(&label) {
                    Ok(()) => self.status = format!("Labeled {name} as {label}"),
                    Err(e) => self.status = format!("Label failed: {e}"),
                }
            }
            UiAction::Export => match self.session.export() {
                Ok(()) => {
                    self.status =
                        format!("CSV exported: {}", self.session.output_csv().display());
                }
                Err(e) => self.status = format!("Export failed: {e}"),
            },
        }
    }
}

impl App for UiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        let mut action: Option<UiAction> = None;

        if ctx.input(|i| i.key_pressed(egui::Key::ArrowLeft)) {
            action = Some(UiAction::Prev);
        }
        if ctx.input(|i| i.key_pressed(egui::Key::ArrowRight)) {
            action = Some(UiAction::Next);
        }

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("Prev").clicked() {
                    action = Some(UiAction::Prev);
                }
                if ui.button("Next").clicked() {
                    action = Some(UiAction::Next);
                }
                ui.separator();
                ui.label(self.session.progress_text());
                ui.separator();
                ui.label(self.session.current_file_name());

                let can_export = !self.session.assignments().is_empty();
                if ui
                    .add_enabled(can_export, egui::Button::new("Export CSV"))
                    .clicked()
                {
                    action = Some(UiAction::Export);
                }

                if !self.status.is_empty() {
                    ui.label(&self.status);
                }
            });
        });

        egui::SidePanel::right("labels").show(ctx, |ui| {
            ui.heading("Labels");
            ui.add_space(6.0);
            for label in self.session.labels() {
                if ui.button(label).clicked() {
                    action = Some(UiAction::Assign(label.clone()));
                }
            }
        });

        let texture = self.current_texture(ctx);
        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(tex) = &texture {
                let available = ui.available_size();
                let tex_size = tex.size_vec2();
                let aspect = tex_size.x / tex_size.y;
                let mut dw = available.x;
                let mut dh = available.y - 10.0;
                if dw / dh > aspect {
                    dw = dh * aspect;
                } else {
                    dh = dw / aspect;
                }
                ui.add(egui::Image::new(tex).fit_to_exact_size(egui::Vec2::new(dw, dh)));
            } else {
                ui.heading(format!(
                    "Cannot display {}",
                    self.session.current_file_name()
                ));
            }
        });

        if let Some(action) = action {
            self.handle_action(action);
        }
    }
}

fn load_texture(ctx: &egui::Context, path: &Path) -> Option<egui::TextureHandle> {
    match image::open(path) {
        Ok(img) => {
            let rgba = img.to_rgba8();
            let size = [rgba.width() as usize, rgba.height() as usize];
            let pixels = rgba.into_raw();
            let color = egui::ColorImage::from_rgba_unmultiplied(size, &pixels);
            let name = format!("image:{}", path.display());
            Some(ctx.load_texture(name, color, egui::TextureOptions::LINEAR))
        }
        Err(e) => {
            tracing::warn!("Failed to load image {}: {}", path.display(), e);
            None
        }
    }
}
