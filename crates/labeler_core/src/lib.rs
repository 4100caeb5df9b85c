use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions recognized as reviewable images when the config names none.
pub const DEFAULT_EXTENSIONS: [&str; 3] = ["jpg", "png", "jpeg"];

const DEFAULT_OUTPUT_CSV: &str = "output.csv";

/// What assigning a label does to the underlying image file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Duplicate the file into the label's folder; the original stays put.
    Copy,
    /// Relocate the file into the label's folder.
    Move,
    /// Record the label in memory only.
    #[default]
    None,
}

impl Mode {
    /// Whether assigning a label in this mode touches the filesystem.
    pub fn relocates(self) -> bool {
        matches!(self, Mode::Copy | Mode::Move)
    }
}

/// Configuration problems. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("label list is empty")]
    NoLabels,
    #[error("duplicate label \"{0}\"")]
    DuplicateLabel(String),
}

/// Problems that prevent a review session from starting. Fatal before any
/// window is shown.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot read input folder {}: {source}", .path.display())]
    InputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no images found in {}", .0.display())]
    NoImages(PathBuf),
    #[error("cannot create label folder {}: {source}", .path.display())]
    LabelDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Recoverable failures during review. Reported to the user; the session
/// keeps running.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown label \"{0}\"")]
    UnknownLabel(String),
    #[error("cannot copy {} to {}: {source}", .src.display(), .dest.display())]
    Copy {
        src: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot move {} to {}: {source}", .src.display(), .dest.display())]
    Move {
        src: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {}: {source}", .path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Immutable session configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Folder whose images are reviewed.
    pub input_dir: PathBuf,
    /// Ordered label set. Defines button order and one-hot column order.
    pub labels: Vec<String>,
    pub mode: Mode,
    /// Destination of the exported label table.
    pub output_csv: PathBuf,
    /// Recognized image extensions without the leading dot, matched
    /// case-insensitively.
    pub extensions: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            labels: Vec::new(),
            mode: Mode::None,
            output_csv: PathBuf::from(DEFAULT_OUTPUT_CSV),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    /// Reads and validates a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the label set: non-empty, no duplicates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.labels.is_empty() {
            return Err(ConfigError::NoLabels);
        }
        for (i, label) in self.labels.iter().enumerate() {
            if self.labels[..i].contains(label) {
                return Err(ConfigError::DuplicateLabel(label.clone()));
            }
        }
        Ok(())
    }
}

/// One recorded label decision, keyed by image basename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelAssignment {
    pub image: String,
    pub label: String,
}

/// Scan a folder for reviewable images, non-recursively.
///
/// Entries are matched against `extensions` case-insensitively and returned
/// sorted by path. The raw enumeration order is platform-dependent; sorting
/// gives the reviewer the same order on every run.
pub fn scan_images(dir: impl AsRef<Path>, extensions: &[String]) -> Result<Vec<PathBuf>, StartupError> {
    let dir = dir.as_ref();

    // A missing or unreadable folder is fatal up front, not an empty review.
    if let Err(source) = fs::read_dir(dir) {
        return Err(StartupError::InputDir {
            path: dir.to_path_buf(),
            source,
        });
    }

    let mut images: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("walkdir error: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_file() && has_extension(path, extensions) {
            images.push(path.to_path_buf());
        }
    }

    images.sort();
    Ok(images)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
        }
        None => false,
    }
}

/// Linear review over a fixed image sequence.
///
/// Holds the cursor, the recorded assignments, and the configuration that
/// governs filesystem effects. Operations are synchronous and meant to be
/// driven one at a time from UI events.
pub struct ReviewSession {
    config: SessionConfig,
    images: Vec<PathBuf>,
    cursor: usize,
    assignments: Vec<LabelAssignment>,
}

impl ReviewSession {
    /// Builds a session over an already-scanned image sequence.
    ///
    /// Fails when the sequence is empty. For copy/move modes the per-label
    /// folders are created here, before review begins, so an assignment
    /// never hits a missing destination.
    pub fn new(config: SessionConfig, images: Vec<PathBuf>) -> Result<Self, StartupError> {
        if images.is_empty() {
            return Err(StartupError::NoImages(config.input_dir.clone()));
        }
        if config.mode.relocates() {
            for label in &config.labels {
                let dir = config.input_dir.join(label);
                fs::create_dir_all(&dir).map_err(|source| StartupError::LabelDir {
                    path: dir.clone(),
                    source,
                })?;
            }
        }
        Ok(Self {
            config,
            images,
            cursor: 0,
            assignments: Vec::new(),
        })
    }

    /// Scans the configured input folder and builds a session in one step.
    pub fn start(config: SessionConfig) -> Result<Self, StartupError> {
        let images = scan_images(&config.input_dir, &config.extensions)?;
        Self::new(config, images)
    }

    /// Steps the cursor forward. Returns whether it moved; the last image
    /// saturates instead of wrapping.
    pub fn navigate_next(&mut self) -> bool {
        if self.cursor + 1 < self.images.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// Steps the cursor back, saturating at the first image.
    pub fn navigate_prev(&mut self) -> bool {
        if self.cursor > 0 {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }

    /// Labels the current image and advances to the next one.
    ///
    /// The assignment is recorded in memory first; for copy/move modes the
    /// file is then relocated into the label's folder. A failed relocation
    /// leaves the recorded assignment in place and keeps the cursor on the
    /// current image so the reviewer sees what failed.
    pub fn assign_label(&mut self, label: &str) -> Result<(), SessionError> {
        if !self.config.labels.iter().any(|l| l == label) {
            return Err(SessionError::UnknownLabel(label.to_string()));
        }

        let path = self.images[self.cursor].clone();
        self.record(file_name(&path), label.to_string());

        match self.config.mode {
            Mode::Copy => relocate(&path, label, false)?,
            Mode::Move => relocate(&path, label, true)?,
            Mode::None => {}
        }

        self.navigate_next();
        Ok(())
    }

    /// Pure half of `assign_label`: insert or overwrite the record for one
    /// basename. Re-labeling keeps the record's original position.
    fn record(&mut self, image: String, label: String) {
        match self.assignments.iter_mut().find(|a| a.image == image) {
            Some(existing) => existing.label = label,
            None => self.assignments.push(LabelAssignment { image, label }),
        }
    }

    /// Writes the label table to the configured output path.
    pub fn export(&self) -> Result<(), SessionError> {
        export_csv(&self.assignments, &self.config.labels, &self.config.output_csv)
    }

    /// Path of the image under the cursor.
    pub fn current_image(&self) -> &Path {
        &self.images[self.cursor]
    }

    /// Basename of the image under the cursor.
    pub fn current_file_name(&self) -> String {
        file_name(self.current_image())
    }

    /// Human progress indicator, "K of N".
    pub fn progress_text(&self) -> String {
        format!("{} of {}", self.cursor + 1, self.images.len())
    }

    pub fn labels(&self) -> &[String] {
        &self.config.labels
    }

    pub fn output_csv(&self) -> &Path {
        &self.config.output_csv
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn assignments(&self) -> &[LabelAssignment] {
        &self.assignments
    }
}

/// Export assignments as a one-hot label table.
///
/// The header is `img` followed by the labels in configured order; each row
/// is a basename plus its one-hot vector, in the order the assignments were
/// first recorded. An existing file at `path` is overwritten.
pub fn export_csv(
    assignments: &[LabelAssignment],
    labels: &[String],
    path: impl AsRef<Path>,
) -> Result<(), SessionError> {
    let path = path.as_ref();
    write_csv(assignments, labels, path).map_err(|source| SessionError::Export {
        path: path.to_path_buf(),
        source,
    })
}

fn write_csv(assignments: &[LabelAssignment], labels: &[String], path: &Path) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = Vec::with_capacity(labels.len() + 1);
    header.push("img");
    header.extend(labels.iter().map(String::as_str));
    wtr.write_record(&header)?;

    for assignment in assignments {
        let mut record: Vec<&str> = Vec::with_capacity(labels.len() + 1);
        record.push(assignment.image.as_str());
        for label in labels {
            record.push(if *label == assignment.label { "1" } else { "0" });
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Copies or moves `path` into the sibling folder named after `label`.
///
/// The destination shares a volume with the source, so a move is a plain
/// rename.
fn relocate(path: &Path, label: &str, remove_source: bool) -> Result<(), SessionError> {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let dest = parent.join(label).join(path.file_name().unwrap_or_default());

    if remove_source {
        fs::rename(path, &dest).map_err(|source| SessionError::Move {
            src: path.to_path_buf(),
            dest: dest.clone(),
            source,
        })?;
    } else {
        fs::copy(path, &dest).map_err(|source| SessionError::Copy {
            src: path.to_path_buf(),
            dest: dest.clone(),
            source,
        })?;
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
