use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP service binds (default: 0.0.0.0:8000).
    pub listen_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding enrolled image artifacts.
    pub faces_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance accepted as a positive match.
    pub match_threshold: f32,
}

impl Config {
    /// Load configuration from `FACIA_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facia");

        let db_path = std::env::var("FACIA_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces.db"));

        let faces_dir = std::env::var("FACIA_FACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("known_faces"));

        let model_dir = std::env::var("FACIA_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            listen_addr: std::env::var("FACIA_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            db_path,
            faces_dir,
            model_dir,
            match_threshold: env_f32(
                "FACIA_MATCH_THRESHOLD",
                facia_core::DEFAULT_MATCH_THRESHOLD,
            ),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
