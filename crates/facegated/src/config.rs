use facegate_core::objects::DEFAULT_OBJECT_CONFIDENCE;
use facegate_core::DEFAULT_TOLERANCE;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root of the gallery store (one folder per identity).
    pub gallery_dir: PathBuf,
    /// Path to the SQLite person table.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum Euclidean distance for a known match.
    pub tolerance: f32,
    /// Object detections at or below this confidence are dropped.
    pub object_confidence: f32,
    pub objects_enabled: bool,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), facegate_core::default_data_dir())
    }

    /// `data_dir` holds the default gallery and person table.
    fn from_lookup(var: impl Fn(&str) -> Option<String>, data_dir: PathBuf) -> Self {
        let parse_f32 = |key: &str, default: f32| {
            var(key)
                .and_then(|v| v.trim().parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| var(key).map(|v| v.trim() != "0").unwrap_or(default);

        Self {
            gallery_dir: var("FACEGATE_GALLERY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("database")),
            db_path: var("FACEGATE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("persons.db")),
            model_dir: var("FACEGATE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facegate_core::default_model_dir),
            tolerance: parse_f32("FACEGATE_TOLERANCE", DEFAULT_TOLERANCE),
            object_confidence: parse_f32("FACEGATE_OBJECT_CONFIDENCE", DEFAULT_OBJECT_CONFIDENCE),
            objects_enabled: flag("FACEGATE_OBJECTS_ENABLED", true),
            system_bus: flag("FACEGATE_SYSTEM_BUS", false),
        }
    }

    /// Path to the YOLOv8 object model.
    pub fn object_model_path(&self) -> PathBuf {
        self.model_dir.join("yolov8n.onnx")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned(), PathBuf::from("/data/facegate"))
    }

    #[test]
    fn test_defaults_under_data_dir() {
        let c = config(&[]);
        assert_eq!(c.gallery_dir, PathBuf::from("/data/facegate/database"));
        assert_eq!(c.db_path, PathBuf::from("/data/facegate/persons.db"));
        assert_eq!(c.model_dir, facegate_core::default_model_dir());
        assert_eq!(c.tolerance, 0.6);
        assert_eq!(c.object_confidence, 0.5);
        assert!(c.objects_enabled);
        assert!(!c.system_bus);
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("FACEGATE_GALLERY_DIR", "/srv/gallery"),
            ("FACEGATE_DB_PATH", "/srv/p.db"),
            ("FACEGATE_MODEL_DIR", "/opt/models"),
            ("FACEGATE_TOLERANCE", "0.45"),
            ("FACEGATE_OBJECTS_ENABLED", "0"),
            ("FACEGATE_SYSTEM_BUS", "1"),
        ]);
        assert_eq!(c.gallery_dir, PathBuf::from("/srv/gallery"));
        assert_eq!(c.db_path, PathBuf::from("/srv/p.db"));
        assert_eq!(c.object_model_path(), PathBuf::from("/opt/models/yolov8n.onnx"));
        assert_eq!(c.tolerance, 0.45);
        assert!(!c.objects_enabled);
        assert!(c.system_bus);
    }

    #[test]
    fn test_unparseable_values_use_defaults() {
        let c = config(&[("FACEGATE_TOLERANCE", "close"), ("FACEGATE_OBJECT_CONFIDENCE", "NaN")]);
        assert_eq!(c.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(c.object_confidence, DEFAULT_OBJECT_CONFIDENCE);
    }
}
