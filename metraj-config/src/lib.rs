use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use metraj_engine::area::DEFAULT_CLOSURE_TOLERANCE_M;
use metraj_engine::inference::{
    CorrectedAttributes, InMemoryLearnedStore, InferenceSettings, WallMaterial,
};
use metraj_engine::length::DedupPolicy;
use metraj_engine::takeoff::TakeoffSettings;
use serde::Deserialize;
use thiserror::Error;

/// 指向配置文件的环境变量。
pub const CONFIG_ENV_VAR: &str = "METRAJ_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub takeoff: TakeoffConfig,
    #[serde(default)]
    pub defaults: WallDefaultsConfig,
    #[serde(default)]
    pub corrections: Vec<LayerCorrection>,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `METRAJ_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV_VAR) {
            return Self::from_file(PathBuf::from(path));
        }

        let current_dir = env::current_dir().map_err(|source| ConfigError::Context {
            message: "failed to read current working directory".to_string(),
            source,
        })?;
        Self::discover_in(&current_dir)
    }

    /// 在给定目录下寻找 `config/default.toml`。
    pub fn discover_in(dir: &Path) -> Result<Self, ConfigError> {
        let default_path = dir.join("config").join("default.toml");
        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn takeoff_settings(&self) -> TakeoffSettings {
        TakeoffSettings {
            closure_tolerance_m: self.takeoff.closure_tolerance_m,
            dedup: DedupPolicy {
                centroid_proximity_m: self.takeoff.dedup_centroid_proximity_m,
                area_similarity: self.takeoff.dedup_area_similarity,
                require_both: self.takeoff.dedup_require_both,
            },
        }
    }

    pub fn inference_settings(&self) -> InferenceSettings {
        InferenceSettings {
            default_height_m: self.defaults.wall_height_m,
            default_thickness_m: self.defaults.wall_thickness_m,
            default_material: self.defaults.wall_material,
            text_search_radius_m: self.takeoff.text_search_radius_m,
        }
    }

    /// 把 `[[corrections]]` 转成引擎可查询的修正表。同名图层以后出现的为准。
    pub fn learned_store(&self) -> InMemoryLearnedStore {
        let mut store = InMemoryLearnedStore::new();
        for correction in &self.corrections {
            store.insert(&correction.layer, correction.attributes());
        }
        store
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TakeoffConfig {
    /// `mm`、`cm` 或 `m`；未设置时从图纸头推断。
    #[serde(default)]
    pub default_unit: Option<String>,
    #[serde(default = "TakeoffConfig::default_closure_tolerance")]
    pub closure_tolerance_m: f64,
    #[serde(default = "TakeoffConfig::default_centroid_proximity")]
    pub dedup_centroid_proximity_m: f64,
    #[serde(default = "TakeoffConfig::default_area_similarity")]
    pub dedup_area_similarity: f64,
    #[serde(default)]
    pub dedup_require_both: bool,
    #[serde(default = "TakeoffConfig::default_text_search_radius")]
    pub text_search_radius_m: f64,
}

impl TakeoffConfig {
    fn default_closure_tolerance() -> f64 {
        DEFAULT_CLOSURE_TOLERANCE_M
    }

    fn default_centroid_proximity() -> f64 {
        DedupPolicy::default().centroid_proximity_m
    }

    fn default_area_similarity() -> f64 {
        DedupPolicy::default().area_similarity
    }

    fn default_text_search_radius() -> f64 {
        InferenceSettings::default().text_search_radius_m
    }
}

impl Default for TakeoffConfig {
    fn default() -> Self {
        Self {
            default_unit: None,
            closure_tolerance_m: Self::default_closure_tolerance(),
            dedup_centroid_proximity_m: Self::default_centroid_proximity(),
            dedup_area_similarity: Self::default_area_similarity(),
            dedup_require_both: false,
            text_search_radius_m: Self::default_text_search_radius(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WallDefaultsConfig {
    #[serde(default = "WallDefaultsConfig::default_height")]
    pub wall_height_m: f64,
    #[serde(default = "WallDefaultsConfig::default_thickness")]
    pub wall_thickness_m: f64,
    #[serde(default = "WallDefaultsConfig::default_material")]
    pub wall_material: WallMaterial,
}

impl WallDefaultsConfig {
    fn default_height() -> f64 {
        InferenceSettings::default().default_height_m
    }

    fn default_thickness() -> f64 {
        InferenceSettings::default().default_thickness_m
    }

    fn default_material() -> WallMaterial {
        InferenceSettings::default().default_material
    }
}

impl Default for WallDefaultsConfig {
    fn default() -> Self {
        Self {
            wall_height_m: Self::default_height(),
            wall_thickness_m: Self::default_thickness(),
            wall_material: Self::default_material(),
        }
    }
}

/// 用户对单个图层的修正。
#[derive(Debug, Clone, Deserialize)]
pub struct LayerCorrection {
    pub layer: String,
    #[serde(default)]
    pub height_m: Option<f64>,
    #[serde(default)]
    pub thickness_m: Option<f64>,
    #[serde(default)]
    pub material: Option<WallMaterial>,
}

impl LayerCorrection {
    pub fn attributes(&self) -> CorrectedAttributes {
        CorrectedAttributes {
            height_m: self.height_m,
            thickness_m: self.thickness_m,
            material: self.material,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// 出错的配置文件路径；与具体文件无关的错误返回 `None`。
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Context { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metraj_engine::inference::LearnedStore;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let cfg = AppConfig::discover_in(dir.path()).expect("discover should succeed");
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.takeoff.default_unit.is_none());
        assert!(cfg.corrections.is_empty());
        assert_eq!(cfg.takeoff_settings(), TakeoffSettings::default());
        assert_eq!(cfg.inference_settings(), InferenceSettings::default());
        assert!(cfg.learned_store().is_empty());
    }

    #[test]
    fn discover_reads_default_toml_under_config_dir() {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::create_dir(dir.path().join("config")).expect("create config dir");
        fs::write(
            dir.path().join("config").join("default.toml"),
            "[logging]\nlevel = \"warn\"\n",
        )
        .expect("write config");

        let cfg = AppConfig::discover_in(dir.path()).expect("discover should succeed");
        assert_eq!(cfg.logging.level, "warn");
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [takeoff]
            default_unit = "cm"
            closure_tolerance_m = 0.02
            dedup_require_both = true

            [defaults]
            wall_height_m = 3.0
            wall_material = "aerated_concrete"

            [[corrections]]
            layer = "DIS_DUVAR"
            thickness_m = 0.25

            [[corrections]]
            layer = "IC_DUVAR"
            height_m = 2.6
            material = "gypsum"
            "#
        )
        .expect("write temp file");

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.takeoff.default_unit.as_deref(), Some("cm"));

        let takeoff = cfg.takeoff_settings();
        assert!((takeoff.closure_tolerance_m - 0.02).abs() < 1e-12);
        assert!(takeoff.dedup.require_both);
        assert!((takeoff.dedup.centroid_proximity_m - 1.0).abs() < 1e-12);

        let inference = cfg.inference_settings();
        assert!((inference.default_height_m - 3.0).abs() < 1e-12);
        assert!((inference.default_thickness_m - 0.20).abs() < 1e-12);
        assert_eq!(inference.default_material, WallMaterial::AeratedConcrete);

        let store = cfg.learned_store();
        assert_eq!(store.len(), 2);
        let outer = store.lookup("dis_duvar").expect("correction for DIS_DUVAR");
        assert_eq!(outer.thickness_m, Some(0.25));
        assert!(outer.height_m.is_none());
        let inner = store.lookup("IC_DUVAR").expect("correction for IC_DUVAR");
        assert_eq!(inner.material, Some(WallMaterial::Gypsum));
    }

    #[test]
    fn unknown_material_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[defaults]\nwall_material = \"cardboard\"").expect("write temp file");

        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err:?}");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let missing = dir.path().join("nope.toml");
        let err = AppConfig::from_file(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }), "{err:?}");
        assert_eq!(err.path(), Some(missing.as_path()));
    }
}
