use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BASE_DIR_NAME: &str = "navicap";
const DEFAULT_OBSTACLE_FILE: &str = "obstacle.json";
const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_OBSTACLE_LOG: &str = "logs/navicap_obstacles.log";
const DEFAULT_ERROR_LOG: &str = "last_err.log";
const DEFAULT_MODEL_CFG: &str = "yolov4-tiny-custom.cfg";
const DEFAULT_MODEL_WEIGHTS: &str = "yolov4-tiny-custom_best.weights";
const DEFAULT_MODEL_NAMES: &str = "obj.names";
const DEFAULT_CAM_INDEX: u32 = 0;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;
const DEFAULT_INPUT_SIZE: u32 = 608;
const DEFAULT_OBSTACLE_POLL_MS: u64 = 500;
const DEFAULT_CONFIG_POLL_MS: u64 = 500;
const DEFAULT_CONFIG_HEARTBEAT_MS: u64 = 10_000;

#[derive(Debug, Deserialize, Default)]
struct NavicapConfigFile {
    paths: Option<PathsConfigFile>,
    model: Option<ModelConfigFile>,
    camera: Option<CameraConfigFile>,
    fusion: Option<FusionConfigFile>,
    distribution: Option<DistributionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PathsConfigFile {
    base_dir: Option<PathBuf>,
    obstacle_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
    obstacle_log: Option<PathBuf>,
    error_log: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    cfg: Option<PathBuf>,
    weights: Option<PathBuf>,
    names: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    index: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FusionConfigFile {
    conf_general: Option<f32>,
    conf_traffic_light: Option<f32>,
    nms: Option<f32>,
    traffic_light_min_area_ratio: Option<f32>,
    traffic_light_min_aspect: Option<f32>,
    traffic_light_high_bonus: Option<f32>,
    traffic_light_high_fraction: Option<f32>,
    traffic_light_roi_pad: Option<f32>,
    traffic_light_min_color_fraction: Option<f32>,
    traffic_light_hold_ms: Option<u64>,
    range_samples: Option<usize>,
    range_min_m: Option<f64>,
    range_max_m: Option<f64>,
    debounce_distance_m: Option<f64>,
    debounce_heartbeat_ms: Option<u64>,
    loop_sleep_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DistributionConfigFile {
    obstacle_poll_ms: Option<u64>,
    config_poll_ms: Option<u64>,
    config_heartbeat_ms: Option<u64>,
}

/// Process settings shared by `navicap_detect` and `navicap_publish`.
#[derive(Debug, Clone)]
pub struct NavicapConfig {
    pub base_dir: PathBuf,
    pub obstacle_path: PathBuf,
    pub config_path: PathBuf,
    pub obstacle_log_path: PathBuf,
    pub error_log_path: PathBuf,
    pub model: ModelPaths,
    pub camera: CameraSettings,
    pub fusion: FusionTunables,
    pub distribution: DistributionSettings,
}

#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub cfg: PathBuf,
    pub weights: PathBuf,
    pub names: PathBuf,
}

impl ModelPaths {
    /// Startup precondition for the detection process: every model resource must exist.
    pub fn verify(&self) -> Result<()> {
        for path in [&self.cfg, &self.weights, &self.names] {
            if !path.is_file() {
                return Err(anyhow!("missing model resource: {}", path.display()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Square inference input size.
    pub input_size: u32,
}

/// Fusion and debounce parameters. Defaults are the field-tested values.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionTunables {
    pub conf_general: f32,
    pub conf_traffic_light: f32,
    pub nms: f32,
    /// Minimum traffic-light box area as a fraction of the frame area.
    pub traffic_light_min_area_ratio: f32,
    /// Minimum height/width ratio for a traffic-light box.
    pub traffic_light_min_aspect: f32,
    pub traffic_light_high_bonus: f32,
    /// Boxes whose top lies above this fraction of the frame height get the bonus.
    pub traffic_light_high_fraction: f32,
    pub traffic_light_roi_pad: f32,
    /// Minimum dominant-color pixel fraction of the ROI.
    pub traffic_light_min_color_fraction: f32,
    pub traffic_light_hold: Duration,
    pub range_samples: usize,
    pub range_min_m: f64,
    pub range_max_m: f64,
    pub debounce_distance_m: f64,
    pub debounce_heartbeat: Duration,
    pub loop_sleep: Duration,
}

impl Default for FusionTunables {
    fn default() -> Self {
        Self {
            conf_general: 0.35,
            conf_traffic_light: 0.12,
            nms: 0.35,
            traffic_light_min_area_ratio: 0.0015,
            traffic_light_min_aspect: 1.1,
            traffic_light_high_bonus: 0.05,
            traffic_light_high_fraction: 0.6,
            traffic_light_roi_pad: 0.25,
            traffic_light_min_color_fraction: 0.005,
            traffic_light_hold: Duration::from_millis(800),
            range_samples: 3,
            range_min_m: 0.02,
            range_max_m: 5.0,
            debounce_distance_m: 0.15,
            debounce_heartbeat: Duration::from_millis(700),
            loop_sleep: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionSettings {
    pub obstacle_poll: Duration,
    pub config_poll: Duration,
    pub config_heartbeat: Duration,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            obstacle_poll: Duration::from_millis(DEFAULT_OBSTACLE_POLL_MS),
            config_poll: Duration::from_millis(DEFAULT_CONFIG_POLL_MS),
            config_heartbeat: Duration::from_millis(DEFAULT_CONFIG_HEARTBEAT_MS),
        }
    }
}

impl NavicapConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("NAVICAP_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults rooted at `base_dir`, without reading files or the environment.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            obstacle_path: base_dir.join(DEFAULT_OBSTACLE_FILE),
            config_path: base_dir.join(DEFAULT_CONFIG_FILE),
            obstacle_log_path: base_dir.join(DEFAULT_OBSTACLE_LOG),
            error_log_path: base_dir.join(DEFAULT_ERROR_LOG),
            model: ModelPaths {
                cfg: base_dir.join(DEFAULT_MODEL_CFG),
                weights: base_dir.join(DEFAULT_MODEL_WEIGHTS),
                names: base_dir.join(DEFAULT_MODEL_NAMES),
            },
            camera: CameraSettings {
                index: DEFAULT_CAM_INDEX,
                width: DEFAULT_FRAME_WIDTH,
                height: DEFAULT_FRAME_HEIGHT,
                fps: DEFAULT_FPS,
                input_size: DEFAULT_INPUT_SIZE,
            },
            fusion: FusionTunables::default(),
            distribution: DistributionSettings::default(),
            base_dir,
        }
    }

    fn from_file(file: NavicapConfigFile) -> Result<Self> {
        let paths = file.paths.unwrap_or_default();
        let base_dir = non_empty_env("NAVICAP_HOME")
            .map(PathBuf::from)
            .or(paths.base_dir)
            .map(Ok)
            .unwrap_or_else(default_base_dir)?;
        let mut cfg = Self::with_base_dir(base_dir);

        let root = cfg.base_dir.clone();
        let resolve = |path: PathBuf| root.join(path);
        if let Some(path) = paths.obstacle_file {
            cfg.obstacle_path = resolve(path);
        }
        if let Some(path) = paths.config_file {
            cfg.config_path = resolve(path);
        }
        if let Some(path) = paths.obstacle_log {
            cfg.obstacle_log_path = resolve(path);
        }
        if let Some(path) = paths.error_log {
            cfg.error_log_path = resolve(path);
        }

        if let Some(model) = file.model {
            if let Some(path) = model.cfg {
                cfg.model.cfg = resolve(path);
            }
            if let Some(path) = model.weights {
                cfg.model.weights = resolve(path);
            }
            if let Some(path) = model.names {
                cfg.model.names = resolve(path);
            }
        }

        if let Some(camera) = file.camera {
            cfg.camera.index = camera.index.unwrap_or(cfg.camera.index);
            cfg.camera.width = camera.width.unwrap_or(cfg.camera.width);
            cfg.camera.height = camera.height.unwrap_or(cfg.camera.height);
            cfg.camera.fps = camera.fps.unwrap_or(cfg.camera.fps);
            cfg.camera.input_size = camera.input_size.unwrap_or(cfg.camera.input_size);
        }

        if let Some(fusion) = file.fusion {
            let t = &mut cfg.fusion;
            t.conf_general = fusion.conf_general.unwrap_or(t.conf_general);
            t.conf_traffic_light = fusion.conf_traffic_light.unwrap_or(t.conf_traffic_light);
            t.nms = fusion.nms.unwrap_or(t.nms);
            t.traffic_light_min_area_ratio = fusion
                .traffic_light_min_area_ratio
                .unwrap_or(t.traffic_light_min_area_ratio);
            t.traffic_light_min_aspect = fusion
                .traffic_light_min_aspect
                .unwrap_or(t.traffic_light_min_aspect);
            t.traffic_light_high_bonus = fusion
                .traffic_light_high_bonus
                .unwrap_or(t.traffic_light_high_bonus);
            t.traffic_light_high_fraction = fusion
                .traffic_light_high_fraction
                .unwrap_or(t.traffic_light_high_fraction);
            t.traffic_light_roi_pad = fusion
                .traffic_light_roi_pad
                .unwrap_or(t.traffic_light_roi_pad);
            t.traffic_light_min_color_fraction = fusion
                .traffic_light_min_color_fraction
                .unwrap_or(t.traffic_light_min_color_fraction);
            if let Some(ms) = fusion.traffic_light_hold_ms {
                t.traffic_light_hold = Duration::from_millis(ms);
            }
            t.range_samples = fusion.range_samples.unwrap_or(t.range_samples);
            t.range_min_m = fusion.range_min_m.unwrap_or(t.range_min_m);
            t.range_max_m = fusion.range_max_m.unwrap_or(t.range_max_m);
            t.debounce_distance_m = fusion.debounce_distance_m.unwrap_or(t.debounce_distance_m);
            if let Some(ms) = fusion.debounce_heartbeat_ms {
                t.debounce_heartbeat = Duration::from_millis(ms);
            }
            if let Some(ms) = fusion.loop_sleep_ms {
                t.loop_sleep = Duration::from_millis(ms);
            }
        }

        if let Some(dist) = file.distribution {
            if let Some(ms) = dist.obstacle_poll_ms {
                cfg.distribution.obstacle_poll = Duration::from_millis(ms);
            }
            if let Some(ms) = dist.config_poll_ms {
                cfg.distribution.config_poll = Duration::from_millis(ms);
            }
            if let Some(ms) = dist.config_heartbeat_ms {
                cfg.distribution.config_heartbeat = Duration::from_millis(ms);
            }
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(index) = non_empty_env("NAVICAP_CAM_INDEX") {
            self.camera.index = index
                .trim()
                .parse()
                .map_err(|_| anyhow!("NAVICAP_CAM_INDEX must be a non-negative integer"))?;
        }
        if let Some(size) = non_empty_env("NAVICAP_YOLO_SIZE") {
            self.camera.input_size = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("NAVICAP_YOLO_SIZE must be an integer pixel size"))?;
        }
        if let Some(path) = non_empty_env("NAVICAP_OBSTACLE_FILE") {
            self.obstacle_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("NAVICAP_CONFIG_FILE") {
            self.config_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.fusion;
        for (name, value) in [
            ("conf_general", t.conf_general),
            ("conf_traffic_light", t.conf_traffic_light),
            ("nms", t.nms),
            ("traffic_light_min_area_ratio", t.traffic_light_min_area_ratio),
            ("traffic_light_high_fraction", t.traffic_light_high_fraction),
            (
                "traffic_light_min_color_fraction",
                t.traffic_light_min_color_fraction,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within 0..=1 (got {})", name, value));
            }
        }
        if t.range_samples == 0 {
            return Err(anyhow!("range_samples must be greater than zero"));
        }
        if !(t.range_min_m >= 0.0 && t.range_min_m < t.range_max_m) {
            return Err(anyhow!(
                "range window must satisfy 0 <= min < max (got {}..{})",
                t.range_min_m,
                t.range_max_m
            ));
        }
        if t.traffic_light_roi_pad < 0.0 {
            return Err(anyhow!("traffic_light_roi_pad must not be negative"));
        }
        if t.debounce_distance_m < 0.0 {
            return Err(anyhow!("debounce_distance_m must not be negative"));
        }
        if t.debounce_heartbeat.is_zero() {
            return Err(anyhow!("debounce heartbeat must be greater than zero"));
        }
        if self.camera.input_size == 0 {
            return Err(anyhow!("inference input size must be greater than zero"));
        }
        let d = &self.distribution;
        if d.obstacle_poll.is_zero() || d.config_poll.is_zero() || d.config_heartbeat.is_zero() {
            return Err(anyhow!("distribution intervals must be greater than zero"));
        }
        Ok(())
    }
}

fn default_base_dir() -> Result<PathBuf> {
    let home = non_empty_env("HOME")
        .ok_or_else(|| anyhow!("HOME is not set; set NAVICAP_HOME to the NaviCap directory"))?;
    Ok(PathBuf::from(home).join(DEFAULT_BASE_DIR_NAME))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<NavicapConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_rooted_at_base_dir() {
        let cfg = NavicapConfig::with_base_dir("/srv/navicap");
        assert_eq!(cfg.obstacle_path, PathBuf::from("/srv/navicap/obstacle.json"));
        assert_eq!(cfg.config_path, PathBuf::from("/srv/navicap/config.json"));
        assert_eq!(
            cfg.obstacle_log_path,
            PathBuf::from("/srv/navicap/logs/navicap_obstacles.log")
        );
        assert_eq!(cfg.model.names, PathBuf::from("/srv/navicap/obj.names"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_range_window() {
        let mut cfg = NavicapConfig::with_base_dir("/tmp/navicap");
        cfg.fusion.range_min_m = 6.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_threshold_out_of_range() {
        let mut cfg = NavicapConfig::with_base_dir("/tmp/navicap");
        cfg.fusion.conf_traffic_light = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err}").contains("conf_traffic_light"));
    }

    #[test]
    fn missing_model_files_fail_verification() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = NavicapConfig::with_base_dir(dir.path());
        let err = cfg.model.verify().unwrap_err();
        assert!(format!("{err}").contains("missing model resource"));

        for path in [&cfg.model.cfg, &cfg.model.weights, &cfg.model.names] {
            std::fs::write(path, b"x").unwrap();
        }
        assert!(cfg.model.verify().is_ok());
    }
}
