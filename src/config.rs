use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::debug;
use serde::Deserialize;

use crate::cli::*;
use crate::error::ConfigError;
use crate::feature::StorageType;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "aloxaf", "clipsearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

/// 默认的相似度扫描批大小
pub const DEFAULT_BATCH_SIZE: usize = 8192;
/// 默认的特征服务地址
pub const DEFAULT_EMBEDDING_URL: &str = "http://127.0.0.1:8765";

#[derive(Parser, Debug, Clone)]
#[command(name = "clipsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// clipsearch 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录并将图片导入数据库
    Import(ImportCommand),
    /// 使用文字或图片搜索相似图片
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 显示数据库统计信息
    Stats(StatsCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回配置文件的路径
    pub fn config(&self) -> PathBuf {
        self.path.join("config.json")
    }

    /// 返回默认数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("clipsearch.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

/// 推理设备，仅转发给特征服务
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

/// 返回 CLIP 模型输出的特征维数
pub fn model_dimension(model: &str) -> Option<usize> {
    match model {
        "RN50" | "RN50x64" => Some(1024),
        "RN101" | "ViT-B/32" | "ViT-B/16" => Some(512),
        "RN50x4" => Some(640),
        "RN50x16" | "ViT-L/14" | "ViT-L/14@336px" => Some(768),
        _ => None,
    }
}

/// config.json 的原始内容
#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    clip_model: String,
    feature_dim: Option<usize>,
    device: Option<Device>,
    #[serde(default)]
    storage_type: StorageType,
    import_image_base: Option<PathBuf>,
    database: Option<PathBuf>,
    embedding_url: Option<String>,
    embedding_timeout: Option<u64>,
    batch_size: Option<usize>,
}

/// 经过校验的配置
#[derive(Debug, Clone)]
pub struct Config {
    /// CLIP 模型名称
    pub clip_model: String,
    /// 特征维数，整个数据库内保持一致
    pub feature_dim: usize,
    pub device: Option<Device>,
    /// 特征向量的存储类型
    pub storage_type: StorageType,
    /// 复制模式下图片的存放目录
    pub import_image_base: Option<PathBuf>,
    pub database: PathBuf,
    pub embedding_url: String,
    pub embedding_timeout: Duration,
    /// 相似度扫描时每批处理的向量数量
    pub batch_size: usize,
}

impl Config {
    /// 从配置目录读取 config.json
    pub fn load(conf_dir: &ConfDir) -> Result<Self, ConfigError> {
        let path = conf_dir.config();
        debug!("读取配置文件: {}", path.display());
        let text = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        Self::from_json(&text, conf_dir)
    }

    /// 解析并校验配置，相对路径以配置目录为基准
    pub fn from_json(text: &str, conf_dir: &ConfDir) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text)?;

        let feature_dim = match (model_dimension(&raw.clip_model), raw.feature_dim) {
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(ConfigError::DimensionConflict {
                    model: raw.clip_model,
                    expected,
                    actual,
                });
            }
            (Some(dim), _) | (None, Some(dim)) => dim,
            (None, None) => return Err(ConfigError::UnknownModel(raw.clip_model)),
        };
        if feature_dim == 0 {
            return Err(ConfigError::Zero("feature-dim"));
        }

        let batch_size = raw.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(ConfigError::Zero("batch-size"));
        }

        let import_image_base = match raw.import_image_base {
            Some(base) => Some(absolute(conf_dir.path().join(base))?),
            None => None,
        };
        let database = match raw.database {
            Some(database) => conf_dir.path().join(database),
            None => conf_dir.database(),
        };

        Ok(Self {
            clip_model: raw.clip_model,
            feature_dim,
            device: raw.device,
            storage_type: raw.storage_type,
            import_image_base,
            database,
            embedding_url: raw
                .embedding_url
                .unwrap_or_else(|| DEFAULT_EMBEDDING_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            embedding_timeout: Duration::from_secs(raw.embedding_timeout.unwrap_or(60)),
            batch_size,
        })
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf, ConfigError> {
    std::path::absolute(&path).map_err(|source| ConfigError::Path { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf_dir() -> ConfDir {
        ConfDir::from_str("/etc/clipsearch").unwrap()
    }

    #[test]
    fn known_model_resolves_dimension() {
        let config = Config::from_json(r#"{"clip-model": "ViT-L/14"}"#, &conf_dir()).unwrap();
        assert_eq!(config.feature_dim, 768);
        assert_eq!(config.storage_type, StorageType::Float32);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.database, PathBuf::from("/etc/clipsearch/clipsearch.db"));
        assert!(config.import_image_base.is_none());
    }

    #[test]
    fn unknown_model_requires_dimension() {
        let err = Config::from_json(r#"{"clip-model": "my-model"}"#, &conf_dir()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModel(_)));

        let config =
            Config::from_json(r#"{"clip-model": "my-model", "feature-dim": 2}"#, &conf_dir())
                .unwrap();
        assert_eq!(config.feature_dim, 2);
    }

    #[test]
    fn conflicting_dimension_is_rejected() {
        let err = Config::from_json(r#"{"clip-model": "ViT-B/32", "feature-dim": 768}"#, &conf_dir())
            .unwrap_err();
        assert!(matches!(err, ConfigError::DimensionConflict { expected: 512, actual: 768, .. }));
    }

    #[test]
    fn full_config() {
        let text = r#"{
            "clip-model": "ViT-B/32",
            "device": "cuda",
            "storage-type": "float16",
            "import-image-base": "images",
            "database": "/data/index.db",
            "embedding-url": "http://10.0.0.2:9000/",
            "batch-size": 1024
        }"#;
        let config = Config::from_json(text, &conf_dir()).unwrap();
        assert_eq!(config.device, Some(Device::Cuda));
        assert_eq!(config.storage_type, StorageType::Float16);
        assert_eq!(config.import_image_base, Some(PathBuf::from("/etc/clipsearch/images")));
        assert_eq!(config.database, PathBuf::from("/data/index.db"));
        assert_eq!(config.embedding_url, "http://10.0.0.2:9000");
        assert_eq!(config.batch_size, 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_json(r#"{"clip-model": "ViT-B/32", "device": "tpu"}"#, &conf_dir())
            .is_err());
        assert!(Config::from_json(r#"{"clip-model": "ViT-B/32", "batch-size": 0}"#, &conf_dir())
            .is_err());
        assert!(Config::from_json(r#"{"clip-model": "ViT-B/32", "mongodb-host": "x"}"#, &conf_dir())
            .is_err());
        assert!(Config::from_json(r#"{"device": "cpu"}"#, &conf_dir()).is_err());
    }
}
