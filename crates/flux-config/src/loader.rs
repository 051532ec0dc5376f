use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::EngineConfig;

/// 配置文件名
const CONFIG_FILE: &str = "engine.toml";

/// 环境变量前缀，例如 FLUX_PERF__STORE__CAPACITY=5000
const ENV_PREFIX: &str = "FLUX_PERF";

/// 配置加载器
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }

    /// 配置文件路径
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// 加载引擎配置
    ///
    /// 文件不存在时使用默认值，环境变量覆盖文件中的值。
    pub fn load(&self) -> Result<EngineConfig> {
        let config_path = self.config_path();

        let mut builder = Config::builder();
        if config_path.exists() {
            let path = config_path
                .to_str()
                .ok_or_else(|| ConfigError::invalid("Invalid config path"))?;
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let engine: EngineConfig = config.try_deserialize()?;
        engine.validate()?;
        Ok(engine)
    }

    /// 从 TOML 字符串解析（用于内嵌配置）
    pub fn from_toml_str(content: &str) -> Result<EngineConfig> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let engine: EngineConfig = config.try_deserialize()?;
        engine.validate()?;
        Ok(engine)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        self.load().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_default_config() {
        let temp_dir = tempdir().unwrap();
        let loader = ConfigLoader::new(temp_dir.path());

        let config = loader.load().unwrap();
        assert_eq!(config.store.capacity, 10_000);
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_content = r#"
[store]
capacity = 500

[alerting]
evaluation_interval_secs = 15
default_max_alerts_per_hour = 5

[logging]
level = "debug"
format = "json"

[[rules]]
id = "cpu_high"
metric_name = "cpu_percent"
type = "threshold"
severity = "critical"
comparator = ">"
threshold_value = 90.0
channels = ["slack", "email"]
"#;

        fs::write(temp_dir.path().join("engine.toml"), config_content).unwrap();

        let loader = ConfigLoader::new(temp_dir.path());
        let config = loader.load().unwrap();

        assert_eq!(config.store.capacity, 500);
        assert_eq!(config.alerting.evaluation_interval_secs, 15);
        assert_eq!(config.alerting.default_max_alerts_per_hour, 5);
        // 未设置的字段保持默认值
        assert_eq!(config.alerting.history_limit, 1000);
        assert_eq!(config.logging.format, crate::LogFormat::Json);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].channels, vec!["slack", "email"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = ConfigLoader::from_toml_str(
            r#"
[regression]
significance = 1.5
"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate() {
        let temp_dir = tempdir().unwrap();
        let loader = ConfigLoader::new(temp_dir.path());
        assert!(loader.validate().is_ok());
    }
}
