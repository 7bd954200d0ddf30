//! 容器配置
//!
//! 定义容器运行时的配置结构和加载逻辑。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::ContextType;
use crate::utils::Result;

/// 事件总线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// 历史缓冲区容量（超出后淘汰最旧事件）
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// 同类型事件的节流窗口（毫秒），窗口内的重复发布被丢弃
    #[serde(default = "default_throttle_window_ms")]
    pub throttle_window_ms: u64,
}

fn default_history_capacity() -> usize {
    100
}

fn default_throttle_window_ms() -> u64 {
    100
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            throttle_window_ms: default_throttle_window_ms(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 容器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// 容器所属蓝图 ID
    #[serde(default = "default_blueprint_id")]
    pub blueprint_id: String,

    /// 执行上下文类型
    #[serde(default)]
    pub context_type: ContextType,

    /// 事件总线配置
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_blueprint_id() -> String {
    "default".to_string()
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            blueprint_id: default_blueprint_id(),
            context_type: ContextType::default(),
            event_bus: EventBusConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl ContainerConfig {
    /// 创建配置构建器
    pub fn builder() -> ContainerConfigBuilder {
        ContainerConfigBuilder::new()
    }

    /// 从 YAML 字符串解析配置
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ContainerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 YAML 文件加载配置
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml(&content)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.blueprint_id.is_empty() {
            return Err(crate::utils::CoreError::InvalidMetadata(
                "blueprint_id must not be empty".to_string(),
            ));
        }
        if self.event_bus.history_capacity == 0 {
            return Err(crate::utils::CoreError::InvalidMetadata(
                "event_bus.history_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// 容器配置构建器
#[derive(Debug, Default)]
pub struct ContainerConfigBuilder {
    config: ContainerConfig,
}

impl ContainerConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: ContainerConfig::default(),
        }
    }

    /// 设置蓝图 ID
    pub fn blueprint_id(mut self, id: impl Into<String>) -> Self {
        self.config.blueprint_id = id.into();
        self
    }

    /// 设置上下文类型
    pub fn context_type(mut self, context_type: ContextType) -> Self {
        self.config.context_type = context_type;
        self
    }

    /// 设置事件历史容量
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.event_bus.history_capacity = capacity;
        self
    }

    /// 设置事件节流窗口（毫秒）
    pub fn throttle_window_ms(mut self, window_ms: u64) -> Self {
        self.config.event_bus.throttle_window_ms = window_ms;
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 构建配置
    pub fn build(self) -> ContainerConfig {
        self.config
    }
}
