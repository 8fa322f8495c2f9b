//! 引擎配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TURNKEEPER__*` 覆盖（双下划线表示嵌套，如 `TURNKEEPER__RETRY__RESUME_STATUS=409`）。
//! 列表项用逗号分隔：`TURNKEEPER__BATCH__ALLOWED_TOOLS=readFile,listFiles`。

use std::path::PathBuf;

use serde::Deserialize;

use crate::tools::schema::BATCH_CALL_TOOL;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub batch: BatchSection,
    pub checkpoint: CheckpointSection,
    pub retry: RetrySection,
    pub log: LogSection,
}

/// [batch] 段：合成批量调用的工具名、展开 id 前缀、允许展开的子工具白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub tool_name: String,
    pub id_prefix: String,
    pub allowed_tools: Vec<String>,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            tool_name: BATCH_CALL_TOOL.to_string(),
            id_prefix: "batch".to_string(),
            allowed_tools: default_allowed_tools(),
        }
    }
}

/// 默认只允许只读工具被批量展开
fn default_allowed_tools() -> Vec<String> {
    vec![
        "readFile".into(),
        "listFiles".into(),
        "globFiles".into(),
        "searchFiles".into(),
        "listCodeDefinitionNames".into(),
    ]
}

/// [checkpoint] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    /// 检查点标签前缀，完整标签为 `{prefix}{messageId}-{step}`
    pub label_prefix: String,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            label_prefix: "ckpt-msg-".to_string(),
        }
    }
}

/// [retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// 表示「流仍在进行、应续接」的传输层状态码
    pub resume_status: u16,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            resume_status: crate::core::recovery::CONFLICT_STATUS,
        }
    }
}

/// [log] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// 默认日志级别，RUST_LOG 可覆盖
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TURNKEEPER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TURNKEEPER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<EngineConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TURNKEEPER")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("batch.allowed_tools"),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
