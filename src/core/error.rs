//! 引擎错误类型
//!
//! 生命周期非法转换属于调用方的编程错误：直接返回 InvalidTransition，不做任何静默修正。
//! 错误需要 Clone：检查点保存失败要广播给同一 key 上的所有等待者。

use thiserror::Error;

/// 对话执行引擎的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid tool call transition for {tool_call_id}: {from} -> {to}")]
    InvalidTransition {
        tool_call_id: String,
        from: &'static str,
        to: &'static str,
    },

    /// 同一条流上已有 batchCall 正在被抑制时又出现新的 batchCall
    #[error("Nested batch call {incoming} while {active} is still in flight")]
    NestedBatchCall { active: String, incoming: String },

    /// 该调用已有结果，再次执行可能重复产生副作用
    #[error("Tool call {tool_call_id} already has a result")]
    AlreadyResulted { tool_call_id: String },

    #[error("Invalid tool input for {tool_call_id}: {message}")]
    InvalidToolInput {
        tool_call_id: String,
        message: String,
    },

    #[error("Checkpoint {label} failed: {message}")]
    CheckpointFailed { label: String, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
