//! Turnkeeper - 对话执行引擎
//!
//! 让多轮、带工具调用的 Agent 对话在断线、工具执行中断与合成 batchCall 协议下保持一致。
//!
//! 模块划分：
//! - **checkpoint**: 按 (messageId, step) 去重的工作区检查点调度
//! - **config**: 引擎配置加载（TOML + 环境变量）
//! - **core**: 错误类型、断线重试 / 续传规划、对话会话
//! - **message**: 对话数据模型（Message / Part / ToolInvocation）
//! - **observability**: 日志初始化
//! - **stream**: provider 流片段与 batchCall 展开
//! - **todo**: Todo 列表合并与规范排序
//! - **tools**: 工具调用生命周期、执行接缝、batchCall Schema

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod message;
pub mod observability;
pub mod stream;
pub mod todo;
pub mod tools;

pub use crate::core::{ConversationSession, EngineError, RetryDecision};
