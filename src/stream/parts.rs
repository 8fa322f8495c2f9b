//! 模型输出流的片段类型
//!
//! 一次工具调用在流上表现为：`start{id, toolName}`、零或多个 `delta{id, inputTextDelta}`，
//! 最后是终结的 `call{toolCallId, toolName, input}`。`tool-input-error` 由引擎自身产生。

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamPart {
    #[serde(rename = "start")]
    ToolInputStart {
        id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    #[serde(rename = "delta")]
    ToolInputDelta {
        id: String,
        #[serde(rename = "inputTextDelta")]
        delta: String,
    },
    #[serde(rename = "call")]
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        /// 完整参数的 JSON 文本
        input: String,
    },
    #[serde(rename = "result")]
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        output: Value,
    },
    #[serde(rename = "text")]
    TextDelta { text: String },
    #[serde(rename = "finish")]
    Finish {
        #[serde(rename = "finishReason")]
        finish_reason: String,
    },
    /// 工具参数不符合 schema，作用域限定在原始 toolCallId，不中断后续流
    #[serde(rename = "tool-input-error")]
    ToolInputError {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: String,
        message: String,
    },
}

impl StreamPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input: input.into(),
        }
    }

    /// 该片段所属的工具调用 id（文本 / 结束片段为 None）
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolInputStart { id, .. } | Self::ToolInputDelta { id, .. } => Some(id),
            Self::ToolCall { tool_call_id, .. }
            | Self::ToolResult { tool_call_id, .. }
            | Self::ToolInputError { tool_call_id, .. } => Some(tool_call_id),
            Self::TextDelta { .. } | Self::Finish { .. } => None,
        }
    }
}
