//! batchCall 参数 Schema（schemars 自动生成）
//!
//! 模型通过一个合成的 batchCall 工具一次性发出多个独立子调用：
//! `{ "invocations": [{ "toolName": "...", "args": {...} }, ...] }`。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::EngineError;

/// 合成批量调用的默认工具名
pub const BATCH_CALL_TOOL: &str = "batchCall";

/// 批量调用中的单个子调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchInvocation {
    /// 子工具名，必须在白名单内才会被展开
    pub tool_name: String,
    /// 子工具参数（JSON 对象）
    pub args: Map<String, Value>,
}

/// batchCall 的完整参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchCallInput {
    pub invocations: Vec<BatchInvocation>,
}

/// 按 batch schema 解析 batchCall 的完整参数文本
pub fn parse_batch_input(tool_call_id: &str, input: &str) -> Result<BatchCallInput, EngineError> {
    serde_json::from_str(input).map_err(|e| EngineError::InvalidToolInput {
        tool_call_id: tool_call_id.to_string(),
        message: e.to_string(),
    })
}

/// 返回 batchCall 参数的 JSON Schema 字符串，用于向模型声明该工具
pub fn batch_call_schema_json() -> String {
    let schema = schema_for!(BatchCallInput);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_input() {
        let input = r#"{"invocations":[{"toolName":"a","args":{"x":1}}]}"#;
        let parsed = parse_batch_input("c1", input).unwrap();
        assert_eq!(parsed.invocations.len(), 1);
        assert_eq!(parsed.invocations[0].tool_name, "a");
        assert_eq!(parsed.invocations[0].args["x"], 1);
    }

    #[test]
    fn test_parse_rejects_non_object_args() {
        let err = parse_batch_input("c1", r#"{"invocations":[{"toolName":"a","args":5}]}"#)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidToolInput { ref tool_call_id, .. } if tool_call_id == "c1"));
        assert!(parse_batch_input("c1", "{not json").is_err());
        assert!(parse_batch_input("c1", r#"{"calls":[]}"#).is_err());
    }

    #[test]
    fn test_schema_mentions_fields() {
        let schema = batch_call_schema_json();
        assert!(schema.contains("invocations"));
        assert!(schema.contains("toolName"));
    }
}
