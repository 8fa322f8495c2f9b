//! batchCall 展开
//!
//! 位于模型原始流与下游（UI / 存储 / 生命周期跟踪）之间：除 batchCall 相关片段外一律原样转发。
//! 每个实例只服务一条流，同一时刻最多抑制一个 batchCall id；嵌套的 batchCall 直接报错。
//! 展开出的调用 id 为 `{prefix}-{原始id}-{下标}`，对同一输入稳定可复现。

use std::collections::HashSet;

use futures_util::{stream, Stream, StreamExt};

use crate::config::BatchSection;
use crate::core::EngineError;
use crate::stream::StreamPart;
use crate::tools::schema::{parse_batch_input, BATCH_CALL_TOOL};

/// 单条流上的 batchCall 转换器
#[derive(Debug, Clone)]
pub struct BatchCallTransformer {
    allowed_tools: HashSet<String>,
    batch_tool_name: String,
    id_prefix: String,
    /// 当前被抑制的 batchCall id
    suppressed: Option<String>,
}

impl BatchCallTransformer {
    pub fn new<I, S>(allowed_tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_tools: allowed_tools.into_iter().map(Into::into).collect(),
            batch_tool_name: BATCH_CALL_TOOL.to_string(),
            id_prefix: "batch".to_string(),
            suppressed: None,
        }
    }

    pub fn from_config(section: &BatchSection) -> Self {
        Self {
            allowed_tools: section.allowed_tools.iter().cloned().collect(),
            batch_tool_name: section.tool_name.clone(),
            id_prefix: section.id_prefix.clone(),
            suppressed: None,
        }
    }

    pub fn is_suppressing(&self) -> bool {
        self.suppressed.is_some()
    }

    fn is_suppressed(&self, id: &str) -> bool {
        self.suppressed.as_deref() == Some(id)
    }

    /// 处理一个片段，返回需要转发的片段（可能为空，也可能是多个展开后的调用）
    pub fn transform(&mut self, part: StreamPart) -> Result<Vec<StreamPart>, EngineError> {
        match part {
            StreamPart::ToolInputStart { id, tool_name } if tool_name == self.batch_tool_name => {
                if let Some(active) = &self.suppressed {
                    return Err(EngineError::NestedBatchCall {
                        active: active.clone(),
                        incoming: id,
                    });
                }
                tracing::debug!(tool_call_id = %id, "suppressing batch call input");
                self.suppressed = Some(id);
                Ok(Vec::new())
            }
            StreamPart::ToolInputDelta { ref id, .. } if self.is_suppressed(id) => Ok(Vec::new()),
            StreamPart::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } if tool_name == self.batch_tool_name => {
                if let Some(active) = self.suppressed.take() {
                    if active != tool_call_id {
                        let err = EngineError::NestedBatchCall {
                            active: active.clone(),
                            incoming: tool_call_id,
                        };
                        self.suppressed = Some(active);
                        return Err(err);
                    }
                }
                Ok(self.expand(tool_call_id, input))
            }
            other => Ok(vec![other]),
        }
    }

    fn expand(&self, tool_call_id: String, input: String) -> Vec<StreamPart> {
        let batch = match parse_batch_input(&tool_call_id, &input) {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(tool_call_id = %tool_call_id, error = %err, "invalid batch call input");
                return vec![StreamPart::ToolInputError {
                    message: err.to_string(),
                    tool_call_id,
                    tool_name: self.batch_tool_name.clone(),
                    input,
                }];
            }
        };

        let total = batch.invocations.len();
        let expanded: Vec<StreamPart> = batch
            .invocations
            .into_iter()
            .enumerate()
            .filter_map(|(index, invocation)| {
                if !self.allowed_tools.contains(&invocation.tool_name) {
                    tracing::debug!(
                        tool_call_id = %tool_call_id,
                        index,
                        tool = %invocation.tool_name,
                        "dropping batch invocation outside allow-list"
                    );
                    return None;
                }
                Some(StreamPart::ToolCall {
                    tool_call_id: format!("{}-{}-{}", self.id_prefix, tool_call_id, index),
                    tool_name: invocation.tool_name,
                    input: serde_json::Value::Object(invocation.args).to_string(),
                })
            })
            .collect();

        tracing::info!(
            tool_call_id = %tool_call_id,
            total,
            expanded = expanded.len(),
            "expanded batch call"
        );
        expanded
    }
}

/// 把转换器套在一条 provider 流上；上游错误原样透传
pub fn transform_stream<S>(
    input: S,
    mut transformer: BatchCallTransformer,
) -> impl Stream<Item = Result<StreamPart, EngineError>>
where
    S: Stream<Item = Result<StreamPart, EngineError>>,
{
    input.flat_map(move |item| {
        let out: Vec<Result<StreamPart, EngineError>> = match item {
            Ok(part) => match transformer.transform(part) {
                Ok(parts) => parts.into_iter().map(Ok).collect(),
                Err(err) => vec![Err(err)],
            },
            Err(err) => vec![Err(err)],
        };
        stream::iter(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH_INPUT: &str =
        r#"{"invocations":[{"toolName":"a","args":{"x":1}},{"toolName":"b","args":{"x":2}}]}"#;

    fn batch_parts(id: &str, input: &str) -> Vec<StreamPart> {
        vec![
            StreamPart::ToolInputStart {
                id: id.into(),
                tool_name: BATCH_CALL_TOOL.into(),
            },
            StreamPart::ToolInputDelta {
                id: id.into(),
                delta: input[..10].into(),
            },
            StreamPart::ToolInputDelta {
                id: id.into(),
                delta: input[10..].into(),
            },
            StreamPart::tool_call(id, BATCH_CALL_TOOL, input),
        ]
    }

    fn run(transformer: &mut BatchCallTransformer, parts: Vec<StreamPart>) -> Vec<StreamPart> {
        parts
            .into_iter()
            .flat_map(|part| transformer.transform(part).unwrap())
            .collect()
    }

    #[test]
    fn test_batch_expansion_is_deterministic() {
        let mut transformer = BatchCallTransformer::new(["a", "b"]);
        let out = run(&mut transformer, batch_parts("c1", BATCH_INPUT));
        assert_eq!(
            out,
            vec![
                StreamPart::tool_call("batch-c1-0", "a", r#"{"x":1}"#),
                StreamPart::tool_call("batch-c1-1", "b", r#"{"x":2}"#),
            ]
        );
        assert!(!transformer.is_suppressing());
    }

    #[test]
    fn test_allow_list_filtering() {
        let mut transformer = BatchCallTransformer::new(["a"]);
        let out = run(&mut transformer, batch_parts("c1", BATCH_INPUT));
        assert_eq!(out, vec![StreamPart::tool_call("batch-c1-0", "a", r#"{"x":1}"#)]);
    }

    #[test]
    fn test_dropped_invocation_keeps_original_index() {
        let mut transformer = BatchCallTransformer::new(["b"]);
        let out = run(&mut transformer, batch_parts("c1", BATCH_INPUT));
        assert_eq!(out, vec![StreamPart::tool_call("batch-c1-1", "b", r#"{"x":2}"#)]);
    }

    #[test]
    fn test_other_parts_pass_through_in_order() {
        let mut transformer = BatchCallTransformer::new(["a"]);
        let mut parts = vec![StreamPart::text("hello")];
        parts.extend(batch_parts("c1", BATCH_INPUT));
        parts.push(StreamPart::ToolInputStart {
            id: "c2".into(),
            tool_name: "readFile".into(),
        });
        parts.push(StreamPart::ToolInputDelta {
            id: "c2".into(),
            delta: "{}".into(),
        });
        parts.push(StreamPart::tool_call("c2", "readFile", "{}"));
        parts.push(StreamPart::Finish {
            finish_reason: "tool-calls".into(),
        });

        let out = run(&mut transformer, parts);
        let ids: Vec<Option<&str>> = out.iter().map(StreamPart::tool_call_id).collect();
        assert_eq!(
            ids,
            vec![None, Some("batch-c1-0"), Some("c2"), Some("c2"), Some("c2"), None]
        );
    }

    #[test]
    fn test_invalid_input_emits_scoped_error_and_continues() {
        let mut transformer = BatchCallTransformer::new(["a"]);
        let mut parts = batch_parts("c1", r#"{"invocations": "nope"}"#);
        parts.push(StreamPart::text("after"));
        let out = run(&mut transformer, parts);

        assert_eq!(out.len(), 2);
        match &out[0] {
            StreamPart::ToolInputError {
                tool_call_id,
                tool_name,
                ..
            } => {
                assert_eq!(tool_call_id, "c1");
                assert_eq!(tool_name, BATCH_CALL_TOOL);
            }
            other => panic!("Expected ToolInputError, got {other:?}"),
        }
        assert_eq!(out[1], StreamPart::text("after"));
    }

    #[test]
    fn test_unstreamed_batch_call_is_expanded() {
        let mut transformer = BatchCallTransformer::new(["a", "b"]);
        let out = transformer
            .transform(StreamPart::tool_call("c9", BATCH_CALL_TOOL, BATCH_INPUT))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tool_call_id(), Some("batch-c9-0"));
    }

    #[test]
    fn test_nested_batch_call_is_rejected() {
        let mut transformer = BatchCallTransformer::new(["a"]);
        transformer
            .transform(StreamPart::ToolInputStart {
                id: "c1".into(),
                tool_name: BATCH_CALL_TOOL.into(),
            })
            .unwrap();
        let err = transformer
            .transform(StreamPart::ToolInputStart {
                id: "c2".into(),
                tool_name: BATCH_CALL_TOOL.into(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::NestedBatchCall {
                active: "c1".into(),
                incoming: "c2".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_transform_stream() {
        let mut parts: Vec<Result<StreamPart, EngineError>> =
            batch_parts("c1", BATCH_INPUT).into_iter().map(Ok).collect();
        parts.push(Err(EngineError::Stream("connection reset".into())));

        let out: Vec<Result<StreamPart, EngineError>> = transform_stream(
            stream::iter(parts),
            BatchCallTransformer::new(["a", "b"]),
        )
        .collect()
        .await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap().tool_call_id(), Some("batch-c1-0"));
        assert_eq!(out[1].as_ref().unwrap().tool_call_id(), Some("batch-c1-1"));
        assert!(out[2].is_err());
    }
}
