//! 工具执行接缝
//!
//! 真正的工具实现（文件读写、Shell）在引擎之外；这里只定义 ToolExecutor trait，
//! 以及 run_tool_call：围绕一次执行驱动生命周期（executing -> completed），
//! 用户中止时保留 part 的 call 状态，使重试规划把它视为未完成。每次调用输出结构化审计日志（JSON）。

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::EngineError;
use crate::message::{ToolInvocation, ToolInvocationState};
use crate::tools::LifecycleTracker;

/// 单次执行的上下文：调用 id 与取消令牌
#[derive(Debug, Clone)]
pub struct ToolCallOptions {
    pub tool_call_id: String,
    pub abort: CancellationToken,
}

/// 外部工具执行器
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        input: Value,
        options: ToolCallOptions,
    ) -> Result<Value, String>;
}

/// 执行一个已审批的工具调用
///
/// 返回更新后的 invocation：正常结束（含工具报错）为 result 状态，错误写成 `{"error": ...}`；
/// 被中止则原样返回（仍为 call）。
pub async fn run_tool_call(
    executor: &dyn ToolExecutor,
    tracker: &LifecycleTracker,
    invocation: &ToolInvocation,
) -> Result<ToolInvocation, EngineError> {
    match invocation.state {
        ToolInvocationState::InputStreaming => {
            return Err(EngineError::InvalidToolInput {
                tool_call_id: invocation.tool_call_id.clone(),
                message: "tool call input is still streaming".to_string(),
            });
        }
        // 生命周期表可能已被清空或属于新会话，part 状态才是唯一可靠的依据
        ToolInvocationState::Result => {
            tracing::warn!(
                tool_call_id = %invocation.tool_call_id,
                "refusing to re-execute tool call that already has a result"
            );
            return Err(EngineError::AlreadyResulted {
                tool_call_id: invocation.tool_call_id.clone(),
            });
        }
        ToolInvocationState::Call => {}
    }

    let abort = tracker.start_executing(&invocation.tool_call_id)?;
    let options = ToolCallOptions {
        tool_call_id: invocation.tool_call_id.clone(),
        abort: abort.clone(),
    };

    let start = Instant::now();
    // 中止优先：执行器响应取消后返回的错误不算作结果
    let result = tokio::select! {
        biased;
        _ = abort.cancelled() => None,
        result = executor.execute(&invocation.tool_name, invocation.input.clone(), options) => Some(result),
    };
    // 执行已经发生，生命周期记录失败也不能丢掉执行结果
    if let Err(err) = tracker.complete(&invocation.tool_call_id) {
        tracing::error!(
            tool_call_id = %invocation.tool_call_id,
            error = %err,
            "failed to record tool call completion"
        );
    }

    let outcome = match &result {
        Some(Ok(_)) => "ok",
        Some(Err(_)) => "error",
        None => "aborted",
    };
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": invocation.tool_name,
        "tool_call_id": invocation.tool_call_id,
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
    });
    tracing::info!(audit = %audit, "tool");

    Ok(match result {
        Some(Ok(output)) => invocation.clone().with_output(output),
        Some(Err(message)) => invocation
            .clone()
            .with_output(serde_json::json!({ "error": message })),
        None => invocation.clone(),
    })
}
