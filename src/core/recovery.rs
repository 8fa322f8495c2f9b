//! 断线重试 / 续传规划
//!
//! 根据完整消息列表与最近一次传输层状态码决定重发什么：
//! 续接正在进行的流（409）、原样重发最后一条、或从最近一个完整步骤边界挽救助手消息。
//! 执行中途被打断的工具调用可能已经产生副作用，绝不盲目重放：只从整步工具调用都已 result 的边界续传。

use serde::Serialize;

use crate::message::{Message, Role};

/// 默认的「流仍在进行」状态码
pub const CONFLICT_STATUS: u16 = 409;

/// 规划结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "message", rename_all = "kebab-case")]
pub enum RetryDecision {
    /// 没有消息，无事可做
    NoOp,
    /// 重新挂接到已有的进行中流，不重发任何消息
    Resume,
    /// 原样重发最后一条消息
    Reload(Message),
    /// 挽救后的助手消息已替换列表末尾，作为新一轮发送
    Resend(Message),
}

/// 挽救最后一条助手消息：逐步丢弃末尾未完成的步骤，直到所有工具调用都为 result
///
/// 截断到空仍不满足时返回 None，由调用方退回到原样重发。
pub fn prepare_last_message_for_retry(message: &Message) -> Option<Message> {
    let mut candidate = message.clone();
    loop {
        if candidate.all_tool_calls_resulted() {
            return (!candidate.parts.is_empty()).then_some(candidate);
        }
        let boundary = candidate.last_step_start_index()?;
        candidate.parts.truncate(boundary);
    }
}

/// 当前是否值得重试：最后一条是用户消息，或是所有工具调用都已有结果的助手消息
pub fn is_ready_for_retry(messages: &[Message]) -> bool {
    match messages.last() {
        Some(message) => match message.role {
            Role::User => true,
            Role::Assistant => message.all_tool_calls_resulted(),
        },
        None => false,
    }
}

/// 重试规划器
#[derive(Debug, Clone)]
pub struct RetryPlanner {
    resume_status: u16,
}

impl Default for RetryPlanner {
    fn default() -> Self {
        Self::new(CONFLICT_STATUS)
    }
}

impl RetryPlanner {
    pub fn new(resume_status: u16) -> Self {
        Self { resume_status }
    }

    /// 规划下一次请求；只有挽救成功时才会修改 messages（替换最后一条）
    pub fn plan(&self, messages: &mut Vec<Message>, last_status: Option<u16>) -> RetryDecision {
        let Some(last) = messages.last() else {
            tracing::debug!("retry requested on empty conversation");
            return RetryDecision::NoOp;
        };

        if last_status == Some(self.resume_status) {
            tracing::info!(message_id = %last.id, "stream still in flight, resuming");
            return RetryDecision::Resume;
        }

        if last.role != Role::Assistant {
            tracing::info!(message_id = %last.id, "reloading last user message");
            return RetryDecision::Reload(last.clone());
        }

        match prepare_last_message_for_retry(last) {
            Some(salvaged) => {
                tracing::info!(
                    message_id = %salvaged.id,
                    kept_parts = salvaged.parts.len(),
                    dropped_parts = last.parts.len() - salvaged.parts.len(),
                    "resending salvaged assistant message"
                );
                messages.pop();
                messages.push(salvaged.clone());
                RetryDecision::Resend(salvaged)
            }
            None => {
                tracing::info!(message_id = %last.id, "no completed step to salvage, reloading");
                RetryDecision::Reload(last.clone())
            }
        }
    }

    pub fn is_ready(&self, messages: &[Message]) -> bool {
        is_ready_for_retry(messages)
    }
}
