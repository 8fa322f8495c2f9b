//! 工具调用生命周期跟踪
//!
//! 单轮对话内「某个 toolCallId 正在执行 / 已完成 / 被拒绝」的唯一事实来源。
//! 转换表：
//! ```text
//! undefined -> {executing, rejected}
//! executing -> {completed}
//! completed -> {}
//! rejected  -> {}
//! ```
//! 读取是同步的且总是反映最近一次写入：调用方用它做即时的放行判断。

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::EngineError;

/// 引擎自身跟踪的执行状态（与消息 part 的 state 字段无关）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Executing,
    Rejected,
    Completed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executing => "executing",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        }
    }

    /// 当前状态（None 表示未跟踪）下允许的下一状态
    pub fn allowed_next(current: Option<Self>) -> &'static [LifecycleState] {
        match current {
            None => &[Self::Executing, Self::Rejected],
            Some(Self::Executing) => &[Self::Completed],
            Some(Self::Completed) | Some(Self::Rejected) => &[],
        }
    }

    pub fn can_transition(current: Option<Self>, next: Self) -> bool {
        Self::allowed_next(current).contains(&next)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Entry {
    state: LifecycleState,
    /// executing 时创建，用户中止时触发
    abort: Option<CancellationToken>,
}

/// 按 toolCallId 存储的生命周期表，生命周期限定在一个会话内
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    entries: Mutex<HashMap<String, Entry>>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 按转换表校验后写入；非法转换返回 InvalidTransition 且不改变状态
    pub fn set_state(&self, tool_call_id: &str, next: LifecycleState) -> Result<(), EngineError> {
        self.transition(tool_call_id, next).map(|_| ())
    }

    fn transition(
        &self,
        tool_call_id: &str,
        next: LifecycleState,
    ) -> Result<Option<CancellationToken>, EngineError> {
        let mut entries = self.entries();
        let current = entries.get(tool_call_id).map(|entry| entry.state);

        if !LifecycleState::can_transition(current, next) {
            let from = current.map_or("undefined", LifecycleState::as_str);
            tracing::error!(
                tool_call_id = %tool_call_id,
                from,
                to = next.as_str(),
                "invalid tool call lifecycle transition"
            );
            return Err(EngineError::InvalidTransition {
                tool_call_id: tool_call_id.to_string(),
                from,
                to: next.as_str(),
            });
        }

        let abort = match next {
            LifecycleState::Executing => Some(CancellationToken::new()),
            LifecycleState::Rejected | LifecycleState::Completed => None,
        };
        entries.insert(
            tool_call_id.to_string(),
            Entry {
                state: next,
                abort: abort.clone(),
            },
        );
        tracing::debug!(tool_call_id = %tool_call_id, state = next.as_str(), "tool call lifecycle");
        Ok(abort)
    }

    /// 审批通过：进入 executing，返回该调用独占的取消令牌
    pub fn start_executing(&self, tool_call_id: &str) -> Result<CancellationToken, EngineError> {
        let token = self.transition(tool_call_id, LifecycleState::Executing)?;
        Ok(token.unwrap_or_default())
    }

    pub fn complete(&self, tool_call_id: &str) -> Result<(), EngineError> {
        self.set_state(tool_call_id, LifecycleState::Completed)
    }

    pub fn reject(&self, tool_call_id: &str) -> Result<(), EngineError> {
        self.set_state(tool_call_id, LifecycleState::Rejected)
    }

    /// 用户中止：触发正在执行的调用的取消令牌；没有可中止的调用时返回 false
    pub fn abort(&self, tool_call_id: &str) -> bool {
        let entries = self.entries();
        match entries.get(tool_call_id) {
            Some(Entry {
                state: LifecycleState::Executing,
                abort: Some(token),
            }) => {
                tracing::info!(tool_call_id = %tool_call_id, "aborting tool call");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// 该调用的取消令牌（仅 executing 时存在）
    pub fn abort_token(&self, tool_call_id: &str) -> Option<CancellationToken> {
        self.entries()
            .get(tool_call_id)
            .and_then(|entry| entry.abort.clone())
    }

    pub fn get_state(&self, tool_call_id: &str) -> Option<LifecycleState> {
        self.entries().get(tool_call_id).map(|entry| entry.state)
    }

    pub fn has_state(&self, state: LifecycleState) -> bool {
        self.entries().values().any(|entry| entry.state == state)
    }

    /// 清掉已结束（completed / rejected）的调用；仍在 executing 的保留，
    /// 以便之后还能中止它，结束时也能正常记为 completed
    pub fn clear(&self) {
        self.entries()
            .retain(|_, entry| entry.state == LifecycleState::Executing);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
