//! Todo 列表：模型通过 todoWrite 反复整体/局部覆写的派生任务列表
//!
//! 身份为 id；每次写入同 id 时 content / status / priority 整体替换。

pub mod reconciler;

use serde::{Deserialize, Serialize};

pub use reconciler::{
    complete_all, find_todos, has_attempt_completion, merge_todos, should_clear_todos,
    sort_todos, TodoReconciler, ATTEMPT_COMPLETION_TOOL,
};

/// Todo 状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    /// 排序用的状态权重：进行中 / 待办并列最高，已取消最低
    pub fn rank(self) -> i8 {
        match self {
            Self::Cancelled => -1,
            Self::Completed => 0,
            Self::Pending | Self::InProgress => 1,
        }
    }

    pub fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Todo 优先级
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    Low,
    Medium,
    High,
}

impl TodoPriority {
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

/// 单条 Todo
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
}

impl Todo {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        status: TodoStatus,
        priority: TodoPriority,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status,
            priority,
        }
    }
}
