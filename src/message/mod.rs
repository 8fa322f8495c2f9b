//! 对话数据模型：Message / Part / ToolInvocation
//!
//! Message 由外部的 turn driver 持有；引擎把消息列表视为按步追加/整体替换的数组，
//! 不会在外部原地修改某个 id 的消息。JSON 形状与前端/存储一致（camelCase、kebab-case 标签）。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::todo::Todo;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 消息内工具调用的 part 级状态（与 LifecycleTracker 的执行状态相互独立）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    /// 参数仍在流式输出
    InputStreaming,
    /// 参数完整，等待审批或执行
    Call,
    /// 已有结果（终态）
    Result,
}

/// 一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    pub state: ToolInvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ToolInvocation {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
        state: ToolInvocationState,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
            state,
            output: None,
        }
    }

    pub fn is_resulted(&self) -> bool {
        self.state == ToolInvocationState::Result
    }

    /// 写入结果并转为 result 状态
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self.state = ToolInvocationState::Result;
        self
    }
}

/// 工作区检查点引用；commit 为 None 表示后端判定「无变化」
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub commit: Option<String>,
}

/// todoWrite 工具调用：只有 call / result 状态的写入才会被合并
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoWrite {
    pub tool_call_id: String,
    pub state: ToolInvocationState,
    #[serde(default)]
    pub todos: Vec<Todo>,
}

impl TodoWrite {
    pub fn is_applicable(&self) -> bool {
        self.state != ToolInvocationState::InputStreaming
    }
}

/// 消息片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    ToolInvocation(ToolInvocation),
    /// 步骤边界，可携带本步的检查点
    StepStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint: Option<Checkpoint>,
    },
    FileAttachment {
        url: String,
        #[serde(rename = "mediaType")]
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    TodoWrite(TodoWrite),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn step_start() -> Self {
        Self::StepStart { checkpoint: None }
    }

    pub fn is_step_start(&self) -> bool {
        matches!(self, Self::StepStart { .. })
    }

    /// 该 part 是否是尚未拿到结果的工具调用（todoWrite 也是工具调用）
    pub fn is_pending_tool_call(&self) -> bool {
        match self {
            Self::ToolInvocation(invocation) => !invocation.is_resulted(),
            Self::TodoWrite(write) => write.state != ToolInvocationState::Result,
            Self::Text { .. } | Self::StepStart { .. } | Self::FileAttachment { .. } => false,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
    /// 系统注入的用户消息（如自动续写提示），不触发 todo 清空
    #[serde(default, skip_serializing_if = "is_false")]
    pub system_generated: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            role,
            parts,
            system_generated: false,
        }
    }

    /// 新用户消息（随机 id）
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), Role::User, vec![Part::text(text)])
    }

    /// 新助手消息（随机 id）
    pub fn assistant(parts: Vec<Part>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), Role::Assistant, parts)
    }

    pub fn system_generated(mut self) -> Self {
        self.system_generated = true;
        self
    }

    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|part| match part {
            Part::ToolInvocation(invocation) => Some(invocation),
            _ => None,
        })
    }

    /// 所有工具调用都已到达 result
    pub fn all_tool_calls_resulted(&self) -> bool {
        !self.parts.iter().any(Part::is_pending_tool_call)
    }

    /// 最后一个 StepStart 的下标
    pub fn last_step_start_index(&self) -> Option<usize> {
        self.parts.iter().rposition(Part::is_step_start)
    }

    pub fn step_count(&self) -> usize {
        self.parts.iter().filter(|part| part.is_step_start()).count()
    }

    /// 把检查点挂到第 step 个 StepStart 上；已有检查点或不存在该步时返回 false
    pub fn attach_checkpoint(&mut self, step: usize, checkpoint: Checkpoint) -> bool {
        let slot = self
            .parts
            .iter_mut()
            .filter_map(|part| match part {
                Part::StepStart { checkpoint } => Some(checkpoint),
                _ => None,
            })
            .nth(step);
        match slot {
            Some(slot) if slot.is_none() => {
                *slot = Some(checkpoint);
                true
            }
            _ => false,
        }
    }
}
