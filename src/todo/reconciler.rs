//! Todo 合并与规范排序
//!
//! 纯函数：merge_todos 按 id 覆写（后写胜出，未出现的 id 原样保留），之后统一按
//! 状态权重降序、优先级降序做稳定排序。TodoReconciler 在此之上维护一份会话内的当前列表。

use std::collections::HashMap;

use crate::message::{Message, Part, Role, ToolInvocationState};
use crate::todo::{Todo, TodoStatus};

/// 模型宣告任务完成时调用的工具名
pub const ATTEMPT_COMPLETION_TOOL: &str = "attemptCompletion";

/// 合并：以已有列表为种子，incoming 按 id 插入或覆盖，结果按规范顺序排序
pub fn merge_todos(existing: &[Todo], incoming: &[Todo]) -> Vec<Todo> {
    let mut merged: Vec<Todo> = Vec::with_capacity(existing.len() + incoming.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for todo in existing.iter().chain(incoming) {
        match index.get(&todo.id) {
            Some(&i) => merged[i] = todo.clone(),
            None => {
                index.insert(todo.id.clone(), merged.len());
                merged.push(todo.clone());
            }
        }
    }

    sort_todos(&mut merged);
    merged
}

/// 规范排序：状态权重降序，再按优先级降序；sort_by 为稳定排序，其余并列保持原顺序
pub fn sort_todos(todos: &mut [Todo]) {
    todos.sort_by(|a, b| {
        b.status
            .rank()
            .cmp(&a.status.rank())
            .then_with(|| b.priority.rank().cmp(&a.priority.rank()))
    });
}

/// 任务完成：所有未取消的 todo 标记为 completed
pub fn complete_all(todos: &[Todo]) -> Vec<Todo> {
    let mut completed: Vec<Todo> = todos
        .iter()
        .cloned()
        .map(|mut todo| {
            if todo.status != TodoStatus::Cancelled {
                todo.status = TodoStatus::Completed;
            }
            todo
        })
        .collect();
    sort_todos(&mut completed);
    completed
}

/// 新的非系统用户消息到来且所有 todo 都已结束时，应清空列表
pub fn should_clear_todos(todos: &[Todo], message: &Message) -> bool {
    message.role == Role::User
        && !message.system_generated
        && todos.iter().all(|todo| todo.status.is_done())
}

/// 从单条助手消息中按顺序折叠所有可用的 todoWrite；没有任何写入时返回 None
pub fn find_todos(message: &Message) -> Option<Vec<Todo>> {
    if message.role != Role::Assistant {
        return None;
    }

    message
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::TodoWrite(write) if write.is_applicable() => Some(write),
            _ => None,
        })
        .fold(None, |acc: Option<Vec<Todo>>, write| {
            Some(merge_todos(acc.as_deref().unwrap_or_default(), &write.todos))
        })
}

/// 消息中是否出现了 attemptCompletion 调用（参数仍在流式输出的不算）
pub fn has_attempt_completion(message: &Message) -> bool {
    message.tool_invocations().any(|invocation| {
        invocation.tool_name == ATTEMPT_COMPLETION_TOOL
            && invocation.state != ToolInvocationState::InputStreaming
    })
}

/// 会话内的 todo 列表持有者：逐条观察消息并应用合并 / 完成 / 清空规则
#[derive(Debug, Clone, Default)]
pub struct TodoReconciler {
    todos: Vec<Todo>,
}

impl TodoReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_todos(todos: Vec<Todo>) -> Self {
        let mut todos = todos;
        sort_todos(&mut todos);
        Self { todos }
    }

    pub fn todos(&self) -> &[Todo] {
        &self.todos
    }

    /// 合并一次写入（可以是部分列表）
    pub fn apply_write(&mut self, incoming: &[Todo]) {
        self.todos = merge_todos(&self.todos, incoming);
    }

    /// 观察一条消息；返回列表是否发生变化
    pub fn observe_message(&mut self, message: &Message) -> bool {
        let before = self.todos.clone();
        match message.role {
            Role::User => {
                if !self.todos.is_empty() && should_clear_todos(&self.todos, message) {
                    tracing::debug!(message_id = %message.id, "all todos settled, clearing list");
                    self.todos.clear();
                }
            }
            Role::Assistant => {
                if let Some(written) = find_todos(message) {
                    self.apply_write(&written);
                }
                if has_attempt_completion(message) {
                    self.todos = complete_all(&self.todos);
                }
            }
        }
        before != self.todos
    }

    pub fn clear(&mut self) {
        self.todos.clear();
    }
}
