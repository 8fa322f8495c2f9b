//! 对话会话：一个对话的引擎状态持有者
//!
//! 会话拥有生命周期表、检查点协调器与 todo 列表，它们的生命周期都限定在该会话内，
//! 不存在任何全局可变状态。每条 provider 流使用一个新的 BatchCallTransformer。
//! 约定单写者（turn driver）；多写者环境下可以把会话放在 Arc 后共享，各组件内部自带锁。

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::Stream;

use crate::checkpoint::{
    CheckpointBackend, CheckpointCoordinator, CheckpointKey, SaveCheckpointOptions,
};
use crate::config::EngineConfig;
use crate::core::recovery::{RetryDecision, RetryPlanner};
use crate::core::EngineError;
use crate::message::{Message, Role, ToolInvocation};
use crate::stream::{transform_stream, BatchCallTransformer, StreamPart};
use crate::todo::{Todo, TodoReconciler};
use crate::tools::{run_tool_call, LifecycleTracker, ToolExecutor};

pub struct ConversationSession {
    id: String,
    config: EngineConfig,
    lifecycle: LifecycleTracker,
    checkpoints: CheckpointCoordinator,
    todos: Mutex<TodoReconciler>,
    planner: RetryPlanner,
}

impl ConversationSession {
    pub fn new(config: EngineConfig, backend: Arc<dyn CheckpointBackend>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(session_id = %id, "conversation session created");
        Self {
            checkpoints: CheckpointCoordinator::new(backend, config.checkpoint.label_prefix.clone()),
            planner: RetryPlanner::new(config.retry.resume_status),
            lifecycle: LifecycleTracker::new(),
            todos: Mutex::new(TodoReconciler::new()),
            config,
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &LifecycleTracker {
        &self.lifecycle
    }

    pub fn checkpoints(&self) -> &CheckpointCoordinator {
        &self.checkpoints
    }

    fn todo_list(&self) -> MutexGuard<'_, TodoReconciler> {
        self.todos.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 为一条新的 provider 流创建转换器
    pub fn transformer(&self) -> BatchCallTransformer {
        BatchCallTransformer::from_config(&self.config.batch)
    }

    pub fn transform_stream<S>(&self, input: S) -> impl Stream<Item = Result<StreamPart, EngineError>>
    where
        S: Stream<Item = Result<StreamPart, EngineError>>,
    {
        transform_stream(input, self.transformer())
    }

    /// 执行一个已审批的工具调用，驱动本会话的生命周期表
    pub async fn run_tool_call(
        &self,
        executor: &dyn ToolExecutor,
        invocation: &ToolInvocation,
    ) -> Result<ToolInvocation, EngineError> {
        run_tool_call(executor, &self.lifecycle, invocation).await
    }

    pub fn plan_retry(&self, messages: &mut Vec<Message>, last_status: Option<u16>) -> RetryDecision {
        self.planner.plan(messages, last_status)
    }

    pub fn is_ready_for_retry(&self, messages: &[Message]) -> bool {
        self.planner.is_ready(messages)
    }

    /// 为 message 的第 step 步保存检查点
    ///
    /// 第一条助手消息的第 0 步不要求工作区有变化（保证对话起点一定有快照）；
    /// 用户消息强制保存。`on_saved` 在真正完成保存时调用，通常用于把 commit 挂到 StepStart 上。
    pub async fn checkpoint_step<F>(
        &self,
        messages: &[Message],
        message: &Message,
        step: usize,
        on_saved: F,
    ) -> Result<Option<String>, EngineError>
    where
        F: FnOnce(Option<String>) + Send + 'static,
    {
        let is_first_assistant = message.role == Role::Assistant
            && messages
                .iter()
                .find(|m| m.role == Role::Assistant)
                .map_or(true, |first| first.id == message.id);
        let options = SaveCheckpointOptions {
            require_change: !(is_first_assistant && step == 0),
            force: message.role == Role::User,
        };
        self.checkpoints
            .save_if_needed(CheckpointKey::new(message.id.clone(), step), options, on_saved)
            .await
    }

    /// 观察一条消息并更新 todo 列表；返回列表是否变化
    pub fn observe_message(&self, message: &Message) -> bool {
        self.todo_list().observe_message(message)
    }

    pub fn todos(&self) -> Vec<Todo> {
        self.todo_list().todos().to_vec()
    }

    /// 一轮结束：丢弃本轮已结束的工具调用，仍在执行的保留
    pub fn settle_turn(&self) {
        tracing::debug!(
            session_id = %self.id,
            tracked = self.lifecycle.len(),
            "turn settled, clearing tracked tool calls"
        );
        self.lifecycle.clear();
    }
}
