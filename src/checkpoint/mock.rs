//! 内存检查点后端（用于测试与诊断 CLI，无需真实工作区）
//!
//! 记录每次调用的 label 与选项；可注入失败次数与延迟，用于验证去重与失败恢复。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::checkpoint::{CheckpointBackend, SaveCheckpointOptions};

#[derive(Debug, Default)]
pub struct MemoryCheckpointBackend {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    /// 工作区是否有未快照的变化
    clean: AtomicBool,
    delay: Option<Duration>,
    saved: Mutex<Vec<(String, SaveCheckpointOptions)>>,
}

impl MemoryCheckpointBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次保存前等待一段时间，便于制造并发重叠
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 接下来的 n 次保存返回错误
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// 标记工作区无变化
    pub fn mark_clean(&self) {
        self.clean.store(true, Ordering::SeqCst);
    }

    pub fn mark_dirty(&self) {
        self.clean.store(false, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn saved_labels(&self) -> Vec<(String, SaveCheckpointOptions)> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CheckpointBackend for MemoryCheckpointBackend {
    async fn save_checkpoint(
        &self,
        label: &str,
        options: SaveCheckpointOptions,
    ) -> Result<Option<String>, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(format!("snapshot of {label} failed"));
        }

        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((label.to_string(), options));

        let clean = self.clean.swap(true, Ordering::SeqCst);
        if clean && options.require_change && !options.force {
            return Ok(None);
        }
        Ok(Some(format!("commit-{n}")))
    }
}
