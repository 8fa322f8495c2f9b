//! 检查点协调器
//!
//! 每个 key 的状态机：`uninitiated -> saving -> saved(commit | None)`。
//! - uninitiated：发起一次外部保存（在独立任务里运行，发起方被丢弃也不会卡住该 key）
//! - saving：所有调用方订阅同一个 watch 通道，等待同一次保存的结果
//! - saved：立即返回已保存的 commit
//!
//! 保存失败时错误广播给所有等待者，key 回到 uninitiated，之后的调用会重新保存。
//! 不同 key 之间完全并发、互不影响。

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::checkpoint::{CheckpointBackend, SaveCheckpointOptions};
use crate::core::EngineError;

/// 检查点 key：消息 id + 该消息内的步骤序号
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub message_id: String,
    pub step: usize,
}

impl CheckpointKey {
    pub fn new(message_id: impl Into<String>, step: usize) -> Self {
        Self {
            message_id: message_id.into(),
            step,
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.message_id, self.step)
    }
}

/// 对外可见的 key 状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointState {
    Uninitiated,
    Saving,
    Saved(Option<String>),
}

type SaveOutcome = Result<Option<String>, EngineError>;

enum Slot {
    Saving {
        generation: u64,
        outcome: watch::Receiver<Option<SaveOutcome>>,
    },
    Saved(Option<String>),
}

#[derive(Default)]
struct Slots {
    next_generation: u64,
    by_key: HashMap<CheckpointKey, Slot>,
}

/// 按 key 去重的检查点调度器
pub struct CheckpointCoordinator {
    backend: Arc<dyn CheckpointBackend>,
    label_prefix: String,
    slots: Arc<Mutex<Slots>>,
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

impl CheckpointCoordinator {
    pub fn new(backend: Arc<dyn CheckpointBackend>, label_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            label_prefix: label_prefix.into(),
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// 传给后端的检查点标签
    pub fn label_for(&self, key: &CheckpointKey) -> String {
        format!("{}{}", self.label_prefix, key)
    }

    /// 必要时保存检查点；同一 key 至多发起一次成功的保存
    ///
    /// `on_saved` 只在本次调用真正发起并成功完成保存时调用一次，且先于任何等待者返回。
    pub async fn save_if_needed<F>(
        &self,
        key: CheckpointKey,
        options: SaveCheckpointOptions,
        on_saved: F,
    ) -> Result<Option<String>, EngineError>
    where
        F: FnOnce(Option<String>) + Send + 'static,
    {
        let (generation, mut outcome) = {
            let mut slots = lock(&self.slots);
            match slots.by_key.get(&key) {
                Some(Slot::Saved(commit)) => return Ok(commit.clone()),
                Some(Slot::Saving {
                    generation,
                    outcome,
                }) => {
                    tracing::debug!(key = %key, "checkpoint save already in flight, waiting");
                    (*generation, outcome.clone())
                }
                None => {
                    let generation = slots.next_generation;
                    slots.next_generation += 1;
                    let (tx, rx) = watch::channel(None);
                    slots.by_key.insert(
                        key.clone(),
                        Slot::Saving {
                            generation,
                            outcome: rx.clone(),
                        },
                    );
                    self.spawn_save(key.clone(), generation, options, tx, on_saved);
                    (generation, rx)
                }
            }
        };

        match wait_outcome(&mut outcome).await {
            Some(result) => result,
            None => {
                // 保存任务在发送结果前退出（panic），把 key 退回 uninitiated
                let label = self.label_for(&key);
                let mut slots = lock(&self.slots);
                if matches!(
                    slots.by_key.get(&key),
                    Some(Slot::Saving { generation: g, .. }) if *g == generation
                ) {
                    slots.by_key.remove(&key);
                }
                Err(EngineError::CheckpointFailed {
                    label,
                    message: "save task exited without a result".to_string(),
                })
            }
        }
    }

    fn spawn_save<F>(
        &self,
        key: CheckpointKey,
        generation: u64,
        options: SaveCheckpointOptions,
        tx: watch::Sender<Option<SaveOutcome>>,
        on_saved: F,
    ) where
        F: FnOnce(Option<String>) + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let slots = Arc::clone(&self.slots);
        let label = self.label_for(&key);

        tokio::spawn(async move {
            tracing::debug!(
                label = %label,
                require_change = options.require_change,
                force = options.force,
                "saving checkpoint"
            );
            let outcome = backend
                .save_checkpoint(&label, options)
                .await
                .map_err(|message| EngineError::CheckpointFailed {
                    label: label.clone(),
                    message,
                });

            {
                let mut slots = lock(&slots);
                let still_ours = matches!(
                    slots.by_key.get(&key),
                    Some(Slot::Saving { generation: g, .. }) if *g == generation
                );
                if still_ours {
                    match &outcome {
                        Ok(commit) => {
                            slots.by_key.insert(key.clone(), Slot::Saved(commit.clone()));
                        }
                        Err(_) => {
                            slots.by_key.remove(&key);
                        }
                    }
                }
            }

            match &outcome {
                Ok(commit) => {
                    tracing::info!(label = %label, commit = ?commit, "checkpoint saved");
                    // key 已记为 saved；回调 panic 不能让广播的结果与之不一致
                    let commit = commit.clone();
                    if panic::catch_unwind(AssertUnwindSafe(move || on_saved(commit))).is_err() {
                        tracing::error!(label = %label, "checkpoint on_saved callback panicked");
                    }
                }
                Err(err) => tracing::warn!(label = %label, error = %err, "checkpoint save failed"),
            }
            let _ = tx.send(Some(outcome));
        });
    }

    pub fn state(&self, key: &CheckpointKey) -> CheckpointState {
        match lock(&self.slots).by_key.get(key) {
            None => CheckpointState::Uninitiated,
            Some(Slot::Saving { .. }) => CheckpointState::Saving,
            Some(Slot::Saved(commit)) => CheckpointState::Saved(commit.clone()),
        }
    }

    /// 已保存的 commit；未保存或保存中返回 None
    pub fn commit(&self, key: &CheckpointKey) -> Option<Option<String>> {
        match lock(&self.slots).by_key.get(key) {
            Some(Slot::Saved(commit)) => Some(commit.clone()),
            _ => None,
        }
    }

    /// 丢弃所有 key；进行中的保存完成后不会再写回
    pub fn clear(&self) {
        lock(&self.slots).by_key.clear();
    }
}

async fn wait_outcome(rx: &mut watch::Receiver<Option<SaveOutcome>>) -> Option<SaveOutcome> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return Some(outcome);
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointBackend;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn coordinator(backend: Arc<MemoryCheckpointBackend>) -> CheckpointCoordinator {
        CheckpointCoordinator::new(backend, "ckpt-msg-")
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_save() {
        let backend =
            Arc::new(MemoryCheckpointBackend::new().with_delay(Duration::from_millis(20)));
        let coordinator = coordinator(backend.clone());
        let key = CheckpointKey::new("m1", 0);
        let saved = Arc::new(AtomicUsize::new(0));

        let calls = (0..8).map(|_| {
            let saved = saved.clone();
            coordinator.save_if_needed(key.clone(), SaveCheckpointOptions::default(), move |_| {
                saved.fetch_add(1, Ordering::SeqCst);
            })
        });
        let results = join_all(calls).await;

        assert_eq!(backend.call_count(), 1);
        assert_eq!(saved.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), Some("commit-1".to_string()));
        }
        assert_eq!(
            coordinator.state(&key),
            CheckpointState::Saved(Some("commit-1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_panicking_callback_keeps_state_and_result_in_agreement() {
        let backend =
            Arc::new(MemoryCheckpointBackend::new().with_delay(Duration::from_millis(10)));
        let coordinator = coordinator(backend.clone());
        let key = CheckpointKey::new("m1", 0);

        let (initiator, waiter) = tokio::join!(
            coordinator.save_if_needed(key.clone(), SaveCheckpointOptions::default(), |_| {
                panic!("attach failed")
            }),
            coordinator.save_if_needed(key.clone(), SaveCheckpointOptions::default(), |_| {}),
        );

        let commit = Some("commit-1".to_string());
        assert_eq!(initiator.unwrap(), commit);
        assert_eq!(waiter.unwrap(), commit);
        assert_eq!(coordinator.state(&key), CheckpointState::Saved(commit));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_saved_key_returns_immediately() {
        let backend = Arc::new(MemoryCheckpointBackend::new());
        let coordinator = coordinator(backend.clone());
        let key = CheckpointKey::new("m1", 2);

        let first = coordinator
            .save_if_needed(key.clone(), SaveCheckpointOptions::default(), |_| {})
            .await
            .unwrap();
        let second = coordinator
            .save_if_needed(key.clone(), SaveCheckpointOptions::default(), |_| {
                panic!("on_saved must not run for a saved key")
            })
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.saved_labels()[0].0, "ckpt-msg-m1-2");
        assert_eq!(coordinator.commit(&key), Some(first));
    }

    #[tokio::test]
    async fn test_null_commit_is_a_saved_state() {
        let backend = Arc::new(MemoryCheckpointBackend::new());
        backend.mark_clean();
        let coordinator = coordinator(backend.clone());
        let key = CheckpointKey::new("m1", 1);

        let commit = coordinator
            .save_if_needed(key.clone(), SaveCheckpointOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(commit, None);
        assert_eq!(coordinator.state(&key), CheckpointState::Saved(None));

        coordinator
            .save_if_needed(key, SaveCheckpointOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_propagates_and_resets_key() {
        let backend =
            Arc::new(MemoryCheckpointBackend::new().with_delay(Duration::from_millis(10)));
        backend.fail_next(1);
        let coordinator = coordinator(backend.clone());
        let key = CheckpointKey::new("m1", 0);

        let results = join_all((0..3).map(|_| {
            coordinator.save_if_needed(key.clone(), SaveCheckpointOptions::default(), |_| {})
        }))
        .await;
        assert_eq!(backend.call_count(), 1);
        for result in results {
            assert!(matches!(result, Err(EngineError::CheckpointFailed { .. })));
        }
        assert_eq!(coordinator.state(&key), CheckpointState::Uninitiated);

        let retried = coordinator
            .save_if_needed(key.clone(), SaveCheckpointOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(retried, Some("commit-2".to_string()));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_save_independently() {
        let backend =
            Arc::new(MemoryCheckpointBackend::new().with_delay(Duration::from_millis(10)));
        let coordinator = coordinator(backend.clone());

        let results = join_all((0..4).map(|step| {
            coordinator.save_if_needed(
                CheckpointKey::new("m1", step),
                SaveCheckpointOptions {
                    require_change: false,
                    force: false,
                },
                |_| {},
            )
        }))
        .await;

        assert_eq!(backend.call_count(), 4);
        assert!(results.iter().all(|r| matches!(r, Ok(Some(_)))));
    }

    #[tokio::test]
    async fn test_dropped_initiator_does_not_wedge_key() {
        let backend =
            Arc::new(MemoryCheckpointBackend::new().with_delay(Duration::from_millis(20)));
        let coordinator = coordinator(backend.clone());
        let key = CheckpointKey::new("m1", 0);

        let initiator =
            coordinator.save_if_needed(key.clone(), SaveCheckpointOptions::default(), |_| {});
        let _ = tokio::time::timeout(Duration::from_millis(1), initiator).await;

        let commit = coordinator
            .save_if_needed(key.clone(), SaveCheckpointOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(commit, Some("commit-1".to_string()));
        assert_eq!(backend.call_count(), 1);
    }
}
