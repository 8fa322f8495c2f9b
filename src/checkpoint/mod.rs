//! 检查点：按 (messageId, step) 去重的工作区快照调度

pub mod backend;
pub mod coordinator;
pub mod mock;

pub use backend::{CheckpointBackend, SaveCheckpointOptions};
pub use coordinator::{CheckpointCoordinator, CheckpointKey, CheckpointState};
pub use mock::MemoryCheckpointBackend;
