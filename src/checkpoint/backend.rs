//! 检查点后端抽象
//!
//! 后端（如影子 Git 仓库）负责真正的工作区快照：返回 commit id，工作区无变化且未强制时返回 None。

use async_trait::async_trait;

/// 保存选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveCheckpointOptions {
    /// 为 true 时后端可以跳过无变化的保存
    pub require_change: bool,
    /// 即使无变化也创建快照
    pub force: bool,
}

impl Default for SaveCheckpointOptions {
    fn default() -> Self {
        Self {
            require_change: true,
            force: false,
        }
    }
}

/// 外部检查点后端
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    async fn save_checkpoint(
        &self,
        label: &str,
        options: SaveCheckpointOptions,
    ) -> Result<Option<String>, String>;
}
