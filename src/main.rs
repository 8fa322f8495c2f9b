//! Turnkeeper 诊断 CLI
//!
//! 读取一份对话 JSON（消息数组），输出重试规划结果、是否可重试以及派生的 todo 列表。
//! 用法：`turnkeeper <conversation.json> [last-status]`

use std::sync::Arc;

use anyhow::Context;
use turnkeeper::checkpoint::MemoryCheckpointBackend;
use turnkeeper::config::load_config;
use turnkeeper::message::Message;
use turnkeeper::{observability, ConversationSession};

fn main() -> anyhow::Result<()> {
    let config = load_config(None).context("Failed to load config")?;
    observability::init_with_level(&config.log.level);

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .context("usage: turnkeeper <conversation.json> [last-status]")?;
    let last_status = args
        .next()
        .map(|s| s.parse::<u16>())
        .transpose()
        .context("last-status must be an HTTP status code")?;

    let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {path}"))?;
    let mut messages: Vec<Message> =
        serde_json::from_str(&raw).context("Failed to parse conversation")?;

    // 诊断时不做真实快照
    let session = ConversationSession::new(config, Arc::new(MemoryCheckpointBackend::new()));
    for message in &messages {
        session.observe_message(message);
    }

    let ready = session.is_ready_for_retry(&messages);
    let decision = session.plan_retry(&mut messages, last_status);

    let report = serde_json::json!({
        "session": session.id(),
        "readyForRetry": ready,
        "decision": decision,
        "todos": session.todos(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
