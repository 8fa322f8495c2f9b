//! 核心层：错误类型、断线重试规划、对话会话

pub mod error;
pub mod recovery;
pub mod session;

pub use error::EngineError;
pub use recovery::{is_ready_for_retry, prepare_last_message_for_retry, RetryDecision, RetryPlanner};
pub use session::ConversationSession;
