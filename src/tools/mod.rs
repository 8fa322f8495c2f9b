pub mod executor;
pub mod lifecycle;
pub mod schema;

pub use executor::{run_tool_call, ToolCallOptions, ToolExecutor};
pub use lifecycle::{LifecycleState, LifecycleTracker};
pub use schema::{batch_call_schema_json, parse_batch_input, BatchCallInput, BatchInvocation};
