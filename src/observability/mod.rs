//! 可观测性：tracing 订阅器初始化

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认 info 级别，可通过 RUST_LOG 覆盖
pub fn init() {
    init_with_level("info");
}

/// 以配置的级别初始化；设置了 RUST_LOG 时以 RUST_LOG 为准。重复初始化时静默忽略
pub fn init_with_level(level: &str) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let _ = tracing_subscriber::registry()
        .with(build_filter(env.as_deref(), level))
        .with(fmt::layer())
        .try_init();
}

fn build_filter(env_directives: Option<&str>, level: &str) -> EnvFilter {
    match env_directives.map(str::trim) {
        Some(directives) if !directives.is_empty() => {
            EnvFilter::try_new(directives).unwrap_or_else(|_| level_filter(level))
        }
        _ => level_filter(level),
    }
}

/// 无法识别的级别退回 info
fn level_filter(level: &str) -> EnvFilter {
    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    EnvFilter::new(level.to_string())
}
