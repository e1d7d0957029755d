//! 日志工具模块
//!
//! - `init()` 安装全局 tracing 订阅者
//! - `LogSink` 是按任务绑定的日志句柄，研究过程中所有需要记录的函数都显式接收它
//! - `JobLogStore` 按任务 ID 保存捕获到的日志行，供之后查询

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// 默认级别为 info，可以用 `RUST_LOG` 覆盖。重复调用是安全的。
pub fn init() {
    init_with_verbose(false);
}

/// 初始化日志，`verbose` 为真时默认级别为 debug
pub fn init_with_verbose(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 按任务保存的日志
#[derive(Debug, Clone, Default)]
pub struct JobLogStore {
    lines: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl JobLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("日志存储锁已中毒，继续使用: {}", poisoned);
                poisoned.into_inner()
            }
        }
    }

    pub fn append(&self, job_id: &str, line: String) {
        self.lock().entry(job_id.to_string()).or_default().push(line);
    }

    /// 获取某个任务的日志，未知任务返回空列表
    pub fn lines(&self, job_id: &str) -> Vec<String> {
        self.lock().get(job_id).cloned().unwrap_or_default()
    }

    pub fn remove(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// 创建绑定到某个任务的日志句柄
    pub fn sink(&self, job_id: impl Into<String>) -> LogSink {
        LogSink {
            job_id: Some(job_id.into()),
            store: Some(self.clone()),
        }
    }
}

/// 日志句柄
///
/// 每条日志都会输出到 tracing；绑定了任务时同时追加到该任务的日志列表。
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    job_id: Option<String>,
    store: Option<JobLogStore>,
}

impl LogSink {
    /// 不属于任何任务的日志句柄（命令行模式、测试）
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(job_id = self.job_id.as_deref().unwrap_or("-"), "{}", message);
        self.capture(message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(job_id = self.job_id.as_deref().unwrap_or("-"), "{}", message);
        self.capture(message);
    }

    fn capture(&self, message: &str) {
        if let (Some(job_id), Some(store)) = (&self.job_id, &self.store) {
            let line = format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), message);
            store.append(job_id, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_sink_captures_in_order() {
        let store = JobLogStore::new();
        let sink = store.sink("job-1");

        sink.info("第一条");
        sink.warn("第二条");

        let lines = store.lines("job-1");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("第一条"));
        assert!(lines[1].ends_with("第二条"));
        assert!(store.lines("job-2").is_empty());
    }

    #[test]
    fn test_detached_sink_captures_nothing() {
        let sink = LogSink::detached();
        sink.info("只输出到 tracing");
        assert!(sink.job_id().is_none());
    }

    #[test]
    fn test_remove_drops_job_lines() {
        let store = JobLogStore::new();
        store.sink("a").info("x");
        store.sink("b").info("y");

        store.remove("a");

        assert!(store.lines("a").is_empty());
        assert_eq!(store.lines("b").len(), 1);
    }
}
