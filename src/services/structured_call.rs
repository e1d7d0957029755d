//! 结构化调用层
//!
//! 调用 LLM 生成 JSON 对象，失败时先尝试从原始文本中抢救出 JSON，
//! 抢救失败才进入下一次重试。

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use crate::clients::{ObjectRequest, TextGenerator};
use crate::error::LlmError;
use crate::utils::LogSink;

/// 默认重试次数（总尝试次数为 retries + 1）
pub const DEFAULT_RETRIES: usize = 2;

/// 带重试和抢救解析的结构化生成
///
/// # 返回
/// 成功时返回 JSON 对象；所有尝试都失败时返回 `LlmError::Exhausted`，其中包含最后一次的错误
pub async fn generate_object_with_retry(
    llm: &dyn TextGenerator,
    request: &ObjectRequest,
    retries: usize,
    log: &LogSink,
) -> Result<Value, LlmError> {
    let attempts = retries + 1;
    let mut attempt = 0;
    // 超时覆盖整次调用，包括所有重试
    let deadline = request.timeout.map(|limit| (Instant::now() + limit, limit));

    loop {
        attempt += 1;
        let err = match call_once(llm, request, deadline).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        log.warn(format!(
            "{} 第 {}/{} 次生成失败: {}",
            request.schema_name, attempt, attempts, err
        ));

        if let Some(value) = err.raw_text().and_then(salvage_json) {
            log.info(format!("{} 已从格式错误的响应中抢救出 JSON", request.schema_name));
            return Ok(value);
        }

        let expired = matches!(err, LlmError::Timeout { .. });
        if attempt >= attempts || expired {
            return Err(LlmError::Exhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }
    }
}

/// 结构化生成并反序列化为具体类型
pub async fn generate_typed<T: DeserializeOwned>(
    llm: &dyn TextGenerator,
    request: &ObjectRequest,
    log: &LogSink,
) -> Result<T, LlmError> {
    let value = generate_object_with_retry(llm, request, DEFAULT_RETRIES, log).await?;
    let raw = value.to_string();
    serde_json::from_value(value).map_err(|source| LlmError::InvalidOutput { raw, source })
}

async fn call_once(
    llm: &dyn TextGenerator,
    request: &ObjectRequest,
    deadline: Option<(Instant, Duration)>,
) -> Result<Value, LlmError> {
    match deadline {
        Some((at, limit)) => tokio::time::timeout_at(at, llm.generate_object(request))
            .await
            .map_err(|_| LlmError::Timeout {
                secs: limit.as_secs(),
            })?,
        None => llm.generate_object(request).await,
    }
}

/// 从格式错误的文本中抢救出第一个可解析的 JSON 对象
///
/// 依次尝试 ```json 代码块中的内容和整段文本，在其中寻找括号配平的 `{...}`。
pub fn salvage_json(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut candidates: Vec<&str> = code_fence_re()
        .captures_iter(text)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
        .collect();
    candidates.push(text);

    candidates.into_iter().find_map(first_parsable_object)
}

fn code_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)```").expect("静态正则"))
}

fn first_parsable_object(text: &str) -> Option<Value> {
    text.match_indices('{').find_map(|(start, _)| {
        let end = balanced_end(&text[start..])?;
        match serde_json::from_str::<Value>(&text[start..start + end]) {
            Ok(value) if value.is_object() => Some(value),
            _ => None,
        }
    })
}

/// 返回与开头 `{` 配对的 `}` 之后的字节偏移，忽略字符串中的括号
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 按脚本依次返回结果的生成器
    struct ScriptedGenerator {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<Value, LlmError>>>,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<Result<Value, LlmError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate_object(&self, _request: &ObjectRequest) -> Result<Value, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(api_error()))
        }

        async fn generate_text(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(String::new())
        }
    }

    /// 永远不返回的生成器
    struct HangingGenerator;

    #[async_trait]
    impl TextGenerator for HangingGenerator {
        async fn generate_object(&self, _request: &ObjectRequest) -> Result<Value, LlmError> {
            std::future::pending().await
        }

        async fn generate_text(&self, _prompt: &str) -> Result<String, LlmError> {
            std::future::pending().await
        }
    }

    fn api_error() -> LlmError {
        LlmError::api_failed("stub", std::io::Error::other("503"))
    }

    fn invalid_output(raw: &str) -> LlmError {
        let source = serde_json::from_str::<Value>("{").unwrap_err();
        LlmError::InvalidOutput {
            raw: raw.to_string(),
            source,
        }
    }

    fn request() -> ObjectRequest {
        ObjectRequest {
            schema_name: "test",
            system: String::new(),
            prompt: String::new(),
            schema: json!({ "type": "object" }),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_two_failures() {
        let llm = ScriptedGenerator::new(vec![
            Err(api_error()),
            Err(api_error()),
            Ok(json!({ "ok": true })),
        ]);

        let value = generate_object_with_retry(&llm, &request(), 2, &LogSink::detached())
            .await
            .unwrap();

        assert_eq!(value, json!({ "ok": true }));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_salvage_short_circuits_retries() {
        let raw = "Sure! Here is the JSON: {\"queries\": [{\"query\": \"a\"}]} hope it helps";
        let llm = ScriptedGenerator::new(vec![Err(invalid_output(raw)), Ok(json!({}))]);

        let value = generate_object_with_retry(&llm, &request(), 2, &LogSink::detached())
            .await
            .unwrap();

        assert_eq!(value["queries"][0]["query"], "a");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_keeps_last_error() {
        let llm = ScriptedGenerator::new(vec![
            Err(api_error()),
            Err(api_error()),
            Err(invalid_output("{\"truncated\": [1, 2")),
        ]);

        let err = generate_object_with_retry(&llm, &request(), 2, &LogSink::detached())
            .await
            .unwrap_err();

        assert_eq!(llm.calls(), 3);
        match err {
            LlmError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, LlmError::InvalidOutput { .. }));
            }
            other => panic!("期望 Exhausted，实际: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_timeout() {
        let mut req = request();
        req.timeout = Some(Duration::from_secs(60));

        let err = generate_object_with_retry(&HangingGenerator, &req, 0, &LogSink::detached())
            .await
            .unwrap_err();

        match err {
            LlmError::Exhausted { last, .. } => {
                assert!(matches!(*last, LlmError::Timeout { secs: 60 }))
            }
            other => panic!("期望超时，实际: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_covers_all_retries() {
        let mut req = request();
        req.timeout = Some(Duration::from_secs(60));
        let started = tokio::time::Instant::now();

        let err = generate_object_with_retry(&HangingGenerator, &req, 2, &LogSink::detached())
            .await
            .unwrap_err();

        assert!(started.elapsed() <= Duration::from_secs(60));
        match err {
            LlmError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*last, LlmError::Timeout { secs: 60 }));
            }
            other => panic!("期望超时，实际: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_failure_shares_deadline() {
        /// 第一次立即失败，之后永远挂起
        struct FailThenHang {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl TextGenerator for FailThenHang {
            async fn generate_object(&self, _request: &ObjectRequest) -> Result<Value, LlmError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(40)).await;
                    return Err(api_error());
                }
                std::future::pending().await
            }

            async fn generate_text(&self, _prompt: &str) -> Result<String, LlmError> {
                Ok(String::new())
            }
        }

        let llm = FailThenHang {
            calls: AtomicUsize::new(0),
        };
        let mut req = request();
        req.timeout = Some(Duration::from_secs(60));
        let started = tokio::time::Instant::now();

        let err = generate_object_with_retry(&llm, &req, 2, &LogSink::detached())
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(40) && elapsed <= Duration::from_secs(60));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_salvage_from_code_fence() {
        let text = "```json\n{\"learnings\": [\"x\"]}\n```\nextra";
        assert_eq!(salvage_json(text), Some(json!({ "learnings": ["x"] })));
    }

    #[test]
    fn test_salvage_ignores_braces_inside_strings() {
        let text = r#"prefix {"title": "a } b", "n": 1} suffix {"other": 2}"#;
        assert_eq!(salvage_json(text), Some(json!({ "title": "a } b", "n": 1 })));
    }

    #[test]
    fn test_salvage_rejects_truncated_object() {
        assert_eq!(salvage_json("{\"a\": [1, 2"), None);
        assert_eq!(salvage_json("   "), None);
        assert_eq!(salvage_json("no json here"), None);
    }

    #[test]
    fn test_salvage_skips_unparsable_prefix_object() {
        let text = "{not json} then {\"ok\": true}";
        assert_eq!(salvage_json(text), Some(json!({ "ok": true })));
    }
}
