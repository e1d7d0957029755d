//! 集成测试共用的桩实现

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use deep_research::clients::{ObjectRequest, SearchOptions, TextGenerator, WebSearch};
use deep_research::config::{JobSettings, ResearchSettings};
use deep_research::error::{LlmError, SearchError};
use deep_research::models::{SearchItem, SearchResponse};
use deep_research::{DeepResearch, JobSupervisor};

/// 按 schema 名称返回固定结果的生成器
///
/// 查询扩展总是返回 `alpha`、`beta` 两条子查询；提炼时每条查询产出一条研究发现。
#[derive(Default)]
pub struct StubGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate_object(&self, request: &ObjectRequest) -> Result<Value, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match request.schema_name {
            "feedback" => json!({ "questions": ["Which time period?", "Which region?"] }),
            "serp_queries" => json!({
                "queries": [
                    { "query": "alpha", "researchGoal": "first goal" },
                    { "query": "beta", "researchGoal": "second goal" }
                ]
            }),
            "serp_result" => {
                let query = if request.prompt.contains("<query>alpha</query>") {
                    "alpha"
                } else {
                    "beta"
                };
                json!({
                    "learnings": [format!("{} fact", query)],
                    "followUpQuestions": [format!("more on {}", query)]
                })
            }
            "final_answer" => json!({ "exactAnswer": "42" }),
            _ => json!({ "reportMarkdown": "# Findings" }),
        })
    }

    async fn generate_text(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok("Stub Report".to_string())
    }
}

/// 搜索桩：`failing` 中的查询返回错误，`hanging` 为真时永不返回
#[derive(Default)]
pub struct StubSearch {
    pub failing: Vec<&'static str>,
    pub hanging: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl WebSearch for StubSearch {
    async fn search(
        &self,
        query: &str,
        _options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging {
            std::future::pending::<()>().await;
        }
        if self.failing.iter().any(|failing| *failing == query) {
            return Err(SearchError::BadResponse {
                status: 502,
                message: format!("upstream failed for {}", query),
            });
        }
        Ok(SearchResponse {
            data: vec![SearchItem {
                url: Some(format!("https://{}.example/page", query)),
                title: Some(query.to_string()),
                markdown: Some(format!("Everything about {}", query)),
            }],
        })
    }
}

pub fn research_settings() -> ResearchSettings {
    ResearchSettings {
        concurrency_limit: 2,
        search_timeout: Duration::from_secs(3600),
        ..Default::default()
    }
}

pub fn job_settings() -> JobSettings {
    JobSettings {
        job_timeout: Duration::from_secs(60),
        completed_ttl: Duration::from_secs(100),
        failed_ttl: Duration::from_secs(10),
        sweep_interval: Duration::from_secs(1),
        ..Default::default()
    }
}

pub fn engine(search: StubSearch) -> DeepResearch {
    DeepResearch::new(
        Arc::new(StubGenerator::default()),
        Arc::new(search),
        research_settings(),
    )
}

pub fn supervisor(search: StubSearch) -> JobSupervisor {
    JobSupervisor::new(Arc::new(engine(search)), job_settings())
}
