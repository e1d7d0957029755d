//! 外部服务客户端
//!
//! 研究引擎只依赖这里定义的两个窄接口，测试中可以用桩实现替换。

pub mod firecrawl_client;
pub mod llm_client;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{LlmError, SearchError};
use crate::models::SearchResponse;

pub use firecrawl_client::FirecrawlClient;
pub use llm_client::LlmClient;

/// 一次结构化生成请求
#[derive(Debug, Clone)]
pub struct ObjectRequest {
    /// schema 名称，同时用于日志
    pub schema_name: &'static str,
    pub system: String,
    pub prompt: String,
    /// JSON Schema
    pub schema: Value,
    /// 单次调用超时，`None` 表示不限制
    pub timeout: Option<Duration>,
}

/// 文本生成服务
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// 按 schema 生成 JSON 对象
    async fn generate_object(&self, request: &ObjectRequest) -> Result<Value, LlmError>;

    /// 生成纯文本
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError>;
}

/// 搜索参数
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub timeout: Duration,
    pub limit: usize,
}

/// 网页搜索服务
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse, SearchError>;
}
