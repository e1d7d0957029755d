//! 搜索 API 客户端
//!
//! 调用 Firecrawl `/v1/search`，同时抓取每个结果页面的 markdown 正文

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{SearchOptions, WebSearch};
use crate::config::Config;
use crate::error::SearchError;
use crate::models::{SearchItem, SearchResponse};

/// 搜索客户端
pub struct FirecrawlClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
    /// 毫秒
    timeout: u64,
    scrape_options: ScrapeOptions,
}

#[derive(Serialize)]
struct ScrapeOptions {
    formats: Vec<&'static str>,
}

#[derive(Deserialize)]
struct SearchReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Vec<SearchItem>,
    #[serde(default)]
    error: Option<String>,
}

impl FirecrawlClient {
    /// 创建新的搜索客户端
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.firecrawl_api_key.clone(),
            base_url: config.firecrawl_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/search", self.base_url)
    }
}

#[async_trait]
impl WebSearch for FirecrawlClient {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        debug!("搜索: {} (limit={})", query, options.limit);

        let body = SearchRequest {
            query,
            limit: options.limit,
            timeout: options.timeout.as_millis() as u64,
            scrape_options: ScrapeOptions {
                formats: vec!["markdown"],
            },
        };

        let mut request = self
            .http
            .post(self.endpoint())
            .timeout(options.timeout)
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|source| request_error(query, options, source))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("搜索服务返回错误: {} {}", status, message);
            return Err(SearchError::BadResponse {
                status: status.as_u16(),
                message,
            });
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|source| request_error(query, options, source))?;
        parse_reply(reply, status.as_u16())
    }
}

fn request_error(query: &str, options: &SearchOptions, source: reqwest::Error) -> SearchError {
    if source.is_timeout() {
        SearchError::Timeout {
            query: query.to_string(),
            secs: options.timeout.as_secs(),
        }
    } else {
        SearchError::RequestFailed {
            query: query.to_string(),
            source,
        }
    }
}

fn parse_reply(reply: Value, status: u16) -> Result<SearchResponse, SearchError> {
    let reply: SearchReply = serde_json::from_value(reply).map_err(|e| SearchError::BadResponse {
        status,
        message: format!("无法解析搜索结果: {}", e),
    })?;

    if !reply.success && reply.data.is_empty() {
        return Err(SearchError::BadResponse {
            status,
            message: reply.error.unwrap_or_else(|| "搜索失败".to_string()),
        });
    }

    Ok(SearchResponse { data: reply.data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reply_keeps_items_without_markdown() {
        let reply = json!({
            "success": true,
            "data": [
                { "url": "https://a.example", "title": "A", "markdown": "# A" },
                { "url": "https://b.example", "description": "no content" }
            ]
        });

        let response = parse_reply(reply, 200).unwrap();

        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0].markdown.as_deref(), Some("# A"));
        assert!(response.data[1].markdown.is_none());
    }

    #[test]
    fn test_parse_reply_failure() {
        let reply = json!({ "success": false, "error": "rate limited" });

        let err = parse_reply(reply, 200).unwrap_err();

        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_request_body_shape() {
        let body = SearchRequest {
            query: "rust async",
            limit: 5,
            timeout: 15_000,
            scrape_options: ScrapeOptions {
                formats: vec!["markdown"],
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["scrapeOptions"]["formats"][0], "markdown");
        assert_eq!(json["timeout"], 15_000);
    }
}
