use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// 研究进度快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchProgress {
    pub current_depth: usize,
    pub total_depth: usize,
    pub current_breadth: usize,
    pub total_breadth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_query: Option<String>,
    pub total_queries: usize,
    pub completed_queries: usize,
}

impl ResearchProgress {
    /// 根节点的初始进度
    pub fn new(breadth: usize, depth: usize) -> Self {
        Self {
            current_depth: depth,
            total_depth: depth,
            current_breadth: breadth,
            total_breadth: breadth,
            current_query: None,
            total_queries: 0,
            completed_queries: 0,
        }
    }
}

/// 由查询扩展生成的一条子查询
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerpQuery {
    pub query: String,
    #[serde(default)]
    pub research_goal: String,
}

/// 研究结果累加器，两个列表在每次合并时去重
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResult {
    pub learnings: Vec<String>,
    pub visited_urls: Vec<String>,
}

impl ResearchResult {
    pub fn new(
        learnings: impl IntoIterator<Item = String>,
        visited_urls: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            learnings: dedup_in_order(learnings),
            visited_urls: dedup_in_order(visited_urls),
        }
    }

    /// 合并多个分支的结果（集合并集）
    pub fn merge_all(results: impl IntoIterator<Item = ResearchResult>) -> Self {
        let mut learnings = Vec::new();
        let mut visited_urls = Vec::new();
        for result in results {
            learnings.extend(result.learnings);
            visited_urls.extend(result.visited_urls);
        }
        Self::new(learnings, visited_urls)
    }
}

/// 按首次出现顺序去重
pub fn dedup_in_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// 搜索服务返回的单条结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// 抓取到的正文（markdown）
    #[serde(default)]
    pub markdown: Option<String>,
}

/// 一次搜索调用的原始结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<SearchItem>,
}

impl SearchResponse {
    pub fn urls(&self) -> Vec<String> {
        self.data.iter().filter_map(|item| item.url.clone()).collect()
    }
}

/// 从一次搜索结果中提炼出的内容
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerpOutcome {
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
}
