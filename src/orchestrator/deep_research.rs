//! 递归扇出控制器 - 编排层
//!
//! ## 职责
//!
//! 对一个研究主题做"广度 × 深度"的递归研究：
//!
//! 1. **查询扩展**：把当前主题拆成最多 `breadth` 条子查询
//! 2. **并发搜索**：每层使用独立的 Semaphore 限制同时进行的分支数
//! 3. **提炼**：每个分支把搜索正文压缩成研究发现和后续方向
//! 4. **递归**：广度减半（向上取整）、深度减一，直到深度为 0
//! 5. **合并**：所有分支的研究发现和 URL 取并集
//!
//! 单个分支失败（搜索出错、超时、提炼失败）只会让该分支贡献空结果，
//! 不影响兄弟分支。只有根层的查询扩展失败会向上返回错误。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::future::{join_all, BoxFuture, FutureExt};
use tokio::sync::{mpsc, Semaphore};

use crate::clients::{SearchOptions, TextGenerator, WebSearch};
use crate::config::ResearchSettings;
use crate::error::{AppResult, SearchError};
use crate::models::{ResearchProgress, ResearchResult, SerpQuery};
use crate::services::{generate_serp_queries, process_serp_result, ExtractOptions};
use crate::utils::{truncate_text, LogSink};

/// 进度通道发送端
pub type ProgressSender = mpsc::UnboundedSender<ResearchProgress>;

/// 一次研究调用的参数
#[derive(Debug, Clone, Default)]
pub struct ResearchRequest {
    pub query: String,
    pub breadth: usize,
    pub depth: usize,
    /// 从上层继承的研究发现
    pub learnings: Vec<String>,
    /// 从上层继承的已访问 URL
    pub visited_urls: Vec<String>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>, breadth: usize, depth: usize) -> Self {
        Self {
            query: query.into(),
            breadth,
            depth,
            ..Default::default()
        }
    }
}

/// 整棵研究树共享的进度状态
///
/// 所有层级共用同一个计数器，`completed_queries` 因此单调递增。
struct ProgressTracker {
    state: Mutex<ResearchProgress>,
    sender: Option<ProgressSender>,
}

impl ProgressTracker {
    fn new(initial: ResearchProgress, sender: Option<ProgressSender>) -> Self {
        Self {
            state: Mutex::new(initial),
            sender,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResearchProgress> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 修改进度并推送一份快照
    fn update(&self, apply: impl FnOnce(&mut ResearchProgress)) {
        let snapshot = {
            let mut state = self.lock();
            apply(&mut state);
            state.clone()
        };
        if let Some(sender) = &self.sender {
            // 接收端已关闭说明没人关心进度
            let _ = sender.send(snapshot);
        }
    }
}

/// 深度研究引擎
pub struct DeepResearch {
    llm: Arc<dyn TextGenerator>,
    search: Arc<dyn WebSearch>,
    settings: ResearchSettings,
}

impl DeepResearch {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        search: Arc<dyn WebSearch>,
        settings: ResearchSettings,
    ) -> Self {
        Self {
            llm,
            search,
            settings,
        }
    }

    pub fn llm(&self) -> &Arc<dyn TextGenerator> {
        &self.llm
    }

    /// 执行递归研究
    ///
    /// # 参数
    /// - `request`: 主题、广度、深度以及继承的累加结果
    /// - `log`: 日志句柄，任务模式下绑定到任务 ID
    /// - `progress`: 可选的进度通道，每次进度变化都会收到一份快照
    ///
    /// # 返回
    /// 去重后的研究发现和已访问 URL
    pub async fn run(
        &self,
        request: ResearchRequest,
        log: &LogSink,
        progress: Option<ProgressSender>,
    ) -> AppResult<ResearchResult> {
        log.info(format!(
            "开始研究: {} (breadth={}, depth={})",
            truncate_text(&request.query, 80),
            request.breadth,
            request.depth
        ));

        let tracker = ProgressTracker::new(
            ResearchProgress::new(request.breadth, request.depth),
            progress,
        );
        let result = self.research_level(request, log, &tracker).await?;

        log.info(format!(
            "研究完成: {} 条研究发现, {} 个来源",
            result.learnings.len(),
            result.visited_urls.len()
        ));
        Ok(result)
    }

    /// 研究一层：扩展查询，并发执行各分支，合并结果
    fn research_level<'a>(
        &'a self,
        request: ResearchRequest,
        log: &'a LogSink,
        tracker: &'a ProgressTracker,
    ) -> BoxFuture<'a, AppResult<ResearchResult>> {
        async move {
            if request.depth == 0 || request.breadth == 0 {
                return Ok(ResearchResult::new(request.learnings, request.visited_urls));
            }

            let serp_queries = generate_serp_queries(
                self.llm.as_ref(),
                log,
                &request.query,
                Some(request.learnings.as_slice()),
                request.breadth,
            )
            .await?;

            tracker.update(|p| {
                p.total_queries += serp_queries.len();
                p.current_query = serp_queries.first().map(|q| q.query.clone());
            });

            if serp_queries.is_empty() {
                log.warn("没有生成任何子查询，返回已有结果");
                return Ok(ResearchResult::new(request.learnings, request.visited_urls));
            }

            // 每层独立的并发池，分支在递归期间一直持有许可
            let semaphore = Semaphore::new(self.settings.concurrency_limit.max(1));
            let request = &request;
            let semaphore = &semaphore;

            let branches = serp_queries.iter().map(|serp_query| async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return ResearchResult::default(),
                };

                match self.run_branch(serp_query, request, log, tracker).await {
                    Ok(result) => result,
                    Err(e) if e.is_timeout() => {
                        log.warn(format!("查询超时: {}: {}", serp_query.query, e));
                        ResearchResult::default()
                    }
                    Err(e) => {
                        log.warn(format!("查询出错: {}: {}", serp_query.query, e));
                        ResearchResult::default()
                    }
                }
            });

            let results = join_all(branches).await;
            Ok(ResearchResult::merge_all(results))
        }
        .boxed()
    }

    /// 单个分支：搜索 → 提炼 → 递归或收尾
    async fn run_branch(
        &self,
        serp_query: &SerpQuery,
        parent: &ResearchRequest,
        log: &LogSink,
        tracker: &ProgressTracker,
    ) -> AppResult<ResearchResult> {
        let options = SearchOptions {
            timeout: self.settings.search_timeout,
            limit: self.settings.search_result_limit,
        };

        let started = Instant::now();
        let response = tokio::time::timeout(
            options.timeout,
            self.search.search(&serp_query.query, &options),
        )
        .await
        .map_err(|_| SearchError::Timeout {
            query: serp_query.query.clone(),
            secs: options.timeout.as_secs(),
        })??;

        log.info(format!(
            "搜索 {} 完成，耗时 {}ms，返回 {} 条结果",
            truncate_text(&serp_query.query, 60),
            started.elapsed().as_millis(),
            response.data.len()
        ));

        let new_breadth = parent.breadth.div_ceil(2);
        let new_depth = parent.depth - 1;

        let outcome = process_serp_result(
            self.llm.as_ref(),
            log,
            &serp_query.query,
            &response,
            &ExtractOptions::from_settings(&self.settings, new_breadth),
        )
        .await?;

        let accumulated = ResearchResult::new(
            parent.learnings.iter().cloned().chain(outcome.learnings),
            parent.visited_urls.iter().cloned().chain(response.urls()),
        );

        if new_depth == 0 {
            tracker.update(|p| {
                p.current_depth = 0;
                p.completed_queries += 1;
                p.current_query = Some(serp_query.query.clone());
            });
            return Ok(accumulated);
        }

        log.info(format!(
            "继续深入研究, breadth: {}, depth: {}",
            new_breadth, new_depth
        ));
        tracker.update(|p| {
            p.current_depth = new_depth;
            p.current_breadth = new_breadth;
            p.completed_queries += 1;
            p.current_query = Some(serp_query.query.clone());
        });

        let next_query = format!(
            "Previous research goal: {}\nFollow-up research directions: {}",
            serp_query.research_goal,
            outcome
                .follow_up_questions
                .iter()
                .map(|q| format!("\n{}", q))
                .collect::<String>()
        );

        self.research_level(
            ResearchRequest {
                query: next_query,
                breadth: new_breadth,
                depth: new_depth,
                learnings: accumulated.learnings,
                visited_urls: accumulated.visited_urls,
            },
            log,
            tracker,
        )
        .await
    }
}
