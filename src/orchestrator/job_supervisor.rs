//! 任务管理器 - 编排层
//!
//! ## 职责
//!
//! 把一次耗时数分钟的递归研究包装成可轮询的异步任务：
//!
//! - `create_job`：生成澄清问题，任务进入 `awaiting-answers`
//! - `submit_answers`：拼接问答，任务进入 `pending` 并在后台启动研究
//! - 完成 / 失败：写入报告或错误信息，安排过期删除
//! - `sweep`：由单个周期性协调器调用，处理超时与过期删除
//!
//! 所有状态转换都在持有任务表锁的情况下完成，终态之后不会再被改写。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::deep_research::{DeepResearch, ProgressSender, ResearchRequest};
use crate::browser::PdfRenderer;
use crate::config::JobSettings;
use crate::error::{AppError, AppResult};
use crate::models::{combine_query, Job, JobStatus, OutputFormat, ResearchProgress, ResearchResult};
use crate::services::{generate_feedback, generate_report_title, write_final_answer, write_final_report};
use crate::utils::{JobLogStore, LogSink};

/// 创建时生成的澄清问题数量
const FEEDBACK_QUESTIONS: usize = 3;

/// 创建任务的请求
#[derive(Debug, Clone, Default)]
pub struct CreateJobRequest {
    pub query: Option<String>,
    pub breadth: Option<usize>,
    pub depth: Option<usize>,
    pub output_format: Option<String>,
}

/// 创建任务的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedJob {
    pub job_id: String,
    pub questions: Vec<String>,
}

/// 研究成功后的产出
struct Deliverable {
    result: ResearchResult,
    report: String,
    title: Option<String>,
}

struct JobEntry {
    job: Job,
    /// 仅在 pending 期间存在
    deadline: Option<Instant>,
    /// 进入终态后设置
    expires_at: Option<Instant>,
    abort: Option<AbortHandle>,
}

struct Inner {
    jobs: Mutex<HashMap<String, JobEntry>>,
    research: Arc<DeepResearch>,
    settings: JobSettings,
    logs: JobLogStore,
}

/// 任务管理器，可以廉价 clone 并在多个任务间共享
#[derive(Clone)]
pub struct JobSupervisor {
    inner: Arc<Inner>,
}

impl JobSupervisor {
    pub fn new(research: Arc<DeepResearch>, settings: JobSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                research,
                settings,
                logs: JobLogStore::new(),
            }),
        }
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 创建任务并生成澄清问题
    ///
    /// 缺少 query 时返回 `AppError::Validation`，不会创建任何任务。
    pub async fn create_job(&self, request: CreateJobRequest) -> AppResult<CreatedJob> {
        let query = request
            .query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| AppError::validation("缺少 query"))?;

        let settings = &self.inner.settings;
        let breadth = request.breadth.unwrap_or(settings.default_breadth);
        let depth = request.depth.unwrap_or(settings.default_depth);
        let output_format = request
            .output_format
            .as_deref()
            .map(OutputFormat::parse)
            .unwrap_or_default();

        let job_id = uuid::Uuid::new_v4().to_string();
        let log = self.inner.logs.sink(job_id.clone());
        log.info(format!(
            "创建任务: breadth={}, depth={}, 输出格式={:?}",
            breadth, depth, output_format
        ));

        let questions = match generate_feedback(
            self.inner.research.llm().as_ref(),
            &log,
            &query,
            FEEDBACK_QUESTIONS,
        )
        .await
        {
            Ok(questions) => questions,
            Err(e) => {
                self.inner.logs.remove(&job_id);
                return Err(e.into());
            }
        };

        let job = Job::new(
            job_id.clone(),
            query,
            breadth,
            depth,
            output_format,
            questions.clone(),
        );
        self.lock_jobs().insert(
            job_id.clone(),
            JobEntry {
                job,
                deadline: None,
                expires_at: None,
                abort: None,
            },
        );

        Ok(CreatedJob { job_id, questions })
    }

    /// 提交澄清问题的答案并在后台启动研究
    ///
    /// 任务不存在返回 `NotFound`；任务不在 `awaiting-answers` 返回 `InvalidState`，
    /// 且不修改任务的任何字段。
    pub fn submit_answers(&self, job_id: &str, answers: Vec<String>) -> AppResult<()> {
        let mut jobs = self.lock_jobs();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::not_found(job_id))?;

        if entry.job.status != JobStatus::AwaitingAnswers {
            return Err(AppError::InvalidState {
                job_id: job_id.to_string(),
                status: entry.job.status,
            });
        }

        let combined = combine_query(&entry.job.query, &entry.job.follow_up_questions, &answers);
        let request = ResearchRequest::new(combined, entry.job.breadth, entry.job.depth);
        let output_format = entry.job.output_format;

        entry.job.answers = answers;
        entry.job.status = JobStatus::Pending;
        entry.deadline = Some(Instant::now() + self.inner.settings.job_timeout);

        let worker = tokio::spawn(self.clone().execute(
            job_id.to_string(),
            request,
            output_format,
        ));
        entry.abort = Some(worker.abort_handle());
        drop(jobs);

        self.watch(job_id.to_string(), worker);
        self.inner.logs.sink(job_id).info("已收到答案，研究任务开始");
        Ok(())
    }

    /// 监视研究任务，任务 panic 时标记为失败
    fn watch(&self, job_id: String, worker: JoinHandle<()>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                if e.is_panic() {
                    supervisor.finish(
                        &job_id,
                        Err(AppError::Internal(format!("研究任务崩溃: {}", e))),
                    );
                } else {
                    debug!("研究任务 {} 已被取消", job_id);
                }
            }
        });
    }

    /// 后台研究任务主体
    async fn execute(self, job_id: String, request: ResearchRequest, output_format: OutputFormat) {
        let log = self.inner.logs.sink(job_id.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let forward = async {
            while let Some(progress) = rx.recv().await {
                self.update_progress(&job_id, progress);
            }
        };
        let (outcome, ()) = tokio::join!(self.produce(request, output_format, &log, tx), forward);

        match &outcome {
            Ok(_) => log.info("研究任务完成"),
            Err(e) => log.warn(format!("研究任务失败: {}", e)),
        }
        self.finish(&job_id, outcome);
    }

    async fn produce(
        &self,
        request: ResearchRequest,
        output_format: OutputFormat,
        log: &LogSink,
        progress: ProgressSender,
    ) -> AppResult<Deliverable> {
        let prompt = request.query.clone();
        let result = self.inner.research.run(request, log, Some(progress)).await?;
        let llm = self.inner.research.llm().as_ref();

        if !output_format.is_report() {
            log.info("正在生成最终答案");
            let answer = write_final_answer(llm, log, &prompt, &result.learnings).await?;
            return Ok(Deliverable {
                result,
                report: answer,
                title: None,
            });
        }

        log.info("正在生成最终报告");
        let report = write_final_report(
            llm,
            log,
            &prompt,
            &result.learnings,
            &result.visited_urls,
            self.inner.settings.report_chunk_size,
        )
        .await?;

        let title = if output_format == OutputFormat::Pdf {
            match generate_report_title(llm, &prompt, &result.learnings).await {
                Ok(title) if !title.is_empty() => Some(title),
                Ok(_) => None,
                Err(e) => {
                    log.warn(format!("生成报告标题失败: {}", e));
                    None
                }
            }
        } else {
            None
        };

        Ok(Deliverable {
            result,
            report,
            title,
        })
    }

    fn update_progress(&self, job_id: &str, progress: ResearchProgress) {
        let mut jobs = self.lock_jobs();
        if let Some(entry) = jobs.get_mut(job_id) {
            if entry.job.status == JobStatus::Pending {
                entry.job.progress = Some(progress);
            }
        }
    }

    /// 写入终态，只对仍在 pending 的任务生效
    fn finish(&self, job_id: &str, outcome: AppResult<Deliverable>) {
        let mut jobs = self.lock_jobs();
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        if entry.job.status != JobStatus::Pending {
            return;
        }

        let now = Instant::now();
        match outcome {
            Ok(deliverable) => {
                entry.job.status = JobStatus::Completed;
                entry.job.result = Some(deliverable.result);
                entry.job.report = Some(deliverable.report);
                entry.job.report_title = deliverable.title;
                entry.expires_at = Some(now + self.inner.settings.completed_ttl);
            }
            Err(e) => {
                entry.job.status = JobStatus::Error;
                entry.job.error = Some(e.to_string());
                entry.expires_at = Some(now + self.inner.settings.failed_ttl);
            }
        }
        entry.deadline = None;
        entry.abort = None;
    }

    /// 查询任务快照（包含已采集的日志）
    pub fn get_job(&self, job_id: &str) -> AppResult<Job> {
        let mut job = self
            .lock_jobs()
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| AppError::not_found(job_id))?;
        job.logs = self.inner.logs.lines(job_id);
        Ok(job)
    }

    /// 查询任务日志
    pub fn get_logs(&self, job_id: &str) -> AppResult<Vec<String>> {
        if !self.lock_jobs().contains_key(job_id) {
            return Err(AppError::not_found(job_id));
        }
        Ok(self.inner.logs.lines(job_id))
    }

    /// 当前内存中的任务数
    pub fn job_count(&self) -> usize {
        self.lock_jobs().len()
    }

    /// 清空所有任务，仍在运行的研究会被取消
    pub fn delete_all(&self) -> usize {
        let removed: Vec<JobEntry> = self.lock_jobs().drain().map(|(_, entry)| entry).collect();
        for entry in &removed {
            if let Some(abort) = &entry.abort {
                abort.abort();
            }
        }
        self.inner.logs.clear();
        info!("已清空 {} 个任务", removed.len());
        removed.len()
    }

    /// 把已完成任务的报告导出为 PDF
    pub async fn render_pdf(&self, job_id: &str, renderer: &dyn PdfRenderer) -> AppResult<Vec<u8>> {
        let (report, title) = {
            let jobs = self.lock_jobs();
            let entry = jobs.get(job_id).ok_or_else(|| AppError::not_found(job_id))?;
            let job = &entry.job;
            match (&job.status, &job.report) {
                (JobStatus::Completed, Some(report)) if job.output_format.is_report() => (
                    report.clone(),
                    job.report_title
                        .clone()
                        .unwrap_or_else(|| "Research Report".to_string()),
                ),
                _ => {
                    return Err(AppError::InvalidState {
                        job_id: job_id.to_string(),
                        status: job.status,
                    })
                }
            }
        };

        let log = self.inner.logs.sink(job_id);
        log.info("正在导出 PDF");
        let bytes = renderer.render(&report, &title).await?;
        log.info(format!("PDF 导出完成，{} 字节", bytes.len()));
        Ok(bytes)
    }

    /// 协调一次：处理超时任务，删除已过期的任务
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let settings = &self.inner.settings;
        let mut timed_out = Vec::new();
        let mut expired = Vec::new();

        {
            let mut jobs = self.lock_jobs();
            for (job_id, entry) in jobs.iter_mut() {
                let overdue = entry.job.status == JobStatus::Pending
                    && entry.deadline.is_some_and(|deadline| now >= deadline);
                if overdue {
                    if let Some(abort) = entry.abort.take() {
                        abort.abort();
                    }
                    entry.job.status = JobStatus::Error;
                    entry.job.error = Some(
                        AppError::Timeout {
                            job_id: job_id.clone(),
                            secs: settings.job_timeout.as_secs(),
                        }
                        .to_string(),
                    );
                    entry.deadline = None;
                    entry.expires_at = Some(now + settings.failed_ttl);
                    timed_out.push(job_id.clone());
                }

                if entry.expires_at.is_some_and(|at| now >= at) {
                    expired.push(job_id.clone());
                }
            }
            for job_id in &expired {
                jobs.remove(job_id);
            }
        }

        for job_id in &timed_out {
            self.inner
                .logs
                .sink(job_id.as_str())
                .warn(format!("任务超时 (超过 {} 秒)，已取消", settings.job_timeout.as_secs()));
        }
        for job_id in &expired {
            self.inner.logs.remove(job_id);
            debug!("任务 {} 已过期并被删除", job_id);
        }
    }

    /// 启动周期性协调器
    pub fn spawn_reconciler(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        let period = self.inner.settings.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                supervisor.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ObjectRequest, SearchOptions, TextGenerator, WebSearch};
    use crate::config::ResearchSettings;
    use crate::error::{LlmError, SearchError};
    use crate::models::{SearchItem, SearchResponse};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct StubGenerator;

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate_object(&self, request: &ObjectRequest) -> Result<Value, LlmError> {
            Ok(match request.schema_name {
                "feedback" => json!({ "questions": ["Which region?"] }),
                "serp_queries" => json!({ "queries": [{ "query": "q", "researchGoal": "g" }] }),
                "serp_result" => json!({ "learnings": ["fact"], "followUpQuestions": [] }),
                "final_answer" => json!({ "exactAnswer": "42" }),
                _ => json!({ "reportMarkdown": "# Report" }),
            })
        }

        async fn generate_text(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok("Title".to_string())
        }
    }

    /// 可选择永远挂起的搜索桩
    struct StubSearch {
        hang: bool,
    }

    #[async_trait]
    impl WebSearch for StubSearch {
        async fn search(
            &self,
            query: &str,
            _options: &SearchOptions,
        ) -> Result<SearchResponse, SearchError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(SearchResponse {
                data: vec![SearchItem {
                    url: Some(format!("https://{}.example", query)),
                    markdown: Some("text".to_string()),
                    ..Default::default()
                }],
            })
        }
    }

    fn supervisor(hang: bool) -> JobSupervisor {
        let research = DeepResearch::new(
            Arc::new(StubGenerator),
            Arc::new(StubSearch { hang }),
            ResearchSettings {
                search_timeout: Duration::from_secs(3600),
                ..Default::default()
            },
        );
        JobSupervisor::new(
            Arc::new(research),
            JobSettings {
                job_timeout: Duration::from_secs(60),
                completed_ttl: Duration::from_secs(100),
                failed_ttl: Duration::from_secs(10),
                ..Default::default()
            },
        )
    }

    fn request(format: &str) -> CreateJobRequest {
        CreateJobRequest {
            query: Some("topic".to_string()),
            breadth: Some(1),
            depth: Some(1),
            output_format: Some(format.to_string()),
        }
    }

    async fn wait_for_terminal(supervisor: &JobSupervisor, job_id: &str) -> Job {
        for _ in 0..1000 {
            let job = supervisor.get_job(job_id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("任务没有结束");
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_format_completes_with_answer() {
        let supervisor = supervisor(false);
        let created = supervisor.create_job(request("answer")).await.unwrap();
        assert_eq!(created.questions, vec!["Which region?"]);

        supervisor
            .submit_answers(&created.job_id, vec!["EU".to_string()])
            .unwrap();
        let job = wait_for_terminal(&supervisor, &created.job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.report.as_deref(), Some("42"));
        assert!(job.report_title.is_none());
        assert_eq!(job.result.unwrap().visited_urls, vec!["https://q.example"]);
        assert!(job.logs.iter().any(|line| line.contains("研究任务完成")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pdf_format_attaches_title_and_renders() {
        struct FakeRenderer;

        #[async_trait]
        impl PdfRenderer for FakeRenderer {
            async fn render(&self, markdown: &str, title: &str) -> AppResult<Vec<u8>> {
                Ok(format!("{}|{}", title, markdown).into_bytes())
            }
        }

        let supervisor = supervisor(false);
        let created = supervisor.create_job(request("pdf")).await.unwrap();
        assert!(matches!(
            supervisor.render_pdf(&created.job_id, &FakeRenderer).await,
            Err(AppError::InvalidState { .. })
        ));

        supervisor.submit_answers(&created.job_id, vec![]).unwrap();
        let job = wait_for_terminal(&supervisor, &created.job_id).await;
        assert_eq!(job.report_title.as_deref(), Some("Title"));

        let bytes = supervisor
            .render_pdf(&created.job_id, &FakeRenderer)
            .await
            .unwrap();
        assert!(String::from_utf8(bytes).unwrap().starts_with("Title|# Report"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_error_and_expires() {
        let supervisor = supervisor(true);
        let created = supervisor.create_job(request("report")).await.unwrap();
        supervisor.submit_answers(&created.job_id, vec![]).unwrap();

        let start = Instant::now();
        supervisor.sweep_at(start + Duration::from_secs(59));
        assert_eq!(supervisor.get_job(&created.job_id).unwrap().status, JobStatus::Pending);

        supervisor.sweep_at(start + Duration::from_secs(61));
        let job = supervisor.get_job(&created.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.unwrap().contains("超时"));

        supervisor.sweep_at(start + Duration::from_secs(72));
        assert!(matches!(
            supervisor.get_job(&created.job_id),
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_all_clears_jobs_and_logs() {
        let supervisor = supervisor(false);
        let created = supervisor.create_job(request("report")).await.unwrap();
        assert_eq!(supervisor.job_count(), 1);

        assert_eq!(supervisor.delete_all(), 1);
        assert_eq!(supervisor.job_count(), 0);
        assert!(supervisor.get_logs(&created.job_id).is_err());
    }
}
