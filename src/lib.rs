//! # Deep Research
//!
//! 自动化的迭代式主题研究引擎
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 客户端层（Clients）
//! - `clients/` - 对外部服务的最薄封装，只暴露能力
//! - `TextGenerator` / `LlmClient` - 结构化生成与纯文本生成
//! - `WebSearch` / `FirecrawlClient` - 网页搜索并抓取正文
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，每个函数只做一件事
//! - `structured_call` - 带重试和 JSON 抢救的结构化调用
//! - `query_expansion` - 子查询与澄清问题生成
//! - `serp_processor` - 搜索结果提炼
//! - `report_writer` - 报告、答案与标题生成
//!
//! ### ③ 编排层（Orchestration）
//! - `orchestrator/deep_research` - 递归扇出控制器
//! - `orchestrator/job_supervisor` - 任务状态机、超时与清理
//!
//! ### 其他
//! - `browser/` - markdown 报告导出为 PDF
//! - `utils/logging` - 日志初始化和按任务归集的日志
//!
//! ## 模块结构

pub mod browser;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use browser::{ChromiumPdfRenderer, PdfRenderer};
pub use clients::{FirecrawlClient, LlmClient, TextGenerator, WebSearch};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{Job, JobStatus, OutputFormat, ResearchProgress, ResearchResult};
pub use orchestrator::{CreateJobRequest, CreatedJob, DeepResearch, JobSupervisor, ResearchRequest};
