//! 编排层 (Orchestration Layer)
//!
//! ## 职责
//!
//! 本层负责"研究树"和"任务"两个层面的编排：
//!
//! - **deep_research**: 递归扇出控制器，按广度和深度展开研究树，
//!   每层用 Semaphore 控制并发，合并所有分支的研究发现
//! - **job_supervisor**: 任务管理器，持有任务表，负责状态转换、超时和过期删除
//!
//! ## 层次关系
//!
//! ```text
//! job_supervisor (管理任务生命周期)
//!     ↓ 调用
//! deep_research (递归研究一个主题)
//!     ↓ 调用
//! services (查询扩展 / 搜索结果提炼 / 报告生成)
//! ```

pub mod deep_research;
pub mod job_supervisor;

// 重新导出主要类型
pub use deep_research::{DeepResearch, ProgressSender, ResearchRequest};
pub use job_supervisor::{CreateJobRequest, CreatedJob, JobSupervisor};
