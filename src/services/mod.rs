//! 业务能力层
//!
//! 每个模块只负责一种能力，不关心任务状态和并发调度。

pub mod prompts;
pub mod query_expansion;
pub mod report_writer;
pub mod serp_processor;
pub mod structured_call;

pub use query_expansion::{generate_feedback, generate_serp_queries};
pub use report_writer::{generate_report_title, write_final_answer, write_final_report};
pub use serp_processor::{process_serp_result, ExtractOptions};
pub use structured_call::{generate_object_with_retry, generate_typed, salvage_json, DEFAULT_RETRIES};
