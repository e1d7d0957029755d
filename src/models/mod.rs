//! 数据模型
//!
//! 纯数据结构，不包含任何 IO

pub mod job;
pub mod research;

pub use job::{combine_query, Job, JobStatus, OutputFormat};
pub use research::{
    dedup_in_order, ResearchProgress, ResearchResult, SearchItem, SearchResponse, SerpOutcome,
    SerpQuery,
};
