use std::fmt;

use phf::phf_map;
use serde::{Deserialize, Serialize};

use super::research::{ResearchProgress, ResearchResult};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// 等待用户回答澄清问题
    AwaitingAnswers,
    /// 研究进行中
    Pending,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::AwaitingAnswers => "awaiting-answers",
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// 长篇 markdown 报告
    Report,
    /// 简短答案
    Answer,
    /// markdown 报告 + PDF 导出
    #[default]
    Pdf,
}

static OUTPUT_FORMATS: phf::Map<&'static str, OutputFormat> = phf_map! {
    "report" => OutputFormat::Report,
    "md" => OutputFormat::Report,
    "markdown" => OutputFormat::Report,
    "answer" => OutputFormat::Answer,
    "pdf" => OutputFormat::Pdf,
};

impl OutputFormat {
    /// 解析用户输入，空值或无法识别时使用 PDF
    pub fn parse(input: &str) -> Self {
        let key = input.trim().to_lowercase();
        OUTPUT_FORMATS.get(key.as_str()).copied().unwrap_or(OutputFormat::Pdf)
    }

    /// 是否需要生成完整报告
    pub fn is_report(self) -> bool {
        !matches!(self, OutputFormat::Answer)
    }
}

/// 研究任务记录
///
/// 状态只由任务管理器修改；研究引擎只通过进度通道写 `progress`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub query: String,
    pub breadth: usize,
    pub depth: usize,
    pub output_format: OutputFormat,
    pub follow_up_questions: Vec<String>,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ResearchProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 只在快照中填充，任务记录本身不保存日志
    #[serde(default)]
    pub logs: Vec<String>,
    pub created_at: String,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        query: impl Into<String>,
        breadth: usize,
        depth: usize,
        output_format: OutputFormat,
        follow_up_questions: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::AwaitingAnswers,
            query: query.into(),
            breadth,
            depth,
            output_format,
            follow_up_questions,
            answers: Vec::new(),
            progress: None,
            result: None,
            report: None,
            report_title: None,
            error: None,
            logs: Vec::new(),
            created_at: chrono::Local::now().to_rfc3339(),
        }
    }
}

/// 将原始问题和澄清问答拼接成一次研究使用的查询
///
/// 缺失的回答按空字符串处理。
pub fn combine_query(query: &str, questions: &[String], answers: &[String]) -> String {
    let qa = questions
        .iter()
        .enumerate()
        .map(|(i, question)| {
            let answer = answers.get(i).map(String::as_str).unwrap_or("");
            format!("Q: {}\nA: {}", question, answer)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Initial Query: {}\nFollow-up Questions and Answers:\n{}\n",
        query, qa
    )
}
