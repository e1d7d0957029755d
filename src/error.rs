use thiserror::Error;

use crate::models::JobStatus;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 缺少必要参数（例如没有 query），任务不会被创建
    #[error("参数校验失败: {0}")]
    Validation(String),

    /// 任务不存在
    #[error("任务不存在: {job_id}")]
    NotFound { job_id: String },

    /// 当前任务状态不允许该操作
    #[error("任务 {job_id} 当前状态为 {status}，不允许该操作")]
    InvalidState { job_id: String, status: JobStatus },

    /// LLM 服务错误
    #[error("LLM错误: {0}")]
    Llm(#[from] LlmError),

    /// 搜索服务错误
    #[error("搜索错误: {0}")]
    Search(#[from] SearchError),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 任务整体超时
    #[error("任务 {job_id} 超时 (超过 {secs} 秒)")]
    Timeout { job_id: String, secs: u64 },

    /// PDF 渲染失败
    #[error("PDF渲染失败: {0}")]
    Render(String),

    /// 任务内部未预期的错误（panic、被取消等）
    #[error("内部错误: {0}")]
    Internal(String),
}

/// LLM 服务错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {source}")]
    ApiCallFailed {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },

    /// 返回内容无法解析为期望的 JSON 结构，`raw` 保留原始文本用于抢救解析
    #[error("LLM返回内容无法解析: {source}")]
    InvalidOutput {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    /// 单次调用超时
    #[error("LLM调用超时 ({secs} 秒)")]
    Timeout { secs: u64 },

    /// 所有重试和抢救解析均失败
    #[error("结构化生成失败，已尝试 {attempts} 次: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<LlmError>,
    },
}

impl LlmError {
    /// 出错时模型实际返回的文本（如果有）
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            LlmError::InvalidOutput { raw, .. } => Some(raw),
            LlmError::Exhausted { last, .. } => last.raw_text(),
            _ => None,
        }
    }

    /// 是否由超时导致（包括重试耗尽时最后一次为超时）
    pub fn is_timeout(&self) -> bool {
        match self {
            LlmError::Timeout { .. } => true,
            LlmError::Exhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    /// 创建 LLM API 调用错误
    pub fn api_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        LlmError::ApiCallFailed {
            model: model.into(),
            source: Box::new(source),
        }
    }
}

/// 搜索服务错误
#[derive(Debug, Error)]
pub enum SearchError {
    /// 网络请求失败
    #[error("搜索请求失败 ({query}): {source}")]
    RequestFailed {
        query: String,
        #[source]
        source: reqwest::Error,
    },

    /// 搜索服务返回错误响应
    #[error("搜索服务返回错误响应: status={status}, message={message}")]
    BadResponse { status: u16, message: String },

    /// 搜索超时
    #[error("Timeout: 搜索 {query} 超过 {secs} 秒")]
    Timeout { query: String, secs: u64 },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl AppError {
    /// 创建参数校验错误
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    /// 创建任务不存在错误
    pub fn not_found(job_id: impl Into<String>) -> Self {
        AppError::NotFound {
            job_id: job_id.into(),
        }
    }

    /// 是否为超时类错误（搜索超时、LLM 超时或任务超时）
    pub fn is_timeout(&self) -> bool {
        match self {
            AppError::Timeout { .. } | AppError::Search(SearchError::Timeout { .. }) => true,
            AppError::Llm(err) => err.is_timeout(),
            _ => false,
        }
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
