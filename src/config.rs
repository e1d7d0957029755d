use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::browser::ChromiumPdfRenderer;
use crate::error::ConfigError;

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    // --- 搜索服务配置 ---
    pub firecrawl_api_key: String,
    pub firecrawl_base_url: String,
    /// 同时进行的搜索数量（搜索服务有频率限制）
    pub concurrency_limit: usize,
    pub search_timeout_secs: u64,
    pub search_result_limit: usize,
    /// 单次内容提炼调用的超时
    pub extract_timeout_secs: u64,
    /// 每条搜索内容保留的最大字符数
    pub content_char_limit: usize,
    /// 报告每一节包含的 learning 数量
    pub report_chunk_size: usize,
    // --- 任务配置 ---
    pub default_breadth: usize,
    pub default_depth: usize,
    pub job_timeout_secs: u64,
    pub completed_job_ttl_secs: u64,
    pub failed_job_ttl_secs: u64,
    pub job_sweep_interval_ms: u64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 报告输出目录
    pub output_dir: String,
    /// 导出 PDF 使用的浏览器，为空时自动查找
    pub chrome_executable: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            firecrawl_api_key: String::new(),
            firecrawl_base_url: "https://api.firecrawl.dev".to_string(),
            concurrency_limit: 2,
            search_timeout_secs: 15,
            search_result_limit: 5,
            extract_timeout_secs: 60,
            content_char_limit: 25_000,
            report_chunk_size: 20,
            default_breadth: 3,
            default_depth: 3,
            job_timeout_secs: 30 * 60,
            completed_job_ttl_secs: 60 * 60,
            failed_job_ttl_secs: 10 * 60,
            job_sweep_interval_ms: 1000,
            verbose_logging: false,
            output_dir: ".".to_string(),
            chrome_executable: String::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 读取 TOML 配置文件，再用环境变量覆盖
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config.with_env_overrides())
    }

    /// 设置了 `DEEP_RESEARCH_CONFIG` 时从该文件加载，否则只读环境变量
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var("DEEP_RESEARCH_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_toml_file(path.trim()),
            _ => Ok(Self::from_env()),
        }
    }

    fn with_env_overrides(self) -> Self {
        Self {
            llm_api_key: env_string("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: env_string("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: env_string("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            firecrawl_api_key: env_string("FIRECRAWL_KEY").unwrap_or(self.firecrawl_api_key),
            firecrawl_base_url: env_string("FIRECRAWL_BASE_URL").unwrap_or(self.firecrawl_base_url),
            concurrency_limit: env_parse("FIRECRAWL_CONCURRENCY").unwrap_or(self.concurrency_limit),
            search_timeout_secs: env_parse("SEARCH_TIMEOUT_SECS").unwrap_or(self.search_timeout_secs),
            search_result_limit: env_parse("SEARCH_RESULT_LIMIT").unwrap_or(self.search_result_limit),
            extract_timeout_secs: env_parse("EXTRACT_TIMEOUT_SECS").unwrap_or(self.extract_timeout_secs),
            content_char_limit: env_parse("CONTENT_CHAR_LIMIT").unwrap_or(self.content_char_limit),
            report_chunk_size: env_parse("REPORT_CHUNK_SIZE").unwrap_or(self.report_chunk_size),
            default_breadth: env_parse("DEFAULT_BREADTH").unwrap_or(self.default_breadth),
            default_depth: env_parse("DEFAULT_DEPTH").unwrap_or(self.default_depth),
            job_timeout_secs: env_parse("JOB_TIMEOUT_SECS").unwrap_or(self.job_timeout_secs),
            completed_job_ttl_secs: env_parse("COMPLETED_JOB_TTL_SECS").unwrap_or(self.completed_job_ttl_secs),
            failed_job_ttl_secs: env_parse("FAILED_JOB_TTL_SECS").unwrap_or(self.failed_job_ttl_secs),
            job_sweep_interval_ms: env_parse("JOB_SWEEP_INTERVAL_MS").unwrap_or(self.job_sweep_interval_ms),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
            output_dir: env_string("OUTPUT_DIR").unwrap_or(self.output_dir),
            chrome_executable: env_string("CHROME_EXECUTABLE").unwrap_or(self.chrome_executable),
        }
    }

    /// 研究引擎参数
    pub fn research_settings(&self) -> ResearchSettings {
        ResearchSettings {
            // 0 会导致信号量永远拿不到许可
            concurrency_limit: self.concurrency_limit.max(1),
            search_timeout: Duration::from_secs(self.search_timeout_secs),
            search_result_limit: self.search_result_limit,
            extract_timeout: Duration::from_secs(self.extract_timeout_secs),
            content_char_limit: self.content_char_limit,
        }
    }

    /// PDF 渲染器
    pub fn pdf_renderer(&self) -> ChromiumPdfRenderer {
        let renderer = ChromiumPdfRenderer::new();
        match self.chrome_executable.trim() {
            "" => renderer,
            path => renderer.with_executable(path),
        }
    }

    /// 任务管理参数
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            default_breadth: self.default_breadth,
            default_depth: self.default_depth,
            report_chunk_size: self.report_chunk_size.max(1),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            completed_ttl: Duration::from_secs(self.completed_job_ttl_secs),
            failed_ttl: Duration::from_secs(self.failed_job_ttl_secs),
            sweep_interval: Duration::from_millis(self.job_sweep_interval_ms.max(1)),
        }
    }
}

/// 研究引擎（Fan-Out Controller）使用的参数
#[derive(Clone, Debug)]
pub struct ResearchSettings {
    pub concurrency_limit: usize,
    pub search_timeout: Duration,
    pub search_result_limit: usize,
    pub extract_timeout: Duration,
    pub content_char_limit: usize,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Config::default().research_settings()
    }
}

/// 任务管理器（Job Supervisor）使用的参数
#[derive(Clone, Debug)]
pub struct JobSettings {
    pub default_breadth: usize,
    pub default_depth: usize,
    pub report_chunk_size: usize,
    pub job_timeout: Duration,
    pub completed_ttl: Duration,
    pub failed_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Config::default().job_settings()
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
