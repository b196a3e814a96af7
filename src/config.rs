//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SLIDESMITH__*` 覆盖（双下划线表示嵌套，如 `SLIDESMITH__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub generation: GenerationSection,
}

/// [app] 段：应用名、任务目录、提示词目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 任务根目录，每个任务一个 task_<id>/ 子目录
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,
    /// 可选：覆盖内置角色指令（collector.md / architect.md / designer.md）
    pub prompts_dir: Option<PathBuf>,
}

fn default_tasks_dir() -> PathBuf {
    PathBuf::from("tasks")
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            tasks_dir: default_tasks_dir(),
            prompts_dir: None,
        }
    }
}

/// [llm] 段：后端选择、各角色模型与端点重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// 架构师角色单独使用的模型，未设置时用 model
    pub architect_model: Option<String>,
    /// 设计师角色单独使用的模型，未设置时用 model
    pub designer_model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 端点级重试次数（之后才算 ModelUnavailable）
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_llm_max_retries() -> u32 {
    2
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            architect_model: None,
            designer_model: None,
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

/// [agent] 段：单次运行的轮数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    40
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// [tools] 段：工具超时、命令白名单、列目录忽略规则、读文件截断
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用总超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// execute_command 未指定 timeout_ms 时的默认值
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// 允许的命令名（仅首词）；为空表示除禁止模式外均允许
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_read_max_lines")]
    pub read_max_lines: usize,
    #[serde(default = "default_data_file_max_lines")]
    pub data_file_max_lines: usize,
}

fn default_tool_timeout_secs() -> u64 {
    180
}

fn default_command_timeout_ms() -> u64 {
    60_000
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git".into(),
        "__pycache__".into(),
        "node_modules".into(),
        ".venv".into(),
        "venv".into(),
        ".idea".into(),
        ".vscode".into(),
    ]
}

fn default_read_max_lines() -> usize {
    500
}

fn default_data_file_max_lines() -> usize {
    50
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            command_timeout_ms: default_command_timeout_ms(),
            allowed_commands: Vec::new(),
            ignore_patterns: default_ignore_patterns(),
            read_max_lines: default_read_max_lines(),
            data_file_max_lines: default_data_file_max_lines(),
        }
    }
}

/// [generation] 段：并发上限、重试与退避、单次设计超时
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    /// 同时进行的设计师运行数；0 表示不限
    #[serde(default = "default_max_concurrent_slides")]
    pub max_concurrent_slides: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 单次设计尝试超时（秒）；0 表示不限
    #[serde(default = "default_slide_timeout_secs")]
    pub slide_timeout_secs: u64,
}

fn default_max_concurrent_slides() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_slide_timeout_secs() -> u64 {
    120
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            max_concurrent_slides: default_max_concurrent_slides(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            slide_timeout_secs: default_slide_timeout_secs(),
        }
    }
}

impl GenerationSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn slide_timeout(&self) -> Option<Duration> {
        (self.slide_timeout_secs > 0).then(|| Duration::from_secs(self.slide_timeout_secs))
    }
}

/// 从 config 目录加载配置，环境变量 SLIDESMITH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SLIDESMITH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SLIDESMITH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
