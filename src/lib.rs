//! Slidesmith - 多智能体幻灯片生成流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、阶段状态机、重试退避、准入闸门、任务存储与流水线编排
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、端点级重试
//! - **memory**: 对话记录（Transcript）与 JSON 持久化
//! - **observability**: tracing 初始化
//! - **react**: 角色、调用块解析、Agent 主循环
//! - **tools**: 工作区内的工具（列目录、读写文件、命令、CSV）与执行网关
//! - **workflow**: 计划、生成清单、设计师与幻灯片生成引擎

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
pub mod workflow;
