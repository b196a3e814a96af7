//! 沙箱文件系统
//!
//! SafeFs 绑定工作区根目录，所有路径经 resolve 词法归一化并校验必须在根下（禁止 ../ 与符号链接逃逸）；
//! list_files / read_file / write_file 三个工具的实现都基于它。

use std::path::{Component, Path, PathBuf};

use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::core::PipelineError;

/// 数据类文件扩展名：读取时使用更小的行数上限
const DATA_EXTENSIONS: &[&str] = &[
    "csv", "tsv", "json", "jsonl", "xml", "log", "dat", "data", "txt",
];

/// 直接按扩展名判定为二进制
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tar", "7z", "rar",
    "exe", "dll", "so", "dylib", "bin", "pyc", "class", "jar", "mp3", "mp4", "wav", "avi", "mov",
    "xls", "xlsx", "doc", "docx", "ppt", "pptx",
];

/// 递归列目录的条目上限
const MAX_LIST_ENTRIES: usize = 2000;

/// 列目录时跳过的名称（glob 模式，按单个路径段匹配）
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<glob::Pattern>,
}

impl IgnoreRules {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid ignore pattern skipped");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }
}

/// read_file 的截断上限
#[derive(Debug, Clone, Copy)]
pub struct ReadLimits {
    pub max_lines: usize,
    pub data_file_max_lines: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            max_lines: 500,
            data_file_max_lines: 50,
        }
    }
}

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 归一化为根下的绝对路径；目标可以尚不存在（写文件）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PipelineError> {
        let escape = || PipelineError::PathEscape(path.to_string());
        let raw = Path::new(path.trim());
        let relative = if raw.is_absolute() {
            raw.strip_prefix(&self.root_dir).map_err(|_| escape())?
        } else {
            raw
        };

        let mut resolved = self.root_dir.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(escape()); // 如 ../../etc/passwd
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }

        // 最深的已存在祖先必须仍在根下（符号链接）
        let mut ancestor = resolved.as_path();
        loop {
            if ancestor.exists() {
                let canonical = ancestor.canonicalize()?;
                if !canonical.starts_with(&self.root_dir) {
                    return Err(escape());
                }
                break;
            }
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => break,
            }
        }
        Ok(resolved)
    }

    /// 根下的相对路径（`/` 分隔），用于回报与比较
    pub fn relative(&self, resolved: &Path) -> String {
        let rel = resolved.strip_prefix(&self.root_dir).unwrap_or(resolved);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    pub fn list_files(
        &self,
        paths: &[String],
        recursive: bool,
        ignore: &IgnoreRules,
    ) -> Result<Value, PipelineError> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let base = self.resolve(path)?;
            if !base.is_dir() {
                results.push(json!({"path": path, "error": "not a directory"}));
                continue;
            }
            let (entries, truncated) = if recursive {
                self.walk(&base, ignore)
            } else {
                self.read_dir(&base, ignore)?
            };
            let dir_count = entries.iter().filter(|e| e["type"] == "directory").count();
            let file_count = entries.len() - dir_count;
            results.push(json!({
                "path": self.relative(&base),
                "entries": entries,
                "dir_count": dir_count,
                "file_count": file_count,
                "truncated": truncated,
            }));
        }
        Ok(json!({ "results": results }))
    }

    fn read_dir(&self, base: &Path, ignore: &IgnoreRules) -> Result<(Vec<Value>, bool), PipelineError> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(base)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if ignore.is_ignored(&name) {
                continue;
            }
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }
        dirs.sort();
        files.sort();
        let truncated = dirs.len() + files.len() > MAX_LIST_ENTRIES;
        let entries = dirs
            .into_iter()
            .map(|n| json!({"name": n, "type": "directory"}))
            .chain(files.into_iter().map(|n| json!({"name": n, "type": "file"})))
            .take(MAX_LIST_ENTRIES)
            .collect();
        Ok((entries, truncated))
    }

    fn walk(&self, base: &Path, ignore: &IgnoreRules) -> (Vec<Value>, bool) {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut truncated = false;
        let walker = WalkDir::new(base)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !ignore.is_ignored(&e.file_name().to_string_lossy()));
        for entry in walker.filter_map(Result::ok) {
            if dirs.len() + files.len() >= MAX_LIST_ENTRIES {
                truncated = true;
                break;
            }
            let rel = entry
                .path()
                .strip_prefix(base)
                .map(|p| {
                    p.components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect::<Vec<_>>()
                        .join("/")
                })
                .unwrap_or_default();
            if entry.file_type().is_dir() {
                dirs.push(json!({"name": rel, "type": "directory"}));
            } else {
                files.push(json!({"name": rel, "type": "file"}));
            }
        }
        dirs.extend(files);
        (dirs, truncated)
    }

    /// 读取文件并加行号；单个文件的失败就地记录，越界路径整体失败
    pub fn read_files(&self, paths: &[String], limits: ReadLimits) -> Result<Value, PipelineError> {
        let resolved: Vec<PathBuf> = paths
            .iter()
            .map(|p| self.resolve(p))
            .collect::<Result<_, _>>()?;

        let mut files = Vec::with_capacity(paths.len());
        let mut failures = Vec::new();
        for path in &resolved {
            let rel = self.relative(path);
            match read_numbered(path, limits) {
                Ok(v) => files.push(v.with_path(&rel)),
                Err(reason) => {
                    failures.push(format!("{rel}: {reason}"));
                    files.push(json!({"path": rel, "error": reason}));
                }
            }
        }
        if failures.len() == resolved.len() {
            return Err(PipelineError::ToolExecutionFailed(failures.join("; ")));
        }
        Ok(json!({ "files": files }))
    }

    /// 写文件；返回结果与写入的相对路径
    pub fn write_files(
        &self,
        files: &[(String, String)],
    ) -> Result<(Value, Vec<String>), PipelineError> {
        let resolved: Vec<PathBuf> = files
            .iter()
            .map(|(p, _)| self.resolve(p))
            .collect::<Result<_, _>>()?;

        let mut report = Vec::with_capacity(files.len());
        let mut written = Vec::with_capacity(files.len());
        for (path, (_, content)) in resolved.iter().zip(files) {
            if path.is_dir() {
                return Err(PipelineError::ToolExecutionFailed(format!(
                    "{} is a directory",
                    self.relative(path)
                )));
            }
            let action = match std::fs::read(path) {
                Ok(existing) if existing == content.as_bytes() => "unchanged",
                Ok(_) => "modified",
                Err(_) => "created",
            };
            if action != "unchanged" {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, content)?;
            }
            let rel = self.relative(path);
            report.push(json!({"path": rel, "action": action, "bytes": content.len()}));
            written.push(rel);
        }
        Ok((json!({ "files": report }), written))
    }
}

trait WithPath {
    fn with_path(self, path: &str) -> Value;
}

impl WithPath for Value {
    fn with_path(mut self, path: &str) -> Value {
        if let Value::Object(map) = &mut self {
            map.insert("path".to_string(), Value::String(path.to_string()));
        }
        self
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn read_numbered(path: &Path, limits: ReadLimits) -> Result<Value, String> {
    if path.is_dir() {
        return Err("is a directory".to_string());
    }
    let ext = extension(path);
    if BINARY_EXTENSIONS.contains(&ext.as_str()) {
        return Err(format!("binary file (.{ext}) not readable as text"));
    }
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    if bytes.iter().take(1024).any(|b| *b == 0) {
        return Err("binary file not readable as text".to_string());
    }
    let text = String::from_utf8_lossy(&bytes);
    let max_lines = if DATA_EXTENSIONS.contains(&ext.as_str()) {
        limits.data_file_max_lines
    } else {
        limits.max_lines
    };

    let total = text.lines().count();
    let shown = total.min(max_lines);
    let width = shown.max(1).to_string().len();
    let mut content: String = text
        .lines()
        .take(shown)
        .enumerate()
        .map(|(i, line)| format!("{:>width$} | {}", i + 1, line, width = width))
        .collect::<Vec<_>>()
        .join("\n");
    let truncated = total > shown;
    if truncated {
        content.push_str(&format!(
            "\n... truncated: showing {shown} of {total} lines"
        ));
    }
    Ok(json!({
        "content": content,
        "total_lines": total,
        "truncated": truncated,
    }))
}
