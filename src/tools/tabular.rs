//! CSV 表头预览：表头 + 前几行，渲染为 Markdown 表格

use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::{json, Value};

use crate::core::PipelineError;

/// 单元格展示宽度上限
const MAX_CELL_CHARS: usize = 60;

/// 按引号规则切分一行（支持 "a,b" 与 "" 转义）
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells.into_iter().map(|c| c.trim().to_string()).collect()
}

fn md_cell(s: &str) -> String {
    let s = s.replace('|', "\\|");
    if s.chars().count() > MAX_CELL_CHARS {
        format!("{}…", s.chars().take(MAX_CELL_CHARS).collect::<String>())
    } else {
        s
    }
}

pub fn inspect_csv_head(path: &Path, display: &str, rows: usize) -> Result<Value, PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::ToolExecutionFailed(format!(
            "File not found: {display}"
        )));
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut lines = reader.lines();

    let header_line = match lines.next() {
        Some(line) => line?,
        None => {
            return Err(PipelineError::ToolExecutionFailed(format!(
                "Empty CSV file: {display}"
            )))
        }
    };
    let header = split_csv_line(header_line.trim_start_matches('\u{feff}'));
    let columns = header.len();

    let mut shown = Vec::new();
    let mut total_rows = 0usize;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        total_rows += 1;
        if shown.len() < rows {
            let mut cells = split_csv_line(&line);
            cells.resize(columns, String::new());
            shown.push(cells);
        }
    }

    let mut table = String::new();
    table.push_str(&format!(
        "| {} |\n",
        header.iter().map(|h| md_cell(h)).collect::<Vec<_>>().join(" | ")
    ));
    table.push_str(&format!("|{}\n", " --- |".repeat(columns)));
    for row in &shown {
        table.push_str(&format!(
            "| {} |\n",
            row.iter().map(|c| md_cell(c)).collect::<Vec<_>>().join(" | ")
        ));
    }

    Ok(json!({
        "path": display,
        "columns": header,
        "column_count": columns,
        "total_rows": total_rows,
        "shown_rows": shown.len(),
        "table": table,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_handles_quotes() {
        assert_eq!(
            split_csv_line(r#"a,"b,c","say ""hi""",d"#),
            vec!["a", "b,c", "say \"hi\"", "d"]
        );
    }

    #[test]
    fn test_head_renders_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        std::fs::write(
            &path,
            "\u{feff}region,total,note\nnorth,10,ok\nsouth,20\neast,5,x|y\nwest,1,z\n",
        )
        .unwrap();

        let out = inspect_csv_head(&path, "sales.csv", 2).unwrap();
        assert_eq!(out["column_count"], 3);
        assert_eq!(out["total_rows"], 4);
        assert_eq!(out["shown_rows"], 2);
        let table = out["table"].as_str().unwrap();
        assert!(table.starts_with("| region | total | note |\n| --- | --- | --- |\n"));
        assert!(table.contains("| south | 20 |  |"));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect_csv_head(&dir.path().join("none.csv"), "none.csv", 5).is_err());
    }
}
