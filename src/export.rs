use crate::model::ProbeResult;
use anyhow::Context;

pub const CSV_HEADER: &str = "Time,API,Status,Response Time (ms),Issue";

/// Renders the result buffer as CSV, one row per result in buffer order.
/// Absent latency serializes as an empty field.
pub fn to_csv<'a, I>(results: I) -> String
where
    I: IntoIterator<Item = &'a ProbeResult>,
{
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for result in results {
        let latency = result
            .latency_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default();
        let fields = [
            result.timestamp.format("%H:%M:%S").to_string(),
            result.endpoint.clone(),
            result.outcome.status_text(),
            latency,
            result.outcome.issue(),
        ];
        let row: Vec<String> = fields.iter().map(|f| escape(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}

/// One parsed export row. `status` keeps the column's display form (decimal
/// code or failure sentinel).
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub time: String,
    pub api: String,
    pub status: String,
    pub latency_ms: Option<f64>,
    pub issue: String,
}

/// Parses the format written by [`to_csv`]. Records are single-line.
pub fn parse_csv(input: &str) -> anyhow::Result<Vec<CsvRow>> {
    let mut lines = input.lines();
    match lines.next() {
        Some(header) if header == CSV_HEADER => {}
        Some(header) => anyhow::bail!("Unexpected CSV header: {}", header),
        None => anyhow::bail!("Empty CSV input"),
    }

    let mut rows = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let mut fields = split_record(line)?;
        if fields.len() != 5 {
            anyhow::bail!("Expected 5 fields, got {}: {}", fields.len(), line);
        }
        let issue = fields.pop().unwrap_or_default();
        let latency = fields.pop().unwrap_or_default();
        let latency_ms = if latency.is_empty() {
            None
        } else {
            Some(latency.parse().context("Invalid response time field")?)
        };
        let status = fields.pop().unwrap_or_default();
        let api = fields.pop().unwrap_or_default();
        let time = fields.pop().unwrap_or_default();
        rows.push(CsvRow {
            time,
            api,
            status,
            latency_ms,
            issue,
        });
    }

    Ok(rows)
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn split_record(line: &str) -> anyhow::Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    if in_quotes {
        anyhow::bail!("Unterminated quote in record: {}", line);
    }
    fields.push(field);

    Ok(fields)
}
