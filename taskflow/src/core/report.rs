//! Runner report validation.
//!
//! A report is accepted only when every field checks out. Validation runs to
//! completion on the raw JSON body before anything touches the store.

use serde_json::{Map, Value};

use crate::core::types::{ErrorKind, ReportStatus};

/// Artifact reference attached to a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub kind: String,
    pub uri: String,
    pub meta: Option<Value>,
}

/// A fully validated terminal report for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub run_id: String,
    pub status: ReportStatus,
    /// `None` when the runner omitted it; the store records `none`.
    pub error_kind: Option<ErrorKind>,
    pub summary: Option<String>,
    pub artifacts: Vec<ArtifactRef>,
    pub branch: Option<String>,
    pub worktree_path: Option<String>,
}

impl Report {
    pub fn error_kind_or_default(&self) -> ErrorKind {
        self.error_kind.unwrap_or_default()
    }
}

/// Parse and validate a report body.
///
/// Returns a stable, human-readable message on the first violation.
pub fn validate_report(body: &Value) -> Result<Report, String> {
    let empty = Map::new();
    let fields = body.as_object().unwrap_or(&empty);

    let run_id = fields.get("run_id").and_then(Value::as_str);
    let status = fields
        .get("status")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<ReportStatus>().ok());
    let (Some(run_id), Some(status)) = (run_id, status) else {
        return Err("run_id and status required".to_string());
    };

    let error_kind = match present(fields, "error_kind") {
        None => None,
        Some(value) => Some(
            value
                .as_str()
                .and_then(|raw| raw.parse::<ErrorKind>().ok())
                .ok_or_else(|| "invalid error_kind".to_string())?,
        ),
    };

    let summary = optional_string(fields, "summary")?;
    // Runner-side hints: a value of the wrong type is ignored.
    let branch = hint_string(fields, "branch");
    let worktree_path = hint_string(fields, "worktree_path");

    let artifacts = match present(fields, "artifacts") {
        None => Vec::new(),
        Some(value) => parse_artifacts(value).ok_or_else(|| "invalid artifacts".to_string())?,
    };

    Ok(Report {
        run_id: run_id.to_string(),
        status,
        error_kind,
        summary,
        artifacts,
        branch,
        worktree_path,
    })
}

/// Treat explicit `null` the same as an absent key.
fn present<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|value| !value.is_null())
}

fn optional_string(fields: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match present(fields, key) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(format!("invalid {key}")),
    }
}

fn hint_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    present(fields, key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_artifacts(value: &Value) -> Option<Vec<ArtifactRef>> {
    value
        .as_array()?
        .iter()
        .map(|item| {
            let item = item.as_object()?;
            let kind = item.get("type")?.as_str()?;
            let uri = item.get("uri")?.as_str()?;
            let meta = item.get("meta").filter(|meta| meta.is_object()).cloned();
            Some(ArtifactRef {
                kind: kind.to_string(),
                uri: uri.to_string(),
                meta,
            })
        })
        .collect()
}
