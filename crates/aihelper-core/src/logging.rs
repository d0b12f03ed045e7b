use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions, create_dir_all};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::warn;

use crate::session::PipelineKind;

const RUN_LOG_FILE: &str = "runs.jsonl";
const AUDIT_LOG_FILE: &str = "audit.jsonl";

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "password",
            Regex::new(r"(?i)((?:secret|password)\s*[:=]\s*)([^\s,;]+)")
                .expect("invalid password regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9\-_]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

/// One successful pipeline run.
#[derive(Debug, Clone)]
pub struct RunLogEntry {
    pub session_id: String,
    pub pipeline: PipelineKind,
    pub topic: String,
    pub result: String,
    pub stages: Vec<String>,
}

#[derive(Serialize)]
struct RunLogRecord<'a> {
    timestamp: String,
    session_id: &'a str,
    pipeline: PipelineKind,
    topic: String,
    result: String,
    stages: &'a [String],
    redactions: Vec<&'static str>,
}

#[derive(Serialize)]
struct AuditLogRecord<'a> {
    timestamp: &'a str,
    session_id: &'a str,
    redactions: &'a [&'static str],
}

/// Append-only JSONL log of completed runs, partitioned by `YYYY/MM`.
#[derive(Debug, Clone)]
pub struct RunLog {
    base_dir: PathBuf,
    retention_days: u64,
}

impl RunLog {
    pub fn new(base_dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            base_dir: base_dir.into(),
            retention_days,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn record(&self, entry: &RunLogEntry) -> Result<()> {
        let timestamp = Utc::now();
        let mut redactions = BTreeSet::new();

        let topic = sanitize_text(&entry.topic, &mut redactions);
        let result = sanitize_text(&entry.result, &mut redactions);
        let record = RunLogRecord {
            timestamp: timestamp.to_rfc3339(),
            session_id: &entry.session_id,
            pipeline: entry.pipeline,
            topic,
            result,
            stages: &entry.stages,
            redactions: redactions.into_iter().collect(),
        };

        let month_dir = self
            .base_dir
            .join(format!("{:04}", timestamp.year()))
            .join(format!("{:02}", timestamp.month()));
        append_json_line(&month_dir.join(RUN_LOG_FILE), &record)?;

        if !record.redactions.is_empty() {
            let audit = AuditLogRecord {
                timestamp: &record.timestamp,
                session_id: &entry.session_id,
                redactions: &record.redactions,
            };
            append_json_line(&month_dir.join(AUDIT_LOG_FILE), &audit)?;
            warn!(
                session_id = %entry.session_id,
                fields = ?record.redactions,
                "redacted potential secrets from run log"
            );
        }

        self.enforce_retention()
    }

    fn enforce_retention(&self) -> Result<()> {
        if self.retention_days == 0 || !self.base_dir.exists() {
            return Ok(());
        }
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(self.retention_days.saturating_mul(86_400)))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        prune_directory(&self.base_dir, cutoff)
    }

    /// Drop every line written for `session_id`.
    pub fn remove_session(&self, session_id: &str) -> Result<()> {
        if !self.base_dir.exists() {
            return Ok(());
        }

        for year_entry in fs::read_dir(&self.base_dir)? {
            let year_entry = year_entry?;
            if !year_entry.file_type()?.is_dir() {
                continue;
            }
            for month_entry in fs::read_dir(year_entry.path())? {
                let month_entry = month_entry?;
                if !month_entry.file_type()?.is_dir() {
                    continue;
                }
                for name in [RUN_LOG_FILE, AUDIT_LOG_FILE] {
                    let path = month_entry.path().join(name);
                    rewrite_jsonl_without(&path, session_id)?;
                    cleanup_empty_file(&path)?;
                }
                if month_entry.path().read_dir()?.next().is_none() {
                    fs::remove_dir(month_entry.path()).ok();
                }
            }
            if year_entry.path().read_dir()?.next().is_none() {
                fs::remove_dir(year_entry.path()).ok();
            }
        }

        Ok(())
    }
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{line}")
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

pub fn sanitize_text(input: &str, redactions: &mut BTreeSet<&'static str>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(*name);
        }
    }
    output
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}

fn rewrite_jsonl_without(path: &Path, session_id: &str) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let file =
        File::open(path).with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut retained = Vec::new();
    let mut removed = false;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line)
            && value.get("session_id").and_then(|v| v.as_str()) == Some(session_id)
        {
            removed = true;
            continue;
        }
        retained.push(line);
    }

    if removed {
        let file = File::create(path)
            .with_context(|| format!("failed to rewrite log file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for line in retained {
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
    }

    Ok(())
}

fn cleanup_empty_file(path: &Path) -> Result<()> {
    if path.exists() && path.metadata()?.len() == 0 {
        fs::remove_file(path).ok();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn entry(session_id: &str, result: &str) -> RunLogEntry {
        RunLogEntry {
            session_id: session_id.to_string(),
            pipeline: PipelineKind::Research,
            topic: "Find api_key=abcd1234".to_string(),
            result: result.to_string(),
            stages: vec!["search".into(), "bias_check".into()],
        }
    }

    fn month_dir(base: &Path) -> PathBuf {
        let year_dir = base.read_dir().unwrap().next().unwrap().unwrap().path();
        year_dir.read_dir().unwrap().next().unwrap().unwrap().path()
    }

    #[test]
    fn records_are_sanitized_and_audited() -> Result<()> {
        let temp = TempDir::new()?;
        let log = RunLog::new(temp.path(), 0);

        log.record(&entry("s1", "token sk-abcdef1234567890XYZ and Bearer abc.def"))?;

        let dir = month_dir(temp.path());
        let line = fs::read_to_string(dir.join(RUN_LOG_FILE))?;
        let record: Value = serde_json::from_str(line.trim())?;
        assert_eq!(record["session_id"], "s1");
        assert_eq!(record["pipeline"], "research");
        assert_eq!(record["topic"], "Find api_key=[REDACTED]");
        let result = record["result"].as_str().unwrap_or_default();
        assert!(!result.contains("sk-abcdef"));
        assert!(result.contains("Bearer [REDACTED]"));
        assert!(dir.join(AUDIT_LOG_FILE).exists());
        Ok(())
    }

    #[test]
    fn remove_session_keeps_other_sessions() -> Result<()> {
        let temp = TempDir::new()?;
        let log = RunLog::new(temp.path(), 0);
        log.record(&entry("keep", "plain result"))?;
        log.record(&entry("drop", "plain result"))?;

        log.remove_session("drop")?;

        let contents = fs::read_to_string(month_dir(temp.path()).join(RUN_LOG_FILE))?;
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"keep\""));
        Ok(())
    }

    #[test]
    fn removing_the_only_session_cleans_up_directories() -> Result<()> {
        let temp = TempDir::new()?;
        let log = RunLog::new(temp.path(), 0);
        log.record(&entry("only", "plain"))?;

        log.remove_session("only")?;
        assert!(temp.path().read_dir()?.next().is_none());
        Ok(())
    }

    #[test]
    fn sanitize_reports_pattern_names() {
        let mut redactions = BTreeSet::new();
        let output = sanitize_text("password: hunter2, fine", &mut redactions);
        assert_eq!(output, "password: [REDACTED], fine");
        assert_eq!(redactions.into_iter().collect::<Vec<_>>(), vec!["password"]);
    }
}
