//! Dual per-job session log.
//!
//! Two append-only files per job: a raw log with one JSON event per line for
//! high-fidelity debugging, and a readable log that tells the conversation
//! as a narrative. Both are flushed on every write so a crashed session
//! still leaves a complete record.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::llm::types::{OutputContent, OutputItem, ProviderResponse, ToolDefinition};

/// Takes a JSON value or a JSON-encoded string and pretty-prints it; other
/// strings pass through unchanged.
fn pretty_json(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

pub struct SessionLogger {
    job_id: String,
    raw_log: File,
    readable_log: File,
}

impl SessionLogger {
    pub fn new(job_id: &str, logs_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("Could not create logs directory '{}'", logs_dir.display()))?;

        let open = |path: PathBuf| -> Result<File> {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Could not open log file '{}'", path.display()))
        };

        Ok(Self {
            job_id: job_id.to_string(),
            raw_log: open(logs_dir.join(format!("{job_id}.agent.raw.log")))?,
            readable_log: open(logs_dir.join(format!("{job_id}.agent.readable.log")))?,
        })
    }

    fn write_raw(&mut self, event: &str, mut data: Value) {
        let entry = if let Some(map) = data.as_object_mut() {
            let mut entry = serde_json::Map::new();
            entry.insert("event".to_string(), json!(event));
            entry.insert(
                "timestamp".to_string(),
                json!(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
            entry.append(map);
            Value::Object(entry)
        } else {
            json!({
                "event": event,
                "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                "data": data,
            })
        };

        if let Ok(line) = serde_json::to_string(&entry) {
            let _ = writeln!(self.raw_log, "{line}");
            let _ = self.raw_log.flush();
        }
    }

    fn write_readable(&mut self, message: &str) {
        let _ = self.readable_log.write_all(message.as_bytes());
        let _ = self.readable_log.flush();
    }

    pub fn log_initial_setup(
        &mut self,
        model_name: &str,
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) {
        self.write_raw(
            "initial_setup",
            json!({
                "job_id": self.job_id,
                "model": model_name,
                "system_prompt": system_prompt,
                "tools": tools,
            }),
        );

        let mut header = vec![
            "======================================================================".to_string(),
            "                    CUTLINE AGENT SESSION LOG".to_string(),
            "======================================================================".to_string(),
            format!("Job ID:         {}", self.job_id),
            format!("Model:          {model_name}"),
            format!(
                "Start Time:     {}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            "----------------------------------------------------------------------\n".to_string(),
            "[SYSTEM INSTRUCTIONS]".to_string(),
            "---------------------".to_string(),
            system_prompt.trim().to_string(),
            "\n----------------------------------------------------------------------\n".to_string(),
            "[TOOLS AVAILABLE]".to_string(),
            "-----------------".to_string(),
        ];
        for tool in tools {
            header.push(format!("- Tool: {}", tool.name));
            header.push(format!("  Description: {}", tool.description));
            let parameters =
                serde_json::to_string_pretty(&tool.parameters).unwrap_or_else(|_| "{}".to_string());
            header.push(format!("  Parameters:\n{parameters}"));
            header.push(String::new());
        }
        header.extend([
            "======================================================================".to_string(),
            "                          CONVERSATION".to_string(),
            "======================================================================".to_string(),
        ]);
        self.write_readable(&header.join("\n"));
    }

    pub fn log_user_prompt(&mut self, prompt: &str) {
        self.write_raw("user_prompt", json!({ "prompt": prompt }));
        self.write_readable(&format!("\n\nUser: {prompt}"));
    }

    pub fn log_model_response(&mut self, response: &ProviderResponse) {
        self.write_raw("model_response_object", json!({ "response": response.raw }));

        if let Some(items) = response.raw["output"].as_array() {
            for item in items {
                self.write_raw("model_output_item", json!({ "item": item }));
            }
        }

        for item in &response.output {
            match item {
                OutputItem::Message { content } => {
                    let text: String = content
                        .iter()
                        .filter_map(|part| match part {
                            OutputContent::OutputText { text } => Some(text.as_str()),
                            OutputContent::Other => None,
                        })
                        .collect();
                    if !text.trim().is_empty() {
                        self.write_readable(&format!("\n\nModel: {}", text.trim()));
                    }
                }
                OutputItem::FunctionCall {
                    name, arguments, ..
                } => {
                    self.write_readable(&format!(
                        "\n\n[Tool Call]\n  Name: {name}\n  Arguments:\n{}",
                        pretty_json(arguments)
                    ));
                }
                OutputItem::Other => {}
            }
        }
    }

    pub fn log_tool_result(&mut self, tool_name: &str, result: &str) {
        self.write_raw(
            "tool_result",
            json!({ "tool_name": tool_name, "output": result }),
        );
        let indented: Vec<String> = result
            .trim()
            .lines()
            .map(|line| format!("  {line}"))
            .collect();
        self.write_readable(&format!("\n\nTool Result:\n{}", indented.join("\n")));
    }

    pub fn log_rate_limit_hit(&mut self, message: &str, wait_duration_s: f64) {
        self.write_raw(
            "rate_limit_hit",
            json!({ "error_message": message, "wait_duration_s": wait_duration_s }),
        );
        self.write_readable(&format!(
            "\n\n[Rate limited. Waiting {wait_duration_s:.1}s before retrying.]"
        ));
    }

    pub fn log_server_error_retry(
        &mut self,
        error: &str,
        attempt: u32,
        max_attempts: u32,
        wait_duration_s: f64,
    ) {
        self.write_raw(
            "server_error_retry",
            json!({
                "error": error,
                "attempt": attempt,
                "max_attempts": max_attempts,
                "wait_duration_s": wait_duration_s,
            }),
        );
        self.write_readable(&format!(
            "\n\n[Server error (attempt {attempt}/{max_attempts}). Waiting {wait_duration_s:.1}s before retrying.]"
        ));
    }

    pub fn log_multimodal_request(&mut self, local_paths: &[PathBuf]) {
        let paths: Vec<String> = local_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        self.write_raw("multimodal_request", json!({ "files": paths }));
        self.write_readable(&format!(
            "\n\n[Attaching {} file(s) for the model to view: {}]",
            paths.len(),
            paths.join(", ")
        ));
    }

    pub fn log_session_end(&mut self) {
        self.write_raw("session_end", json!({}));
        self.write_readable(
            "\n\n======================================================================\n                          SESSION END\n======================================================================\n",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_raw_log_is_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = SessionLogger::new("job-1", dir.path()).unwrap();
        logger.log_user_prompt("cut the intro");
        logger.log_tool_result("add_clips", "Successfully added 1 clips.");
        logger.log_session_end();

        let raw = read(&dir.path().join("job-1.agent.raw.log"));
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            let value: Value = serde_json::from_str(line).unwrap();
            assert!(value["event"].is_string());
            assert!(value["timestamp"].is_string());
        }
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "user_prompt");
        assert_eq!(first["prompt"], "cut the intro");
    }

    #[test]
    fn test_readable_log_tells_the_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = SessionLogger::new("job-2", dir.path()).unwrap();
        logger.log_initial_setup(
            "gpt-test",
            "You are an editing agent.",
            &[ToolDefinition::function(
                "finish_job",
                "Ends the job.",
                json!({"type": "object", "properties": {}}),
            )],
        );
        logger.log_user_prompt("make a montage");
        logger.log_tool_result("finish_job", "done\nwith details");

        let readable = read(&dir.path().join("job-2.agent.readable.log"));
        assert!(readable.contains("CUTLINE AGENT SESSION LOG"));
        assert!(readable.contains("- Tool: finish_job"));
        assert!(readable.contains("User: make a montage"));
        assert!(readable.contains("Tool Result:\n  done\n  with details"));
    }

    #[test]
    fn test_model_response_logging() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = SessionLogger::new("job-3", dir.path()).unwrap();

        let raw = json!({
            "id": "resp_1",
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "Planning the edit."}]},
                {"type": "function_call", "call_id": "c1", "name": "add_clips",
                 "arguments": "{\"clips\": []}"},
            ],
        });
        let response = ProviderResponse {
            id: "resp_1".to_string(),
            output: serde_json::from_value(raw["output"].clone()).unwrap(),
            raw,
        };
        logger.log_model_response(&response);

        let raw_log = read(&dir.path().join("job-3.agent.raw.log"));
        assert_eq!(
            raw_log
                .lines()
                .filter(|l| l.contains("model_output_item"))
                .count(),
            2
        );

        let readable = read(&dir.path().join("job-3.agent.readable.log"));
        assert!(readable.contains("Model: Planning the edit."));
        assert!(readable.contains("[Tool Call]"));
        assert!(readable.contains("\"clips\": []"));
    }
}
