//! The agent control loop.
//!
//! One turn: send accumulated input (plus the tool catalog) to the provider,
//! dispatch any tool calls in the order the model requested them, thread the
//! tool outputs and any newly uploaded multimodal files back as the next
//! turn's input. The loop ends when the model stops calling tools or a tool
//! returns the terminal finish signal. Provider trouble is retried per the
//! policy below; fatal request errors end the turn cleanly.

use anyhow::Result;
use rand::Rng;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::llm::{
    ContentPart, CreateResponseRequest, InputItem, ProviderClient, ProviderError, ProviderResponse,
    ToolDefinition,
};
use crate::session::{MultimodalKind, SessionLogger, SessionState};
use crate::tools::{self, JobResult, Tool, ToolContext, ToolOutcome};

const SYSTEM_PROMPT_TEMPLATE: &str = "\
Users Request:
{user_request}
You are cutline, a skilled and autonomous video editing agent. Your single purpose is to fulfill the user's request and produce a video.

**Core Directives:**
1.  **You MUST end every job by calling the `finish_job` tool.** This is your only method of communication with the user and it is non-negotiable.
2.  **NEVER ask for clarification.** The user's request is your complete set of instructions. Interpret it to the best of your ability and act.
3.  **A \"best effort\" video is REQUIRED.** It is always better to deliver an imperfect or \"rough draft\" video than to ask a question or report a minor failure. The user will provide feedback by submitting a new job.
4.  **If your first attempt fails, TRY AGAIN.** If an action results in an error (like a black frame from a bad crop), analyze the error, adjust your parameters, and execute the action again. Do not give up and ask the user for help.
";

const MAX_ATTEMPTS: u32 = 6;

/// Parses the wait hint from a provider rate-limit message
/// ("Please try again in 31.402s." / "...in 110ms."). Returns seconds.
fn parse_wait_time(message: &str) -> Option<f64> {
    let pattern = Regex::new(r"Please try again in ([\d.]+)(ms|s)").expect("valid regex");
    let captures = pattern.captures(message)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    match captures.get(2)?.as_str() {
        "ms" => Some(value / 1000.0),
        _ => Some(value),
    }
}

/// Result of one executed turn.
enum TurnOutcome {
    /// Tool outputs (and queued multimodal refs) to feed into the next turn.
    Next(Vec<InputItem>),
    /// The model produced no tool calls, or the turn failed fatally.
    Idle,
    /// A tool raised the terminal finish signal.
    Finished(JobResult),
}

pub struct Agent {
    state: SessionState,
    provider: ProviderClient,
    logger: SessionLogger,
    tools: BTreeMap<String, Box<dyn Tool>>,
    tool_definitions: Vec<ToolDefinition>,
    model_name: String,
}

impl Agent {
    pub fn new(
        state: SessionState,
        provider: ProviderClient,
        logger: SessionLogger,
        model_name: impl Into<String>,
    ) -> Self {
        let tools = tools::registry();
        let tool_definitions = tools::definitions(&tools);
        tracing::info!(
            event = "tools_loaded",
            count = tools.len(),
            names = %tools.keys().cloned().collect::<Vec<_>>().join(", "),
            "Tool catalog ready"
        );
        Self {
            state,
            provider,
            logger,
            tools,
            tool_definitions,
            model_name: model_name.into(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Runs the conversation loop for one user request. Returns the final
    /// payload if the model called `finish_job`, `None` if it simply stopped
    /// producing tool calls.
    pub async fn run_to_completion(&mut self, prompt: &str) -> Result<Option<JobResult>> {
        if self.state.initial_prompt.is_none() {
            self.state.initial_prompt = Some(prompt.to_string());
        }
        let system_prompt = SYSTEM_PROMPT_TEMPLATE.replace(
            "{user_request}",
            self.state.initial_prompt.as_deref().unwrap_or(prompt),
        );

        self.logger
            .log_initial_setup(&self.model_name, &system_prompt, &self.tool_definitions);
        self.logger.log_user_prompt(prompt);

        let mut input = vec![InputItem::user_text(prompt)];
        if let Ok(value) = serde_json::to_value(&input[0]) {
            self.state.history.push(value);
        }

        loop {
            let scratch = tempfile::tempdir()?;
            match self.execute_turn(input, &system_prompt, scratch.path()).await {
                TurnOutcome::Next(next) => input = next,
                TurnOutcome::Idle => {
                    tracing::warn!(
                        event = "run_ended_without_finish",
                        "Agent finished its turn without calling finish_job"
                    );
                    return Ok(None);
                }
                TurnOutcome::Finished(result) => {
                    return Ok(Some(result));
                }
            }
        }
    }

    /// Releases every uploaded provider file and closes out the session log.
    /// Individual delete failures are logged and skipped.
    pub async fn cleanup(&mut self) {
        let file_ids: Vec<String> = self.state.uploaded_files.drain(..).collect();
        for file_id in file_ids {
            match self.provider.delete_file(&file_id).await {
                Ok(()) => {
                    tracing::debug!(event = "uploaded_file_deleted", file_id = %file_id);
                }
                Err(e) => {
                    tracing::warn!(
                        event = "uploaded_file_delete_failed",
                        file_id = %file_id,
                        error = %e,
                        "Could not delete uploaded file; continuing cleanup"
                    );
                }
            }
        }
        self.logger.log_session_end();
    }

    async fn execute_turn(
        &mut self,
        input: Vec<InputItem>,
        system_prompt: &str,
        scratch_dir: &std::path::Path,
    ) -> TurnOutcome {
        let request = CreateResponseRequest {
            model: self.model_name.clone(),
            input,
            // The system prompt travels only on the first request; afterwards
            // the provider continues from the stored response id.
            instructions: self
                .state
                .last_response_id
                .is_none()
                .then(|| system_prompt.to_string()),
            previous_response_id: self.state.last_response_id.clone(),
            tools: self.tool_definitions.clone(),
        };

        let Some(response) = self.request_with_retry(request).await else {
            return TurnOutcome::Idle;
        };

        self.state.last_response_id = Some(response.id.clone());
        self.logger.log_model_response(&response);
        if let Some(items) = response.raw["output"].as_array() {
            self.state.history.extend(items.iter().cloned());
        }

        let calls: Vec<(String, String, String)> = response
            .function_calls()
            .into_iter()
            .map(|(call_id, name, arguments)| {
                (call_id.to_string(), name.to_string(), arguments.to_string())
            })
            .collect();
        if calls.is_empty() {
            return TurnOutcome::Idle;
        }

        self.state.new_multimodal_files.clear();
        let mut next_input: Vec<InputItem> = Vec::new();

        for (call_id, name, arguments) in calls {
            let outcome = {
                let mut ctx = ToolContext {
                    state: &mut self.state,
                    provider: &self.provider,
                    scratch_dir,
                };
                match self.tools.get(&name) {
                    Some(tool) => match serde_json::from_str::<serde_json::Value>(&arguments) {
                        Ok(args) => tool.execute(&mut ctx, args).await,
                        Err(e) => ToolOutcome::Continue(format!(
                            "Error executing tool '{name}': could not parse arguments: {e}"
                        )),
                    },
                    None => ToolOutcome::Continue(format!("Error: Tool '{name}' not found.")),
                }
            };

            match outcome {
                ToolOutcome::Continue(output) => {
                    self.logger.log_tool_result(&name, &output);
                    next_input.push(InputItem::function_call_output(call_id, output));
                }
                ToolOutcome::Finish(result) => {
                    return TurnOutcome::Finished(result);
                }
            }
        }

        // Everything tools uploaded this turn rides along as one synthetic
        // user message, so the model sees the images next turn.
        let queued = self.state.drain_multimodal();
        if !queued.is_empty() {
            let paths: Vec<std::path::PathBuf> =
                queued.iter().map(|f| f.local_path.clone()).collect();
            self.logger.log_multimodal_request(&paths);

            let parts: Vec<ContentPart> = queued
                .into_iter()
                .map(|file| match file.kind {
                    MultimodalKind::Image => ContentPart::InputImage {
                        file_id: file.file_id,
                    },
                    MultimodalKind::Audio => ContentPart::InputFile {
                        file_id: file.file_id,
                    },
                })
                .collect();
            next_input.push(InputItem::user_parts(parts));
        }

        for item in &next_input {
            if let Ok(value) = serde_json::to_value(item) {
                self.state.history.push(value);
            }
        }
        TurnOutcome::Next(next_input)
    }

    /// Sends one request with the retry policy: parsed rate-limit waits
    /// (+0.5s), exponential backoff with jitter for unhinted rate limits and
    /// transient server errors, and a hard stop on other request errors.
    async fn request_with_retry(
        &mut self,
        request: CreateResponseRequest,
    ) -> Option<ProviderResponse> {
        let mut attempts: u32 = 0;
        let mut backoff_delay = 1.0f64;

        while attempts < MAX_ATTEMPTS {
            match self.provider.create_response(&request).await {
                Ok(response) => return Some(response),
                Err(ProviderError::RateLimit { message }) => {
                    attempts += 1;
                    let wait = match parse_wait_time(&message) {
                        Some(hint) if hint > 0.0 => {
                            let wait = hint + 0.5;
                            self.logger.log_rate_limit_hit(&message, wait);
                            wait
                        }
                        _ => {
                            let wait = backoff_delay + rand::thread_rng().gen_range(0.0..1.0);
                            self.logger.log_rate_limit_hit(&message, wait);
                            backoff_delay *= 2.0;
                            wait
                        }
                    };
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
                Err(ProviderError::Transient { message }) => {
                    attempts += 1;
                    let wait = backoff_delay + rand::thread_rng().gen_range(0.0..1.0);
                    self.logger
                        .log_server_error_retry(&message, attempts, MAX_ATTEMPTS, wait);
                    backoff_delay *= 2.0;
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
                Err(error @ ProviderError::Fatal { .. }) => {
                    tracing::error!(event = "provider_fatal_error", error = %error, "Fatal provider error");
                    self.logger
                        .log_tool_result("provider", &format!("FATAL ERROR: {error}"));
                    return None;
                }
            }
        }

        tracing::error!(
            event = "provider_retries_exhausted",
            attempts = MAX_ATTEMPTS,
            "Failed to get a response from the provider"
        );
        self.logger.log_tool_result(
            "provider",
            &format!("FATAL ERROR: Max retries ({MAX_ATTEMPTS}) exceeded."),
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wait_time() {
        assert_eq!(
            parse_wait_time("Rate limit reached. Please try again in 31.402s."),
            Some(31.402)
        );
        assert_eq!(
            parse_wait_time("Please try again in 110ms."),
            Some(0.11)
        );
        assert_eq!(parse_wait_time("Too many requests."), None);
    }

    #[test]
    fn test_system_prompt_template_interpolates() {
        let prompt = SYSTEM_PROMPT_TEMPLATE.replace("{user_request}", "make a montage");
        assert!(prompt.contains("Users Request:\nmake a montage"));
        assert!(prompt.contains("finish_job"));
    }
}
