//! The tool catalog the agent exposes to the model.
//!
//! Every tool declares a name, a description, and a JSON-schema argument
//! object, and executes against the session state. Tool results are plain
//! strings that travel back to the model; anything visual is uploaded via
//! the provider client and queued on the session for the next turn.
//!
//! Tools are registered explicitly in [`registry`]; the executor serializes
//! the catalog once per turn for the provider's function-calling feature.

pub mod add_clips;
pub mod asset_info;
pub mod delete_clips;
pub mod finish_job;
pub mod list_assets;
pub mod render_video;
pub mod split_clip;
pub mod timeline_summary;
pub mod transcribe_media;
pub mod transform;
pub mod view_timeline;
pub mod view_video;
pub mod visualize_timeline;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::llm::{ProviderClient, ToolDefinition};
use crate::session::SessionState;

/// Final payload carried out of the run loop by `finish_job`.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

/// What a tool execution produced: either a result string for the model, or
/// the terminal signal that unwinds the agent loop.
#[derive(Debug)]
pub enum ToolOutcome {
    Continue(String),
    Finish(JobResult),
}

/// Everything a tool may touch during one execution.
pub struct ToolContext<'a> {
    pub state: &'a mut SessionState,
    pub provider: &'a ProviderClient,
    /// Turn-scoped scratch directory for intermediate files.
    pub scratch_dir: &'a Path,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON-schema object describing the tool's arguments.
    fn parameters(&self) -> Value;

    async fn execute(&self, ctx: &mut ToolContext<'_>, args: Value) -> ToolOutcome;
}

/// Builds the full tool catalog, keyed by tool name.
pub fn registry() -> BTreeMap<String, Box<dyn Tool>> {
    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(add_clips::AddClipsTool),
        Box::new(split_clip::SplitClipTool),
        Box::new(delete_clips::DeleteClipsTool),
        Box::new(transform::TransformTool),
        Box::new(timeline_summary::TimelineSummaryTool),
        Box::new(view_video::ViewVideoTool),
        Box::new(view_timeline::ViewTimelineTool),
        Box::new(visualize_timeline::VisualizeTimelineTool),
        Box::new(render_video::RenderVideoTool),
        Box::new(asset_info::AssetInfoTool),
        Box::new(list_assets::ListAssetsTool),
        Box::new(transcribe_media::TranscribeMediaTool),
        Box::new(finish_job::FinishJobTool),
    ];
    tools
        .into_iter()
        .map(|tool| (tool.name().to_string(), tool))
        .collect()
}

/// Serializes the catalog for the provider's function-calling payload.
pub fn definitions(tools: &BTreeMap<String, Box<dyn Tool>>) -> Vec<ToolDefinition> {
    tools
        .values()
        .map(|tool| ToolDefinition::function(tool.name(), tool.description(), tool.parameters()))
        .collect()
}

/// Deserializes tool arguments, turning schema mismatches into the standard
/// recoverable error string.
pub(crate) fn parse_args<T: DeserializeOwned>(tool_name: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args)
        .map_err(|e| format!("Error: Invalid arguments for tool '{tool_name}': {e}"))
}

/// Midpoint sampling: `n` timestamps at the centers of `n` equal segments of
/// `[start, end]`. Degenerate ranges collapse to the start time.
pub(crate) fn sample_midpoints(start_sec: f64, end_sec: f64, n: usize) -> Vec<f64> {
    let span = end_sec - start_sec;
    if span <= 0.0 || n == 0 {
        return vec![start_sec];
    }
    let segment = span / n as f64;
    (0..n)
        .map(|i| start_sec + i as f64 * segment + segment / 2.0)
        .collect()
}

/// Bounded worker count for tools that fan out pure I/O.
pub(crate) fn worker_pool_size() -> usize {
    num_cpus::get().clamp(1, 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contains_the_full_catalog() {
        let tools = registry();
        for name in [
            "add_clips",
            "split_clip",
            "delete_clips",
            "transform",
            "get_timeline_summary",
            "view_video",
            "view_timeline",
            "visualize_timeline",
            "render_video",
            "get_asset_info",
            "list_assets",
            "transcribe_media",
            "finish_job",
        ] {
            assert!(tools.contains_key(name), "missing tool {name}");
        }
        assert_eq!(tools.len(), 13);
    }

    #[test]
    fn test_definitions_carry_schemas() {
        let tools = registry();
        for definition in definitions(&tools) {
            assert_eq!(definition.kind, "function");
            assert!(definition.parameters["type"] == "object");
            assert!(!definition.description.is_empty());
        }
    }

    #[test]
    fn test_sample_midpoints() {
        let samples = sample_midpoints(0.0, 10.0, 5);
        assert_eq!(samples, vec![1.0, 3.0, 5.0, 7.0, 9.0]);
        assert_eq!(sample_midpoints(3.0, 3.0, 4), vec![3.0]);
    }
}
