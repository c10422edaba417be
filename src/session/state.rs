//! Per-job session state.
//!
//! One session owns one timeline; sessions share nothing. Tool dispatch is
//! serial within a session, so the state needs no locking.

use std::path::PathBuf;

use crate::models::timeline::{SequenceProperties, Timeline};

/// What kind of media an uploaded provider file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultimodalKind {
    Image,
    Audio,
}

/// An uploaded provider file queued for the model's next turn.
#[derive(Debug, Clone)]
pub struct MultimodalFile {
    pub file_id: String,
    pub local_path: PathBuf,
    pub kind: MultimodalKind,
}

/// The agent's memory for one editing job.
#[derive(Debug)]
pub struct SessionState {
    /// Directory the user's media assets live in; `source_filename` tool
    /// arguments resolve against it.
    pub assets_directory: PathBuf,

    pub timeline: Timeline,

    /// Ordered log of every message and tool output exchanged this session.
    pub history: Vec<serde_json::Value>,

    /// Every provider file id uploaded during the session; released at
    /// session end.
    pub uploaded_files: Vec<String>,

    /// Files uploaded by tools during the current turn, to be threaded into
    /// the next model request.
    pub new_multimodal_files: Vec<MultimodalFile>,

    /// Continuation token from the provider's last response.
    pub last_response_id: Option<String>,

    /// The first user request, kept for the system prompt.
    pub initial_prompt: Option<String>,
}

impl SessionState {
    pub fn new(assets_directory: PathBuf, sequence_override: Option<SequenceProperties>) -> Self {
        let timeline = match sequence_override {
            Some(sequence) => Timeline::with_sequence(sequence),
            None => Timeline::new(),
        };
        Self {
            assets_directory,
            timeline,
            history: Vec::new(),
            uploaded_files: Vec::new(),
            new_multimodal_files: Vec::new(),
            last_response_id: None,
            initial_prompt: None,
        }
    }

    /// The job directory: parent of the assets directory.
    pub fn job_directory(&self) -> PathBuf {
        self.assets_directory
            .parent()
            .unwrap_or(&self.assets_directory)
            .to_path_buf()
    }

    /// The sibling `output/` directory exports and renders go to.
    pub fn output_directory(&self) -> PathBuf {
        self.job_directory().join("output")
    }

    /// Resolves a tool-supplied filename against the assets directory.
    pub fn resolve_asset(&self, filename: &str) -> PathBuf {
        self.assets_directory.join(filename)
    }

    /// Records an upload in the session ledger and queues it for the next
    /// turn.
    pub fn queue_multimodal(&mut self, file: MultimodalFile) {
        self.uploaded_files.push(file.file_id.clone());
        self.new_multimodal_files.push(file);
    }

    /// Takes the files queued during this turn.
    pub fn drain_multimodal(&mut self) -> Vec<MultimodalFile> {
        std::mem::take(&mut self.new_multimodal_files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directories_derive_from_assets_dir() {
        let state = SessionState::new(PathBuf::from("/jobs/j1/assets"), None);
        assert_eq!(state.job_directory(), PathBuf::from("/jobs/j1"));
        assert_eq!(state.output_directory(), PathBuf::from("/jobs/j1/output"));
        assert_eq!(
            state.resolve_asset("a.mp4"),
            PathBuf::from("/jobs/j1/assets/a.mp4")
        );
    }

    #[test]
    fn test_multimodal_queue_feeds_ledger() {
        let mut state = SessionState::new(PathBuf::from("/jobs/j1/assets"), None);
        state.queue_multimodal(MultimodalFile {
            file_id: "file-1".to_string(),
            local_path: PathBuf::from("/tmp/f.png"),
            kind: MultimodalKind::Image,
        });
        assert_eq!(state.uploaded_files, vec!["file-1"]);

        let drained = state.drain_multimodal();
        assert_eq!(drained.len(), 1);
        assert!(state.new_multimodal_files.is_empty());
        // The ledger keeps the id for session-end cleanup.
        assert_eq!(state.uploaded_files.len(), 1);
    }
}
