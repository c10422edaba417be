//! Whisper transcription of extracted audio.

use anyhow::{Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{AudioInput, CreateTranscriptionRequestArgs},
    Client,
};
use bytes::Bytes;
use std::path::Path;

/// Transcribes an audio file (m4a/mp3/wav) and returns the spoken text.
pub async fn transcribe_audio(api_key: &str, audio_path: &Path) -> Result<String> {
    let audio_data = std::fs::read(audio_path)
        .with_context(|| format!("Failed to read audio file '{}'", audio_path.display()))?;
    let audio_bytes = Bytes::from(audio_data);
    let filename = audio_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio.m4a".to_string());

    let config = OpenAIConfig::new().with_api_key(api_key);
    let client = Client::with_config(config);

    let request = CreateTranscriptionRequestArgs::default()
        .file(AudioInput::from_bytes(filename, audio_bytes))
        .model("whisper-1")
        .build()?;

    let response = client
        .audio()
        .transcribe(request)
        .await
        .context("Transcription request failed")?;
    Ok(response.text)
}
