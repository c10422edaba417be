pub mod client;
pub mod transcription;
pub mod types;

pub use client::{ProviderClient, ProviderError};
pub use types::{
    ContentPart, CreateResponseRequest, InputItem, OutputContent, OutputItem, ProviderResponse,
    ToolDefinition, UploadedFile,
};
