pub mod logging;
pub mod state;

pub use logging::SessionLogger;
pub use state::{MultimodalFile, MultimodalKind, SessionState};
