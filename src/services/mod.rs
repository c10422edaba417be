pub mod exchange;
pub mod mlt;
pub mod renderer;
pub mod visuals;

/// Minimal XML text/attribute escaping for the hand-built project files.
pub(crate) fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
