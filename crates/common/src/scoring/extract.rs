//! Structured payload extraction from free-text model replies

use super::NewsAnalytics;
use crate::errors::{AppError, Result};

const OPEN_FENCE: &str = "```json";
const CLOSE_FENCE: &str = "```";

/// Text between the opening ```` ```json ```` fence and the last closing fence
pub fn extract_json_block(reply: &str) -> Result<&str> {
    let start = reply
        .find(OPEN_FENCE)
        .ok_or_else(|| AppError::malformed_response("no ```json block in reply"))?
        + OPEN_FENCE.len();

    let end = reply
        .rfind(CLOSE_FENCE)
        .filter(|end| *end >= start)
        .ok_or_else(|| AppError::malformed_response("unterminated ```json block in reply"))?;

    Ok(reply[start..end].trim())
}

/// Parse the analytics payload out of a model reply
pub fn parse_analytics(reply: &str) -> Result<NewsAnalytics> {
    let block = extract_json_block(reply)?;
    serde_json::from_str(block)
        .map_err(|e| AppError::malformed_response(format!("invalid analytics JSON: {}", e)))
}
