//! Assertion helpers for HTTP-driven test bodies.
//!
//! Each helper fails with an [`AssertionError`], which the executor reports
//! with `test.error.type = "assertion"`.

use reqwest::{Response, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("expected status {expected}, got {actual} from {url}")]
    UnexpectedStatus {
        expected: String,
        actual: u16,
        url: String,
    },
    #[error("expected a JSON {expected} body, got: {snippet}")]
    UnexpectedBody {
        expected: &'static str,
        snippet: String,
    },
    #[error("expected body to contain '{needle}', got: {snippet}")]
    MissingText { needle: String, snippet: String },
    #[error("{0}")]
    Failed(String),
}

const SNIPPET_LEN: usize = 200;

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Fail unless the response is 2xx. Returns the response for further checks.
pub fn expect_success(resp: Response) -> Result<Response, AssertionError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(AssertionError::UnexpectedStatus {
            expected: "2xx".to_string(),
            actual: resp.status().as_u16(),
            url: resp.url().to_string(),
        })
    }
}

/// Fail unless the response has exactly `expected` status.
pub fn expect_status(resp: Response, expected: StatusCode) -> Result<Response, AssertionError> {
    if resp.status() == expected {
        Ok(resp)
    } else {
        Err(AssertionError::UnexpectedStatus {
            expected: expected.as_u16().to_string(),
            actual: resp.status().as_u16(),
            url: resp.url().to_string(),
        })
    }
}

/// Body must look like a JSON array.
pub fn expect_json_array(body: &str) -> Result<(), AssertionError> {
    let trimmed = body.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        Ok(())
    } else {
        Err(AssertionError::UnexpectedBody {
            expected: "array",
            snippet: snippet(body),
        })
    }
}

/// Body must look like a JSON object.
pub fn expect_json_object(body: &str) -> Result<(), AssertionError> {
    let trimmed = body.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        Ok(())
    } else {
        Err(AssertionError::UnexpectedBody {
            expected: "object",
            snippet: snippet(body),
        })
    }
}

pub fn expect_contains(body: &str, needle: &str) -> Result<(), AssertionError> {
    if body.contains(needle) {
        Ok(())
    } else {
        Err(AssertionError::MissingText {
            needle: needle.to_string(),
            snippet: snippet(body),
        })
    }
}
