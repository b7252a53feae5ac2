use std::panic;

use crate::usecases::error::StoreError;

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_MARKERS: [&str; 7] = [
    "password", "secret", "token", "bearer", "apikey", "jwt", "session_key",
];

pub fn redact_text(input: &str) -> String {
    input
        .split_whitespace()
        .map(redact_chunk)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log-safe rendering of a store failure. Free-text details from the
/// backend are scrubbed; structural variants pass through.
pub fn describe_store_cause(error: &StoreError) -> String {
    match error {
        StoreError::Unavailable(detail) => format!("unavailable: {}", redact_text(detail)),
        StoreError::Rejected(detail) => format!("rejected: {}", redact_text(detail)),
        StoreError::Conflict => "conflict".to_owned(),
        StoreError::NotFound => "not_found".to_owned(),
    }
}

pub fn install_panic_redaction_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic payload omitted".to_owned());

        let scrubbed = redact_text(&payload);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "wolfpack panic: {} at {}:{}:{}",
                scrubbed,
                location.file(),
                location.line(),
                location.column()
            );
        } else {
            eprintln!("wolfpack panic: {}", scrubbed);
        }
    }));
}

fn redact_chunk(chunk: &str) -> String {
    let lowered = chunk.to_ascii_lowercase();
    if SENSITIVE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
        || looks_like_credential(chunk)
    {
        REDACTED.to_owned()
    } else {
        chunk.to_owned()
    }
}

/// Long mixed alphanumeric runs without separators look like keys. UUIDs
/// are hyphenated and stay readable for correlation.
fn looks_like_credential(value: &str) -> bool {
    let cleaned = value.trim_matches(|ch: char| !ch.is_ascii_alphanumeric());

    let has_mixed = cleaned.chars().any(|ch| ch.is_ascii_alphabetic())
        && cleaned.chars().any(|ch| ch.is_ascii_digit());

    cleaned.len() >= 16 && has_mixed && cleaned.chars().all(|ch| ch.is_ascii_alphanumeric())
}
