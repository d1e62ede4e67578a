//! Outbound payload scrubbing (spec.md §3, §8 properties 7–8): two passes
//! run over every non-`tool`-role message before a [`CompletionRequest`]
//! leaves this process for an `LLMProvider`. Control-string scrub is always
//! on; PII scrub only runs when `SecurityConfig::pii_scrub_enabled` is set.
//! `role: tool` / `tool_result` content is exempt from both passes — it
//! carries structured identifiers a downstream tool needs verbatim.

use std::sync::OnceLock;

use regex::Regex;

use crate::ai::context::defuse_boundary_tags;
use crate::ai::types::{CompletionRequest, ContentBlock, Message, MessageContent, MessageRole};

/// Known special-token markers a model could use to forge a role boundary or
/// escape the conversation frame, beyond the `<tag>`-shaped ones
/// `defuse_boundary_tags` already neutralizes.
const CONTROL_STRINGS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "<|system|>",
    "<|user|>",
    "<|assistant|>",
    "[INST]",
    "[/INST]",
];

/// Strips/neutralizes known LLM control strings from `text`. Always run,
/// regardless of `pii_scrub_enabled`.
pub fn scrub_control_strings(text: &str) -> String {
    let mut out = defuse_boundary_tags(text);
    for token in CONTROL_STRINGS {
        if out.contains(token) {
            out = out.replace(token, "[control-string removed]");
        }
    }
    out
}

fn credit_card_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").expect("static PII pattern is valid regex"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("static PII pattern is valid regex")
    })
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b\+?\d{0,3}[-. ]?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b")
            .expect("static PII pattern is valid regex")
    })
}

/// ISO (`2026-07-30`) and US (`07/30/2026`, `7-30-26`) date shapes, excluded
/// from the phone match (spec.md §3 "phone numbers (excluding date-shaped
/// sequences)").
fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{1,2}-\d{1,2}$|^\d{1,2}[/-]\d{1,2}[/-]\d{2,4}$")
            .expect("static PII pattern is valid regex")
    })
}

fn ssn_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("static PII pattern is valid regex"))
}

fn iban_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{10,30}\b").expect("static PII pattern is valid regex")
    })
}

fn ip_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b")
            .expect("static PII pattern is valid regex")
    })
}

/// Standard mod-10 check over the digits of a candidate card number.
fn passes_luhn(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Replaces Luhn-validated credit-card numbers, email addresses, date-
/// excluded phone numbers, SSNs, IBANs, and IPs with `[REDACTED:<kind>]`
/// markers (spec.md §3 invariant 7, §8 testable property 7).
pub fn scrub_pii(text: &str) -> String {
    let mut out = credit_card_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            let candidate = &caps[0];
            if passes_luhn(candidate) {
                "[REDACTED:credit_card]".to_string()
            } else {
                candidate.to_string()
            }
        })
        .into_owned();

    out = email_pattern().replace_all(&out, "[REDACTED:email]").into_owned();

    out = phone_pattern()
        .replace_all(&out, |caps: &regex::Captures| {
            let candidate = caps[0].trim();
            if date_pattern().is_match(candidate) {
                candidate.to_string()
            } else {
                "[REDACTED:phone]".to_string()
            }
        })
        .into_owned();

    out = ssn_pattern().replace_all(&out, "[REDACTED:ssn]").into_owned();
    out = iban_pattern().replace_all(&out, "[REDACTED:iban]").into_owned();
    out = ip_pattern().replace_all(&out, "[REDACTED:ip]").into_owned();
    out
}

fn scrub_message_content(content: &MessageContent, pii_scrub_enabled: bool) -> MessageContent {
    match content {
        MessageContent::Text(t) => MessageContent::Text(apply_passes(t, pii_scrub_enabled)),
        MessageContent::Blocks(blocks) => MessageContent::Blocks(
            blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => ContentBlock::Text {
                        text: apply_passes(text, pii_scrub_enabled),
                    },
                    other => other.clone(),
                })
                .collect(),
        ),
    }
}

fn apply_passes(text: &str, pii_scrub_enabled: bool) -> String {
    let scrubbed = scrub_control_strings(text);
    if pii_scrub_enabled {
        scrub_pii(&scrubbed)
    } else {
        scrubbed
    }
}

/// Scrubs every non-`tool`-role message's content in place, leaving `role:
/// tool` / `ContentBlock::ToolResult` content untouched (spec.md §3 "Tool
/// results are exempt from PII scrub").
pub fn scrub_request(request: &mut CompletionRequest, pii_scrub_enabled: bool) {
    request.system = apply_passes(&request.system, pii_scrub_enabled);
    for message in &mut request.messages {
        if message.role == MessageRole::Tool {
            continue;
        }
        message.content = scrub_message_content(&message.content, pii_scrub_enabled);
    }
}
