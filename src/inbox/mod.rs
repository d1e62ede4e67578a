//! Inbox Processor (spec.md §4.7) — a second ingress alongside the chat
//! panel. Top-level blocks on a dedicated Inbox page are treated as
//! implicit prompts and processed asynchronously, one at a time, through a
//! read-only agent turn.

pub mod processor;
pub mod snapshot;

pub use processor::{InboxProcessor, INBOX_PAGE_TITLE, PROCESSED_HEADING};
pub use snapshot::{InboxCandidate, STATIC_INSTRUCTION_ALLOWLIST};
