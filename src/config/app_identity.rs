//! Small identity constants shared across subsystems that need to present a
//! consistent application name to the outside world (HTTP headers, on-disk
//! directory names, OS keychain service names).

/// `HTTP-Referer` header OpenRouter asks clients to send for attribution.
pub const OPENROUTER_HTTP_REFERER: &str = "https://castellan.dev";

/// `X-Title` header OpenRouter uses to label requests in its dashboard.
pub const OPENROUTER_TITLE: &str = "Castellan";

/// Service name used when storing secrets in the OS keychain.
pub const KEYCHAIN_SERVICE: &str = "dev.castellan.app";

/// Directory name (under the config root) where skill definitions live.
pub const SKILLS_CONFIG_DIR_NAME: &str = "skills";
