use serde::{Deserialize, Serialize};

use fm_core::config::ApprovalsConfig;

// ---------------------------------------------------------------------------
// ToolCategory
// ---------------------------------------------------------------------------

/// Risk classification of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Safe,
    RequiresApproval,
    Dangerous,
}

// ---------------------------------------------------------------------------
// Dangerous patterns
// ---------------------------------------------------------------------------

/// Command substrings that force a `Dangerous` classification regardless
/// of the tool's list membership.
const DANGEROUS_COMMAND_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf *",
    ":(){ :|:& };:",
    "mkfs",
    "> /dev/sd",
    "> /dev/nvme",
    "dd if=",
    "chmod -R 777 /",
    "chown -R",
    "git push --force",
    "git push -f",
    "curl | sh",
    "curl | bash",
];

/// Path fragments that force a `Dangerous` classification for file tools.
const DANGEROUS_PATH_PATTERNS: &[&str] = &["/etc/", "/.ssh/", "/.aws/", ".env", "/dev/"];

/// JSON fields inspected for command patterns.
const COMMAND_FIELDS: &[&str] = &["command", "cmd", "script"];

/// JSON fields inspected for path patterns.
const PATH_FIELDS: &[&str] = &["file_path", "path", "target"];

// ---------------------------------------------------------------------------
// ToolClassifier
// ---------------------------------------------------------------------------

/// Classifies tool invocations from explicit allow/deny lists plus
/// dangerous-pattern matching on command and file fields. Unknown tools
/// require approval.
#[derive(Debug, Clone, Default)]
pub struct ToolClassifier {
    allow: Vec<String>,
    deny: Vec<String>,
    auto_allow: Vec<String>,
}

impl ToolClassifier {
    pub fn new(allow: Vec<String>, deny: Vec<String>, auto_allow: Vec<String>) -> Self {
        Self {
            allow,
            deny,
            auto_allow,
        }
    }

    pub fn from_config(config: &ApprovalsConfig) -> Self {
        Self {
            allow: config.allow_tools.clone(),
            deny: config.deny_tools.clone(),
            auto_allow: config.auto_allow_tools.clone(),
        }
    }

    /// Tools that bypass the gate entirely; no request is created.
    pub fn is_auto_allowed(&self, tool_name: &str) -> bool {
        self.auto_allow.iter().any(|t| t == tool_name)
    }

    /// Classify an invocation of `tool_name` with the given input.
    ///
    /// Resolution order: deny list, dangerous patterns, allow list,
    /// then `RequiresApproval` for anything unknown.
    pub fn classify(&self, tool_name: &str, input: &serde_json::Value) -> ToolCategory {
        if self.deny.iter().any(|t| t == tool_name) {
            return ToolCategory::Dangerous;
        }
        if input_matches_dangerous(input) {
            return ToolCategory::Dangerous;
        }
        if self.allow.iter().any(|t| t == tool_name) || self.is_auto_allowed(tool_name) {
            return ToolCategory::Safe;
        }
        ToolCategory::RequiresApproval
    }
}

fn input_matches_dangerous(input: &serde_json::Value) -> bool {
    for field in COMMAND_FIELDS {
        if let Some(command) = input.get(field).and_then(|v| v.as_str()) {
            if DANGEROUS_COMMAND_PATTERNS.iter().any(|p| command.contains(p)) {
                return true;
            }
        }
    }
    for field in PATH_FIELDS {
        if let Some(path) = input.get(field).and_then(|v| v.as_str()) {
            if DANGEROUS_PATH_PATTERNS.iter().any(|p| path.contains(p)) {
                return true;
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
