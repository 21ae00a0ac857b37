/// Slash commands handled by the chat layer rather than the agent.
pub const CONTROL_COMMANDS: &[&str] = &[
    "new", "clear", "compact", "context", "model", "help", "stop", "status",
];

/// Help text listing [`CONTROL_COMMANDS`].
pub const HELP_TEXT: &str = "Available commands:\n/new: Start a new session\n/model: Switch provider/model\n/clear: Clear session history\n/compact: Compact session (summarize)\n/context: Show session context info\n/stop: Abort the running reply\n/status: Show session status\n/help: Show this help";

fn command_name(token: &str) -> Option<&'static str> {
    let name = token.strip_prefix('/')?;
    CONTROL_COMMANDS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(name))
        .copied()
}

/// Whether any whitespace-separated token of `text` is a control command.
pub fn contains_control_command(text: &str) -> bool {
    text.split_whitespace().any(|t| command_name(t).is_some())
}

/// Parse `text` as a command invocation: it must start with a known
/// `/command`. Returns the canonical command name and the full command text
/// without the leading slash.
pub fn parse_command(text: &str) -> Option<(&'static str, &str)> {
    let text = text.trim();
    let first = text.split_whitespace().next()?;
    let name = command_name(first)?;
    Some((name, text.trim_start_matches('/')))
}
