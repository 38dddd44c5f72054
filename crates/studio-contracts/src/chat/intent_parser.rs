use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, ID_ARG_COMMANDS, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
    TIER_COMMANDS,
};

/// A parsed chat line. Slash commands map to an action; anything else is a
/// refinement prompt for the active result.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn arg_list(&self, key: &str) -> Vec<String> {
        self.command_args
            .get(key)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, ID_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("id".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if TIER_COMMANDS.iter().any(|value| *value == command) {
                let mut intent = Intent::new("set_tier", text);
                intent
                    .command_args
                    .insert("tier".to_string(), Value::String(command));
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, MULTI_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "paths".to_string(),
                    Value::Array(
                        parse_path_args(arg)
                            .into_iter()
                            .map(Value::String)
                            .collect(),
                    ),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("refine", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_subject_quoted_paths() {
        let intent = parse_intent("/subject \"/tmp/blue towel.png\" red.jpg");
        assert_eq!(intent.action, "add_subjects");
        assert_eq!(
            intent.command_args["paths"],
            json!(["/tmp/blue towel.png", "red.jpg"])
        );
        assert_eq!(intent.arg_list("paths").len(), 2);
    }

    #[test]
    fn parse_reference_and_download_paths() {
        let reference = parse_intent("/reference \"/tmp/scene with hanger.png\"");
        assert_eq!(reference.action, "set_reference");
        assert_eq!(reference.arg_str("path"), Some("/tmp/scene with hanger.png"));

        let download = parse_intent("/download");
        assert_eq!(download.action, "download_all");
        assert_eq!(download.arg_str("path"), None);
    }

    #[test]
    fn parse_id_commands() {
        let select = parse_intent("/select abc123");
        assert_eq!(select.action, "select_result");
        assert_eq!(select.arg_str("id"), Some("abc123"));

        assert_eq!(parse_intent("/remove abc").action, "remove_result");
        assert_eq!(parse_intent("/drop_subject abc").action, "remove_subject");
    }

    #[test]
    fn parse_tier_shortcuts() {
        let high = parse_intent("/HIGH");
        assert_eq!(high.action, "set_tier");
        assert_eq!(high.command_args["tier"], json!("high"));
        assert_eq!(parse_intent("/standard").command_args["tier"], json!("standard"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/generate").action, "run_batch");
        assert_eq!(parse_intent("/clear_reference").action, "clear_reference");
        assert_eq!(parse_intent("/wait").action, "wait");
    }

    #[test]
    fn plain_text_is_a_refinement_prompt() {
        let intent = parse_intent("  make it look fluffier  ");
        assert_eq!(intent.action, "refine");
        assert_eq!(intent.prompt.as_deref(), Some("make it look fluffier"));
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
