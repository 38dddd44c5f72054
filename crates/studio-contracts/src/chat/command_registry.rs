#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const ID_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "drop_subject",
        action: "remove_subject",
    },
    CommandSpec {
        command: "select",
        action: "select_result",
    },
    CommandSpec {
        command: "remove",
        action: "remove_result",
    },
];

pub(crate) const TIER_COMMANDS: &[&str] = &["standard", "high"];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "reference",
        action: "set_reference",
    },
    CommandSpec {
        command: "download",
        action: "download_all",
    },
];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "subject",
    action: "add_subjects",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "run_batch",
    },
    CommandSpec {
        command: "clear_reference",
        action: "clear_reference",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "wait",
        action: "wait",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/subject",
    "/reference",
    "/clear_reference",
    "/drop_subject",
    "/generate",
    "/select",
    "/remove",
    "/download",
    "/standard",
    "/high",
    "/status",
    "/wait",
    "/help",
    "/quit",
];
