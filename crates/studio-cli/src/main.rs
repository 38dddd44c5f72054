use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use studio_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use studio_contracts::events::EventWriter;
use studio_engine::{
    ingest_file, ingest_files, ControllerPolicy, Credential, DryrunTransport, EngineConfig,
    GeminiTransport, GenerationClient, HostEnvironment, ImageTransport, RunOutcome, SkipReason,
    StaticHost, StudioError, TierToggle, WorkflowController,
};

#[derive(Debug, Parser)]
#[command(name = "towel-studio", version, about = "Towel product photo studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Batch(BatchArgs),
    Refine(RefineArgs),
}

#[derive(Debug, Clone, Args)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Start on the high-quality tier.
    #[arg(long)]
    high: bool,
    /// Render placeholder images locally instead of calling the API.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct BatchArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long = "subject", required = true, num_args = 1..)]
    subjects: Vec<PathBuf>,
    #[arg(long)]
    reference: PathBuf,
    /// Refinement prompts applied in order to the newest result.
    #[arg(long = "refine")]
    refinements: Vec<String>,
}

#[derive(Debug, Parser)]
struct RefineArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: String,
}

const DRYRUN_STANDARD_MODEL: &str = "dryrun-image-1";
const DRYRUN_HIGH_MODEL: &str = "dryrun-image-hd";

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("towel-studio error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Batch(args) => run_batch(args),
        Command::Refine(args) => run_refine(args),
    }
}

/// Asks for an API key on the terminal when the high tier needs one.
struct TerminalHost {
    credential: Credential,
}

impl HostEnvironment for TerminalHost {
    fn has_configured_credential(&self) -> Option<bool> {
        Some(self.credential.is_set())
    }

    fn supports_credential_selection(&self) -> bool {
        true
    }

    fn request_credential_selection(&self) -> Result<(), StudioError> {
        eprint!("High-quality tier API key: ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        io::stdin()
            .read_line(&mut line)
            .map_err(|err| StudioError::Transport(err.to_string()))?;
        let key = line.trim();
        if key.is_empty() {
            return Err(StudioError::MissingCredential);
        }
        self.credential.set(key);
        Ok(())
    }
}

struct Studio {
    controller: Arc<WorkflowController>,
    host: Box<dyn HostEnvironment>,
}

impl Studio {
    fn open(args: &SessionArgs) -> Result<Self> {
        let config = EngineConfig::from_env();
        let events_path = args
            .events
            .clone()
            .unwrap_or_else(|| args.out.join("events.jsonl"));
        if let Some(parent) = events_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let events = EventWriter::new(&events_path, session_id_for(&args.out));

        let (transport, host, overrides) = if args.dryrun {
            dryrun_backend()
        } else {
            remote_backend(&config)
        };

        let client = GenerationClient::new(transport)
            .with_model_overrides(overrides.0, overrides.1)
            .with_events(events.clone());
        let policy = ControllerPolicy {
            revoke_tier_on_refine_auth_failure: config.revoke_tier_on_refine_auth_failure,
            download_stagger: config.download_stagger,
        };
        let controller = WorkflowController::new(client, events, host.as_ref(), policy);
        let studio = Self {
            controller: Arc::new(controller),
            host,
        };
        if args.high {
            studio.select_high()?;
        }
        Ok(studio)
    }

    fn select_high(&self) -> Result<()> {
        match self.controller.select_high_tier(self.host.as_ref())? {
            TierToggle::Selected => println!("Tier: high"),
            TierToggle::Authorized => println!("High-quality tier authorized. Tier: high"),
            TierToggle::Unavailable => bail!("high-quality tier is not available"),
        }
        Ok(())
    }

    fn download(&self, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let batch = self.controller.download_all(out_dir)?;
        if batch.is_empty() {
            println!("Nothing to download.");
            return Ok(Vec::new());
        }
        let saved = batch.wait()?;
        for path in &saved {
            println!("Saved {}", path.display());
        }
        Ok(saved)
    }

    fn finish(&self) -> Result<()> {
        let summary = self.controller.finish()?;
        println!("Summary written to {}", summary.display());
        Ok(())
    }
}

type Backend = (
    Box<dyn ImageTransport>,
    Box<dyn HostEnvironment>,
    (Option<String>, Option<String>),
);

fn dryrun_backend() -> Backend {
    let host = StaticHost {
        configured: Some(true),
        selectable: true,
    };
    (
        Box::new(DryrunTransport::default()),
        Box::new(host),
        (
            Some(DRYRUN_STANDARD_MODEL.to_string()),
            Some(DRYRUN_HIGH_MODEL.to_string()),
        ),
    )
}

fn remote_backend(config: &EngineConfig) -> Backend {
    let credential = Credential::new(config.api_key.clone());
    let transport = GeminiTransport::new(
        config.api_base.clone(),
        credential.clone(),
        config.request_timeout,
    );
    (
        Box::new(transport),
        Box::new(TerminalHost { credential }),
        (config.standard_model.clone(), config.high_model.clone()),
    )
}

fn session_id_for(out_dir: &Path) -> String {
    out_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "session".to_string())
}

fn report_outcome(label: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed { produced } => {
            println!("{label} finished: {} new result(s).", produced.len());
            if let Some(id) = produced.first() {
                println!("Selected {id}");
            }
        }
        RunOutcome::Failed { message } => println!("{label} failed: {message}"),
        RunOutcome::Skipped(reason) => println!("{label} skipped: {}", skip_text(*reason)),
    }
}

fn skip_text(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::Busy => "another generation is running",
        SkipReason::MissingSubjects => "add at least one subject with /subject",
        SkipReason::MissingReference => "set a reference with /reference",
        SkipReason::NoActiveRecord => "no result is selected",
        SkipReason::EmptyPrompt => "the prompt is empty",
    }
}

/// Background generation jobs started from the chat loop.
#[derive(Default)]
struct Jobs {
    running: Vec<(&'static str, JoinHandle<RunOutcome>)>,
}

impl Jobs {
    fn spawn(
        &mut self,
        label: &'static str,
        job: impl FnOnce() -> RunOutcome + Send + 'static,
    ) {
        self.running.push((label, thread::spawn(job)));
    }

    fn reap_finished(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) = self
            .running
            .drain(..)
            .partition(|(_, handle)| handle.is_finished());
        self.running = running;
        for (label, handle) in done {
            Self::report(label, handle);
        }
    }

    fn wait_all(&mut self) {
        for (label, handle) in self.running.drain(..) {
            Self::report(label, handle);
        }
    }

    fn report(label: &str, handle: JoinHandle<RunOutcome>) {
        match handle.join() {
            Ok(outcome) => report_outcome(label, &outcome),
            Err(_) => eprintln!("{label} worker panicked"),
        }
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let studio = Studio::open(&args.session)?;
    let mut jobs = Jobs::default();
    let stdin = io::stdin();
    let mut line = String::new();

    println!("Towel studio started. Type /help for commands.");

    loop {
        jobs.reap_finished();
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "quit" {
            break;
        }
        if let Err(err) = handle_chat_intent(&studio, &mut jobs, &args.session.out, &intent) {
            println!("{} failed: {err:#}", intent.action);
        }
    }

    jobs.wait_all();
    studio.finish()
}

fn handle_chat_intent(
    studio: &Studio,
    jobs: &mut Jobs,
    out_dir: &Path,
    intent: &Intent,
) -> Result<()> {
    let controller = &studio.controller;
    match intent.action.as_str() {
        "noop" => {}
        "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
        "add_subjects" => {
            let paths = intent.arg_list("paths");
            if paths.is_empty() {
                println!("/subject requires one or more paths");
                return Ok(());
            }
            let records = ingest_files(&paths)?;
            for record in &records {
                println!("Subject {} ({})", record.id, record.name);
            }
            controller.add_subjects(records);
        }
        "remove_subject" => match intent.arg_str("id") {
            Some(id) if controller.remove_subject(id) => println!("Removed subject {id}"),
            Some(id) => println!("Unknown subject {id}"),
            None => println!("/drop_subject requires an id"),
        },
        "set_reference" => {
            let Some(path) = intent.arg_str("path") else {
                println!("/reference requires a path");
                return Ok(());
            };
            let record = ingest_file(Path::new(path))?;
            println!("Reference set to {}", record.name);
            controller.set_reference(Some(record));
        }
        "clear_reference" => {
            controller.clear_reference();
            println!("Reference cleared");
        }
        "run_batch" => {
            let worker = Arc::clone(controller);
            jobs.spawn("Batch", move || worker.run_batch_generate());
            println!("Batch started.");
        }
        "refine" => {
            let prompt = intent.prompt.clone().unwrap_or_default();
            let worker = Arc::clone(controller);
            jobs.spawn("Refinement", move || refine_job(&worker, &prompt));
            println!("Refinement started.");
        }
        "select_result" => match intent.arg_str("id") {
            Some(id) if controller.select_result(id) => println!("Selected {id}"),
            Some(id) => println!("Unknown result {id}"),
            None => println!("/select requires an id"),
        },
        "remove_result" => match intent.arg_str("id") {
            Some(id) if controller.remove_result(id) => println!("Removed result {id}"),
            Some(id) => println!("Unknown result {id}"),
            None => println!("/remove requires an id"),
        },
        "download_all" => {
            let target = intent
                .arg_str("path")
                .map(PathBuf::from)
                .unwrap_or_else(|| out_dir.to_path_buf());
            studio.download(&target)?;
        }
        "set_tier" => match intent.arg_str("tier") {
            Some("high") => studio.select_high()?,
            _ => {
                controller.select_standard_tier();
                println!("Tier: standard");
            }
        },
        "status" => print_status(controller),
        "wait" => jobs.wait_all(),
        _ => println!("Unknown command: {}", intent.raw.trim()),
    }
    Ok(())
}

/// A failed prompt stays as the draft so it can be retried; a skipped one
/// leaves the current draft alone.
fn refine_job(controller: &WorkflowController, prompt: &str) -> RunOutcome {
    let outcome = controller.run_refine(prompt);
    if matches!(outcome, RunOutcome::Failed { .. }) {
        controller.set_prompt_draft(prompt);
    }
    outcome
}

fn print_status(controller: &WorkflowController) {
    let state = controller.snapshot();
    let progress = controller.progress();
    println!("Tier: {}", controller.tier());
    println!("Subjects: {}", state.subjects.len());
    for record in &state.subjects {
        println!("  {} {}", record.id, record.name);
    }
    match state.reference.as_ref() {
        Some(record) => println!("Reference: {}", record.name),
        None => println!("Reference: (none)"),
    }
    println!("Results: {}", state.history.len());
    for record in &state.history {
        let marker = if state.selected_id.as_deref() == Some(record.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(" {marker}{} {}", record.id, record.name);
    }
    if state.busy {
        println!("Busy: {}/{}", progress.current, progress.total);
    }
    if !state.last_prompt.is_empty() {
        println!("Last prompt: {}", state.last_prompt);
    }
    if let Some(error) = state.last_error.as_deref() {
        println!("Last error: {error}");
    }
}

fn run_batch(args: BatchArgs) -> Result<i32> {
    let studio = Studio::open(&args.session)?;
    let controller = &studio.controller;

    controller.add_subjects(ingest_files(&args.subjects)?);
    controller.set_reference(Some(ingest_file(&args.reference)?));

    let mut code = finish_step("Batch", controller.run_batch_generate());
    if code == 0 {
        for prompt in &args.refinements {
            code = finish_step("Refinement", controller.run_refine(prompt));
            if code != 0 {
                break;
            }
        }
    }

    studio.download(&args.session.out)?;
    studio.finish()?;
    Ok(code)
}

fn run_refine(args: RefineArgs) -> Result<i32> {
    let studio = Studio::open(&args.session)?;
    let controller = &studio.controller;

    controller.adopt_result(ingest_file(&args.image)?);
    let code = finish_step("Refinement", controller.run_refine(&args.prompt));

    let saved = studio.download(&args.session.out)?;
    if saved.is_empty() {
        bail!("no results to save");
    }
    studio.finish()?;
    Ok(code)
}

fn finish_step(label: &str, outcome: RunOutcome) -> i32 {
    report_outcome(label, &outcome);
    match outcome {
        RunOutcome::Completed { .. } => 0,
        RunOutcome::Failed { .. } | RunOutcome::Skipped(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::Parser;
    use studio_contracts::events::EventWriter;
    use studio_contracts::records::{png_data_url, ImageRecord};
    use studio_engine::{
        ControllerPolicy, DryrunTransport, GenerationClient, RunOutcome, SkipReason, StaticHost,
        WorkflowController,
    };

    use super::{refine_job, session_id_for, Cli, Command, DRYRUN_STANDARD_MODEL};

    fn dryrun_controller(events: &Path) -> WorkflowController {
        let client = GenerationClient::new(Box::new(DryrunTransport::new(8)))
            .with_model_overrides(Some(DRYRUN_STANDARD_MODEL.to_string()), None);
        WorkflowController::new(
            client,
            EventWriter::new(events, "cli-test"),
            &StaticHost::default(),
            ControllerPolicy::default(),
        )
    }

    #[test]
    fn skipped_refinement_keeps_the_pending_draft() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let controller = dryrun_controller(&temp.path().join("events.jsonl"));
        controller.set_prompt_draft("warmer tones");

        let outcome = refine_job(&controller, "cooler tones");
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::NoActiveRecord));
        assert_eq!(controller.snapshot().prompt_draft, "warmer tones");
        Ok(())
    }

    #[test]
    fn completed_refinement_clears_the_draft() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let controller = dryrun_controller(&temp.path().join("events.jsonl"));
        controller.adopt_result(ImageRecord::from_data_url(png_data_url("YmFzZQ=="), "towel.png"));
        controller.set_prompt_draft("cooler tones");

        let outcome = refine_job(&controller, "cooler tones");
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        let state = controller.snapshot();
        assert!(state.prompt_draft.is_empty());
        assert_eq!(state.last_prompt, "cooler tones");
        Ok(())
    }

    #[test]
    fn batch_accepts_repeated_subjects_and_refinements() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "towel-studio",
            "batch",
            "--subject",
            "a.png",
            "--subject",
            "b.png",
            "--reference",
            "scene.png",
            "--out",
            "runs/demo",
            "--refine",
            "brighter",
            "--refine",
            "softer",
            "--dryrun",
        ])?;
        let Command::Batch(args) = cli.command else {
            anyhow::bail!("expected batch command");
        };
        assert_eq!(args.subjects.len(), 2);
        assert_eq!(args.refinements, vec!["brighter", "softer"]);
        assert!(args.session.dryrun);
        assert!(!args.session.high);
        Ok(())
    }

    #[test]
    fn session_id_comes_from_output_directory() {
        assert_eq!(session_id_for(Path::new("runs/demo")), "demo");
        assert_eq!(session_id_for(Path::new("/")), "session");
    }
}
