use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use docstream_core::models::{ApplyOutcome, Conversation, SessionState, StreamReconciler};
use docstream_core::services::{
    Attachment, SendStreamRequest, StreamRelay, build_user_message, subscribe,
};
use docstream_core::settings::AppSettings;

const TITLE_CHARS: usize = 50;

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Model id; defaults to the configured model
    #[arg(long)]
    model: Option<String>,
    /// System instruction sent with the request
    #[arg(long)]
    system: Option<String>,
    /// Continue a saved conversation
    #[arg(long)]
    conversation: Option<String>,
    /// Attach a file (repeatable)
    #[arg(long = "attach", short = 'a')]
    attachments: Vec<PathBuf>,
    /// Keep the conversation in memory only
    #[arg(long)]
    ephemeral: bool,
    /// The prompt
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,
}

pub async fn run(args: ChatArgs, settings: AppSettings) -> Result<()> {
    let repository = crate::conversation_repository(args.ephemeral)?;
    let prompt = args.prompt.join(" ");
    let model = args
        .model
        .unwrap_or_else(|| settings.relay.default_model.clone());

    let conversation = match args.conversation.as_deref() {
        Some(id) => match repository.load_one(id).await? {
            Some(data) => Conversation::from_data(data)?,
            None => bail!("No conversation with id {id}"),
        },
        None => Conversation::new(
            Uuid::new_v4().to_string(),
            prompt.chars().take(TITLE_CHARS).collect::<String>(),
            &model,
        ),
    };
    let conversation_id = conversation.id().to_string();
    let mut reconciler = StreamReconciler::new(conversation);

    let attachments: Vec<Attachment> = args
        .attachments
        .into_iter()
        .map(Attachment::from_path)
        .collect();
    let limits = settings.documents;
    let (user_message, rejected) =
        tokio::task::spawn_blocking(move || build_user_message(&prompt, &attachments, &limits))
            .await
            .context("Attachment processing panicked")?;
    for error in &rejected {
        eprintln!("skipped attachment: {error}");
    }
    if !user_message.has_content() {
        bail!("Nothing to send: the prompt is empty and no attachment was accepted");
    }

    let handle = reconciler.begin_send(user_message, &model)?;
    let mut request = SendStreamRequest::new(&model, reconciler.conversation().messages().to_vec())
        .with_conversation_id(&conversation_id);
    if let Some(system) = args.system {
        request = request.with_system_instruction(system);
    }

    let relay = StreamRelay::new(settings.relay)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = subscribe(&handle, relay.send(request), tx);

    let mut printed = String::new();
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let outcome = reconciler.apply(envelope.session_id, &envelope.event);
                if outcome == ApplyOutcome::Stale {
                    continue;
                }
                if let Some(last) = reconciler.conversation().last() && !last.is_placeholder() {
                    render_progress(&mut stdout, &mut printed, &last.text())?;
                }
                if let ApplyOutcome::Finished(state) = outcome {
                    if state == SessionState::Error {
                        warn!(conversation_id = %conversation_id, "Response ended with an error");
                    }
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                subscription.detach();
                reconciler.cancel();
                eprintln!("\ncancelled");
                break;
            }
        }
    }
    writeln!(stdout)?;

    let conversation = reconciler.into_conversation();
    repository
        .save(&conversation_id, conversation.to_data()?)
        .await
        .context("Failed to save conversation")?;
    info!(
        conversation_id = %conversation_id,
        messages = conversation.message_count(),
        "Conversation saved"
    );
    Ok(())
}

/// Print only what is new since the last update. Replaced content is reprinted whole.
fn render_progress(out: &mut impl Write, printed: &mut String, current: &str) -> Result<()> {
    match current.strip_prefix(printed.as_str()) {
        Some(suffix) => write!(out, "{suffix}")?,
        None => write!(out, "\n{current}")?,
    }
    out.flush()?;
    *printed = current.to_string();
    Ok(())
}
