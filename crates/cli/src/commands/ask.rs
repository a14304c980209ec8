//! `loresmith ask`: One question, or an interactive session on one thread.

use std::io::Write;
use std::sync::Arc;

use loresmith_config::AppConfig;
use loresmith_core::error::{HistoryError, ProviderError};
use loresmith_core::history::HistoryStore;
use loresmith_core::message::{Message, ThreadId};
use loresmith_core::persona::{Persona, PersonaKind};
use loresmith_providers::{BackendRouter, build_user_backend};
use loresmith_workflow::{AgenticWorkflow, Complexity, SubQueryStatus, TurnState, WorkflowSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Flags of `loresmith ask`.
#[derive(Debug, Default)]
pub struct AskOptions {
    pub persona: Option<String>,
    pub thread: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub stream: bool,
    pub show_plan: bool,
}

pub async fn run(message: Option<String>, options: AskOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let session = Session::build(&config, &options)?;

    match message {
        Some(question) => {
            session.ask(&question, &options).await?;
        }
        None => interactive(&session, &options).await?,
    }

    Ok(())
}

/// One thread's workflow plus its history store.
struct Session {
    workflow: AgenticWorkflow,
    history: Arc<dyn HistoryStore>,
    thread_id: ThreadId,
}

impl Session {
    fn build(config: &AppConfig, options: &AskOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let user = build_user_backend(config, options.provider.as_deref(), options.model.as_deref())
            .map_err(|e| missing_key_hint(config, e))?;
        let router = Arc::new(BackendRouter::from_config(config, user));
        let retriever = loresmith_memory::build_retriever(config)?;

        let workflow = AgenticWorkflow::new(router, retriever)
            .with_settings(WorkflowSettings::from_config(config))
            .with_persona(Persona::builtin(resolve_persona(config, options.persona.as_deref())?));

        let thread_id = options
            .thread
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ThreadId::from)
            .unwrap_or_else(ThreadId::new);

        Ok(Self {
            workflow,
            history: loresmith_memory::build_history(config),
            thread_id,
        })
    }

    /// Run one turn, print the answer and store the exchange.
    async fn ask(&self, question: &str, options: &AskOptions) -> Result<String, Box<dyn std::error::Error>> {
        let history = match self.history.load(&self.thread_id).await {
            Ok(history) => history,
            Err(HistoryError::InvalidThread(reason)) => return Err(reason.into()),
            Err(e) => {
                warn!(thread_id = %self.thread_id, error = %e, "History unavailable, starting fresh");
                Vec::new()
            }
        };

        let persona = self.workflow.persona();
        eprint!("  {} {}...", persona.icon, persona.thinking_text);

        let (answer, state) = if options.stream {
            let mut turn = self
                .workflow
                .process_turn_stream(question, &history, &self.thread_id)
                .await;
            clear_status();

            let mut answer = String::new();
            let mut stdout = std::io::stdout();
            while let Some(chunk) = turn.chunks.recv().await {
                print!("{chunk}");
                stdout.flush()?;
                answer.push_str(&chunk);
            }
            println!();
            (answer, turn.state)
        } else {
            let outcome = self.workflow.process_turn(question, &history, &self.thread_id).await;
            clear_status();
            println!("{}", outcome.answer);
            (outcome.answer, outcome.state)
        };

        if options.show_plan {
            for line in plan_lines(&state) {
                eprintln!("{line}");
            }
        }

        let exchange = vec![Message::user(question), Message::assistant(&answer)];
        if let Err(e) = self.history.append(&self.thread_id, exchange).await {
            warn!(thread_id = %self.thread_id, error = %e, "Failed to store exchange");
        }

        Ok(answer)
    }
}

async fn interactive(session: &Session, options: &AskOptions) -> Result<(), Box<dyn std::error::Error>> {
    let persona = session.workflow.persona();
    let user = session.workflow.router().user_backend();

    println!();
    println!("  {} {}", persona.icon, persona.name);
    println!();
    println!("  Backend:   {}", user.label());
    println!("  Corpus:    {}", session.workflow.retriever_name());
    println!("  Thread:    {}", session.thread_id);
    println!();
    println!("  {}", persona.greeting);
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        println!();
        session.ask(question, options).await?;
        println!();
    }

    println!();
    println!("  Thread saved as {}", session.thread_id);
    Ok(())
}

fn clear_status() {
    eprint!("\r\x1b[2K");
}

/// Flag first, then config.
fn resolve_persona(config: &AppConfig, flag: Option<&str>) -> Result<PersonaKind, Box<dyn std::error::Error>> {
    match flag {
        Some(name) => Ok(name.parse::<PersonaKind>()?),
        None => Ok(config.persona.kind()?),
    }
}

fn missing_key_hint(config: &AppConfig, error: ProviderError) -> Box<dyn std::error::Error> {
    if !matches!(error, ProviderError::NotConfigured(_)) {
        return error.into();
    }
    warn!(provider = %config.default_provider, "No API key for the user backend");
    let path = AppConfig::config_dir().join("config.toml");
    format!(
        "{error}\n\n  Set LORESMITH_API_KEY (or the provider's own key variable),\n  \
         or add api_key to {}.\n  Local providers (ollama, vllm, llamacpp) need no key.",
        path.display()
    )
    .into()
}

/// Human-readable outline of how a turn was resolved.
fn plan_lines(state: &TurnState) -> Vec<String> {
    let mut lines = vec![format!("  Plan: {} ({} subqueries)", state.complexity, state.subqueries.len())];

    if state.complexity == Complexity::Composite {
        for sq in &state.subqueries {
            let marker = match sq.status() {
                SubQueryStatus::Complete => "ok",
                SubQueryStatus::Failed => "failed",
                _ => "pending",
            };
            let refined = if sq.was_refined() { " (refined)" } else { "" };
            lines.push(format!("    {}. [{marker}] {}{refined}", sq.index + 1, sq.text));
        }
    }

    let sources = state.sources();
    if !sources.is_empty() {
        lines.push(format!("  Sources: {}", sources.join(", ")));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_flag_overrides_config() {
        let config = AppConfig::default();
        assert_eq!(resolve_persona(&config, Some("devil")).unwrap(), PersonaKind::Devil);
        assert_eq!(resolve_persona(&config, None).unwrap(), config.persona.kind().unwrap());
    }

    #[test]
    fn unknown_persona_is_rejected() {
        let err = resolve_persona(&AppConfig::default(), Some("bard")).unwrap_err();
        assert!(err.to_string().contains("Unknown persona"));
    }

    #[test]
    fn atomic_plan_lists_sources_only() {
        let mut state = TurnState::new(ThreadId::from("t"), "Who founded Lyria?", vec![]);
        let mut sq = loresmith_workflow::SubQuery::new(0, "Who founded Lyria?");
        sq.sources = vec!["chronicle.txt".into()];
        state.subqueries.push(sq);

        let lines = plan_lines(&state);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("atomic"));
        assert_eq!(lines[1], "  Sources: chronicle.txt");
    }

    #[test]
    fn composite_plan_lists_each_subquery() {
        let mut state = TurnState::new(ThreadId::from("t"), "q", vec![]);
        state.complexity = Complexity::Composite;
        state.subqueries.push(loresmith_workflow::SubQuery::new(0, "first"));
        state.subqueries.push(loresmith_workflow::SubQuery::new(1, "second"));

        let lines = plan_lines(&state);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "    1. [pending] first");
        assert_eq!(lines[2], "    2. [pending] second");
    }

    #[test]
    fn thread_flag_is_trimmed() {
        let mut config = AppConfig::default();
        config.default_provider = "ollama".into();
        config.retrieval.backend = "none".into();
        config.routing.steps.clear();
        let options = AskOptions {
            thread: Some("  lore-1  ".into()),
            ..Default::default()
        };
        let session = Session::build(&config, &options).unwrap();
        assert_eq!(session.thread_id.as_str(), "lore-1");
    }
}
