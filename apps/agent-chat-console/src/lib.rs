#![cfg_attr(test, allow(clippy::expect_used, clippy::panic))]

use std::io::Write;
use std::sync::Arc;

use agent_chat_gateway::config::{ENV_BASE_URL, normalize_base_url};
use agent_chat_gateway::{ChatGateway, GatewayConfig, HttpGateway};
use agent_chat_session::{
    HealthStatus, MessageRole, RefreshOptions, SessionConfig, SessionStore, StatusPoller, TickOutcome,
};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Parser)]
#[command(name = "agent-chat")]
#[command(about = "Chat with an agent backend and watch its status")]
pub struct ChatCli {
    /// Backend origin, e.g. http://127.0.0.1:8080
    #[arg(long, global = true, env = ENV_BASE_URL)]
    pub base_url: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check backend health
    Health(HealthArgs),
    /// List stored sessions
    Sessions,
    /// List agents with per-agent stores
    Agents,
    /// Print an agent's knowledge graph as JSON
    Kg { agent_id: String },
    /// Print a stored session's conversation
    History { session_id: String },
    /// Print a session's working memory as JSON
    Memory { session_id: String },
    /// Print a session's file listing as JSON
    Files { session_id: String },
    /// Send one message and print the reply
    Send(SendArgs),
    /// Show the component tree, once or continuously
    Status(StatusArgs),
    /// Interactive chat (/new, /load <id>, /sessions, /agent [id], /quit)
    Chat,
}

#[derive(Args)]
pub struct HealthArgs {
    /// Ask the backend to re-check its subsystems first
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args)]
pub struct SendArgs {
    pub text: String,
    /// Continue this session instead of starting a new one
    #[arg(long)]
    pub session: Option<String>,
    /// Route the message to this agent
    #[arg(long)]
    pub agent: Option<String>,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Keep polling until interrupted
    #[arg(long)]
    pub watch: bool,
    /// Show one node instead of the whole tree
    #[arg(long)]
    pub node: Option<String>,
}

pub async fn run() -> Result<()> {
    init_tracing();
    let cli = ChatCli::parse();
    let gateway: Arc<dyn ChatGateway> = Arc::new(HttpGateway::new(gateway_config(
        cli.base_url.as_deref(),
    )?));
    let session_config = SessionConfig::from_env().context("load session config")?;
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Health(args) => run_health(&gateway, &session_config, args, &mut out).await,
        Commands::Sessions => {
            let store = SessionStore::with_config(Arc::clone(&gateway), &session_config);
            store
                .refresh_sessions(RefreshOptions::forced())
                .await
                .context("list sessions")?;
            render::write_sessions(&mut out, &store.snapshot().sessions)?;
            Ok(())
        }
        Commands::Agents => {
            let store = SessionStore::with_config(Arc::clone(&gateway), &session_config);
            store.refresh_agents().await.context("list agents")?;
            render::write_agents(&mut out, &store.snapshot().agents)?;
            Ok(())
        }
        Commands::Kg { agent_id } => {
            let graph = match gateway.agent_knowledge_graph(&agent_id).await {
                Ok(graph) => graph,
                Err(error) if error.status() == Some(404) => {
                    bail!("agent {agent_id} has no knowledge graph")
                }
                Err(error) => {
                    return Err(error)
                        .with_context(|| format!("load knowledge graph for {agent_id}"));
                }
            };
            write_json(&mut out, &graph)
        }
        Commands::History { session_id } => {
            let store = SessionStore::with_config(Arc::clone(&gateway), &session_config);
            store.load_session_history(&session_id).await;
            for message in &store.snapshot().messages {
                render::write_message(&mut out, message)?;
            }
            Ok(())
        }
        Commands::Memory { session_id } => {
            let store = SessionStore::with_config(Arc::clone(&gateway), &session_config);
            let memory = store
                .session_memory(&session_id)
                .await
                .with_context(|| format!("load memory for {session_id}"))?;
            write_json(&mut out, &memory)
        }
        Commands::Files { session_id } => {
            let store = SessionStore::with_config(Arc::clone(&gateway), &session_config);
            let files = store
                .session_files(&session_id)
                .await
                .with_context(|| format!("load files for {session_id}"))?;
            write_json(&mut out, &files)
        }
        Commands::Send(args) => run_send(&gateway, &session_config, args, &mut out).await,
        Commands::Status(args) => run_status(&gateway, &session_config, args, &mut out).await,
        Commands::Chat => {
            drop(out);
            run_chat(&gateway, &session_config).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn gateway_config(base_url: Option<&str>) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::from_env().context("load gateway config")?;
    if let Some(raw) = base_url {
        config.base_url =
            normalize_base_url(raw).with_context(|| format!("invalid --base-url {raw:?}"))?;
    }
    Ok(config)
}

fn write_json(out: &mut impl Write, value: &serde_json::Value) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("encode json")?;
    writeln!(out)?;
    Ok(())
}

async fn run_health(
    gateway: &Arc<dyn ChatGateway>,
    config: &SessionConfig,
    args: HealthArgs,
    out: &mut impl Write,
) -> Result<()> {
    if args.refresh {
        let health = gateway.refresh_health().await.context("refresh health")?;
        render::write_health(out, &health)?;
        return Ok(());
    }
    let store = SessionStore::with_config(Arc::clone(gateway), config);
    let status = store.check_health().await;
    render::write_health_status(out, &status)?;
    if let HealthStatus::Error(message) = status {
        bail!("backend unhealthy: {message}");
    }
    Ok(())
}

async fn run_send(
    gateway: &Arc<dyn ChatGateway>,
    config: &SessionConfig,
    args: SendArgs,
    out: &mut impl Write,
) -> Result<()> {
    let store = SessionStore::with_config(Arc::clone(gateway), config);
    store.select_agent(args.agent.as_deref());
    if let Some(session_id) = args.session.as_deref() {
        store.load_session_history(session_id).await;
    }
    let before = store.snapshot().messages.len();
    if !store.send_message(&args.text).await {
        bail!("nothing to send");
    }

    let state = store.snapshot();
    for message in state.messages.iter().skip(before + 1) {
        render::write_message(out, message)?;
    }
    render::write_usage(out, state.last_usage, state.session_usage_totals)?;
    if let Some(session_id) = &state.session_id {
        writeln!(out, "session: {session_id}")?;
    }
    Ok(())
}

async fn run_status(
    gateway: &Arc<dyn ChatGateway>,
    config: &SessionConfig,
    args: StatusArgs,
    out: &mut impl Write,
) -> Result<()> {
    let poller = StatusPoller::new(Arc::clone(gateway), config.status_poll_interval);
    if !args.watch {
        if poller.tick().await == TickOutcome::Completed {
            render::write_status(out, &poller.snapshot(), args.node.as_deref())?;
        }
        return Ok(());
    }

    let mut updates = poller.subscribe();
    poller.start();
    let mut seen_ticks = 0;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.completed_ticks > seen_ticks {
                    seen_ticks = snapshot.completed_ticks;
                    render::write_status(out, &snapshot, args.node.as_deref())?;
                    out.flush()?;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    poller.stop();
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Message(&'a str),
    New,
    Load(&'a str),
    Sessions,
    /// `None` clears the selection.
    Agent(Option<&'a str>),
    Quit,
    Unknown(&'a str),
    Empty,
}

fn parse_chat_input(line: &str) -> ChatInput<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ChatInput::Message(line);
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));
    match name {
        "new" => ChatInput::New,
        "load" if !rest.is_empty() => ChatInput::Load(rest),
        "sessions" => ChatInput::Sessions,
        "agent" => ChatInput::Agent(Some(rest).filter(|id| !id.is_empty())),
        "quit" | "exit" => ChatInput::Quit,
        _ => ChatInput::Unknown(line),
    }
}

async fn run_chat(gateway: &Arc<dyn ChatGateway>, config: &SessionConfig) -> Result<()> {
    let store = SessionStore::with_config(Arc::clone(gateway), config);
    let status = store.check_health().await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0;

    {
        let mut out = std::io::stdout().lock();
        render::write_health_status(&mut out, &status)?;
        writeln!(
            out,
            "type a message, or /new, /load <id>, /sessions, /agent [id], /quit"
        )?;
    }

    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let input = parse_chat_input(&line);
        let replay = matches!(input, ChatInput::Load(_));
        match input {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::Message(text) => {
                if !store.send_message(text).await {
                    debug!("message not sent; store busy");
                }
            }
            ChatInput::New => {
                debug!("starting a new session");
                store.reset_session();
                printed = 0;
                let mut out = std::io::stdout().lock();
                writeln!(out, "(new session)")?;
                continue;
            }
            ChatInput::Load(session_id) => {
                debug!(session_id, "switching session");
                store.load_session_history(session_id).await;
                printed = 0;
            }
            ChatInput::Sessions => {
                let refreshed = store.refresh_sessions(RefreshOptions::default()).await;
                let mut out = std::io::stdout().lock();
                if let Err(error) = refreshed {
                    writeln!(out, "sessions unavailable: {error}")?;
                }
                render::write_sessions(&mut out, &store.snapshot().sessions)?;
                continue;
            }
            ChatInput::Agent(agent_id) => {
                store.select_agent(agent_id);
                let mut out = std::io::stdout().lock();
                match store.snapshot().selected_agent {
                    Some(agent_id) => writeln!(out, "(talking to {agent_id})")?,
                    None => writeln!(out, "(default agent)")?,
                }
                continue;
            }
            ChatInput::Unknown(command) => {
                let mut out = std::io::stdout().lock();
                writeln!(out, "unknown command {command}")?;
                continue;
            }
        }

        let state = store.snapshot();
        let mut out = std::io::stdout().lock();
        for message in state.messages.iter().skip(printed) {
            if replay || message.role != MessageRole::User {
                render::write_message(&mut out, message)?;
            }
        }
        printed = state.messages.len();
        render::write_usage(&mut out, state.last_usage, state.session_usage_totals)?;
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use clap::error::ErrorKind;

    use super::{ChatCli, ChatInput, Commands, parse_chat_input};

    #[test]
    fn cli_requires_subcommand() {
        let err = match ChatCli::try_parse_from(["agent-chat"]) {
            Ok(_) => panic!("expected missing subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        let err = match ChatCli::try_parse_from(["agent-chat", "unknown-subcommand"]) {
            Ok(_) => panic!("expected invalid subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn send_accepts_session_agent_and_global_base_url() {
        let cli = ChatCli::try_parse_from([
            "agent-chat",
            "send",
            "hello there",
            "--session",
            "s-1",
            "--agent",
            "news",
            "--base-url",
            "http://10.0.0.2:8080",
        ])
        .unwrap_or_else(|err| panic!("parse: {err}"));

        assert_eq!(cli.base_url.as_deref(), Some("http://10.0.0.2:8080"));
        match cli.command {
            Commands::Send(args) => {
                assert_eq!(args.text, "hello there");
                assert_eq!(args.session.as_deref(), Some("s-1"));
                assert_eq!(args.agent.as_deref(), Some("news"));
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn status_flags_parse() {
        let cli = ChatCli::try_parse_from(["agent-chat", "status", "--watch", "--node", "http0"])
            .unwrap_or_else(|err| panic!("parse: {err}"));
        match cli.command {
            Commands::Status(args) => {
                assert!(args.watch);
                assert_eq!(args.node.as_deref(), Some("http0"));
            }
            _ => panic!("expected status"),
        }
    }

    #[test]
    fn chat_input_commands() {
        assert_eq!(parse_chat_input("  "), ChatInput::Empty);
        assert_eq!(parse_chat_input(" hi there "), ChatInput::Message("hi there"));
        assert_eq!(parse_chat_input("/new"), ChatInput::New);
        assert_eq!(parse_chat_input("/load  s-1 "), ChatInput::Load("s-1"));
        assert_eq!(parse_chat_input("/load"), ChatInput::Unknown("/load"));
        assert_eq!(parse_chat_input("/sessions"), ChatInput::Sessions);
        assert_eq!(parse_chat_input("/agent  news "), ChatInput::Agent(Some("news")));
        assert_eq!(parse_chat_input("/agent"), ChatInput::Agent(None));
        assert_eq!(parse_chat_input("/quit"), ChatInput::Quit);
        assert_eq!(parse_chat_input("/nope"), ChatInput::Unknown("/nope"));
    }
}
