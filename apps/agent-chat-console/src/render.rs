use std::io::{self, Write};

use agent_chat_gateway::{AgentInfo, HealthResponse, SessionInfo, ToolStep, TreeNode, UsageInfo};
use agent_chat_session::{ChatMessage, HealthStatus, MessageRole, StatusSnapshot};

pub fn write_message(out: &mut impl Write, message: &ChatMessage) -> io::Result<()> {
    let label = match message.role {
        MessageRole::User => "you",
        MessageRole::Assistant => "agent",
        MessageRole::Error => "error",
        MessageRole::System => "system",
    };
    writeln!(out, "[{label}] {}", message.content)?;
    for step in message.steps.iter().flatten() {
        write_step(out, step)?;
    }
    Ok(())
}

fn write_step(out: &mut impl Write, step: &ToolStep) -> io::Result<()> {
    let arguments = serde_json::Value::Object(step.arguments.clone());
    let marker = if step.is_failure() { " (failed)" } else { "" };
    writeln!(out, "    -> {}({arguments}){marker}", step.tool_name)?;
    if !step.result.is_empty() {
        for line in step.result.lines() {
            writeln!(out, "       {line}")?;
        }
    }
    Ok(())
}

pub fn write_usage(
    out: &mut impl Write,
    last: Option<UsageInfo>,
    totals: Option<UsageInfo>,
) -> io::Result<()> {
    if let Some(usage) = last {
        write!(
            out,
            "tokens: {} in / {} out",
            usage.prompt_tokens, usage.completion_tokens
        )?;
        if let Some(totals) = totals {
            write!(
                out,
                " (session {} total, ${:.4})",
                totals.total_tokens, totals.estimated_cost_usd
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_health_status(out: &mut impl Write, status: &HealthStatus) -> io::Result<()> {
    match status {
        HealthStatus::Ok(health) => write_health(out, health),
        HealthStatus::Error(message) => writeln!(out, "health: error ({message})"),
        other => writeln!(out, "health: {}", other.label()),
    }
}

pub fn write_health(out: &mut impl Write, health: &HealthResponse) -> io::Result<()> {
    writeln!(out, "health: {}", health.status)?;
    if let Some(bot_id) = &health.bot_id {
        writeln!(out, "  bot: {bot_id}")?;
    }
    match (&health.llm_provider, &health.llm_model) {
        (Some(provider), Some(model)) => writeln!(out, "  llm: {provider}/{model}")?,
        (Some(provider), None) => writeln!(out, "  llm: {provider}")?,
        _ => {}
    }
    if let Some(uptime_ms) = health.uptime_ms {
        writeln!(out, "  uptime: {}s", uptime_ms / 1_000)?;
    }
    if let Some(count) = health.session_count {
        writeln!(out, "  sessions: {count}")?;
    }
    if !health.enabled_tools.is_empty() {
        writeln!(out, "  tools: {}", health.enabled_tools.join(", "))?;
    }
    Ok(())
}

pub fn write_sessions(out: &mut impl Write, sessions: &[SessionInfo]) -> io::Result<()> {
    if sessions.is_empty() {
        return writeln!(out, "no sessions");
    }
    for session in sessions {
        write!(out, "{}  updated {}", session.session_id, session.updated_at)?;
        if let Some(agent) = &session.last_agent {
            write!(out, "  agent {agent}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_agents(out: &mut impl Write, agents: &[AgentInfo]) -> io::Result<()> {
    if agents.is_empty() {
        return writeln!(out, "no agents");
    }
    for agent in agents {
        writeln!(
            out,
            "{}  {} session(s)  stores [{}]",
            agent.agent_id,
            agent.session_count,
            agent.store_types.join(", ")
        )?;
    }
    Ok(())
}

pub fn write_tree(out: &mut impl Write, node: &TreeNode) -> io::Result<()> {
    write_tree_at(out, node, 0)
}

fn write_tree_at(out: &mut impl Write, node: &TreeNode, depth: usize) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    writeln!(out, "{indent}{} [{}] {}", node.id, node.status, node.name)?;
    for child in &node.children {
        write_tree_at(out, child, depth + 1)?;
    }
    Ok(())
}

pub fn write_node_details(out: &mut impl Write, node: &TreeNode) -> io::Result<()> {
    writeln!(out, "{} ({})", node.name, node.id)?;
    writeln!(out, "  status: {}", node.status)?;
    for (key, value) in &node.details {
        writeln!(out, "  {key}: {value}")?;
    }
    if !node.children.is_empty() {
        let ids: Vec<&str> = node.children.iter().map(|child| child.id.as_str()).collect();
        writeln!(out, "  children: {}", ids.join(", "))?;
    }
    Ok(())
}

/// One poll result: health line, tree (or the requested node), errors.
pub fn write_status(
    out: &mut impl Write,
    snapshot: &StatusSnapshot,
    node_id: Option<&str>,
) -> io::Result<()> {
    if let Some(at) = snapshot.last_refreshed_at {
        writeln!(out, "-- {}", at.format("%H:%M:%S"))?;
    }
    match (&snapshot.health, &snapshot.health_error) {
        (_, Some(error)) => writeln!(out, "health: error ({error})")?,
        (Some(health), None) => writeln!(out, "health: {}", health.status)?,
        (None, None) => writeln!(out, "health: unknown")?,
    }
    if let Some(error) = &snapshot.tree_error {
        writeln!(out, "tree: error ({error})")?;
    }
    match node_id {
        Some(id) => match snapshot.find_node(id) {
            Some(node) => write_node_details(out, node)?,
            None => writeln!(out, "node {id} not found")?,
        },
        None => {
            if let Some(tree) = snapshot.tree.as_deref() {
                write_tree(out, tree)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn render(write: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buffer = Vec::new();
        write(&mut buffer).expect("write to buffer");
        String::from_utf8(buffer).expect("utf8")
    }

    fn tree() -> TreeNode {
        serde_json::from_value(json!({
            "id": "supervisor",
            "name": "Supervisor",
            "status": "running",
            "children": [
                { "id": "agents", "name": "Agents", "status": "running", "uptime_ms": 42, "children": [
                    { "id": "echo", "name": "Echo", "status": "stopped", "children": [] }
                ] }
            ]
        }))
        .expect("tree")
    }

    #[test]
    fn assistant_message_lists_steps_and_flags_failures() {
        let mut arguments = serde_json::Map::new();
        arguments.insert("q".to_string(), json!("x"));
        let mut failed = ToolStep::pending("t2", "fetch", serde_json::Map::new());
        failed.result = "Error: timed out".to_string();
        let mut ok = ToolStep::pending("t1", "search", arguments);
        ok.result = "R".to_string();
        let message = ChatMessage::assistant("a", "done", vec![ok, failed]);

        let text = render(|out| write_message(out, &message));

        assert_eq!(
            text,
            "[agent] done\n    -> search({\"q\":\"x\"})\n       R\n    -> fetch({}) (failed)\n       Error: timed out\n"
        );
    }

    #[test]
    fn tree_is_indented_by_depth() {
        let text = render(|out| write_tree(out, &tree()));
        assert_eq!(
            text,
            "supervisor [running] Supervisor\n  agents [running] Agents\n    echo [stopped] Echo\n"
        );
    }

    #[test]
    fn status_shows_requested_node_or_missing_marker() {
        let snapshot = StatusSnapshot {
            tree: Some(Arc::new(tree())),
            tree_error: Some("HTTP 503".to_string()),
            ..StatusSnapshot::default()
        };

        let found = render(|out| write_status(out, &snapshot, Some("agents")));
        assert!(found.contains("health: unknown"));
        assert!(found.contains("tree: error (HTTP 503)"));
        assert!(found.contains("uptime_ms: 42"));
        assert!(found.contains("children: echo"));

        let missing = render(|out| write_status(out, &snapshot, Some("ghost")));
        assert!(missing.contains("node ghost not found"));
    }

    #[test]
    fn usage_line_is_omitted_when_unknown() {
        assert_eq!(render(|out| write_usage(out, None, None)), "");
        let usage = UsageInfo {
            prompt_tokens: 3,
            completion_tokens: 5,
            total_tokens: 8,
            estimated_cost_usd: 0.0,
        };
        assert_eq!(
            render(|out| write_usage(out, Some(usage), None)),
            "tokens: 3 in / 5 out\n"
        );
    }
}
