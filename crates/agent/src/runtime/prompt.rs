//! Prompt assembly.
//!
//! Order: identity + channel steering, recent session history inside the
//! context budget (with two-stage pruning), matched or force-routed skill
//! templates, then advisor notes. Comm-origin requests are framed as
//! non-interactive: the sender cannot answer clarifying questions.

use nebo_domain::chat::{Message, Role};
use nebo_domain::config::Config;
use nebo_domain::origin::Origin;
use nebo_sessions::SessionManager;
use nebo_skills::{SkillRegistry, SkillTemplate};

use super::prune;
use super::runner::RunRequest;

const IDENTITY: &str = "You are Nebo, a local-first personal AI assistant. \
You run on the user's own machine, keep their data local, and act through \
the tools you are given.";

fn channel_steering(origin: Origin) -> &'static str {
    match origin {
        Origin::User => {
            "You are chatting in the web UI. Use markdown where it helps; \
             match the length of your answer to the weight of the question."
        }
        Origin::System => {
            "This is a scheduled background run. Produce the requested \
             output only; there is no user waiting to reply."
        }
        Origin::Comm => {
            "This message arrived from another agent over NeboLoop. The \
             sender cannot answer clarifying questions; respond with your \
             best complete answer in plain text."
        }
        Origin::Voice => {
            "You are speaking aloud. Answer in short conversational \
             sentences without markdown, lists, or code blocks."
        }
    }
}

/// Resolve the skill templates for a request: a force-routed skill wins;
/// otherwise trigger matching decides, highest priority first.
pub fn resolve_skills(skills: &SkillRegistry, req: &RunRequest) -> Vec<SkillTemplate> {
    if let Some(name) = &req.force_skill {
        return match skills.by_name(name) {
            Some(skill) => vec![skill],
            None => {
                tracing::warn!(skill = %name, "force-routed skill not found");
                Vec::new()
            }
        };
    }
    skills.matching(&req.prompt)
}

/// Build the system prompt for a request.
pub fn build_system_prompt(
    req: &RunRequest,
    skills: &[SkillTemplate],
    advisor_notes: &[(String, String)],
) -> String {
    if let Some(system) = &req.system {
        return system.clone();
    }

    let mut out = String::from(IDENTITY);
    out.push_str("\n\n");
    out.push_str(channel_steering(req.origin));

    for skill in skills {
        out.push_str("\n\n## Skill: ");
        out.push_str(&skill.name);
        out.push('\n');
        out.push_str(&skill.body);
    }

    if !advisor_notes.is_empty() {
        out.push_str("\n\n## Deliberation notes\n");
        for (name, note) in advisor_notes {
            out.push_str(&format!("- {name}: {note}\n"));
        }
    }

    out
}

/// Assemble the full message list: system, pruned history window, then
/// the live prompt.
pub fn assemble_messages(
    config: &Config,
    sessions: &SessionManager,
    req: &RunRequest,
    system_prompt: &str,
) -> Vec<Message> {
    let budget = config.runner.context_window_chars;
    let history = if req.skip_memory {
        Vec::new()
    } else {
        sessions.recent_messages(&req.session_key, budget)
    };

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));
    for msg in &history {
        let role = match msg.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            "system" => Role::System,
            _ => continue,
        };
        if role == Role::Tool {
            let call_id = msg
                .metadata
                .as_ref()
                .and_then(|m| m.get("call_id"))
                .and_then(|v| v.as_str());
            match call_id {
                Some(id) => messages.push(Message::tool_result(id, &msg.content)),
                // Orphan tool lines have no call to attach to.
                None => continue,
            }
            continue;
        }
        messages.push(Message {
            role,
            content: nebo_domain::chat::MessageContent::Text(msg.content.clone()),
        });
    }
    messages.push(Message::user(&req.prompt));

    prune::prune_messages(&messages, &config.runner.pruning, budget)
}
