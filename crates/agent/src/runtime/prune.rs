//! Two-stage context pruning.
//!
//! Stage 1 (soft trim): once the assembled context passes
//! `soft_trim_ratio` of the budget, unprotected tool results longer than
//! `min_prunable_chars` are cut to head + tail around an elision marker.
//! Stage 2 (hard clear): past `hard_clear_ratio`, unprotected tool
//! results are replaced wholesale by a placeholder. Protected messages
//! are the last `keep_last_assistants` assistant messages (and anything
//! after them) plus every user message. The stages are monotone: a
//! hard-cleared result is never restored by a later assembly step.

use nebo_domain::chat::{ContentPart, Message, MessageContent, Role};
use nebo_domain::config::PruningConfig;

/// Marker inserted between head and tail of a soft-trimmed result.
pub const ELISION_MARKER: &str = "\n[... output elided ...]\n";

/// Replacement body for a hard-cleared result.
pub const CLEARED_PLACEHOLDER: &str = "[old tool output cleared]";

/// Prune a message list against a character budget. Returns a new list;
/// the input is never mutated.
pub fn prune_messages(
    messages: &[Message],
    config: &PruningConfig,
    budget_chars: usize,
) -> Vec<Message> {
    let total: usize = messages.iter().map(|m| m.content.char_len()).sum();
    let soft_threshold = (budget_chars as f64 * config.soft_trim_ratio) as usize;
    let hard_threshold = (budget_chars as f64 * config.hard_clear_ratio) as usize;

    if total < soft_threshold {
        return messages.to_vec();
    }
    let hard = total >= hard_threshold;

    let cutoff = protection_cutoff(messages, config.keep_last_assistants);

    let mut out = Vec::with_capacity(messages.len());
    for (i, msg) in messages.iter().enumerate() {
        let protected = i >= cutoff || msg.role == Role::User;
        if protected || msg.role != Role::Tool {
            out.push(msg.clone());
            continue;
        }
        out.push(Message {
            role: msg.role,
            content: prune_content(&msg.content, config, hard),
        });
    }
    out
}

/// Index before which tool results are prunable; everything at or after
/// it is protected. Too few assistant messages protects everything.
fn protection_cutoff(messages: &[Message], keep_last_assistants: usize) -> usize {
    if keep_last_assistants == 0 {
        return messages.len();
    }
    let mut seen = 0;
    for (i, msg) in messages.iter().enumerate().rev() {
        if msg.role == Role::Assistant {
            seen += 1;
            if seen >= keep_last_assistants {
                return i;
            }
        }
    }
    messages.len()
}

fn prune_content(content: &MessageContent, config: &PruningConfig, hard: bool) -> MessageContent {
    match content {
        MessageContent::Text(text) => {
            MessageContent::Text(prune_text(text, config, hard))
        }
        MessageContent::Parts(parts) => MessageContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => ContentPart::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: prune_text(content, config, hard),
                        is_error: *is_error,
                    },
                    other => other.clone(),
                })
                .collect(),
        ),
    }
}

fn prune_text(text: &str, config: &PruningConfig, hard: bool) -> String {
    if text.len() < config.min_prunable_chars {
        return text.to_owned();
    }
    if hard {
        return CLEARED_PLACEHOLDER.to_owned();
    }

    // Soft trim: keep head and tail on char boundaries.
    let head_end = floor_char_boundary(text, config.head_chars);
    let tail_start = ceil_char_boundary(text, text.len().saturating_sub(config.tail_chars));
    if head_end >= tail_start {
        return text.to_owned();
    }
    format!(
        "{}{}{}",
        &text[..head_end],
        ELISION_MARKER,
        &text[tail_start..]
    )
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PruningConfig {
        PruningConfig {
            soft_trim_ratio: 0.5,
            hard_clear_ratio: 0.8,
            keep_last_assistants: 1,
            min_prunable_chars: 100,
            head_chars: 20,
            tail_chars: 20,
        }
    }

    fn tool_msg(len: usize) -> Message {
        Message::tool_result("tc", &"x".repeat(len))
    }

    fn tool_content(msg: &Message) -> &str {
        match &msg.content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult { content, .. } => content,
                _ => panic!("expected tool result"),
            },
            MessageContent::Text(t) => t,
        }
    }

    /// History shape: old tool result, then an assistant answer (protected
    /// window), then the live user turn.
    fn history(tool_len: usize) -> Vec<Message> {
        vec![
            tool_msg(tool_len),
            Message::assistant("done"),
            Message::user("next question"),
        ]
    }

    #[test]
    fn under_soft_threshold_nothing_changes() {
        // total ≈ 220, budget 1000 → soft threshold 500.
        let msgs = history(200);
        let out = prune_messages(&msgs, &config(), 1_000);
        assert_eq!(tool_content(&out[0]).len(), 200);
    }

    #[test]
    fn soft_trim_keeps_head_and_tail() {
        // total ≈ 620 with budget 1000 → past soft (500), below hard (800).
        let msgs = history(600);
        let out = prune_messages(&msgs, &config(), 1_000);
        let pruned = tool_content(&out[0]);
        assert!(pruned.len() < 600);
        assert!(pruned.contains(ELISION_MARKER.trim()));
        assert!(pruned.starts_with(&"x".repeat(20)));
        assert!(pruned.ends_with(&"x".repeat(20)));
    }

    #[test]
    fn hard_clear_replaces_wholesale() {
        // total ≈ 920 with budget 1000 → past hard (800).
        let msgs = history(900);
        let out = prune_messages(&msgs, &config(), 1_000);
        assert_eq!(tool_content(&out[0]), CLEARED_PLACEHOLDER);
    }

    #[test]
    fn protected_window_is_untouched() {
        let msgs = vec![
            tool_msg(900),
            Message::assistant("old answer"),
            tool_msg(900),
            Message::assistant("latest answer"),
            Message::user("q"),
        ];
        let mut cfg = config();
        cfg.keep_last_assistants = 1;
        let out = prune_messages(&msgs, &cfg, 1_000);

        // Both tool results sit before the last assistant message, so
        // both are prunable.
        assert_eq!(tool_content(&out[0]), CLEARED_PLACEHOLDER);
        assert_eq!(tool_content(&out[2]), CLEARED_PLACEHOLDER);

        let msgs2 = vec![
            Message::assistant("latest answer"),
            tool_msg(900),
            Message::user("q"),
        ];
        let out2 = prune_messages(&msgs2, &cfg, 1_000);
        assert_eq!(tool_content(&out2[1]).len(), 900, "inside protection window");
    }

    #[test]
    fn user_messages_never_pruned() {
        let big_user = Message::user(&"u".repeat(900));
        let msgs = vec![big_user, Message::assistant("a"), Message::user("q")];
        let out = prune_messages(&msgs, &config(), 1_000);
        match &out[0].content {
            MessageContent::Text(t) => assert_eq!(t.len(), 900),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn small_tool_results_survive_hard_clear() {
        let msgs = vec![
            tool_msg(50), // below min_prunable_chars
            Message::user(&"u".repeat(900)),
            Message::assistant("a"),
            Message::user("q"),
        ];
        let out = prune_messages(&msgs, &config(), 1_000);
        assert_eq!(tool_content(&out[0]).len(), 50);
    }

    #[test]
    fn pruning_is_monotone_across_stages() {
        // Once hard-cleared, re-running assembly at any stage never
        // restores the content.
        let msgs = history(900);
        let cleared = prune_messages(&msgs, &config(), 1_000);
        assert_eq!(tool_content(&cleared[0]), CLEARED_PLACEHOLDER);

        let again_soft = prune_messages(&cleared, &config(), 10_000);
        assert_eq!(tool_content(&again_soft[0]), CLEARED_PLACEHOLDER);

        let again_hard = prune_messages(&cleared, &config(), 100);
        assert_eq!(tool_content(&again_hard[0]), CLEARED_PLACEHOLDER);
    }
}
