//! Initial-prompt composition: pending mail + role system prompt + agent
//! memory + the caller's own prompt, concatenated in that order (§4.4
//! step 6 of the spec).

const MEMORY_LIMIT: i64 = 10;

/// Render a role's system-prompt block. Unknown roles fall back to a
/// generic block rather than an empty one, so every worker gets some
/// framing even if the caller passes a role this server doesn't know
/// about yet.
pub fn role_prompt_block(role: &str) -> String {
    let body = match role {
        "fixer" => {
            "You are the fixer in a cooperative swarm. Apply the smallest \
             change that resolves the reported failures; do not refactor \
             unrelated code."
        }
        "verifier" => {
            "You are a verifier in a cooperative swarm. Run the project's \
             quality gates, report concrete failures back to the fixer via \
             the blackboard, and do not edit files yourself."
        }
        "lead" => {
            "You are the team lead. Coordinate the swarm's other workers, \
             read the blackboard for status, and issue directives."
        }
        _ => "You are a worker in a cooperative swarm. Follow the objective given to you.",
    };
    format!("## Role\n{body}\n")
}

fn render_mail_block(messages: &[String]) -> Option<String> {
    if messages.is_empty() {
        return None;
    }
    let mut block = String::from("## Pending mail\n");
    for msg in messages {
        block.push_str("- ");
        block.push_str(msg);
        block.push('\n');
    }
    Some(block)
}

fn render_memory_block(entries: &[String]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let mut block = String::from("## Recent memory\n");
    for (i, entry) in entries.iter().take(MEMORY_LIMIT as usize).enumerate() {
        block.push_str(&format!("{}. {entry}\n", i + 1));
    }
    Some(block)
}

/// Concatenate the composed blocks in the order the spec mandates: mail,
/// role, memory, then the caller's own prompt.
pub fn compose_initial_prompt(
    mail: &[String],
    role: &str,
    memory: &[String],
    caller_prompt: Option<&str>,
) -> String {
    let mut parts = Vec::new();
    if let Some(block) = render_mail_block(mail) {
        parts.push(block);
    }
    parts.push(role_prompt_block(role));
    if let Some(block) = render_memory_block(memory) {
        parts.push(block);
    }
    if let Some(p) = caller_prompt {
        parts.push(p.to_string());
    }
    parts.join("\n")
}

/// The continuation prompt injected when a worker is respawned with
/// `--resume`. Open question in the spec: whether this should be
/// suppressed when the worker's last observed event was `result`. We
/// always inject it — a resumed worker has, by definition, lost its
/// in-memory turn state even if its last event looked terminal, so the
/// continuation framing is harmless and keeps behavior uniform across
/// restart causes (crash mid-turn vs. clean idle).
pub const RESUME_CONTINUATION_PROMPT: &str =
    "Continue from where you left off. The server was restarted.";

/// Prefixed onto the continuation summary handed to a tmux worker's
/// replacement pane after a context-size rollover (§4.4 "Tmux/native
/// spawn").
pub const ROLLOVER_CONTINUATION_PROMPT: &str =
    "Your previous pane was rotated out because it approached its context \
     limit. Continue the same task using the summary below; do not repeat \
     work already described as done.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_in_mail_role_memory_caller_order() {
        let prompt = compose_initial_prompt(
            &["hi".to_string()],
            "fixer",
            &["did X".to_string()],
            Some("fix the bug"),
        );
        let mail_idx = prompt.find("Pending mail").unwrap();
        let role_idx = prompt.find("Role").unwrap();
        let memory_idx = prompt.find("Recent memory").unwrap();
        let caller_idx = prompt.find("fix the bug").unwrap();
        assert!(mail_idx < role_idx);
        assert!(role_idx < memory_idx);
        assert!(memory_idx < caller_idx);
    }

    #[test]
    fn omits_empty_blocks() {
        let prompt = compose_initial_prompt(&[], "verifier", &[], None);
        assert!(!prompt.contains("Pending mail"));
        assert!(!prompt.contains("Recent memory"));
        assert!(prompt.contains("verifier"));
    }

    #[test]
    fn memory_block_caps_at_ten_entries() {
        let entries: Vec<String> = (0..25).map(|i| format!("entry {i}")).collect();
        let prompt = compose_initial_prompt(&[], "fixer", &entries, None);
        assert_eq!(prompt.matches("entry ").count(), 10);
    }
}
