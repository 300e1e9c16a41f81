use std::collections::HashMap;

use redteam_protocol::Role;
use uuid::Uuid;

use crate::message::Message;

/// Per-conversation ordered message log with branch/duplicate support for
/// backtracking (§4.2). A single attack-loop call owns one `Memory`
/// instance for its whole lifetime (§5) — no internal locking.
#[derive(Debug, Default)]
pub struct Memory {
    conversations: HashMap<String, Vec<Message>>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            conversations: HashMap::new(),
        }
    }

    /// Allocates a fresh, empty conversation and returns its id.
    pub fn create_conversation(&mut self) -> String {
        let id = Uuid::new_v4().to_string();
        self.conversations.insert(id.clone(), Vec::new());
        id
    }

    /// Appends a message to the named conversation. Unknown ids are
    /// created lazily so callers never need a separate "create" round
    /// trip when seeding the first system message.
    pub fn append(&mut self, conv_id: &str, msg: Message) {
        self.conversations
            .entry(conv_id.to_string())
            .or_default()
            .push(msg);
    }

    /// Returns the full message sequence for a conversation, or an empty
    /// sequence for an unknown id (non-fatal per §4.2).
    pub fn get(&self, conv_id: &str) -> Vec<Message> {
        self.conversations.get(conv_id).cloned().unwrap_or_default()
    }

    /// Creates a new conversation whose contents are the source
    /// conversation with its final user/assistant pair (and any
    /// unblocking extras appended after it) dropped — used to roll back
    /// after a detected refusal (§4.2, §4.7 ScoreRefusal).
    pub fn branch_excluding_last_turn(&mut self, conv_id: &str) -> String {
        let msgs = self.get(conv_id);
        let k = last_turn_boundary(&msgs);
        let new_id = Uuid::new_v4().to_string();
        self.conversations
            .insert(new_id.clone(), msgs[..k].to_vec());
        new_id
    }
}

/// Index one past the assistant reply that started the conversation's
/// penultimate turn (or one past the leading system message, or 0 if
/// neither exists) — the boundary `branch_excluding_last_turn` slices at.
fn last_turn_boundary(msgs: &[Message]) -> usize {
    let assistant_indices: Vec<usize> = msgs
        .iter()
        .enumerate()
        .filter(|(_, m)| matches!(m.role, Role::Assistant))
        .map(|(i, _)| i)
        .collect();

    match assistant_indices.len() {
        0 => msgs
            .iter()
            .position(|m| matches!(m.role, Role::System))
            .map(|i| i + 1)
            .unwrap_or(0),
        1 => msgs
            .iter()
            .position(|m| matches!(m.role, Role::System))
            .map(|i| i + 1)
            .unwrap_or(0),
        n => assistant_indices[n - 2] + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_unknown_conversation_is_empty() {
        let mem = Memory::new();
        assert!(mem.get("does-not-exist").is_empty());
    }

    #[test]
    fn append_then_get_round_trips() {
        let mut mem = Memory::new();
        let id = mem.create_conversation();
        mem.append(&id, Message::system("sys"));
        mem.append(&id, Message::user("u1"));
        mem.append(&id, Message::assistant("a1"));
        let msgs = mem.get(&id);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2].content, "a1");
    }

    #[test]
    fn branch_drops_final_user_assistant_pair() {
        let mut mem = Memory::new();
        let id = mem.create_conversation();
        mem.append(&id, Message::system("sys"));
        mem.append(&id, Message::user("u1"));
        mem.append(&id, Message::assistant("a1"));
        mem.append(&id, Message::user("u2"));
        mem.append(&id, Message::assistant("a2"));

        let branched = mem.branch_excluding_last_turn(&id);
        let msgs = mem.get(&branched);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2].content, "a1");
    }

    #[test]
    fn branch_on_first_turn_keeps_only_system_message() {
        let mut mem = Memory::new();
        let id = mem.create_conversation();
        mem.append(&id, Message::system("sys"));
        mem.append(&id, Message::user("u1"));
        mem.append(&id, Message::assistant("a1"));

        let branched = mem.branch_excluding_last_turn(&id);
        let msgs = mem.get(&branched);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0].role, Role::System));
    }

    #[test]
    fn branch_drops_unblocking_extras_with_final_turn() {
        let mut mem = Memory::new();
        let id = mem.create_conversation();
        mem.append(&id, Message::system("sys"));
        mem.append(&id, Message::user("u1"));
        mem.append(&id, Message::assistant("a1"));
        mem.append(&id, Message::user("u2"));
        mem.append(&id, Message::user("unblock-reply"));
        mem.append(&id, Message::assistant("a2"));

        let branched = mem.branch_excluding_last_turn(&id);
        let msgs = mem.get(&branched);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2].content, "a1");
    }

    #[test]
    fn branch_then_reappend_same_pair_reconstructs_original() {
        let mut mem = Memory::new();
        let id = mem.create_conversation();
        mem.append(&id, Message::system("sys"));
        mem.append(&id, Message::user("u1"));
        mem.append(&id, Message::assistant("a1"));

        let branched = mem.branch_excluding_last_turn(&id);
        mem.append(&branched, Message::user("u1"));
        mem.append(&branched, Message::assistant("a1"));

        let original: Vec<String> = mem.get(&id).iter().map(|m| m.content.clone()).collect();
        let reconstructed: Vec<String> =
            mem.get(&branched).iter().map(|m| m.content.clone()).collect();
        assert_eq!(original, reconstructed);
    }
}
