//! Conversation history helpers: a deterministic summary for the answer
//! prompt, and a model-assisted rewrite of the latest question into a
//! standalone query for retrieval.

use crate::llm::{ChatMessage, Generator};
use crate::models::{HistoryTurn, Role};

pub const NO_HISTORY: &str = "Aucun historique pertinent.";

const REWRITE_INSTRUCTION: &str = "Rewrite the user's latest question so that all pronouns and ambiguous references are replaced with explicit entities from the conversation. Return only the rewritten question. Do not answer the question.";

/// Last `max_messages` non-empty turns with trimmed content.
fn recent_turns(history: &[HistoryTurn], max_messages: usize) -> Vec<(Role, &str)> {
    let start = history.len().saturating_sub(max_messages);
    history[start..]
        .iter()
        .map(|turn| (turn.role, turn.content.trim()))
        .filter(|(_, content)| !content.is_empty())
        .collect()
}

/// Compress the last `max_messages` turns into one line:
/// `User: ... | Assistant: ...`, cut to `max_chars` characters plus `" ..."`.
pub fn summarize(history: &[HistoryTurn], max_messages: usize, max_chars: usize) -> String {
    let lines: Vec<String> = recent_turns(history, max_messages)
        .into_iter()
        .map(|(role, content)| format!("{}: {}", role.label(), content))
        .collect();

    if lines.is_empty() {
        return NO_HISTORY.to_string();
    }

    let summary = lines.join(" | ");
    if summary.chars().count() > max_chars {
        let cut: String = summary.chars().take(max_chars).collect();
        return format!("{} ...", cut);
    }
    summary
}

/// Ask the generator to resolve references in `question` against the last
/// `max_messages` turns.
///
/// Never fails: with no usable history, an empty reply, or a generation
/// error the original question is returned.
pub async fn rewrite(
    question: &str,
    history: &[HistoryTurn],
    generator: &dyn Generator,
    max_messages: usize,
) -> String {
    let turns = recent_turns(history, max_messages);
    if turns.is_empty() {
        return question.to_string();
    }

    let transcript = turns
        .iter()
        .map(|(role, content)| format!("{}: {}", role.label(), content))
        .collect::<Vec<_>>()
        .join("\n");

    let mut messages = Vec::with_capacity(turns.len() + 2);
    messages.push(ChatMessage::system(REWRITE_INSTRUCTION));
    messages.extend(turns.iter().map(|(role, content)| match role {
        Role::Assistant => ChatMessage::assistant(*content),
        Role::User => ChatMessage::user(*content),
    }));
    messages.push(ChatMessage::user(format!(
        "Conversation (oldest to newest):\n{}\n\nLatest user question: {}",
        transcript, question
    )));

    match generator.generate(&messages).await {
        Ok(reply) => {
            let rewritten = reply.split_whitespace().collect::<Vec<_>>().join(" ");
            if rewritten.is_empty() {
                question.to_string()
            } else {
                tracing::debug!(original = question, %rewritten, "rewrote question");
                rewritten
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "question rewrite failed, using original question");
            question.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        reply: Result<String, String>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Recorder {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err("timeout".to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for Recorder {
        async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[test]
    fn test_summary_of_empty_history_is_sentinel() {
        assert_eq!(summarize(&[], 12, 1200), NO_HISTORY);
        let blank = vec![HistoryTurn::user("   "), HistoryTurn::assistant("")];
        assert_eq!(summarize(&blank, 12, 1200), NO_HISTORY);
    }

    #[test]
    fn test_summary_labels_and_joins() {
        let history = vec![
            HistoryTurn::user(" Qui est le bailleur ? "),
            HistoryTurn::assistant("La société X [1]."),
        ];
        assert_eq!(
            summarize(&history, 12, 1200),
            "User: Qui est le bailleur ? | Assistant: La société X [1]."
        );
    }

    #[test]
    fn test_summary_keeps_only_recent_turns() {
        let history: Vec<HistoryTurn> = (0..5).map(|i| HistoryTurn::user(format!("q{}", i))).collect();
        assert_eq!(summarize(&history, 2, 1200), "User: q3 | User: q4");
    }

    #[test]
    fn test_summary_truncation_bound() {
        let history = vec![HistoryTurn::user("é".repeat(500))];
        let summary = summarize(&history, 12, 100);
        assert!(summary.ends_with(" ..."));
        assert_eq!(summary.chars().count(), 104);
    }

    #[tokio::test]
    async fn test_rewrite_without_history_skips_generator() {
        let generator = Recorder::replying("unused");
        let out = rewrite("Quel est le loyer ?", &[], &generator, 6).await;
        assert_eq!(out, "Quel est le loyer ?");
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_builds_messages_and_collapses_whitespace() {
        let generator = Recorder::replying("  Quel est le loyer\n du  bail X ?  ");
        let history = vec![
            HistoryTurn::user("Parle-moi du bail X"),
            HistoryTurn::assistant(""),
            HistoryTurn::assistant("Le bail X est commercial [1]."),
        ];
        let out = rewrite("Quel est son loyer ?", &history, &generator, 6).await;
        assert_eq!(out, "Quel est le loyer du bail X ?");

        let seen = generator.seen.lock().unwrap();
        let messages = &seen[0];
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, REWRITE_INSTRUCTION);
        assert_eq!(messages[1], ChatMessage::user("Parle-moi du bail X"));
        assert_eq!(messages[2], ChatMessage::assistant("Le bail X est commercial [1]."));
        assert!(messages[3]
            .content
            .ends_with("Latest user question: Quel est son loyer ?"));
        assert!(messages[3]
            .content
            .starts_with("Conversation (oldest to newest):\nUser: Parle-moi du bail X\nAssistant:"));
    }

    #[tokio::test]
    async fn test_rewrite_falls_back_on_error_or_blank_reply() {
        let history = vec![HistoryTurn::user("context")];
        let failing = Recorder::failing();
        assert_eq!(rewrite("q ?", &history, &failing, 6).await, "q ?");

        let blank = Recorder::replying("   \n ");
        assert_eq!(rewrite("q ?", &history, &blank, 6).await, "q ?");
    }
}
