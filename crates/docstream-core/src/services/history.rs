use crate::models::{ContentBlock, Message, Role};

/// Message window for regular chat turns.
pub const CHAT_HISTORY_WINDOW: usize = 20;

/// Message window for lightweight calls that only need recent context.
pub const COMPACT_HISTORY_WINDOW: usize = 6;

/// Character ceiling applied to each forwarded message.
pub const MAX_MESSAGE_CHARS: usize = 32_000;

/// Select what is forwarded upstream: the most recent `window` messages, each hard-truncated
/// to `max_chars` characters of text.
///
/// In-progress assistant slots are skipped, and the window never opens with an assistant
/// turn because the provider requires the first message to come from the user.
pub fn prepare_history(messages: &[Message], window: usize, max_chars: usize) -> Vec<Message> {
    let settled: Vec<&Message> = messages.iter().filter(|m| !m.streaming).collect();
    let start = settled.len().saturating_sub(window);

    settled[start..]
        .iter()
        .skip_while(|m| m.role == Role::Assistant)
        .map(|m| truncate_message(m, max_chars))
        .collect()
}

/// Cap the total text of a message at `max_chars`, spending the allowance block by block.
pub fn truncate_message(message: &Message, max_chars: usize) -> Message {
    let mut remaining = max_chars;
    let mut content = Vec::with_capacity(message.content.len());

    for block in &message.content {
        match block {
            ContentBlock::Text { text } => {
                if remaining == 0 {
                    continue;
                }
                let len = text.chars().count();
                if len <= remaining {
                    remaining -= len;
                    content.push(block.clone());
                } else {
                    let kept: String = text.chars().take(remaining).collect();
                    content.push(ContentBlock::text(kept));
                    remaining = 0;
                }
            }
            ContentBlock::Image { .. } => content.push(block.clone()),
        }
    }

    Message::new(message.role, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user_text(format!("q{i}"))
                } else {
                    Message::assistant_text(format!("a{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn test_keeps_most_recent_window() {
        let history = prepare_history(&turns(30), CHAT_HISTORY_WINDOW, MAX_MESSAGE_CHARS);
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].text(), "q10");
        assert_eq!(history[19].text(), "a29");
    }

    #[test]
    fn test_window_never_starts_with_assistant() {
        let history = prepare_history(&turns(9), COMPACT_HISTORY_WINDOW, MAX_MESSAGE_CHARS);
        // Last six are a3..q8; a3 is dropped.
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text(), "q4");
    }

    #[test]
    fn test_skips_in_progress_slot() {
        let mut messages = turns(2);
        messages.push(Message::user_text("next"));
        messages.push(Message::placeholder());
        let history = prepare_history(&messages, CHAT_HISTORY_WINDOW, MAX_MESSAGE_CHARS);
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].text(), "next");
    }

    #[test]
    fn test_truncates_long_text_across_blocks() {
        let message = Message::user(vec![
            ContentBlock::text("a".repeat(30)),
            ContentBlock::image("image/png", "AAAA"),
            ContentBlock::text("b".repeat(30)),
            ContentBlock::text("c".repeat(30)),
        ]);
        let truncated = truncate_message(&message, 40);
        assert_eq!(truncated.content.len(), 3);
        assert_eq!(truncated.text_len(), 40);
        assert_eq!(truncated.content[2], ContentBlock::text("b".repeat(10)));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let message = Message::user_text("é".repeat(10));
        let truncated = truncate_message(&message, 3);
        assert_eq!(truncated.text(), "ééé");
    }
}
