//! Folds the assistant messages of one logical turn into a single anchor message.
//!
//! The first assistant message of the turn becomes the anchor. Every later backend message
//! is merged into it: tool results of the previous round are dropped from history, the
//! calls that produced them are recorded in the anchor's reasoning as a
//! `{"tool_calls": [...]}` paragraph, and the new reasoning follows as another paragraph.
//! A message without tool calls closes the turn and supplies the final content.

use crate::error::{RelayError, Result};
use crate::types::{ChatMessage, MessageRole, flattened_tool_calls_json};

/// Separator between reasoning paragraphs.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Empty,
    Open,
    Closed,
}

/// Append `piece` to `target` as a new paragraph. Empty pieces are skipped.
pub fn append_paragraph(target: &mut Option<String>, piece: &str) {
    if piece.is_empty() {
        return;
    }
    match target {
        Some(existing) if !existing.is_empty() => {
            existing.push_str(PARAGRAPH_SEPARATOR);
            existing.push_str(piece);
        }
        _ => *target = Some(piece.to_string()),
    }
}

#[derive(Debug, Default)]
pub struct TurnConsolidator {
    state: TurnState,
    anchor: Option<usize>,
}

impl TurnConsolidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Position of the anchor in history.
    pub fn anchor_index(&self) -> Option<usize> {
        self.anchor
    }

    pub fn anchor<'a>(&self, history: &'a [ChatMessage]) -> Option<&'a ChatMessage> {
        self.anchor.and_then(|index| history.get(index))
    }

    /// Merge the next backend message of the turn into `history`.
    pub fn consolidate(&mut self, history: &mut Vec<ChatMessage>, message: ChatMessage) -> Result<()> {
        match self.state {
            TurnState::Closed => Err(RelayError::InvalidState(
                "turn is closed; no further messages can be consolidated".into(),
            )),
            TurnState::Empty => {
                self.state = if message.has_tool_calls() {
                    TurnState::Open
                } else {
                    TurnState::Closed
                };
                history.push(message);
                self.anchor = Some(history.len() - 1);
                Ok(())
            }
            TurnState::Open => self.merge(history, message),
        }
    }

    fn merge(&mut self, history: &mut Vec<ChatMessage>, message: ChatMessage) -> Result<()> {
        let anchor_index = self
            .anchor
            .ok_or_else(|| RelayError::InvalidState("open turn without an anchor".into()))?;

        while history
            .last()
            .is_some_and(|m| m.role == MessageRole::Tool)
        {
            history.pop();
        }
        if history.len() != anchor_index + 1 {
            return Err(RelayError::InvalidState(format!(
                "anchor at {anchor_index} is not the last non-tool message (history has {})",
                history.len()
            )));
        }

        let anchor = &mut history[anchor_index];
        if anchor.has_tool_calls() {
            let recorded = flattened_tool_calls_json(&anchor.tool_calls);
            append_paragraph(&mut anchor.reasoning_content, &recorded);
        }
        append_paragraph(&mut anchor.reasoning_content, message.reasoning_text());

        if message.has_tool_calls() {
            anchor.tool_calls = message.tool_calls;
        } else {
            anchor.tool_calls.clear();
            anchor.content = Some(message.content.unwrap_or_default());
            self.state = TurnState::Closed;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    fn assistant(reasoning: &str, content: Option<&str>, calls: Vec<ToolCall>) -> ChatMessage {
        let mut msg = ChatMessage::assistant("").with_reasoning(reasoning).with_tool_calls(calls);
        msg.content = content.map(str::to_string);
        msg
    }

    #[test]
    fn three_sub_turns_collapse_into_one_anchor() {
        let lookup = ToolCall::function("call_a", 0, "weather_get", r#"{"city":"Lisbon"}"#);
        let forecast = ToolCall::function("call_b", 0, "weather_forecast", r#"{"days":2}"#);
        let mut history = vec![ChatMessage::user("Weather in Lisbon?")];
        let mut turn = TurnConsolidator::new();

        turn.consolidate(&mut history, assistant("R1", None, vec![lookup.clone()]))
            .unwrap();
        assert_eq!(turn.state(), TurnState::Open);
        history.push(ChatMessage::tool("call_a", "18C"));

        turn.consolidate(&mut history, assistant("R2", None, vec![forecast.clone()]))
            .unwrap();
        assert_eq!(history.len(), 2);
        history.push(ChatMessage::tool("call_b", "sunny"));

        turn.consolidate(&mut history, assistant("R3", Some("Sunny, 18C."), vec![]))
            .unwrap();
        assert_eq!(turn.state(), TurnState::Closed);
        assert_eq!(history.len(), 2);

        let anchor = turn.anchor(&history).unwrap();
        let expected = format!(
            "R1\n\n{}\n\nR2\n\n{}\n\nR3",
            flattened_tool_calls_json(&[lookup]),
            flattened_tool_calls_json(&[forecast])
        );
        assert_eq!(anchor.reasoning_text(), expected);
        assert_eq!(anchor.content_text(), "Sunny, 18C.");
        assert!(anchor.tool_calls.is_empty());
        assert!(!anchor.reasoning_text().contains("call_a"));
    }

    #[test]
    fn closed_turn_rejects_more_messages() {
        let mut history = vec![ChatMessage::user("hi")];
        let mut turn = TurnConsolidator::new();
        turn.consolidate(&mut history, assistant("", Some("hello"), vec![]))
            .unwrap();
        assert_eq!(turn.state(), TurnState::Closed);

        let err = turn
            .consolidate(&mut history, assistant("", Some("again"), vec![]))
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidState(_)));
    }

    #[test]
    fn empty_reasoning_adds_no_separator() {
        let call = ToolCall::function("c", 0, "p_t", "{}");
        let mut history = vec![ChatMessage::user("q")];
        let mut turn = TurnConsolidator::new();
        turn.consolidate(&mut history, assistant("", None, vec![call.clone()]))
            .unwrap();
        turn.consolidate(&mut history, assistant("", Some("done"), vec![]))
            .unwrap();
        assert_eq!(
            history[1].reasoning_text(),
            flattened_tool_calls_json(&[call])
        );
    }

    #[test]
    fn displaced_anchor_is_an_error() {
        let mut history = vec![ChatMessage::user("q")];
        let mut turn = TurnConsolidator::new();
        turn.consolidate(
            &mut history,
            assistant("r", None, vec![ToolCall::function("c", 0, "p_t", "{}")]),
        )
        .unwrap();
        history.push(ChatMessage::user("interjection"));

        assert!(matches!(
            turn.consolidate(&mut history, assistant("r2", Some("x"), vec![])),
            Err(RelayError::InvalidState(_))
        ));
    }

    #[test]
    fn paragraphs() {
        let mut text = None;
        append_paragraph(&mut text, "");
        assert_eq!(text, None);
        append_paragraph(&mut text, "a");
        append_paragraph(&mut text, "");
        append_paragraph(&mut text, "b");
        assert_eq!(text.as_deref(), Some("a\n\nb"));
    }
}
