//! Chat prompt assembly.

use super::base::{ChatMessage, ReasoningRequest, Role};

const CONTEXT_PREAMBLE: &str = "Use the following reference information when it is relevant \
to the caller's question. If it does not answer the question, say so briefly.";

/// Instructions appended to every system prompt; replies are spoken aloud.
const VOICE_GUIDELINES: &str = "You are speaking on a phone call. Keep replies short and \
conversational. Do not use markdown, lists, emojis or URLs.";

/// Flatten a request into the ordered message list sent to a chat model.
///
/// Order: system prompt (with any knowledge context), prior turns, the new
/// user utterance.
pub fn build_messages(request: &ReasoningRequest) -> Vec<ChatMessage> {
    let mut system = String::with_capacity(request.system_prompt.len() + 256);
    system.push_str(request.system_prompt.trim());
    if !system.is_empty() {
        system.push_str("\n\n");
    }
    system.push_str(VOICE_GUIDELINES);

    if let Some(context) = request.context.as_deref()
        && !context.trim().is_empty()
    {
        system.push_str("\n\n");
        system.push_str(CONTEXT_PREAMBLE);
        system.push_str("\n---\n");
        system.push_str(context.trim());
        system.push_str("\n---");
    }

    let mut messages = Vec::with_capacity(request.history.len() + 2);
    messages.push(ChatMessage::new(Role::System, system));
    messages.extend(
        request
            .history
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned(),
    );
    messages.push(ChatMessage::new(Role::User, request.user_text.clone()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_order() {
        let request = ReasoningRequest {
            system_prompt: "You are a billing assistant.".to_string(),
            history: vec![
                ChatMessage::new(Role::Assistant, "Hello, how can I help?"),
                ChatMessage::new(Role::User, "My bill is wrong"),
                ChatMessage::new(Role::Assistant, "Sorry to hear that."),
            ],
            user_text: "It says fifty dollars".to_string(),
            ..Default::default()
        };

        let messages = build_messages(&request);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.starts_with("You are a billing assistant."));
        assert_eq!(messages[4], ChatMessage::new(Role::User, "It says fifty dollars"));
    }

    #[test]
    fn test_context_lands_in_system_prompt() {
        let request = ReasoningRequest {
            user_text: "What are your hours?".to_string(),
            context: Some("Open 9am to 5pm on weekdays.".to_string()),
            ..Default::default()
        };
        let messages = build_messages(&request);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("Open 9am to 5pm on weekdays."));
    }

    #[test]
    fn test_blank_context_is_ignored() {
        let request = ReasoningRequest {
            user_text: "hi".to_string(),
            context: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!build_messages(&request)[0].content.contains(CONTEXT_PREAMBLE));
    }
}
