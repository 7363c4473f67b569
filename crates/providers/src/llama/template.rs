use llama_core::chat::{ChatError, ChatMessage, Persona, Role};
use tracing::{error, warn};

/// Replace every `{{name}}` occurrence in `prompt` with the trimmed value.
/// An empty trimmed value is a warning, not an error; the substitution still
/// happens.
fn substitute(prompt: &str, name: &str, value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        warn!(target: "providers::llama", "replacement for {{{{{}}}}} is empty after trimming", name);
    }
    prompt.replace(&format!("{{{{{name}}}}}"), trimmed)
}

/// Render a chat history onto the user-supplied template.
///
/// The first three messages must all carry role `system`; they fill
/// `{{system}}`, `{{description}}` and `{{first_message}}`. The rest of the
/// conversation is folded into `{{input}}`, then `{{char}}`/`{{user}}` are
/// resolved last. Placeholders outside this fixed set are left untouched.
pub fn render(
    template: &str,
    messages: &[ChatMessage],
    persona: &Persona,
) -> Result<String, ChatError> {
    if messages.len() < 3 || messages[..3].iter().any(|m| m.role != Role::System) {
        error!(
            target: "providers::llama",
            "{{{{system}}}}, {{{{description}}}}, {{{{first_message}}}} must be set in the first 3 messages"
        );
        return Err(ChatError::Template(
            "{{system}}, {{description}}, {{first_message}} must be set in the first 3 messages"
                .into(),
        ));
    }

    let mut prompt = substitute(template, "system", &messages[0].content);
    prompt = substitute(&prompt, "description", &messages[1].content);
    prompt = substitute(&prompt, "first_message", &messages[2].content);

    let mut tail = String::new();
    for message in &messages[3..] {
        match message.role {
            Role::System => {}
            Role::User => {
                tail.push_str(&format!("{}: {}\n\n", persona.username, message.content.trim()));
            }
            Role::Assistant => {
                tail.push_str(&format!("{}: {}\n\n", persona.charname, message.content.trim()));
            }
        }
    }

    if messages.last().map(|m| m.role) == Some(Role::Assistant) {
        warn!(target: "providers::llama", "the last message's role should not be assistant");
    }

    // Prime the backend to continue as the assistant persona.
    let input = format!("{}\n\n{}:", tail.trim(), persona.charname);
    prompt = substitute(&prompt, "input", &input);
    prompt = substitute(&prompt, "char", &persona.charname);
    prompt = substitute(&prompt, "user", &persona.username);
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona() -> Persona {
        Persona {
            charname: "Bot".into(),
            username: "User".into(),
        }
    }

    fn msg(role: Role, content: &str) -> ChatMessage {
        ChatMessage::new(role, content)
    }

    fn preamble() -> Vec<ChatMessage> {
        vec![
            msg(Role::System, "S"),
            msg(Role::System, "D"),
            msg(Role::System, "F"),
        ]
    }

    #[test]
    fn rejects_sequences_shorter_than_three() {
        let messages = vec![msg(Role::System, "S"), msg(Role::System, "D")];
        let got = render("{{system}}", &messages, &persona());
        assert!(matches!(got, Err(ChatError::Template(_))));
    }

    #[test]
    fn rejects_non_system_prefix() {
        let messages = vec![
            msg(Role::System, "S"),
            msg(Role::User, "D"),
            msg(Role::System, "F"),
        ];
        let got = render("{{system}}", &messages, &persona());
        assert!(matches!(got, Err(ChatError::Template(_))));
    }

    #[test]
    fn renders_example_conversation() {
        let mut messages = preamble();
        messages.push(msg(Role::User, "hi"));
        let prompt = render(
            "{{system}}|{{description}}|{{first_message}}|{{input}}",
            &messages,
            &persona(),
        )
        .unwrap();
        assert_eq!(prompt, "S|D|F|User: hi\n\nBot:");
    }

    #[test]
    fn substitutes_all_six_placeholders_in_order() {
        let mut messages = preamble();
        messages.push(msg(Role::User, "hi"));
        messages.push(msg(Role::Assistant, "hello"));
        messages.push(msg(Role::User, "bye"));
        let prompt = render(
            "{{system}}|{{description}}|{{first_message}}|{{input}}|{{char}}|{{user}}",
            &messages,
            &persona(),
        )
        .unwrap();
        assert_eq!(
            prompt,
            "S|D|F|User: hi\n\nBot: hello\n\nUser: bye\n\nBot:|Bot|User"
        );
    }

    #[test]
    fn input_is_substituted_before_persona_names() {
        // A placeholder inside a message survives the {{input}} step and is
        // then resolved by the later {{char}} pass.
        let mut messages = preamble();
        messages.push(msg(Role::User, "who is {{char}}?"));
        let prompt = render("{{input}}", &messages, &persona()).unwrap();
        assert_eq!(prompt, "User: who is Bot?\n\nBot:");
    }

    #[test]
    fn trimming_is_idempotent() {
        let mut padded = vec![
            msg(Role::System, "  S\t"),
            msg(Role::System, "\nD "),
            msg(Role::System, " F\n"),
        ];
        padded.push(msg(Role::User, "  hi  "));
        let mut plain = preamble();
        plain.push(msg(Role::User, "hi"));
        let template = "{{system}}|{{description}}|{{first_message}}|{{input}}";
        assert_eq!(
            render(template, &padded, &persona()).unwrap(),
            render(template, &plain, &persona()).unwrap()
        );
    }

    #[test]
    fn replaces_every_occurrence() {
        let messages = preamble();
        let prompt = render("{{char}} meets {{char}}", &messages, &persona()).unwrap();
        assert_eq!(prompt, "Bot meets Bot");
    }

    #[test]
    fn unknown_placeholders_are_left_untouched() {
        let messages = preamble();
        let prompt = render("{{model}} {{char}}", &messages, &persona()).unwrap();
        assert_eq!(prompt, "{{model}} Bot");
    }

    #[test]
    fn system_messages_past_the_preamble_are_skipped() {
        let mut messages = preamble();
        messages.push(msg(Role::User, "hi"));
        messages.push(msg(Role::System, "ignored"));
        messages.push(msg(Role::User, "bye"));
        let prompt = render("{{input}}", &messages, &persona()).unwrap();
        assert_eq!(prompt, "User: hi\n\nUser: bye\n\nBot:");
    }

    #[test]
    fn assistant_last_message_does_not_alter_the_prompt() {
        let mut messages = preamble();
        messages.push(msg(Role::User, "hi"));
        messages.push(msg(Role::Assistant, "hello"));
        let prompt = render("{{input}}", &messages, &persona()).unwrap();
        assert_eq!(prompt, "User: hi\n\nBot: hello\n\nBot:");
    }

    #[test]
    fn empty_tail_still_primes_the_assistant() {
        let messages = preamble();
        let prompt = render("{{input}}", &messages, &persona()).unwrap();
        assert_eq!(prompt, "Bot:");
    }

    #[test]
    fn empty_replacement_still_substitutes() {
        let messages = vec![
            msg(Role::System, "   "),
            msg(Role::System, "D"),
            msg(Role::System, "F"),
        ];
        let prompt = render("[{{system}}]", &messages, &persona()).unwrap();
        assert_eq!(prompt, "[]");
    }
}
