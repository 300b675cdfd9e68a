//! Default prompt for the LLM reasoning pass.
//!
//! The system prompt is static so providers can cache it. The claim and its
//! keywords go in the user message.

use crate::providers::ChatMessage;

/// System prompt shared by every verification request.
///
/// The model is framed as an analyst weighing evidence, and is asked for a
/// single JSON object that `veritas_core::llm_response` can parse.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are a fact-checking analyst. You assess whether a short claim is true.

You do not browse the web. You reason from well-established public knowledge.
You do not invent sources or statistics.
If the claim depends on facts you cannot assess, say so with low confidence.

## Output Format (JSON)
{
  "classification": "verified" | "likely_true" | "uncertain" | "likely_false" | "disputed",
  "confidence": 0.0-1.0,
  "reasoning": "two or three sentences explaining the assessment",
  "key_points": ["short supporting or contradicting point", "..."]
}

## Confidence Guidelines
- 0.8-1.0: the claim matches or contradicts settled, widely documented facts
- 0.5-0.8: good grounds, some ambiguity in wording or scope
- 0.2-0.5: partial knowledge, the claim is vague or time-sensitive
- < 0.2: no meaningful basis, use "uncertain"

## Warning Signs
Urgency, calls to share, claims of suppression and miracle cures are
typical of misinformation. They lower plausibility but do not prove falsity.

Respond with the JSON object only.
"#;

/// Build the message list for one claim.
pub fn verification_messages(claim: &str, keywords: &[String]) -> Vec<ChatMessage> {
    let mut user = format!("Claim:\n\"\"\"\n{}\n\"\"\"\n", claim);
    if !keywords.is_empty() {
        user.push_str(&format!("\nKey terms: {}\n", keywords.join(", ")));
    }
    user.push_str("\nAssess the claim and answer in the JSON format above.");

    vec![
        ChatMessage::system(BASE_SYSTEM_PROMPT.trim()),
        ChatMessage::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_names_every_label() {
        for label in ["verified", "likely_true", "uncertain", "likely_false", "disputed"] {
            assert!(BASE_SYSTEM_PROMPT.contains(label), "missing {}", label);
        }
        assert!(BASE_SYSTEM_PROMPT.contains("\"confidence\""));
    }

    #[test]
    fn test_messages_carry_claim_and_keywords() {
        let messages = verification_messages(
            "A vacina causa autismo",
            &["vacina".to_string(), "autismo".to_string()],
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert!(messages[1].content.contains("A vacina causa autismo"));
        assert!(messages[1].content.contains("Key terms: vacina, autismo"));
    }

    #[test]
    fn test_messages_without_keywords() {
        let messages = verification_messages("The moon is made of cheese", &[]);
        assert!(!messages[1].content.contains("Key terms"));
    }
}
