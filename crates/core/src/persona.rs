//! Personas: the voice the final answer is rendered in.
//!
//! A persona is a system template plus display metadata. Rendering is a pure
//! function of `(history, context, input)`, so personas can be swapped per
//! turn without touching workflow state.

use crate::message::{Message, Role};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Renders the final prompt for the response step.
pub trait PromptTemplate: Send + Sync {
    /// Build role-tagged messages: system prompt, prior history, then the question with context.
    fn format_messages(&self, history: &[Message], context: &str, input: &str) -> Vec<Message>;
}

/// Built-in persona identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaKind {
    Scribe,
    Devil,
}

impl PersonaKind {
    pub const ALL: [PersonaKind; 2] = [PersonaKind::Scribe, PersonaKind::Devil];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scribe => "scribe",
            Self::Devil => "devil",
        }
    }
}

impl std::fmt::Display for PersonaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scribe" => Ok(Self::Scribe),
            "devil" => Ok(Self::Devil),
            other => Err(format!("Unknown persona '{other}'. Options: scribe, devil")),
        }
    }
}

/// A persona: display metadata plus the system prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub kind: PersonaKind,
    pub name: String,
    pub greeting: String,
    pub icon: String,
    /// Shown while a turn is in flight.
    pub thinking_text: String,
    pub system_template: String,
}

const SCRIBE_TEMPLATE: &str = "You are a wise wizard scribe. Be clear and concise while keeping your mystical voice.

Key guidelines:
1. Use ONLY the provided context
2. Keep responses under 3 paragraphs
3. Use simple language (grade 8 level)
4. List sources ONCE at the end as 'ancient scrolls', including URLs and book references
5. Stay focused, with only subtle magical flourishes

Remember: concise but mystical.";

const DEVIL_TEMPLATE: &str = "You are a clever devil's advocate. Be precise and witty while staying professional.

Key guidelines:
1. Use ONLY the provided context
2. Keep responses under 3 paragraphs
3. Use clear, simple language
4. List sources ONCE at the end as 'evidence', including URLs and book references
5. Stay focused, with only subtle legal flourishes

Remember: precise but entertaining.";

impl Persona {
    pub fn builtin(kind: PersonaKind) -> Self {
        match kind {
            PersonaKind::Scribe => Self {
                kind,
                name: "Wizard Scribe".into(),
                greeting: "Greetings, seeker of knowledge! I am a humble scribe of the archive. \
                           How may I illuminate your path today?"
                    .into(),
                icon: "📚".into(),
                thinking_text: "Consulting the ancient tomes".into(),
                system_template: SCRIBE_TEMPLATE.into(),
            },
            PersonaKind::Devil => Self {
                kind,
                name: "Devil's Advocate".into(),
                greeting: "Well, well... seeking clarity in the fine print, are we? \
                           I'm your Devil's Advocate, here to read the documents... precisely."
                    .into(),
                icon: "😈".into(),
                thinking_text: "Examining the contracts".into(),
                system_template: DEVIL_TEMPLATE.into(),
            },
        }
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::builtin(PersonaKind::Scribe)
    }
}

impl PromptTemplate for Persona {
    fn format_messages(&self, history: &[Message], context: &str, input: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.system_template.clone()));
        // System entries in stored history would fight the persona prompt.
        messages.extend(
            history
                .iter()
                .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                .cloned(),
        );
        messages.push(Message::user(format!("Context: {context}\nQuestion: {input}")));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_kind_parses_case_insensitively() {
        assert_eq!("Scribe".parse::<PersonaKind>().unwrap(), PersonaKind::Scribe);
        assert_eq!(" devil ".parse::<PersonaKind>().unwrap(), PersonaKind::Devil);
        assert!("bard".parse::<PersonaKind>().is_err());
    }

    #[test]
    fn builtin_personas_have_distinct_voices() {
        let scribe = Persona::builtin(PersonaKind::Scribe);
        let devil = Persona::builtin(PersonaKind::Devil);
        assert!(scribe.system_template.contains("ancient scrolls"));
        assert!(devil.system_template.contains("'evidence'"));
        assert_eq!(devil.icon, "😈");
    }

    #[test]
    fn format_messages_orders_system_history_question() {
        let persona = Persona::default();
        let history = vec![
            Message::user("Who rules Lyria?"),
            Message::system("stale instructions"),
            Message::assistant("Queen Maren."),
        ];
        let messages = persona.format_messages(&history, "Aster is the capital.", "And the capital?");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Who rules Lyria?");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(
            messages[3].content,
            "Context: Aster is the capital.\nQuestion: And the capital?"
        );
    }

    #[test]
    fn format_messages_is_pure() {
        let persona = Persona::builtin(PersonaKind::Devil);
        let a = persona.format_messages(&[], "ctx", "q");
        let b = persona.format_messages(&[], "ctx", "q");
        let contents = |m: &[Message]| m.iter().map(|m| m.content.clone()).collect::<Vec<_>>();
        assert_eq!(contents(&a), contents(&b));
    }
}
