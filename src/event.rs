//! Handler-facing event types.
//!
//! A command message is parsed once into an [`Event`] carrying positional
//! parameters and `--key=value` flags; correlated replies arrive as
//! [`Answer`], pattern hits as [`PatternMatch`], and button presses as
//! [`InlineAnswer`].

use crate::inline::InlineCallbackEntry;
use crate::replies::PendingQuestion;
use crate::update::{CallbackQuery, Contact, IncomingMessage};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A command invocation, split into token, positional params and flags.
///
/// Flags follow the common long/short shell convention: `--key=value`,
/// `--flag`, `-k=v`, and combined short flags (`-ab` sets both `a` and `b`).
/// Mobile keyboards replace a double dash with an em dash, so `—key` is
/// accepted too.
#[derive(Debug, Clone)]
pub struct Event {
    pub message: IncomingMessage,
    params: Vec<String>,
    flags: HashMap<String, String>,
}

impl Event {
    pub fn new(message: IncomingMessage) -> Self {
        let mut params = Vec::new();
        let mut flags = HashMap::new();
        let mut words = message.text().split_whitespace();
        // First word is the command token itself.
        words.next();
        for word in words {
            let word = if let Some(rest) = word.strip_prefix('—') {
                format!("--{}", rest)
            } else {
                word.to_string()
            };
            if let Some(flag) = word.strip_prefix("--") {
                match flag.split_once('=') {
                    Some((key, value)) => {
                        flags.insert(key.to_string(), value.to_string());
                    }
                    None => {
                        flags.insert(flag.to_string(), "1".to_string());
                    }
                }
            } else if let Some(flag) = word.strip_prefix('-') {
                if flag.is_empty() || flag.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                    // "-5" is a negative number, not a flag
                    params.push(word);
                    continue;
                }
                match flag.split_once('=') {
                    Some((key, value)) => {
                        flags.insert(key.to_string(), value.to_string());
                    }
                    None => {
                        for c in flag.chars() {
                            flags.insert(c.to_string(), "1".to_string());
                        }
                    }
                }
            } else {
                params.push(word);
            }
        }
        Self { message, params, flags }
    }

    /// Everything after the command token, flags included, joined by spaces.
    pub fn args(&self) -> String {
        self.message
            .text()
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default()
    }

    /// Positional parameters, flags stripped.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Flag value; plain `--flag` reads as "1".
    pub fn flag(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }
}

/// Text matched by a registered pattern, with its capture groups.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub message: IncomingMessage,
    /// Capture groups in order, group 0 (whole match) excluded.
    pub captures: Vec<Option<String>>,
}

impl PatternMatch {
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.captures.get(index).and_then(|c| c.as_deref())
    }
}

/// Where an answer's text falls relative to the question's options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerVariant {
    /// 1-based position in the flattened option list.
    Index(usize),
    /// The question had options but the text matches none of them.
    NotInOptions,
    /// The question had no options at all.
    FreeForm,
}

/// A correlated and validated reply to a pending question.
#[derive(Debug, Clone)]
pub struct Answer {
    pub message: IncomingMessage,
    pub question: PendingQuestion,
}

impl Answer {
    /// Message id of the question this answers.
    pub fn ask_message_id(&self) -> i64 {
        self.question.id
    }

    pub fn reply_text(&self) -> &str {
        self.message.text()
    }

    pub fn contact(&self) -> Option<&Contact> {
        self.message.contact.as_ref()
    }

    /// Opaque payload supplied when the question was asked.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.question.extra
    }

    /// Classify the reply against the question's option list.
    pub fn answer_variant(&self) -> AnswerVariant {
        let mut options = self.question.flat_answers().peekable();
        if options.peek().is_none() {
            return AnswerVariant::FreeForm;
        }
        let reply = self.reply_text().trim();
        match options.position(|option| option.text() == reply) {
            Some(pos) => AnswerVariant::Index(pos + 1),
            None => AnswerVariant::NotInOptions,
        }
    }
}

/// A button press routed through the inline-callback registry.
#[derive(Debug, Clone)]
pub struct InlineAnswer {
    pub query: CallbackQuery,
    pub entry: InlineCallbackEntry,
}

impl InlineAnswer {
    /// Payload string baked into the pressed button.
    pub fn data(&self) -> &str {
        self.query.data.as_deref().unwrap_or_default()
    }

    pub fn owner(&self) -> Option<i64> {
        self.entry.owner
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.entry.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replies::AnswerOption;
    use crate::update::{ChatKind, Sender};

    fn message(text: &str) -> IncomingMessage {
        IncomingMessage {
            message_id: 1,
            chat_id: 7,
            chat_kind: ChatKind::Private,
            chat_title: None,
            from: Some(Sender {
                id: 42,
                first_name: "Ada".to_string(),
                last_name: None,
                username: None,
                language_code: None,
            }),
            text: Some(text.to_string()),
            contact: None,
            reply_to_message_id: None,
            membership: None,
        }
    }

    #[test]
    fn splits_params_and_flags() {
        let event = Event::new(message("/deploy prod --force --tag=v1.2 -v extra"));
        assert_eq!(event.params(), ["prod", "extra"]);
        assert_eq!(event.flag("force"), Some("1"));
        assert_eq!(event.flag("tag"), Some("v1.2"));
        assert!(event.has_flag("v"));
        assert_eq!(event.args(), "prod --force --tag=v1.2 -v extra");
    }

    #[test]
    fn combined_short_flags_and_negative_numbers() {
        let event = Event::new(message("/adjust -ab -5"));
        assert!(event.has_flag("a"));
        assert!(event.has_flag("b"));
        assert_eq!(event.params(), ["-5"]);
    }

    #[test]
    fn em_dash_reads_as_double_dash() {
        let event = Event::new(message("/deploy —tag=v2"));
        assert_eq!(event.flag("tag"), Some("v2"));
    }

    #[test]
    fn bare_command_has_nothing() {
        let event = Event::new(message("/start"));
        assert!(event.params().is_empty());
        assert_eq!(event.args(), "");
    }

    fn answer(text: &str, answers: Option<Vec<Vec<AnswerOption>>>) -> Answer {
        Answer {
            message: message(text),
            question: PendingQuestion {
                id: 10,
                question: "pick one".to_string(),
                callback: None,
                user: None,
                answers,
                multiple: false,
                contact: false,
                extra: Map::new(),
                time: 0,
            },
        }
    }

    #[test]
    fn variant_index_is_one_based_and_flattened() {
        let groups = vec![
            vec![
                AnswerOption::Text("yes".to_string()),
                AnswerOption::Text("no".to_string()),
            ],
            vec![AnswerOption::Text("maybe".to_string())],
        ];
        assert_eq!(
            answer("yes", Some(groups.clone())).answer_variant(),
            AnswerVariant::Index(1)
        );
        assert_eq!(
            answer("maybe", Some(groups.clone())).answer_variant(),
            AnswerVariant::Index(3)
        );
        assert_eq!(
            answer("never", Some(groups)).answer_variant(),
            AnswerVariant::NotInOptions
        );
        assert_eq!(answer("whatever", None).answer_variant(), AnswerVariant::FreeForm);
    }
}
