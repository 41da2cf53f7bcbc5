use crate::services::chat::{InlineButton, ReplyMarkup};
use crate::workflow::results::Rating;

pub(crate) const IGNORE_IMAGE_CALLBACK: &str = "ignore_img";
const RATE_CALLBACK_PREFIX: &str = "rate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Reset,
    Help,
    Unknown(String),
}

impl Command {
    /// Parses `/start`, `/start@SomeBot payload` and friends.
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        Some(match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "reset" => Command::Reset,
            "help" => Command::Help,
            other => Command::Unknown(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallbackAction {
    IgnoreImage,
    Rate { task_id: String, rating: Rating },
}

impl CallbackAction {
    pub(crate) fn parse(data: &str) -> Option<Self> {
        if data == IGNORE_IMAGE_CALLBACK {
            return Some(CallbackAction::IgnoreImage);
        }

        let mut parts = data.split('|');
        if parts.next() != Some(RATE_CALLBACK_PREFIX) {
            return None;
        }
        let task_id = parts.next().filter(|task_id| !task_id.is_empty())?;
        let rating = Rating::parse(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(CallbackAction::Rate { task_id: task_id.to_string(), rating })
    }

    pub(crate) fn encode(&self) -> String {
        match self {
            CallbackAction::IgnoreImage => IGNORE_IMAGE_CALLBACK.to_string(),
            CallbackAction::Rate { task_id, rating } => {
                format!("{RATE_CALLBACK_PREFIX}|{task_id}|{}", rating.as_str())
            }
        }
    }
}

/// Body of the message a button was pressed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MessageBody {
    Text(String),
    Caption(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InboundEvent {
    Command {
        user_id: i64,
        chat_id: i64,
        command: Command,
    },
    Contact {
        user_id: i64,
        chat_id: i64,
        phone: String,
        /// Whether the shared contact belongs to the sender.
        own: bool,
    },
    Photo {
        user_id: i64,
        chat_id: i64,
        file_id: String,
    },
    Callback {
        user_id: i64,
        chat_id: i64,
        message_id: i64,
        callback_id: String,
        action: Option<CallbackAction>,
        body: Option<MessageBody>,
    },
}

impl InboundEvent {
    pub(crate) fn user_id(&self) -> i64 {
        match self {
            InboundEvent::Command { user_id, .. }
            | InboundEvent::Contact { user_id, .. }
            | InboundEvent::Photo { user_id, .. }
            | InboundEvent::Callback { user_id, .. } => *user_id,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Command { .. } => "command",
            InboundEvent::Contact { .. } => "contact",
            InboundEvent::Photo { .. } => "photo",
            InboundEvent::Callback { .. } => "callback",
        }
    }
}

pub(crate) fn ignore_keyboard() -> ReplyMarkup {
    ReplyMarkup::Inline(vec![vec![InlineButton::new(
        "❌ Ignore this image",
        CallbackAction::IgnoreImage.encode(),
    )]])
}

pub(crate) fn rating_keyboard(task_id: &str) -> ReplyMarkup {
    let row = Rating::ALL
        .iter()
        .map(|rating| {
            let action = CallbackAction::Rate { task_id: task_id.to_string(), rating: *rating };
            InlineButton::new(rating.label(), action.encode())
        })
        .collect();
    ReplyMarkup::Inline(vec![row])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_accept_bot_suffix_and_payload() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/start@GraderBot deep-link"), Some(Command::Start));
        assert_eq!(Command::parse(" /RESET "), Some(Command::Reset));
        assert_eq!(Command::parse("/grade"), Some(Command::Unknown("grade".into())));
        assert_eq!(Command::parse("hello"), None);
    }

    #[test]
    fn callback_data_uses_original_wire_format() {
        assert_eq!(CallbackAction::parse("ignore_img"), Some(CallbackAction::IgnoreImage));
        assert_eq!(
            CallbackAction::parse("rate|T1|excellent"),
            Some(CallbackAction::Rate { task_id: "T1".into(), rating: Rating::Excellent })
        );
        assert_eq!(CallbackAction::parse("rate||good"), None);
        assert_eq!(CallbackAction::parse("rate|T1|meh"), None);
        assert_eq!(CallbackAction::parse("rate|T1|good|extra"), None);
        assert_eq!(CallbackAction::parse("other"), None);
    }

    #[test]
    fn rating_keyboard_has_three_choices_in_one_row() {
        let ReplyMarkup::Inline(rows) = rating_keyboard("T1") else {
            panic!("inline keyboard expected");
        };
        assert_eq!(rows.len(), 1);
        let data: Vec<_> = rows[0].iter().map(|button| button.callback_data.as_str()).collect();
        assert_eq!(data, vec!["rate|T1|excellent", "rate|T1|good", "rate|T1|bad"]);
    }
}
