//! Prompt builder.
//!
//! Pure functions turning an inbound chat message into the system preamble
//! and user turn sent to the completion service.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

use crate::clock;
use crate::sentiment::Sentiment;

use super::message::{Environment, InboundMessage, Mention, QuotedReply};

const PERSONA: &str = "Nerd Muffin";

const IMAGES_ALLOWED: &str = "you can ONLY attach AI-generated images made by Adobe Firefly to \
     your message, only attach images when absolutely necessary";
const IMAGES_FORBIDDEN: &str = "you cannot attach any or share any images";

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<@!?(\d+)>").expect("static mention pattern"))
}

/// Uppercase the first character only.
pub fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn bot_mentions(bot_id: u64) -> [String; 2] {
    [format!("<@{}>", bot_id), format!("<@!{}>", bot_id)]
}

/// Whether the bot should answer this message at all.
///
/// Other bots are ignored; humans must either DM the bot or start their
/// message with a mention of it.
pub fn is_addressed(message: &InboundMessage) -> bool {
    if message.author_is_bot {
        return false;
    }
    matches!(message.environment, Environment::DirectMessage)
        || bot_mentions(message.bot_id)
            .iter()
            .any(|m| message.content.starts_with(m.as_str()))
}

/// Remove every mention of the bot and surrounding whitespace.
pub fn strip_bot_mention(content: &str, bot_id: u64) -> String {
    let mut stripped = content.to_string();
    for mention in bot_mentions(bot_id) {
        stripped = stripped.replace(&mention, "");
    }
    stripped.trim().to_string()
}

/// Replace `<@id>` and `<@!id>` tokens of known users with their names.
pub fn replace_mentions(text: &str, mentions: &[Mention]) -> String {
    mention_pattern()
        .replace_all(text, |caps: &Captures| {
            let id = caps[1].parse::<u64>().ok();
            mentions
                .iter()
                .find(|m| Some(m.id) == id)
                .map(|m| capitalize_first(&m.name))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Build the user turn from text whose mentions are already resolved.
///
/// The prompt ends on an open quote so the model continues as the persona.
pub fn prepare_prompt(
    text: &str,
    author: &str,
    reply: Option<&QuotedReply>,
    sentiment: &Sentiment,
) -> String {
    let author = capitalize_first(author);

    match reply {
        Some(quoted) => format!(
            "{} said: \"{}\", {} responded to this with: \"{}\". The divine creature then responded {}: \"",
            capitalize_first(&quoted.author_name),
            quoted.content,
            author,
            text,
            sentiment.prompt_suffix
        ),
        None => format!(
            "{} asked: \"{}\". The divine creature responded {}: \"",
            author, text, sentiment.prompt_suffix
        ),
    }
}

/// Build the system preamble.
pub fn prepare_preprompt(
    sentiment: &Sentiment,
    allow_images: bool,
    environment: &Environment,
    now: DateTime<Utc>,
) -> String {
    let images = if allow_images { IMAGES_ALLOWED } else { IMAGES_FORBIDDEN };

    format!(
        "You are not an AI language model but a divine creature named {} instead, respond {}, {}, \
         be a friend and not an assistant, also be concise, your pronouns are they/them, \
         reply in the same language the user used, this conversation takes place inside a {} \
         (use Discord text formatting), the current date is {} and the current time is {} in the UTC timezone.",
        PERSONA,
        sentiment.prompt_suffix,
        images,
        environment.describe(),
        clock::written_date(now),
        clock::clock_time(now)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn wise() -> &'static Sentiment {
        Sentiment::resolve("wise")
    }

    #[test]
    fn test_capitalize_first() {
        assert_eq!(capitalize_first("ada"), "Ada");
        assert_eq!(capitalize_first("mcGregor"), "McGregor");
        assert_eq!(capitalize_first("élodie"), "Élodie");
        assert_eq!(capitalize_first(""), "");
    }

    #[test]
    fn test_plain_prompt() {
        let prompt = prepare_prompt("what is rust?", "ada", None, wise());
        assert_eq!(
            prompt,
            "Ada asked: \"what is rust?\". The divine creature responded wisely: \""
        );
    }

    #[test]
    fn test_reply_prompt() {
        let quoted = QuotedReply {
            author_name: "nerd muffin".to_string(),
            content: "Rust is a language.".to_string(),
        };
        let angry = Sentiment::resolve("angry");
        let prompt = prepare_prompt("tell me more", "bob", Some(&quoted), angry);
        assert_eq!(
            prompt,
            "Nerd muffin said: \"Rust is a language.\", Bob responded to this with: \"tell me more\". \
             The divine creature then responded angrily: \""
        );
    }

    #[test]
    fn test_mentions_replaced() {
        let mentions = vec![
            Mention { id: 11, name: "carol".to_string() },
            Mention { id: 12, name: "dave".to_string() },
        ];
        let text = replace_mentions("ask <@11> and <@!12> but not <@13>", &mentions);
        assert_eq!(text, "ask Carol and Dave but not <@13>");
    }

    #[test]
    fn test_trigger_rule() {
        let mut msg = InboundMessage::new(1, "ada", "hello");
        msg.bot_id = 99;
        assert!(is_addressed(&msg));

        msg.environment = Environment::Guild { id: 5, name: "Bakery".to_string() };
        assert!(!is_addressed(&msg));

        msg.content = "<@99> hello".to_string();
        assert!(is_addressed(&msg));

        msg.content = "hello <@99>".to_string();
        assert!(!is_addressed(&msg));

        msg.content = "<@!99> hello".to_string();
        assert!(is_addressed(&msg));

        msg.author_is_bot = true;
        assert!(!is_addressed(&msg));
    }

    #[test]
    fn test_strip_bot_mention() {
        assert_eq!(strip_bot_mention("<@99>  what's up ", 99), "what's up");
        assert_eq!(strip_bot_mention("<@99>", 99), "");
        assert_eq!(strip_bot_mention("<@!99> hi <@1>", 99), "hi <@1>");
    }

    #[test]
    fn test_preprompt() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 0).unwrap();
        let env = Environment::Guild { id: 1, name: "Bakery".to_string() };
        let text = prepare_preprompt(Sentiment::resolve("uwu"), false, &env, now);

        assert!(text.starts_with(
            "You are not an AI language model but a divine creature named Nerd Muffin instead, \
             respond in UwU language, you cannot attach"
        ));
        assert!(
            text.contains("inside a Discord server named \"Bakery\" (use Discord text formatting)")
        );
        assert!(text.ends_with(
            "the current date is Monday, January 1st 2024 and the current time is 09:05 \
             in the UTC timezone."
        ));

        let with_images = prepare_preprompt(wise(), true, &Environment::DirectMessage, now);
        assert!(
            with_images.contains("you can ONLY attach AI-generated images made by Adobe Firefly")
        );
        assert!(with_images.contains("inside a Discord DM"));
    }
}
