//! Sentiment catalog: the tones a user can pick for replies.

/// A named tone modifier appended to prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentiment {
    /// Key stored in the user settings record
    pub key: &'static str,
    /// Name shown to users
    pub display_name: &'static str,
    /// Fragment completing "responded ..."
    pub prompt_suffix: &'static str,
}

pub const DEFAULT_SENTIMENT: &str = "wise";

#[rustfmt::skip]
pub const SENTIMENTS: &[Sentiment] = &[
    Sentiment { key: "wise", display_name: "Wise", prompt_suffix: "wisely" },
    Sentiment { key: "angry", display_name: "Angry", prompt_suffix: "angrily" },
    Sentiment { key: "australian", display_name: "Australian", prompt_suffix: "in the style of Crocodile Dundee" },
    Sentiment { key: "british", display_name: "British", prompt_suffix: "in the style of Shakespeare" },
    Sentiment { key: "ebonics", display_name: "Ebonics", prompt_suffix: "with a heavy use of Ebonics" },
    Sentiment { key: "egirl", display_name: "E-Girl", prompt_suffix: "like an E-Girl" },
    Sentiment { key: "old", display_name: "Old Man", prompt_suffix: "like a conservative and cynical old man" },
    Sentiment { key: "uwu", display_name: "UwU", prompt_suffix: "in UwU language" },
];

impl Sentiment {
    /// Look up a catalog entry by key.
    pub fn find(key: &str) -> Option<&'static Sentiment> {
        SENTIMENTS.iter().find(|s| s.key == key)
    }

    /// Look up a catalog entry, falling back to the default tone.
    pub fn resolve(key: &str) -> &'static Sentiment {
        Self::find(key).unwrap_or_else(Self::default_sentiment)
    }

    pub fn default_sentiment() -> &'static Sentiment {
        &SENTIMENTS[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_in_catalog() {
        let default = Sentiment::default_sentiment();
        assert_eq!(default.key, DEFAULT_SENTIMENT);
        assert_eq!(Sentiment::find(DEFAULT_SENTIMENT), Some(default));
    }

    #[test]
    fn test_unknown_key_falls_back() {
        assert_eq!(Sentiment::resolve("pirate").key, "wise");
        assert_eq!(Sentiment::resolve("uwu").prompt_suffix, "in UwU language");
    }

    #[test]
    fn test_keys_are_unique() {
        for (i, a) in SENTIMENTS.iter().enumerate() {
            assert!(SENTIMENTS[i + 1..].iter().all(|b| b.key != a.key), "duplicate key {}", a.key);
        }
    }
}
