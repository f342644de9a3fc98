use crate::config::FilterConfig;
use std::collections::HashSet;

const DEFAULT_BLOCKED_WORDS: &[&str] = &[
    "arse",
    "arsehole",
    "arses",
    "ass",
    "asses",
    "asshole",
    "assholes",
    "bastard",
    "bastards",
    "bitch",
    "bitches",
    "bitching",
    "bollock",
    "bollocks",
    "bugger",
    "bullshit",
    "bullshitting",
    "butthole",
    "clit",
    "cock",
    "cocks",
    "cocksucker",
    "crap",
    "cum",
    "cunt",
    "cunts",
    "damn",
    "dick",
    "dickhead",
    "dickheads",
    "dildo",
    "dipshit",
    "douche",
    "douchebag",
    "dumbass",
    "fag",
    "faggot",
    "fck",
    "feck",
    "fuck",
    "fucked",
    "fucker",
    "fuckers",
    "fuckin",
    "fucking",
    "fucks",
    "goddamn",
    "goddamned",
    "handjob",
    "horseshit",
    "jackass",
    "jizz",
    "knobhead",
    "motherfucker",
    "motherfuckers",
    "motherfucking",
    "nigga",
    "nigger",
    "piss",
    "pissed",
    "prick",
    "pussies",
    "pussy",
    "retard",
    "shit",
    "shite",
    "shithead",
    "shits",
    "shitting",
    "shitty",
    "skank",
    "slag",
    "slut",
    "sluts",
    "spunk",
    "tits",
    "tosser",
    "twat",
    "twats",
    "wank",
    "wanker",
    "wankers",
    "whore",
    "whores",
];

/// Pure text transform applied to titles and artists before they leave the
/// process.
pub trait TextFilter: Send + Sync {
    fn clean(&self, text: &str) -> String;
}

/// Masks blocked words, matched case-insensitively on whole words.
#[derive(Debug, Clone)]
pub struct WordListFilter {
    blocked: HashSet<String>,
    placeholder: char,
}

impl WordListFilter {
    pub fn new<I, S>(words: I, placeholder: char) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocked: words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
            placeholder,
        }
    }

    pub fn from_config(cfg: &FilterConfig) -> Self {
        let mut filter = Self::new(
            DEFAULT_BLOCKED_WORDS
                .iter()
                .copied()
                .chain(cfg.extra_words.iter().map(String::as_str)),
            cfg.placeholder,
        );
        for allowed in &cfg.allowed_words {
            filter.blocked.remove(&allowed.trim().to_lowercase());
        }
        filter
    }

    fn mask_word(&self, word: &str, out: &mut String) {
        if self.blocked.contains(&word.to_lowercase()) {
            out.extend(std::iter::repeat(self.placeholder).take(word.chars().count()));
        } else {
            out.push_str(word);
        }
    }
}

impl Default for WordListFilter {
    fn default() -> Self {
        Self::from_config(&FilterConfig::default())
    }
}

impl TextFilter for WordListFilter {
    fn clean(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut word_start: Option<usize> = None;

        for (idx, ch) in text.char_indices() {
            if ch.is_alphanumeric() {
                if word_start.is_none() {
                    word_start = Some(idx);
                }
                continue;
            }
            if let Some(start) = word_start.take() {
                self.mask_word(&text[start..idx], &mut out);
            }
            out.push(ch);
        }
        if let Some(start) = word_start {
            self.mask_word(&text[start..], &mut out);
        }

        out
    }
}

/// Leaves text untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFilter;

impl TextFilter for PassthroughFilter {
    fn clean(&self, text: &str) -> String {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{TextFilter, WordListFilter};
    use crate::config::FilterConfig;

    #[test]
    fn masks_whole_words_only() {
        let filter = WordListFilter::default();

        assert_eq!(filter.clean("Holy Shit (Live)"), "Holy **** (Live)");
        assert_eq!(filter.clean("Class Action"), "Class Action");
        assert_eq!(filter.clean("Scunthorpe"), "Scunthorpe");
    }

    #[test]
    fn is_pure() {
        let filter = WordListFilter::default();
        let once = filter.clean("fuck it, FUCK it");
        assert_eq!(once, "**** it, **** it");
        assert_eq!(filter.clean("fuck it, FUCK it"), once);
    }

    #[test]
    fn config_extends_and_allows() {
        let filter = WordListFilter::from_config(&FilterConfig {
            extra_words: vec!["Frak".to_string()],
            allowed_words: vec!["bitch".to_string()],
            placeholder: '#',
        });

        assert_eq!(filter.clean("frak the bitch"), "#### the bitch");
    }

    #[test]
    fn handles_multibyte_text() {
        let filter = WordListFilter::new(["grüße"], '*');
        assert_eq!(filter.clean("Viele Grüße!"), "Viele *****!");
        assert_eq!(filter.clean("東京 shit"), "東京 shit");
    }

    #[test]
    fn default_list_covers_common_variants() {
        let filter = WordListFilter::default();

        assert_eq!(filter.clean("Motherfucking Goddamn"), "************* *******");
        assert_eq!(filter.clean("Shitting Bricks"), "******** Bricks");
        assert_eq!(filter.clean("Cocktail Hour"), "Cocktail Hour");
    }
}
