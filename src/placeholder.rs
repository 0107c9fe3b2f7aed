//! Template expansion for typed text and navigation URLs.
//!
//! Recognized patterns, expanded in this order in a single pass:
//! `[a|b|c]`, `{{UUID}}`, `{{TIMESTAMP}}`, `{{RANDOM_INT:a:b}}`,
//! `{{RANDOM_FLOAT:a:b:d}}`, `{{RANDOM_WORD}}`, `{{RANDOM_SENTENCE}}`,
//! `{{RANDOM_EMAIL}}` and `{{SEQ:name}}`. Anything else is left verbatim.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::random;
use crate::sequence::SequenceCache;

static ANY_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{[^}]+\}\}").unwrap());
static ALTERNATIVES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]*\|[^\[\]]*)\]").unwrap());
static UUID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{UUID\}\}").unwrap());
static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{TIMESTAMP\}\}\s*").unwrap());
static RANDOM_INT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{RANDOM_INT:(-?\d+):(-?\d+)\}\}").unwrap());
static RANDOM_FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{RANDOM_FLOAT:(-?\d+\.?\d*):(-?\d+\.?\d*):(\d+)\}\}").unwrap()
});
static RANDOM_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{RANDOM_WORD\}\}").unwrap());
static RANDOM_SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{RANDOM_SENTENCE\}\}").unwrap());
static RANDOM_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{RANDOM_EMAIL\}\}").unwrap());
static SEQ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{SEQ:([a-zA-Z0-9_-]+)\}\}").unwrap());

#[derive(Clone)]
pub struct PlaceholderResolver {
    sequences: SequenceCache,
}

impl PlaceholderResolver {
    pub fn new(sequences: SequenceCache) -> Self {
        Self { sequences }
    }

    pub async fn resolve(&self, text: &str) -> String {
        if !ANY_TOKEN.is_match(text) && !ALTERNATIVES.is_match(text) {
            return text.to_string();
        }

        let text = ALTERNATIVES.replace_all(text, |caps: &Captures| {
            let options: Vec<&str> = caps[1]
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            random::pick(&options).to_string()
        });
        let text = UUID.replace_all(&text, |_: &Captures| random::uuid_v4());
        let text = TIMESTAMP.replace_all(&text, |_: &Captures| {
            chrono::Utc::now().timestamp_millis().to_string()
        });
        let text = RANDOM_INT.replace_all(&text, |caps: &Captures| {
            match (caps[1].parse::<i64>(), caps[2].parse::<i64>()) {
                (Ok(a), Ok(b)) => random::int_between(a, b).to_string(),
                _ => caps[0].to_string(),
            }
        });
        let text = RANDOM_FLOAT.replace_all(&text, |caps: &Captures| {
            match (
                caps[1].parse::<f64>(),
                caps[2].parse::<f64>(),
                caps[3].parse::<usize>(),
            ) {
                (Ok(a), Ok(b), Ok(d)) => random::float_between(a, b, d),
                _ => caps[0].to_string(),
            }
        });
        let text = RANDOM_WORD.replace_all(&text, |_: &Captures| random::pick(random::WORDS));
        let text = RANDOM_SENTENCE.replace_all(&text, |_: &Captures| random::sentence());
        let text = RANDOM_EMAIL.replace_all(&text, |_: &Captures| random::placeholder_email());

        self.expand_sequences(&text).await
    }

    async fn expand_sequences(&self, text: &str) -> String {
        let matches: Vec<(std::ops::Range<usize>, String)> = SEQ
            .captures_iter(text)
            .filter_map(|caps| Some((caps.get(0)?.range(), caps.get(1)?.as_str().to_string())))
            .collect();
        if matches.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (range, name) in matches {
            out.push_str(&text[last..range.start]);
            out.push_str(&self.sequences.next(&name).await.to_string());
            last = range.end;
        }
        out.push_str(&text[last..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    fn resolver() -> PlaceholderResolver {
        PlaceholderResolver::new(SequenceCache::new(Arc::new(MemoryStorage::new())))
    }

    #[tokio::test]
    async fn plain_text_is_untouched() {
        let r = resolver();
        assert_eq!(r.resolve("hello [world]").await, "hello [world]");
        assert_eq!(r.resolve("").await, "");
    }

    #[tokio::test]
    async fn alternatives_pick_exactly_one() {
        let r = resolver();
        for _ in 0..50 {
            let v = r.resolve("[a|b]").await;
            assert!(v == "a" || v == "b", "got {v}");
        }
        assert_eq!(r.resolve("[ x | ]").await, "x");
        assert_eq!(r.resolve("pre[|]post").await, "prepost");
    }

    #[tokio::test]
    async fn degenerate_random_int_is_fixed() {
        let r = resolver();
        assert_eq!(r.resolve("{{RANDOM_INT:5:5}}").await, "5");
        let swapped: i64 = r.resolve("{{RANDOM_INT:9:-9}}").await.parse().unwrap();
        assert!((-9..=9).contains(&swapped));
    }

    #[tokio::test]
    async fn each_sequence_token_advances_the_counter() {
        let r = resolver();
        assert_eq!(r.resolve("#{{SEQ:order}}-{{SEQ:order}}").await, "#1-2");
        assert_eq!(r.resolve("{{SEQ:order}}/{{SEQ:other}}").await, "3/1");
    }

    #[tokio::test]
    async fn unknown_tokens_are_left_verbatim() {
        let r = resolver();
        assert_eq!(
            r.resolve("{{NOPE}} {{SEQ:bad name}}").await,
            "{{NOPE}} {{SEQ:bad name}}"
        );
    }

    #[tokio::test]
    async fn generated_values_have_expected_shape() {
        let r = resolver();
        let uuid = r.resolve("{{UUID}}").await;
        assert_eq!(uuid.len(), 36);
        assert_eq!(&uuid[14..15], "4");

        let ts = r.resolve("{{TIMESTAMP}}   end").await;
        let (digits, rest) = ts.split_at(ts.find('e').unwrap());
        assert!(digits.parse::<i64>().is_ok());
        assert_eq!(rest, "end");

        let float = r.resolve("{{RANDOM_FLOAT:1.5:2.5:2}}").await;
        let parsed: f64 = float.parse().unwrap();
        assert!((1.5..=2.5).contains(&parsed));
        assert_eq!(float.split('.').nth(1).unwrap().len(), 2);

        let email = r.resolve("{{RANDOM_EMAIL}}").await;
        assert!(email.starts_with("user"));
        assert_eq!(email.split('@').next().unwrap().len(), 8);

        let sentence = r.resolve("{{RANDOM_SENTENCE}}").await;
        assert_eq!(sentence.split(' ').count(), 3);
    }

    #[tokio::test]
    async fn alternatives_expand_before_sequences() {
        let r = resolver();
        let out = r.resolve("[{{SEQ:a}}|{{SEQ:a}}]").await;
        assert_eq!(out, "1");
    }
}
