//! Built-in vocabularies and the uniform draws used by placeholders and
//! random text presets. Nothing here is seeded or cryptographic.

use serde::{Deserialize, Serialize};

pub const WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet",
    "kilo", "lima", "mike", "november", "oscar", "papa", "quebec", "romeo", "sierra", "tango",
    "uniform", "victor", "whiskey", "xray", "yankee", "zulu",
];

pub const FIRST_NAMES: &[&str] = &[
    "Luca", "Giulia", "Marco", "Francesca", "Paolo", "Chiara", "Alessio", "Marta", "Davide",
    "Sara", "Giorgio", "Elisa", "Nicola", "Anna", "Matteo", "Laura", "Riccardo", "Noemi",
    "Stefano", "Beatrice",
];

pub const LAST_NAMES: &[&str] = &[
    "Rossi", "Bianchi", "Ferrari", "Esposito", "Romano", "Galli", "Costa", "Fontana", "Greco",
    "Lombardi", "Moretti", "Marino", "Giordano", "Mancini", "De Luca", "Ricci", "Testa",
    "Rinaldi", "Caruso", "Ferri",
];

pub const COLORS: &[&str] = &[
    "red", "green", "blue", "yellow", "orange", "violet", "indigo", "cyan", "magenta", "olive",
    "brown", "ivory", "cream", "teal", "sage", "coral", "lavender", "pearl", "saffron", "ruby",
];

pub const EMAIL_DOMAINS: &[&str] = &[
    "example.com",
    "mail.test",
    "company.dev",
    "demo.io",
    "sample.net",
];

/// Uniform pick from a list; empty lists yield an empty string.
pub fn pick<'a>(list: &[&'a str]) -> &'a str {
    if list.is_empty() {
        return "";
    }
    let i = (rand::random::<f64>() * list.len() as f64) as usize;
    list[i.min(list.len() - 1)]
}

/// `floor(a + random() * (b - a + 1))`, with `a > b` swapped first.
pub fn int_between(a: i64, b: i64) -> i64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let span = (hi as i128 - lo as i128 + 1) as f64;
    let offset = (rand::random::<f64>() * span).floor() as i128;
    (lo as i128 + offset).clamp(lo as i128, hi as i128) as i64
}

/// Uniform float in `[a, b)` formatted to `decimals` places.
pub fn float_between(a: f64, b: f64, decimals: usize) -> String {
    let value = a + rand::random::<f64>() * (b - a);
    format!("{:.*}", decimals.min(100), value)
}

pub fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn sentence() -> String {
    format!("{} {} {}", pick(WORDS), pick(WORDS), pick(WORDS))
}

pub fn placeholder_email() -> String {
    format!("user{}@{}", int_between(1000, 9999), pick(EMAIL_DOMAINS))
}

/// Named generators selectable on a `type` step instead of literal text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RandomPreset {
    Word,
    Sentence,
    Name,
    FullName,
    Email,
    Color,
    Uuid,
    Number4,
}

impl RandomPreset {
    pub fn label(self) -> &'static str {
        match self {
            RandomPreset::Word => "random word",
            RandomPreset::Sentence => "random sentence",
            RandomPreset::Name => "first name",
            RandomPreset::FullName => "full name",
            RandomPreset::Email => "realistic email",
            RandomPreset::Color => "random color",
            RandomPreset::Uuid => "UUID",
            RandomPreset::Number4 => "4-digit number",
        }
    }

    pub fn generate(self) -> String {
        match self {
            RandomPreset::Word => pick(WORDS).to_string(),
            RandomPreset::Sentence => sentence(),
            RandomPreset::Name => pick(FIRST_NAMES).to_string(),
            RandomPreset::FullName => format!("{} {}", pick(FIRST_NAMES), pick(LAST_NAMES)),
            RandomPreset::Email => {
                let local = format!("{}{}", pick(FIRST_NAMES), int_between(1, 9999))
                    .to_lowercase()
                    .split_whitespace()
                    .collect::<String>();
                format!("{local}.{}@{}", int_between(10, 99), pick(EMAIL_DOMAINS))
            }
            RandomPreset::Color => pick(COLORS).to_string(),
            RandomPreset::Uuid => uuid_v4(),
            RandomPreset::Number4 => int_between(1000, 9999).to_string(),
        }
    }
}
