//! Light text cleanup applied before classification.
//!
//! Cuts email signatures, fixes a short list of common typos and collapses
//! runs of whitespace. Never changes the meaning of the ticket.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// A line matching any of these ends the body.
static SIGNATURE_CUTOFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(--\s*|thanks[,.! ]*|thank you[,.! ]*|best( regards)?[,.! ]*|regards[,.! ]*|cheers[,.! ]*|sent from my iphone.*)$",
    )
    .expect("valid signature regex")
});

const TYPOS: &[(&str, &str)] = &[
    ("hte", "the"),
    ("teh", "the"),
    ("adress", "address"),
    ("recieve", "receive"),
    ("seperate", "separate"),
    ("occurence", "occurrence"),
    ("occured", "occurred"),
    ("enviroment", "environment"),
    ("definately", "definitely"),
    ("intermitently", "intermittently"),
];

static TYPO_WORD: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = TYPOS
        .iter()
        .map(|(wrong, _)| regex::escape(wrong))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b({alternation})\b")).expect("valid typo regex")
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static TRAILING_BLANKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").expect("valid regex"));
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Clean a subject/body pair. Returns `(subject, body)`.
pub fn clean_subject_body(subject: &str, body: &str) -> (String, String) {
    let subject = fix_typos(subject.trim());
    let subject = WHITESPACE.replace_all(&subject, " ").trim().to_string();

    let body = strip_signature(body.trim());
    let body = fix_typos(&body);
    let body = TRAILING_BLANKS.replace_all(&body, "\n");
    let body = BLANK_RUN.replace_all(&body, "\n\n").trim().to_string();

    (subject, body)
}

/// Text given to the classifiers: subject and body joined by a space.
pub fn classifier_input(subject: &str, body: &str) -> String {
    format!("{} {}", subject.trim(), body.trim()).trim().to_string()
}

fn strip_signature(body: &str) -> String {
    body.lines()
        .take_while(|line| !SIGNATURE_CUTOFF.is_match(line.trim()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn fix_typos(text: &str) -> String {
    TYPO_WORD
        .replace_all(text, |caps: &Captures| {
            let word = &caps[0];
            let lower = word.to_lowercase();
            let fixed = TYPOS
                .iter()
                .find(|(wrong, _)| *wrong == lower)
                .map(|(_, right)| *right)
                .unwrap_or(word);
            if word.starts_with(|c: char| c.is_uppercase()) {
                capitalize(fixed)
            } else {
                fixed.to_string()
            }
        })
        .into_owned()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
