//! Light text cleaning for the processed dataset.

/// English stop words, apostrophes removed since punctuation is stripped first.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "ain", "all", "and", "any", "are", "aren",
    "arent", "because", "been", "before", "being", "below", "between", "both", "but", "can",
    "couldn", "couldnt", "did", "didn", "didnt", "does", "doesn", "doesnt", "doing", "don",
    "dont", "down", "during", "each", "few", "for", "from", "further", "had", "hadn", "hadnt",
    "has", "hasn", "hasnt", "have", "haven", "havent", "having", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "into", "isn", "isnt", "itd", "itll", "its",
    "itself", "ive", "just", "mightn", "mightnt", "more", "most", "mustn", "mustnt", "myself",
    "needn", "neednt", "nor", "not", "now", "off", "once", "only", "other", "our", "ours",
    "ourselves", "out", "over", "own", "same", "shan", "shant", "she", "shed", "shell", "shes",
    "should", "shouldn", "shouldnt", "shouldve", "some", "such", "than", "that", "thatll",
    "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they", "theyd",
    "theyll", "theyre", "theyve", "this", "those", "through", "too", "under", "until", "very",
    "was", "wasn", "wasnt", "were", "weren", "werent", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "won", "wont", "wouldn", "wouldnt", "you",
    "youd", "youll", "your", "youre", "yours", "yourself", "yourselves", "youve",
];

const ARTIFACTS: &[&str] = &["[removed]", "[deleted]"];

/// Normalizes post text into a space-separated bag of content words.
///
/// Steps, in order: drop `[removed]`/`[deleted]` markers, drop URLs, replace
/// HTML entities with a space, lowercase, strip ASCII punctuation and digits,
/// then keep tokens longer than two characters that are not stop words.
pub fn clean_text(text: &str) -> String {
    let mut text = text.to_string();
    for artifact in ARTIFACTS {
        text = text.replace(artifact, "");
    }

    let text = strip_entities(&strip_urls(&text)).to_lowercase();
    let text: String = text
        .chars()
        .filter(|c| !c.is_ascii_punctuation() && !c.is_numeric())
        .collect();

    text.split_whitespace()
        .filter(|token| token.chars().count() > 2 && !is_stop_word(token))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Removes everything from `http` or `www` up to the next whitespace.
fn strip_urls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = find_url_start(rest) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let end = tail.find(char::is_whitespace).unwrap_or(tail.len());
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

/// First `http` or `www` that is directly followed by a non-whitespace character.
fn find_url_start(text: &str) -> Option<usize> {
    let first = |prefix: &str| {
        text.match_indices(prefix).map(|(i, _)| i).find(|&i| {
            text[i + prefix.len()..]
                .chars()
                .next()
                .map_or(false, |c| !c.is_whitespace())
        })
    };
    match (first("http"), first("www")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Replaces `&name;` sequences with a single space.
fn strip_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let name_len = after
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(after.len());

        if name_len > 0 && after[name_len..].starts_with(';') {
            out.push(' ');
            rest = &after[name_len + 1..];
        } else {
            out.push('&');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}
