//! Phrase normalization and matching
//!
//! Wake phrases and command triggers share one matcher. Text is normalized to
//! lowercase words separated by single spaces before any comparison.
//!
//! Two strategies are available:
//!
//! - `Exact`: the phrase must appear verbatim, starting and ending on word
//!   boundaries (`"exit"` matches `"please exit"` but not `"exiting"`).
//! - `Fuzzy`: edit distance against runs of whole words, allowing up to one
//!   edit per five characters of the phrase, capped at `max_edits`. Phrases
//!   shorter than five characters therefore always match exactly. This absorbs
//!   recognizer splits like `"hey open code"` for `"hey opencode"`.

/// How configured phrases are compared against recognized text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// Verbatim substring on word boundaries
    #[default]
    Exact,
    /// Approximate substring with a bounded edit distance
    Fuzzy {
        /// Upper bound on edits regardless of phrase length
        max_edits: usize,
    },
}

/// Characters of phrase per allowed edit in fuzzy mode
const CHARS_PER_EDIT: usize = 5;

/// Location of a phrase inside normalized text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhraseMatch {
    /// Byte offset where the match starts
    pub start: usize,
    /// Byte offset just past the match
    pub end: usize,
    /// Edits needed (always 0 for exact matches)
    pub edits: usize,
}

impl MatchStrategy {
    /// Parse a strategy name from configuration
    #[must_use]
    pub fn from_name(name: &str, max_edits: usize) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "exact" | "substring" => Some(Self::Exact),
            "fuzzy" | "edit_distance" => Some(Self::Fuzzy { max_edits }),
            _ => None,
        }
    }

    /// Find `phrase` in `text`; both must already be normalized
    #[must_use]
    pub fn find(&self, text: &str, phrase: &str) -> Option<PhraseMatch> {
        if phrase.is_empty() {
            return None;
        }

        match *self {
            Self::Exact => find_exact(text, phrase),
            Self::Fuzzy { max_edits } => {
                let budget = max_edits.min(phrase.chars().count() / CHARS_PER_EDIT);
                if budget == 0 {
                    find_exact(text, phrase)
                } else {
                    find_fuzzy(text, phrase, budget)
                }
            }
        }
    }

    /// Whether `phrase` occurs in `text`
    #[must_use]
    pub fn matches(&self, text: &str, phrase: &str) -> bool {
        self.find(text, phrase).is_some()
    }
}

/// Lowercase, drop punctuation, collapse whitespace
#[must_use]
pub fn normalize(text: &str) -> String {
    normalize_preserving_case(text).to_lowercase()
}

/// Same as [`normalize`] but keeps the original letter case
///
/// Word positions line up with [`normalize`], so a word index found in the
/// lowercase form can be read back here (container names are case-sensitive).
#[must_use]
pub fn normalize_preserving_case(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());

    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if c == '\'' || c == '\u{2019}' {
            // "what's" -> "whats"
        } else if matches!(c, '-' | '_' | '.') && is_inner(&chars, i) {
            out.push(c);
        } else {
            out.push(' ');
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Index of the first word starting at or after byte offset `pos`
#[must_use]
pub fn word_index_at(text: &str, pos: usize) -> usize {
    // A match ending mid-word consumes that word too
    text[..pos.min(text.len())].split_whitespace().count()
}

fn is_inner(chars: &[char], i: usize) -> bool {
    i > 0
        && i + 1 < chars.len()
        && chars[i - 1].is_alphanumeric()
        && chars[i + 1].is_alphanumeric()
}

fn find_exact(text: &str, phrase: &str) -> Option<PhraseMatch> {
    text.match_indices(phrase).find_map(|(start, _)| {
        let end = start + phrase.len();
        let left_ok = start == 0 || text[..start].ends_with(' ');
        let right_ok = end == text.len() || text[end..].starts_with(' ');
        (left_ok && right_ok).then_some(PhraseMatch {
            start,
            end,
            edits: 0,
        })
    })
}

/// Approximate search over whole-word spans
///
/// Every run of consecutive words in `text` whose word count could reach the
/// phrase within `budget` edits is compared to the phrase by edit distance, so
/// a match always starts and ends on a word boundary. The lowest distance wins;
/// ties go to the earliest, then shortest, span.
fn find_fuzzy(text: &str, phrase: &str, budget: usize) -> Option<PhraseMatch> {
    let words = word_spans(text);
    let pattern: Vec<char> = phrase.chars().collect();

    // Each edit can split or join at most one pair of words
    let phrase_words = phrase.split(' ').count();
    let min_words = phrase_words.saturating_sub(budget).max(1);
    let max_words = phrase_words + budget;

    let mut best: Option<PhraseMatch> = None;

    for first in 0..words.len() {
        for count in min_words..=max_words {
            let Some(&(_, end)) = words.get(first + count - 1) else {
                break;
            };
            let start = words[first].0;

            let edits = edit_distance(&text[start..end], &pattern);
            if edits <= budget && best.is_none_or(|b| edits < b.edits) {
                best = Some(PhraseMatch { start, end, edits });
            }
        }
    }

    best
}

/// Byte ranges of the space-separated words in normalized text
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for word in text.split(' ') {
        if !word.is_empty() {
            spans.push((offset, offset + word.len()));
        }
        offset += word.len() + 1;
    }
    spans
}

/// Levenshtein distance between `candidate` and `pattern`, by characters
fn edit_distance(candidate: &str, pattern: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=pattern.len()).collect();
    let mut current = vec![0; pattern.len() + 1];

    for (j, c) in candidate.chars().enumerate() {
        current[0] = j + 1;
        for i in 1..=pattern.len() {
            let substitute = previous[i - 1] + usize::from(pattern[i - 1] != c);
            current[i] = substitute.min(previous[i] + 1).min(current[i - 1] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[pattern.len()]
}
