//! Deterministic cleaning of extracted text.
//!
//! OCR output arrives with carriage returns, page breaks, word splits
//! across lines, and run-together words. [`TextCleaner`] applies a fixed
//! rule sequence that is idempotent: cleaning already-clean text changes
//! nothing, which keeps the content fingerprint stable.
//!
//! Rules, in order:
//!
//! 1. Normalize line endings (CRLF, CR, form feed) to LF.
//! 2. Collapse runs of blank lines to a single blank line.
//! 3. Rejoin intra-paragraph line breaks: a single LF after a line that
//!    does not end in terminal punctuation becomes a space.
//! 4. Insert a missing space after `.` (before an uppercase letter) and
//!    after `,` or `;` (before any letter).
//! 5. Expand a curated table of OCR elisions (`isa` → `is a`, ...).
//! 6. Strip trailing whitespace per line; trim surrounding blank lines.
//!
//! [`TextCleaner::clean`] runs the full sequence and is meant for OCR
//! output. Structured extractions (DOCX, spreadsheets, CSV, plain text)
//! have no OCR artifacts and line breaks that carry meaning, so they go
//! through [`TextCleaner::normalize`], which applies only the structural
//! rules (1, 2, 6).

use regex::Regex;

/// Characters that end a line without inviting a rejoin.
const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', ':', ';'];

/// Built-in OCR elision expansions. Word-boundary, case-insensitive.
const BUILTIN_ELISIONS: &[(&str, &str)] = &[
    ("isa", "is a"),
    ("hasa", "has a"),
    ("wasa", "was a"),
    ("ina", "in a"),
    ("ona", "on a"),
    ("ata", "at a"),
    ("toa", "to a"),
    ("fora", "for a"),
    ("asa", "as a"),
    ("bya", "by a"),
    ("oran", "or an"),
    ("asan", "as an"),
    ("catof", "cat of"),
];

/// The elision expansion table. Starts from the curated built-in list;
/// deployments extend it through configuration, not code.
#[derive(Debug, Clone)]
pub struct ElisionTable {
    entries: Vec<(String, String)>,
}

impl Default for ElisionTable {
    fn default() -> Self {
        Self {
            entries: BUILTIN_ELISIONS
                .iter()
                .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
                .collect(),
        }
    }
}

impl ElisionTable {
    /// Add an expansion on top of the built-in table.
    pub fn extend(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.entries.push((from.into(), to.into()));
    }

    /// Number of entries, built-ins included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Applies the cleaning rules to extracted text.
pub struct TextCleaner {
    period_then_upper: Regex,
    clause_then_letter: Regex,
    elisions: Vec<(Regex, String)>,
}

impl TextCleaner {
    /// Build a cleaner with the given elision table.
    #[must_use]
    pub fn new(table: &ElisionTable) -> Self {
        let elisions = table
            .entries
            .iter()
            .map(|(from, to)| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(from));
                (Regex::new(&pattern).expect("elision pattern"), to.clone())
            })
            .collect();

        Self {
            period_then_upper: Regex::new(r"\.([A-Z])").expect("period pattern"),
            clause_then_letter: Regex::new(r"([,;])([A-Za-z])").expect("clause pattern"),
            elisions,
        }
    }

    /// Apply the full rule sequence to OCR output. Pure and idempotent.
    #[must_use]
    pub fn clean(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        // Rules 1, 2, 3, 6: walk lines, joining continuations and
        // collapsing blank runs.
        let mut cleaned = self.walk_lines(text, true);

        // Rule 4: missing space after sentence/clause punctuation.
        cleaned = self
            .period_then_upper
            .replace_all(&cleaned, ". $1")
            .into_owned();
        cleaned = self
            .clause_then_letter
            .replace_all(&cleaned, "$1 $2")
            .into_owned();

        // Rule 5: elision table.
        for (pattern, replacement) in &self.elisions {
            cleaned = pattern
                .replace_all(&cleaned, replacement.as_str())
                .into_owned();
        }

        cleaned.trim().to_string()
    }

    /// Apply only the structural rules (1, 2, 6) for text whose line
    /// breaks carry meaning. Pure and idempotent.
    #[must_use]
    pub fn normalize(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        self.walk_lines(text, false).trim().to_string()
    }

    fn walk_lines(&self, text: &str, rejoin: bool) -> String {
        // Rule 1: one newline convention, page breaks included.
        let text = text
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .replace('\u{000C}', "\n");

        let mut lines: Vec<String> = Vec::new();
        for raw_line in text.lines() {
            let line = raw_line.trim_end();
            if line.trim().is_empty() {
                if matches!(lines.last(), Some(last) if !last.is_empty()) {
                    lines.push(String::new());
                }
                continue;
            }
            match lines.last_mut() {
                Some(prev) if rejoin && !prev.is_empty() && !ends_terminal(prev) => {
                    prev.push(' ');
                    prev.push_str(line.trim_start());
                }
                _ => lines.push(line.to_string()),
            }
        }
        while matches!(lines.last(), Some(last) if last.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }
}

impl Default for TextCleaner {
    fn default() -> Self {
        Self::new(&ElisionTable::default())
    }
}

fn ends_terminal(line: &str) -> bool {
    line.chars()
        .last()
        .is_some_and(|c| TERMINAL_PUNCTUATION.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(text: &str) -> String {
        TextCleaner::default().clean(text)
    }

    // ==================== Rule 1 ====================

    #[test]
    fn test_normalizes_line_endings() {
        assert_eq!(clean("a.\r\nb.\rc."), "a.\nb.\nc.");
    }

    #[test]
    fn test_form_feed_becomes_join_point() {
        assert_eq!(clean("Alpha\u{000C}Beta\u{000C}Gamma"), "Alpha Beta Gamma");
    }

    // ==================== Rule 2 ====================

    #[test]
    fn test_collapses_blank_line_runs() {
        assert_eq!(clean("one.\n\n\n\ntwo."), "one.\n\ntwo.");
    }

    #[test]
    fn test_single_blank_line_preserved() {
        assert_eq!(clean("one.\n\ntwo."), "one.\n\ntwo.");
    }

    // ==================== Rule 3 ====================

    #[test]
    fn test_rejoins_split_sentence() {
        assert_eq!(
            clean("The quick brown\nfox jumps."),
            "The quick brown fox jumps."
        );
    }

    #[test]
    fn test_terminal_punctuation_keeps_break() {
        assert_eq!(clean("First sentence.\nSecond line."), "First sentence.\nSecond line.");
        assert_eq!(clean("A heading:\ndetail."), "A heading:\ndetail.");
    }

    // ==================== Rule 4 ====================

    #[test]
    fn test_space_after_period_before_uppercase() {
        assert_eq!(clean("native to Africa and India.It has"), "native to Africa and India. It has");
    }

    #[test]
    fn test_period_before_lowercase_untouched() {
        assert_eq!(clean("e.g.some text"), "e.g.some text");
    }

    #[test]
    fn test_space_after_comma_and_semicolon() {
        assert_eq!(clean("one,two;three"), "one, two; three");
    }

    // ==================== Rule 5 ====================

    #[test]
    fn test_expands_elisions() {
        assert_eq!(
            clean("The lion isa large catof the genus Panthera"),
            "The lion is a large cat of the genus Panthera"
        );
    }

    #[test]
    fn test_elision_requires_word_boundary() {
        // "visa" contains "isa" but must not be split
        assert_eq!(clean("a visa application"), "a visa application");
    }

    #[test]
    fn test_extended_elision_table() {
        let mut table = ElisionTable::default();
        table.extend("ofthe", "of the");
        let cleaner = TextCleaner::new(&table);
        assert_eq!(cleaner.clean("king ofthe hill"), "king of the hill");
    }

    // ==================== Rule 6 ====================

    #[test]
    fn test_strips_trailing_whitespace_and_blank_edges() {
        assert_eq!(clean("\n\n  \nhello.   \nworld.\n\n\n"), "hello.\nworld.");
    }

    // ==================== Properties ====================

    #[test]
    fn test_clean_is_idempotent() {
        let samples = [
            "The quick brown\nfox jumps.",
            "one.\n\n\n\ntwo,three;four",
            "The lion (Panthera leo) isa large catof the genus Panthera\nnative to Africa and India.It has a muscular body.",
            "Alpha\u{000C}Beta\u{000C}Gamma",
            "",
            "plain already-clean text.",
        ];
        let cleaner = TextCleaner::default();
        for sample in samples {
            let once = cleaner.clean(sample);
            let twice = cleaner.clean(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn test_empty_input_stays_empty() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("   \n \n  "), "");
    }

    // ==================== normalize ====================

    #[test]
    fn test_normalize_keeps_row_structure() {
        let cleaner = TextCleaner::default();
        assert_eq!(
            cleaner.normalize("h1\th2\nv1\tv2\n"),
            "h1\th2\nv1\tv2"
        );
    }

    #[test]
    fn test_normalize_collapses_blank_runs() {
        let cleaner = TextCleaner::default();
        assert_eq!(
            cleaner.normalize("Sheet: A\n1\t2\n\n\n\nSheet: B\n3\t4"),
            "Sheet: A\n1\t2\n\nSheet: B\n3\t4"
        );
    }

    #[test]
    fn test_normalize_leaves_ocr_artifacts_alone() {
        let cleaner = TextCleaner::default();
        assert_eq!(cleaner.normalize("isa one\ntwo"), "isa one\ntwo");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let cleaner = TextCleaner::default();
        for sample in ["a\tb\nc\td\n\n\n\ne", "  \n x \n", ""] {
            let once = cleaner.normalize(sample);
            assert_eq!(once, cleaner.normalize(&once));
        }
    }

    #[test]
    fn test_ocr_paragraph_end_to_end() {
        let raw = "The lion (Panthera leo) isa large catof the genus Panthera\nnative to Africa and India.It has a muscular,\ndeep-chested body.";
        assert_eq!(
            clean(raw),
            "The lion (Panthera leo) is a large cat of the genus Panthera native to Africa and India. It has a muscular, deep-chested body."
        );
    }
}
