//! Programme description decomposition
//!
//! Feed descriptions pack metadata into a loose layout:
//!
//! ```text
//! 2023 | 16 | 8/10
//! Drama / Thriller · A gripping tale
//! Reparto: Ana, Luis · País: España
//! ```
//!
//! Line one holds year, age rating and votes; line two the genre and a
//! synopsis; everything after that is `label: value` fragments.

use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

use crate::models::{Program, ProgramDetail};
use crate::utils::text::fold_diacritics;

// Unanchored: a digit, a slash and a digit anywhere in the field
static VOTES_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d/\d").expect("static votes pattern"));

const FIELD_SEPARATOR: char = '|';
const FRAGMENT_SEPARATOR: char = '·';
const GENRE_SEPARATOR: char = '/';
const LABEL_DELIMITER: &str = ": ";

/// Split a raw description into structured fields. Missing parts stay empty.
pub fn decompose(raw: &str) -> ProgramDetail {
    let mut lines = raw.split('\n');
    let mut detail = ProgramDetail::default();

    if let Some(first) = lines.next() {
        let mut fields = first.splitn(3, FIELD_SEPARATOR).map(str::trim);
        detail.year = fields.next().unwrap_or_default().to_string();
        detail.age_rating = fields.next().unwrap_or_default().to_string();
        let votes = fields.next().unwrap_or_default();
        if VOTES_PATTERN.is_match(votes) {
            detail.votes = votes.to_string();
        }
    }

    if let Some(second) = lines.next() {
        let mut parts = second.splitn(2, FRAGMENT_SEPARATOR).map(str::trim);
        let genre_token = parts.next().unwrap_or_default();
        detail.synopsis = parts.next().unwrap_or_default().to_string();

        let mut genres = genre_token.splitn(2, GENRE_SEPARATOR).map(str::trim);
        detail.genre = genres.next().unwrap_or_default().to_string();
        detail.subgenre = genres.next().unwrap_or_default().to_string();
    }

    let rest: Vec<&str> = lines.collect();
    detail.detail_map = detail_fragments(&rest.join("\n"));
    detail
}

fn detail_fragments(text: &str) -> IndexMap<String, String> {
    text.split(FRAGMENT_SEPARATOR)
        .filter_map(|fragment| fragment.split_once(LABEL_DELIMITER))
        .map(|(label, value)| {
            (
                fold_diacritics(&label.trim().to_lowercase()),
                value.trim().to_string(),
            )
        })
        .collect()
}

impl ProgramDetail {
    /// Decompose a program's description and attach its duration
    pub fn for_program(program: &Program) -> Self {
        Self {
            duration_minutes: program.duration_minutes(),
            ..decompose(&program.raw_description)
        }
    }
}
