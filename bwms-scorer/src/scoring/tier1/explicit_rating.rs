// Tier 1: Explicit-Rating Extractor
//
// Concept: Find a rating the critic assigned themselves in the review text
// Priority: stars → "X out of Y" → "X/Y" → letter grade (first format that matches wins)
//
// Deterministic and network-free. Its output outranks every model judge.

use crate::scoring::types::{ExplicitRating, ExplicitRatingKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Star glyph run, optionally followed by an explicit scale ("★★★ out of four")
static STARS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([★☆½]+)(?:\s*\(?\s*out\s+of\s+(\d+|four|five|ten)\)?)?")
        .expect("static regex")
});

static OUT_OF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d+(?:\.\d+)?|one|two|three|four|five|six|seven|eight|nine|ten|zero)(\s+and\s+a\s+half)?\s+(?:stars?\s+)?out\s+of\s+(\d+|four|five|ten)\b",
    )
    .expect("static regex")
});

static SLASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*/\s*(\d+)").expect("static regex"));

/// Rating language directly before a slash rating: "score 8/10", "we rated it 4/5"
static SLASH_CONTEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:rating|rated|score|scored|grade|graded|verdict|marks?|stars?)(?:\s+it)?\s*(?:[:\-–—]|is|of|a)?\s*$",
    )
    .expect("static regex")
});

/// Grading language followed by the grade: "grade: B+", "verdict: A-"
static GRADE_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:\b(?:grade|graded|rating|verdict)\s*(?:[:\-–—]|is|of)?\s*)([A-DF][+\-−]?)")
        .expect("static regex")
});

/// "Score: B+." only; in a theater review "score" is usually the music
static GRADE_SCORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:\bscore\s*[:\-–—]\s*)([A-DF][+\-−]?)").expect("static regex")
});

/// Verb phrasing: "gives it an A", "I'd give the show a B-", "earns a C+"
static GRADE_VERB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:\b(?:give|gives|given|gave|giving|earns|earned|deserves|deserved|gets|got|receives|received|merits)\s+(?:(?:it|this|this\s+show|this\s+production|this\s+musical|this\s+play|the\s+show|the\s+production|the\s+musical|the\s+play|the\s+revival)\s+)?an?\s+)([A-DF][+\-−]?)",
    )
    .expect("static regex")
});

/// Letter grade → score table, keys normalized to "A+", "B-", "F" form
#[derive(Debug, Clone, PartialEq)]
pub struct LetterGradeTable {
    grades: BTreeMap<String, f64>,
}

impl LetterGradeTable {
    pub fn new(grades: &BTreeMap<String, f64>) -> Self {
        Self {
            grades: grades
                .iter()
                .map(|(grade, score)| (normalize_grade(grade), *score))
                .collect(),
        }
    }

    pub fn score(&self, grade: &str) -> Option<f64> {
        self.grades.get(&normalize_grade(grade)).copied()
    }
}

impl Default for LetterGradeTable {
    fn default() -> Self {
        Self::new(&crate::config::default_letter_grades())
    }
}

fn normalize_grade(grade: &str) -> String {
    grade.trim().to_ascii_uppercase().replace('−', "-")
}

/// Extracts author-assigned ratings from raw review text
#[derive(Debug, Clone, Default)]
pub struct ExplicitRatingExtractor {
    grades: LetterGradeTable,
}

impl ExplicitRatingExtractor {
    pub fn new(grades: LetterGradeTable) -> Self {
        Self { grades }
    }

    /// First rating found, by format priority
    pub fn extract(&self, text: &str) -> Option<ExplicitRating> {
        find_stars(text)
            .or_else(|| find_out_of(text))
            .or_else(|| find_slash(text))
            .or_else(|| self.find_letter_grade(text))
    }

    fn find_letter_grade(&self, text: &str) -> Option<ExplicitRating> {
        // (pattern, grade must close the clause)
        [(&*GRADE_LABEL_RE, false), (&*GRADE_VERB_RE, false), (&*GRADE_SCORE_RE, true)]
            .into_iter()
            .flat_map(|(re, strict)| re.captures_iter(text).map(move |caps| (strict, caps)))
            .filter_map(|(strict, caps)| {
                let whole = caps.get(0)?;
                let grade = caps.get(1)?;
                // A grade glued to following letters is a word ("A-list", "Average")
                if next_char(text, grade.end()).is_some_and(|c| c.is_alphanumeric()) {
                    return None;
                }
                if strict && !ends_clause(text, grade.end()) {
                    return None;
                }
                let score = self.grades.score(grade.as_str())?;
                Some((
                    whole.start(),
                    ExplicitRating {
                        kind: ExplicitRatingKind::LetterGrade,
                        matched: whole.as_str().trim().to_string(),
                        score,
                    },
                ))
            })
            .min_by_key(|(start, _)| *start)
            .map(|(_, rating)| rating)
    }
}

fn find_stars(text: &str) -> Option<ExplicitRating> {
    for caps in STARS_RE.captures_iter(text) {
        let (Some(whole), Some(glyphs)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let filled = glyphs.as_str().chars().filter(|c| *c == '★').count();
        let empty = glyphs.as_str().chars().filter(|c| *c == '☆').count();
        let halves = glyphs.as_str().chars().filter(|c| *c == '½').count();
        // A lone "½" is a running time ("2½ hours"), not a rating
        if halves > 1 || filled + empty == 0 {
            continue;
        }

        let value = filled as f64 + 0.5 * halves as f64;
        let scale = match caps.get(2) {
            Some(m) => parse_number(m.as_str())?,
            // Empty glyphs show the scale; a half glyph occupies a slot
            None if empty > 0 => (filled + empty + halves) as f64,
            None => 5.0,
        };
        if scale <= 0.0 || value > scale {
            continue;
        }

        return Some(ExplicitRating {
            kind: ExplicitRatingKind::Stars,
            matched: whole.as_str().trim().to_string(),
            score: normalize(value, scale),
        });
    }
    None
}

fn find_out_of(text: &str) -> Option<ExplicitRating> {
    for caps in OUT_OF_RE.captures_iter(text) {
        let (Some(whole), Some(num), Some(den)) = (caps.get(0), caps.get(1), caps.get(3)) else {
            continue;
        };
        let Some(mut value) = parse_number(num.as_str()) else {
            continue;
        };
        if caps.get(2).is_some() {
            value += 0.5;
        }
        let Some(scale) = parse_number(den.as_str()) else {
            continue;
        };
        if !is_rating_scale(scale) || value > scale {
            continue;
        }
        return Some(ExplicitRating {
            kind: ExplicitRatingKind::OutOf,
            matched: whole.as_str().to_string(),
            score: normalize(value, scale),
        });
    }
    None
}

fn find_slash(text: &str) -> Option<ExplicitRating> {
    for caps in SLASH_RE.captures_iter(text) {
        let (Some(whole), Some(num), Some(den)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };

        // Dates, times and fractions of longer numbers ("12/5/2023", "1/12/5", "3/4 of")
        if prev_char(text, whole.start()).is_some_and(|c| c.is_ascii_digit() || c == '/' || c == '.')
            || next_char(text, whole.end()).is_some_and(|c| c.is_ascii_digit() || c == '/')
            || followed_by_word(text, whole.end(), "of")
        {
            continue;
        }

        let (Ok(value), Ok(scale)) = (num.as_str().parse::<f64>(), den.as_str().parse::<f64>())
        else {
            continue;
        };
        if !is_rating_scale(scale) || value > scale {
            continue;
        }
        // Bare "5/10" or "3/4" reads as a date; only /100 stands on its own
        if scale < 100.0 && !has_slash_context(text, whole.start(), whole.end()) {
            continue;
        }
        return Some(ExplicitRating {
            kind: ExplicitRatingKind::Slash,
            matched: whole.as_str().to_string(),
            score: normalize(value, scale),
        });
    }
    None
}

fn is_rating_scale(scale: f64) -> bool {
    [4.0, 5.0, 10.0, 100.0].contains(&scale)
}

/// Scale to 0–100, one decimal place
fn normalize(value: f64, scale: f64) -> f64 {
    ((value / scale * 100.0).clamp(0.0, 100.0) * 10.0).round() / 10.0
}

fn parse_number(raw: &str) -> Option<f64> {
    let word = match raw.to_ascii_lowercase().as_str() {
        "zero" => Some(0.0),
        "one" => Some(1.0),
        "two" => Some(2.0),
        "three" => Some(3.0),
        "four" => Some(4.0),
        "five" => Some(5.0),
        "six" => Some(6.0),
        "seven" => Some(7.0),
        "eight" => Some(8.0),
        "nine" => Some(9.0),
        "ten" => Some(10.0),
        _ => None,
    };
    word.or_else(|| raw.parse().ok())
}

fn next_char(text: &str, byte_idx: usize) -> Option<char> {
    text.get(byte_idx..).and_then(|rest| rest.chars().next())
}

fn prev_char(text: &str, byte_idx: usize) -> Option<char> {
    text.get(..byte_idx).and_then(|head| head.chars().next_back())
}

fn followed_by_word(text: &str, byte_idx: usize, word: &str) -> bool {
    text.get(byte_idx..)
        .and_then(|rest| rest.split_whitespace().next())
        .map(|next| next.trim_end_matches(|c: char| !c.is_alphanumeric()))
        .is_some_and(|next| next.eq_ignore_ascii_case(word))
}

fn has_slash_context(text: &str, start: usize, end: usize) -> bool {
    let mut from = start.saturating_sub(40);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    text.get(from..start).is_some_and(|head| SLASH_CONTEXT_RE.is_match(head))
        || followed_by_word(text, end, "stars")
        || followed_by_word(text, end, "star")
}

/// End of text, or sentence punctuation after optional spaces
fn ends_clause(text: &str, byte_idx: usize) -> bool {
    let rest = text.get(byte_idx..).unwrap_or("").trim_start_matches([' ', '\t']);
    rest.chars()
        .next()
        .map_or(true, |c| matches!(c, '.' | '!' | ';' | ')' | '\n' | '\r'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Option<ExplicitRating> {
        ExplicitRatingExtractor::default().extract(text)
    }

    #[test]
    fn test_star_glyphs() {
        let rating = extract("Our verdict: ★★★★☆ A night to remember.").unwrap();
        assert_eq!(rating.kind, ExplicitRatingKind::Stars);
        assert_eq!(rating.score, 80.0);
        assert_eq!(rating.matched, "★★★★☆");

        assert_eq!(extract("★★★½☆").unwrap().score, 70.0);
        assert_eq!(extract("Rating: ★★★").unwrap().score, 60.0);
        assert_eq!(extract("★★★ out of four").unwrap().score, 75.0);
    }

    #[test]
    fn test_stars_beat_other_formats() {
        let rating = extract("I'd give it a B. ★★☆☆☆ and 9/10 for the set.").unwrap();
        assert_eq!(rating.kind, ExplicitRatingKind::Stars);
        assert_eq!(rating.score, 40.0);
    }

    #[test]
    fn test_out_of_phrasing() {
        let rating = extract("This revival earns 3 out of 4 from me.").unwrap();
        assert_eq!(rating.kind, ExplicitRatingKind::OutOf);
        assert_eq!(rating.score, 75.0);

        assert_eq!(extract("three and a half stars out of five").unwrap().score, 70.0);
        assert!(extract("2 out of 3 songs land").is_none());
    }

    #[test]
    fn test_slash_notation_with_date_guard() {
        let rating = extract("Final score 8/10.").unwrap();
        assert_eq!(rating.kind, ExplicitRatingKind::Slash);
        assert_eq!(rating.score, 80.0);

        assert_eq!(extract("We rated it 4/5, without hesitation.").unwrap().score, 80.0);
        assert_eq!(extract("A rousing 7/10 stars.").unwrap().score, 70.0);
        assert_eq!(extract("It lands at 85/100.").unwrap().score, 85.0);

        assert!(extract("Opened 12/5/2023 at the Majestic.").is_none());
        assert!(extract("Running 24/7 on social media").is_none());
        assert!(extract("About 3/4 of the first act drags").is_none());
    }

    #[test]
    fn test_bare_dates_are_not_slash_ratings() {
        assert!(extract("The revival opened 5/10 at the Majestic and is a triumph.").is_none());
        assert!(extract("Previews begin 3/4; it is a rapturous evening.").is_none());
    }

    #[test]
    fn test_letter_grades_need_grading_language() {
        let rating = extract("Grade: B+").unwrap();
        assert_eq!(rating.kind, ExplicitRatingKind::LetterGrade);
        assert_eq!(rating.score, 84.0);

        assert_eq!(extract("I'd give the show an A-.").unwrap().score, 89.0);
        assert_eq!(extract("It earns a C, no more.").unwrap().score, 65.0);

        assert!(extract("A strong cast carries B plot lines.").is_none());
        assert!(extract("She gives it an A-list polish.").is_none());
        assert!(extract("The grade is a matter of taste.").is_none());
    }

    #[test]
    fn test_score_means_the_music_unless_it_closes_a_grade() {
        assert!(extract("Score: A lush, romantic wall of sound, but the book is a mess.").is_none());
        assert!(extract("The score is a B-movie pastiche.").is_none());

        let rating = extract("Score: B+.").unwrap();
        assert_eq!(rating.kind, ExplicitRatingKind::LetterGrade);
        assert_eq!(rating.score, 84.0);
    }

    #[test]
    fn test_no_rating_in_plain_prose() {
        assert!(extract("A thrilling, exhausting evening of theater.").is_none());
        assert!(extract("At 2½ hours it never drags.").is_none());
    }

    #[test]
    fn test_custom_grade_table() {
        let mut grades = BTreeMap::new();
        grades.insert("a".to_string(), 100.0);
        let extractor = ExplicitRatingExtractor::new(LetterGradeTable::new(&grades));
        assert_eq!(extractor.extract("Grade: A").unwrap().score, 100.0);
        assert!(extractor.extract("Grade: B").is_none());
    }
}
