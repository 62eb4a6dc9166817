use crate::identity;
use crate::storage::{self, SourceFingerprint};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

pub const FIELD_DELIMITER: &str = ":::";
const MIN_FIELDS: usize = 4;

static TITLE_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+) \((\d{4})\)").expect("title/year pattern is valid")
});

static DECIMAL_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d$").expect("digit pattern is valid"));

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read record file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub id: Uuid,
    pub title: String,
    pub year: i32,
    pub genre: String,
    pub description: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Fewer than four delimited fields.
    MissingFields { found: usize },
    /// The second field is not `<title> (<4-digit year>)`.
    TitleYearMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Parsed(ParsedRecord),
    Skipped(SkipReason),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number in the source.
    pub line: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Default, Clone)]
pub struct ParseReport {
    /// Set when the records were read from a file.
    pub source: Option<SourceFingerprint>,
    pub records: Vec<ParsedRecord>,
    pub skipped: Vec<SkippedLine>,
}

impl ParseReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn descriptions(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.description.as_str()).collect()
    }
}

fn is_decimal_digit(c: char) -> bool {
    let mut buf = [0u8; 4];
    DECIMAL_DIGIT.is_match(c.encode_utf8(&mut buf))
}

/// Unicode decimal digits come in contiguous runs of ten starting at zero,
/// so a digit's value is its distance from the start of its run, modulo ten.
fn digit_value(c: char) -> Option<u32> {
    if !is_decimal_digit(c) {
        return None;
    }
    let mut offset = 0;
    let mut code = c as u32;
    while let Some(prev) = code.checked_sub(1).and_then(char::from_u32) {
        if !is_decimal_digit(prev) {
            break;
        }
        offset += 1;
        code -= 1;
    }
    Some(offset % 10)
}

fn parse_year(digits: &str) -> Option<i32> {
    digits.chars().try_fold(0i32, |year, c| {
        let d = digit_value(c)?;
        Some(year * 10 + d as i32)
    })
}

pub fn parse_line(line: &str) -> LineOutcome {
    let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if parts.len() < MIN_FIELDS {
        return LineOutcome::Skipped(SkipReason::MissingFields { found: parts.len() });
    }

    let title_year = parts[1].trim();
    let Some(caps) = TITLE_YEAR.captures(title_year) else {
        return LineOutcome::Skipped(SkipReason::TitleYearMismatch);
    };
    let title = caps[1].to_string();
    let Some(year) = parse_year(&caps[2]) else {
        return LineOutcome::Skipped(SkipReason::TitleYearMismatch);
    };

    let genre = parts[2].trim().to_string();
    let description = parts[3].trim().to_string();
    let id = identity::record_id_for(&title, year, &genre, &description);

    LineOutcome::Parsed(ParsedRecord {
        id,
        title,
        year,
        genre,
        description,
    })
}

/// Parses every non-blank line of `text`. Whitespace-only lines are ignored
/// without being counted as skipped.
pub fn parse_str(text: &str) -> ParseReport {
    let mut report = ParseReport::default();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            LineOutcome::Parsed(record) => report.records.push(record),
            LineOutcome::Skipped(reason) => {
                log::trace!("Skipping line {}: {:?}", idx + 1, reason);
                report.skipped.push(SkippedLine {
                    line: idx + 1,
                    reason,
                });
            }
        }
    }
    report
}

pub async fn parse_file(path: &Path) -> Result<ParseReport, ParseError> {
    let source = storage::read_source(path)
        .await
        .map_err(|source| ParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let mut report = parse_str(&source.text);
    report.source = Some(source.fingerprint);
    Ok(report)
}
