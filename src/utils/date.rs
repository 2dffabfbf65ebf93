// zodbbackup/src/utils/date.rs
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::errors::{AppError, Result};

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4})-(\d{2})-(\d{2})(?:-(\d{2})(?:-(\d{2})(?:-(\d{2}))?)?)?$")
            .expect("static date pattern is valid")
    })
}

/// A restore cutoff as given on the command line, `yyyy-mm-dd[-hh[-mm[-ss]]]`, UTC.
///
/// The raw text goes to repozo's `-D` untouched; `at` is used to pick a blob
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreDate {
    pub raw: String,
    pub at: NaiveDateTime,
}

impl RestoreDate {
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        let invalid = || {
            AppError::InvalidInput(format!(
                "'{}' is not a valid date, expected yyyy-mm-dd[-hh[-mm[-ss]]]",
                raw
            ))
        };
        let caps = date_pattern().captures(raw).ok_or_else(invalid)?;
        let num = |idx: usize| -> u32 {
            caps.get(idx)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        let year: i32 = caps[1].parse().map_err(|_| invalid())?;
        let at = NaiveDate::from_ymd_opt(year, num(2), num(3))
            .and_then(|d| d.and_hms_opt(num(4), num(5), num(6)))
            .ok_or_else(invalid)?;
        Ok(Self {
            raw: raw.to_string(),
            at,
        })
    }
}

impl fmt::Display for RestoreDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
