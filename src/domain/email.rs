use std::{fmt, str::FromStr};

use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

const ASSET_SUFFIXES: [&str; 8] = [
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".pdf", ".zip",
];

const PLACEHOLDERS: [&str; 7] = [
    "user@domain.com",
    "email@domain.com",
    "example.com",
    "yourname@",
    "your@email",
    "@mobile",
    "@desktop",
];

const ROLE_KEYWORDS: [&str; 11] = [
    "support", "help", "info", "contact", "admin", "noreply", "no-reply", "sales", "feedback",
    "abuse", "webmaster",
];

/// A syntactically valid, lowercased email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(candidate: &str) -> Result<Self, String> {
        let email = candidate
            .trim()
            .trim_start_matches("mailto:")
            .trim_end_matches(|c: char| c == '.' || c == ',' || c == ';')
            .to_lowercase();

        if email.len() > 254 {
            return Err(format!("{} is too long", email));
        }

        let Some((local, domain)) = email.split_once('@') else {
            return Err(format!("{} has no @", email));
        };
        if domain.contains('@') {
            return Err(format!("{} has more than one @", email));
        }
        if local.is_empty() || local.len() > 64 {
            return Err(format!("{} has an invalid local part", email));
        }
        if !local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
            || local.starts_with('.')
            || local.ends_with('.')
            || local.contains("..")
        {
            return Err(format!("{} has an invalid local part", email));
        }

        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2
            || labels.iter().any(|label| {
                label.is_empty()
                    || label.starts_with('-')
                    || label.ends_with('-')
                    || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            })
        {
            return Err(format!("{} has an invalid domain", email));
        }
        let tld = labels.last().copied().unwrap_or_default();
        if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(format!("{} has an invalid top level domain", email));
        }
        if ASSET_SUFFIXES.iter().any(|suffix| email.ends_with(suffix)) {
            return Err(format!("{} looks like a file name", email));
        }

        Ok(EmailAddress(email))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0.split_once('@').map(|(_, d)| d).unwrap_or_default()
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EmailAddress::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

/// How aggressively scraped addresses are filtered after syntax validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailFilterMode {
    /// Syntax validation only.
    None,
    /// Drops placeholders such as `user@domain.com`.
    Balanced,
    /// Also drops role accounts (`info@`, `support@`, ...).
    #[default]
    Strict,
}

impl FromStr for EmailFilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(EmailFilterMode::None),
            "balanced" => Ok(EmailFilterMode::Balanced),
            "strict" => Ok(EmailFilterMode::Strict),
            other => Err(format!("{} is not a supported email filter mode", other)),
        }
    }
}

impl EmailFilterMode {
    pub fn accepts(&self, email: &EmailAddress) -> bool {
        let email = email.as_str();
        match self {
            EmailFilterMode::None => true,
            EmailFilterMode::Balanced => !PLACEHOLDERS.iter().any(|p| email.contains(p)),
            EmailFilterMode::Strict => {
                let local = email.split('@').next().unwrap_or_default();
                !PLACEHOLDERS.iter().any(|p| email.contains(p))
                    && !ROLE_KEYWORDS.iter().any(|k| local.contains(k))
            }
        }
    }
}

pub struct EmailExtractor {
    email_regex: Regex,
    mode: EmailFilterMode,
}

impl EmailExtractor {
    pub fn new(mode: EmailFilterMode) -> Self {
        EmailExtractor {
            email_regex: Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b")
                .expect("email pattern is valid"),
            mode,
        }
    }

    /// Valid, filtered, de-duplicated addresses in order of first appearance.
    pub fn extract(&self, text: &str) -> Vec<EmailAddress> {
        self.filter(self.email_regex.find_iter(text).map(|m| m.as_str()))
    }

    pub fn filter<'a>(&self, candidates: impl Iterator<Item = &'a str>) -> Vec<EmailAddress> {
        candidates
            .filter_map(|candidate| match EmailAddress::parse(candidate) {
                Ok(email) => Some(email),
                Err(e) => {
                    log::debug!("Discarding email candidate: {}", e);
                    None
                }
            })
            .filter(|email| self.mode.accepts(email))
            .unique()
            .collect()
    }
}
