//! Resource records: one catalog entry and how it is identified.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One catalog entry as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    /// Stable identity, normally extracted from the source URL.
    pub resource_id: Option<String>,

    pub title: Option<String>,

    pub url: String,

    /// Dotted `major.minor.patch` form, already passed through [`format_version`].
    pub version: Option<String>,

    /// Source-native date string. Compared as an opaque token.
    pub updated_date: Option<String>,

    pub developer_id: Option<String>,

    pub contributor: Option<String>,

    pub tagline: Option<String>,
}

/// The key a record is matched on across snapshots.
///
/// Falls back to the title when no resource id could be parsed, and to the
/// URL when there is no title either.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Id(String),
    Title(String),
    Url(String),
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Title(title) => write!(f, "\"{title}\""),
            Self::Url(url) => write!(f, "<{url}>"),
        }
    }
}

impl ResourceRecord {
    /// The identity key, or `None` when the record carries nothing to match on.
    pub fn identity(&self) -> Option<IdentityKey> {
        if let Some(id) = non_empty(self.resource_id.as_deref()) {
            return Some(IdentityKey::Id(id.to_string()));
        }
        if let Some(title) = non_empty(self.title.as_deref()) {
            return Some(IdentityKey::Title(title.to_string()));
        }
        non_empty(Some(&self.url)).map(|url| IdentityKey::Url(url.to_string()))
    }

    /// Numeric value of the resource id, used to order change sets.
    pub fn numeric_id(&self) -> Option<u64> {
        self.resource_id.as_deref()?.trim().parse().ok()
    }

    /// Short human label: the title when known, otherwise the URL.
    pub fn label(&self) -> &str {
        non_empty(self.title.as_deref()).unwrap_or(&self.url)
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

static EXCHANGE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/exchange/(\d+)(?:/|$)").expect("static pattern"));

static NUMERIC_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\d+)(?:[/?#]|$)").expect("static pattern"));

/// Extract the resource id from a listing URL.
///
/// Prefers the segment after `/exchange/`, then the first all-digit path segment.
pub fn resource_id_from_url(url: &str) -> Option<String> {
    EXCHANGE_ID
        .captures(url)
        .or_else(|| NUMERIC_SEGMENT.captures(url))
        .map(|c| c[1].to_string())
}

/// Convert a raw numeric version code into dotted form.
///
/// The listing encodes versions as fixed-width digit strings: `100030000`
/// is `1.3.0`. Anything that isn't all digits is returned unchanged.
pub fn format_version(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.to_string();
    }

    let digits = |from: usize, to: usize| -> u32 {
        raw.get(from..to.min(raw.len()))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    match raw.len() {
        9 => {
            let major = digits(1, 3).max(1);
            format!("{major}.{}.{}", digits(3, 5), digits(5, 8))
        }
        8 => {
            let major = if raw.starts_with('0') {
                digits(1, 2)
            } else {
                digits(0, 1)
            };
            format!("{}.{}.{}", major.max(1), digits(2, 4), digits(4, 7))
        }
        6.. if raw.starts_with("100") => {
            let major = digits(1, 3).max(1);
            format!("{major}.{}.{}", digits(3, 5), digits(5, 8))
        }
        6.. => {
            let major = digits(0, 1).max(1);
            format!("{major}.{}.{}", digits(1, 3), digits(3, 6))
        }
        _ => match raw.parse::<u64>() {
            Ok(0) => "1.0.0".to_string(),
            Ok(n) => n.max(1).to_string(),
            Err(_) => raw.to_string(),
        },
    }
}
