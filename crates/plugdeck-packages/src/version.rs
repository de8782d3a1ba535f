//! Version ranges and ordering.

use std::cmp::Ordering;
use std::fmt;

use semver::{Version, VersionReq};

/// A declared dependency version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// `*`, `latest`, `x` or empty: anything goes.
    Any,
    /// A pinned version (or an unparseable tag, compared literally).
    Exact(String),
    /// One or more semver requirements joined by npm's `||`; any may match.
    Req(Vec<VersionReq>),
}

impl VersionSpec {
    /// Parse a range as written in a manifest.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "" | "*" | "x" | "latest" => return Self::Any,
            _ => {}
        }
        if Version::parse(raw).is_ok() {
            return Self::Exact(raw.to_string());
        }
        let alternatives: Option<Vec<VersionReq>> = raw.split("||").map(npm_requirement).collect();
        match alternatives {
            Some(reqs) if !reqs.is_empty() => Self::Req(reqs),
            _ => Self::Exact(raw.to_string()),
        }
    }

    /// Whether `version` satisfies this range.
    pub fn matches(&self, version: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(pinned) => pinned == version,
            Self::Req(reqs) => Version::parse(version)
                .map(|v| reqs.iter().any(|req| req.matches(&v)))
                .unwrap_or(false),
        }
    }

    /// Whether the range can only be satisfied by the index's latest tag.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "{v}"),
            Self::Req(reqs) => {
                for (i, req) in reqs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    write!(f, "{req}")?;
                }
                Ok(())
            }
        }
    }
}

/// One `||` alternative in npm syntax. Hyphen ranges (`1.2.3 - 2.3.4`) and
/// space-separated comparators (`>=1.2.7 <1.3.0`) become the comma form the
/// semver crate expects.
fn npm_requirement(part: &str) -> Option<VersionReq> {
    let part = part.trim();
    if matches!(part, "" | "*" | "x") {
        return VersionReq::parse("*").ok();
    }
    if let Some((low, high)) = part.split_once(" - ") {
        return VersionReq::parse(&format!(">={}, <={}", low.trim(), high.trim())).ok();
    }

    let mut comparators: Vec<String> = vec![];
    let mut pending_op: Option<&str> = None;
    for token in part.split_whitespace() {
        let token = token.trim_end_matches(',');
        if token.is_empty() {
            continue;
        }
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op = Some(token);
            continue;
        }
        comparators.push(match pending_op.take() {
            Some(op) => format!("{op}{token}"),
            None => token.to_string(),
        });
    }
    if pending_op.is_some() || comparators.is_empty() {
        return None;
    }
    VersionReq::parse(&comparators.join(", ")).ok()
}

/// Order two version strings: semver versions by precedence, semver before
/// anything unparseable, unparseable ones lexically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Sort versions newest first.
pub fn sort_newest_first(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(b, a));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(VersionSpec::parse("latest"), VersionSpec::Any);
        assert_eq!(VersionSpec::parse(" * "), VersionSpec::Any);
        assert_eq!(VersionSpec::parse("1.2.3"), VersionSpec::Exact("1.2.3".into()));
        assert!(matches!(VersionSpec::parse("^1.2.0"), VersionSpec::Req(_)));
        assert_eq!(VersionSpec::parse("next"), VersionSpec::Exact("next".into()));
    }

    #[test]
    fn test_exact_pin_is_not_caret() {
        let spec = VersionSpec::parse("1.2.3");
        assert!(spec.matches("1.2.3"));
        assert!(!spec.matches("1.4.0"));
    }

    #[test]
    fn test_req_matches() {
        let spec = VersionSpec::parse("^4.17.0");
        assert!(spec.matches("4.17.21"));
        assert!(!spec.matches("5.0.0"));
        assert!(!spec.matches("garbage"));
    }

    #[test]
    fn test_npm_alternatives_and_hyphen_ranges() {
        let either = VersionSpec::parse("^1.2.0 || ^2.0.0");
        assert!(either.matches("1.4.0"));
        assert!(either.matches("2.3.1"));
        assert!(!either.matches("3.0.0"));

        let hyphen = VersionSpec::parse("1.2.3 - 2.3.4");
        assert!(hyphen.matches("1.2.3"));
        assert!(hyphen.matches("2.3.4"));
        assert!(!hyphen.matches("2.3.5"));

        let spaced = VersionSpec::parse(">=1.2.7 <1.3.0");
        assert!(spaced.matches("1.2.9"));
        assert!(!spaced.matches("1.3.0"));

        let mixed = VersionSpec::parse("1.0.0 - 1.1.0 || >= 3.0.0");
        assert!(mixed.matches("1.0.5"));
        assert!(mixed.matches("3.2.0"));
        assert!(!mixed.matches("2.0.0"));

        assert_eq!(VersionSpec::parse("^1 || next"), VersionSpec::Exact("^1 || next".into()));
    }

    #[test]
    fn test_sort_newest_first() {
        let mut versions = vec![
            "1.10.0".to_string(),
            "weird".to_string(),
            "1.9.3".to_string(),
            "2.0.0-beta.1".to_string(),
        ];
        sort_newest_first(&mut versions);
        assert_eq!(versions, vec!["2.0.0-beta.1", "1.10.0", "1.9.3", "weird"]);
    }
}
