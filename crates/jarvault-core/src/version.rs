//! Version candidate matching.
//!
//! Artifact versions are "full" strings of the shape
//! `<runtime-version>-<library-version>`, e.g. `1.9.24-0.2.2-dev-1`: the
//! host runtime version is a mandatory prefix. Matching first strips that
//! prefix, discarding candidates built for another runtime, then applies
//! the policy to the library-version remainder.
//!
//! An exact match to the requested version wins unconditionally, regardless
//! of policy, but only when it is present in *every* bundle member's
//! candidate set.

use crate::model::{MatchPolicy, RequestedVersion, ResolvedVersion, RuntimeVersion};
use std::cmp::Ordering;

/// Strips the mandatory runtime-version prefix from a full candidate
/// version. Returns `None` for candidates built for a different runtime.
pub fn strip_runtime_prefix<'a>(candidate: &'a str, runtime: &RuntimeVersion) -> Option<&'a str> {
    let rest = candidate.strip_prefix(runtime.as_str())?;
    rest.strip_prefix('-').filter(|v| !v.is_empty())
}

/// First dot-delimited segment of a version string.
pub fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Num(u64),
    Text(&'a str),
}

fn tokenize(version: &str) -> impl Iterator<Item = Token<'_>> {
    version
        .split(['.', '-'])
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().map_or(Token::Text(s), Token::Num))
}

/// Dotted-numeric-with-suffix comparator.
///
/// Numeric segments compare numerically, qualifiers lexicographically.
/// A numeric segment outranks a qualifier in the same position, and a
/// version that ends where the other continues with a qualifier is the
/// newer one (`1.0` > `1.0-dev`).
pub fn compare(a: &str, b: &str) -> Ordering {
    let mut left = tokenize(a);
    let mut right = tokenize(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(Token::Text(_))) => return Ordering::Greater,
            (Some(Token::Text(_)), None) => return Ordering::Less,
            (None, Some(Token::Num(_))) => return Ordering::Less,
            (Some(Token::Num(_)), None) => return Ordering::Greater,
            (Some(Token::Num(x)), Some(Token::Num(y))) => match x.cmp(&y) {
                Ordering::Equal => {}
                other => return other,
            },
            (Some(Token::Text(x)), Some(Token::Text(y))) => match x.cmp(y) {
                Ordering::Equal => {}
                other => return other,
            },
            (Some(Token::Num(_)), Some(Token::Text(_))) => return Ordering::Greater,
            (Some(Token::Text(_)), Some(Token::Num(_))) => return Ordering::Less,
        }
    }
}

/// The matching filter supplied by the caller.
#[derive(Debug, Clone)]
pub struct VersionFilter {
    pub policy: MatchPolicy,
    pub requested: RequestedVersion,
}

/// Selects one resolved version that is simultaneously valid for every
/// bundle member.
///
/// `member_candidates` holds one full-version candidate list per bundle
/// member. Candidates without the runtime prefix are discarded. The
/// selection runs over the intersection of all members' stripped candidate
/// sets: a version eligible for only some members is never picked.
///
/// Returns `None` when any member has no eligible candidate, when the
/// intersection is empty, or when the policy yields no match.
pub fn select_bundle_version(
    member_candidates: &[Vec<String>],
    runtime: &RuntimeVersion,
    filter: &VersionFilter,
) -> Option<ResolvedVersion> {
    let mut stripped: Vec<Vec<&str>> = Vec::with_capacity(member_candidates.len());
    for candidates in member_candidates {
        let eligible: Vec<&str> = candidates
            .iter()
            .filter_map(|c| strip_runtime_prefix(c, runtime))
            .collect();
        if eligible.is_empty() {
            return None;
        }
        stripped.push(eligible);
    }

    let (first, rest) = stripped.split_first()?;
    let mut shared: Vec<&str> = first
        .iter()
        .copied()
        .filter(|v| rest.iter().all(|member| member.contains(v)))
        .collect();
    shared.sort_unstable();
    shared.dedup();

    if shared.contains(&filter.requested.as_str()) {
        // An exact match across every member wins unconditionally.
        return Some(ResolvedVersion::new(filter.requested.as_str()));
    }

    let picked = match filter.policy {
        MatchPolicy::Exact => None,
        MatchPolicy::Latest => shared.iter().copied().max_by(|a, b| compare(a, b)),
        MatchPolicy::SameMajor => shared
            .iter()
            .copied()
            .filter(|v| major(v) == major(filter.requested.as_str()))
            .max_by(|a, b| compare(a, b)),
    };
    picked.map(ResolvedVersion::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(policy: MatchPolicy, requested: &str) -> VersionFilter {
        VersionFilter {
            policy,
            requested: RequestedVersion::from(requested),
        }
    }

    fn versions(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strip_runtime_prefix() {
        let runtime = RuntimeVersion::from("1.9.24");
        assert_eq!(
            strip_runtime_prefix("1.9.24-0.2.2-dev-1", &runtime),
            Some("0.2.2-dev-1")
        );
        assert_eq!(strip_runtime_prefix("1.9.20-0.2.2-dev-1", &runtime), None);
        assert_eq!(strip_runtime_prefix("1.9.24", &runtime), None);
        assert_eq!(strip_runtime_prefix("1.9.24-", &runtime), None);
    }

    #[test]
    fn test_compare_numeric_segments() {
        assert_eq!(compare("0.2.2", "0.2.10"), Ordering::Less);
        assert_eq!(compare("0.10.0", "0.9.9"), Ordering::Greater);
        assert_eq!(compare("1.0.0", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_compare_qualifiers() {
        assert_eq!(compare("0.2.2-dev-1", "0.2.2-dev-2"), Ordering::Less);
        assert_eq!(compare("0.2.2-alpha", "0.2.2-beta"), Ordering::Less);
        // A bare release outranks a qualified one.
        assert_eq!(compare("1.0", "1.0-dev"), Ordering::Greater);
    }

    #[test]
    fn test_exact_match_wins_regardless_of_policy() {
        let runtime = RuntimeVersion::from("1.9.24");
        let candidates = vec![versions(&[
            "1.9.24-0.2.2-dev-1",
            "1.9.24-0.9.0-dev-1",
        ])];
        for policy in [MatchPolicy::Exact, MatchPolicy::SameMajor, MatchPolicy::Latest] {
            let resolved =
                select_bundle_version(&candidates, &runtime, &filter(policy, "0.2.2-dev-1"));
            assert_eq!(resolved, Some(ResolvedVersion::from("0.2.2-dev-1")));
        }
    }

    #[test]
    fn test_same_major_picks_max_within_major() {
        // Requested 0.2.2, candidates span majors 0 and 1;
        // the maximum within major 0 is picked, not the overall maximum.
        let runtime = RuntimeVersion::from("1.9.24");
        let candidates = vec![versions(&[
            "1.9.24-0.2.2-dev-1",
            "1.9.24-0.2.3-dev-1",
            "1.9.24-0.5.0-dev-1",
            "1.9.24-1.5.0-dev-1",
        ])];
        let resolved = select_bundle_version(
            &candidates,
            &runtime,
            &filter(MatchPolicy::SameMajor, "0.2.2"),
        );
        assert_eq!(resolved, Some(ResolvedVersion::from("0.5.0-dev-1")));
    }

    #[test]
    fn test_latest_picks_overall_max() {
        let runtime = RuntimeVersion::from("1.9.24");
        let candidates = vec![versions(&[
            "1.9.24-0.2.2-dev-1",
            "1.9.24-1.5.0-dev-1",
            "1.9.24-0.5.0-dev-1",
        ])];
        let resolved = select_bundle_version(
            &candidates,
            &runtime,
            &filter(MatchPolicy::Latest, "0.0.1"),
        );
        assert_eq!(resolved, Some(ResolvedVersion::from("1.5.0-dev-1")));
    }

    #[test]
    fn test_exact_policy_without_exact_match_yields_none() {
        let runtime = RuntimeVersion::from("1.9.24");
        let candidates = vec![versions(&["1.9.24-0.2.3-dev-1"])];
        let resolved = select_bundle_version(
            &candidates,
            &runtime,
            &filter(MatchPolicy::Exact, "0.2.2-dev-1"),
        );
        assert_eq!(resolved, None);
    }

    #[test]
    fn test_exact_match_in_only_some_members_not_eligible() {
        let runtime = RuntimeVersion::from("1.9.24");
        let candidates = vec![
            versions(&["1.9.24-0.2.2-dev-1", "1.9.24-0.2.3-dev-1"]),
            versions(&["1.9.24-0.2.3-dev-1"]),
        ];
        // 0.2.2-dev-1 only exists for the first member, so the exact rule
        // does not apply; Latest falls back to the shared maximum.
        let resolved = select_bundle_version(
            &candidates,
            &runtime,
            &filter(MatchPolicy::Latest, "0.2.2-dev-1"),
        );
        assert_eq!(resolved, Some(ResolvedVersion::from("0.2.3-dev-1")));
    }

    #[test]
    fn test_disagreeing_members_yield_none() {
        let runtime = RuntimeVersion::from("1.9.24");
        let candidates = vec![
            versions(&["1.9.24-0.2.2-dev-1"]),
            versions(&["1.9.24-0.2.3-dev-1"]),
        ];
        let resolved = select_bundle_version(
            &candidates,
            &runtime,
            &filter(MatchPolicy::Latest, "0.2.2-dev-1"),
        );
        assert_eq!(resolved, None);
    }

    #[test]
    fn test_empty_candidate_list_yields_none() {
        let runtime = RuntimeVersion::from("1.9.24");
        assert_eq!(
            select_bundle_version(&[vec![]], &runtime, &filter(MatchPolicy::Latest, "1.0")),
            None
        );
        assert_eq!(
            select_bundle_version(&[], &runtime, &filter(MatchPolicy::Latest, "1.0")),
            None
        );
    }

    #[test]
    fn test_wrong_runtime_candidates_discarded() {
        let runtime = RuntimeVersion::from("1.9.24");
        let candidates = vec![versions(&[
            "1.9.20-0.2.2-dev-1",
            "1.9.24-0.2.2-dev-1",
        ])];
        let resolved = select_bundle_version(
            &candidates,
            &runtime,
            &filter(MatchPolicy::Exact, "0.2.2-dev-1"),
        );
        assert_eq!(resolved, Some(ResolvedVersion::from("0.2.2-dev-1")));
    }
}
