//! Consumer roles and origin classification.
//!
//! Each consumer owns a [`Role`]: a name plus an [`OriginMatcher`] over the
//! path a record came from. Roles must be pairwise disjoint. The
//! [`RoleTable`] checks this once per origin, before any of its records are
//! queued, and stamps the owning [`RoleId`] on every record.

use crate::error::{PipelineError, Result};
use std::fmt;

/// Index of a role in its [`RoleTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleId(usize);

impl RoleId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role#{}", self.0)
    }
}

/// Typed predicate over a record origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginMatcher {
    /// Matches every origin
    Any,
    /// Matches origins containing the substring
    Contains(String),
    /// Matches origins that do not contain the substring
    Excludes(String),
}

impl OriginMatcher {
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self::Contains(pattern.into())
    }

    pub fn excludes(pattern: impl Into<String>) -> Self {
        Self::Excludes(pattern.into())
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Contains(pattern) => origin.contains(pattern.as_str()),
            Self::Excludes(pattern) => !origin.contains(pattern.as_str()),
        }
    }

    /// Whether two matchers provably accept a common origin
    fn always_overlaps(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for OriginMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Contains(p) => write!(f, "*{p}*"),
            Self::Excludes(p) => write!(f, "!*{p}*"),
        }
    }
}

/// A consumer's fixed responsibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    name: String,
    matcher: OriginMatcher,
}

impl Role {
    pub fn new(name: impl Into<String>, matcher: OriginMatcher) -> Self {
        Self {
            name: name.into(),
            matcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matcher(&self) -> &OriginMatcher {
        &self.matcher
    }
}

/// The declared, validated set of roles for a pipeline
#[derive(Debug, Clone)]
pub struct RoleTable {
    roles: Vec<Role>,
}

impl RoleTable {
    /// Validate a role set. Empty sets, duplicate names and matchers that
    /// trivially overlap are rejected up front.
    pub fn new(roles: Vec<Role>) -> Result<Self> {
        if roles.is_empty() {
            return Err(PipelineError::NoRoles);
        }
        for (i, role) in roles.iter().enumerate() {
            for other in &roles[i + 1..] {
                if role.name == other.name {
                    return Err(PipelineError::DuplicateRole(role.name.clone()));
                }
                if role.matcher.always_overlaps(&other.matcher) {
                    return Err(PipelineError::OverlappingRoles {
                        origin: role.matcher.to_string(),
                        roles: vec![role.name.clone(), other.name.clone()],
                    });
                }
            }
        }
        Ok(Self { roles })
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn get(&self, id: RoleId) -> Option<&Role> {
        self.roles.get(id.index())
    }

    pub fn name(&self, id: RoleId) -> &str {
        self.get(id).map_or("?", Role::name)
    }

    pub fn ids(&self) -> impl Iterator<Item = RoleId> {
        (0..self.roles.len()).map(RoleId::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RoleId, &Role)> {
        self.roles
            .iter()
            .enumerate()
            .map(|(i, role)| (RoleId::new(i), role))
    }

    /// Resolve the single role owning `origin`.
    ///
    /// `Ok(None)` means no role claims it. More than one claimant is a
    /// protocol violation.
    pub fn classify(&self, origin: &str) -> Result<Option<RoleId>> {
        let mut owners = self
            .iter()
            .filter(|(_, role)| role.matcher.matches(origin))
            .map(|(id, _)| id);

        let Some(first) = owners.next() else {
            return Ok(None);
        };
        let rest: Vec<RoleId> = owners.collect();
        if rest.is_empty() {
            return Ok(Some(first));
        }

        let roles = std::iter::once(first)
            .chain(rest)
            .map(|id| self.name(id).to_string())
            .collect();
        Err(PipelineError::OverlappingRoles {
            origin: origin.to_string(),
            roles,
        })
    }

    /// Classify a whole batch of origins, failing on the first overlap
    pub fn classify_all<S: AsRef<str>>(&self, origins: &[S]) -> Result<Vec<Option<RoleId>>> {
        origins
            .iter()
            .map(|origin| self.classify(origin.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sports_roles() -> RoleTable {
        RoleTable::new(vec![
            Role::new("ppa", OriginMatcher::excludes("atp_rankings")),
            Role::new("ranking-points", OriginMatcher::contains("atp_rankings")),
        ])
        .unwrap()
    }

    #[test]
    fn test_classify_disjoint_roles() {
        let table = sports_roles();
        assert_eq!(
            table.classify("data/tennis/atp_matches_2019.csv").unwrap(),
            Some(RoleId::new(0))
        );
        assert_eq!(
            table.classify("data/tennis/atp_rankings_10s.csv").unwrap(),
            Some(RoleId::new(1))
        );
        assert_eq!(table.name(RoleId::new(1)), "ranking-points");
    }

    #[test]
    fn test_unowned_origin() {
        let table = RoleTable::new(vec![Role::new("only", OriginMatcher::contains("matches"))]).unwrap();
        assert_eq!(table.classify("rankings.csv").unwrap(), None);
    }

    #[test]
    fn test_overlap_detected_at_classification() {
        let table = RoleTable::new(vec![
            Role::new("a", OriginMatcher::contains("atp")),
            Role::new("b", OriginMatcher::contains("matches")),
        ])
        .unwrap();
        let err = table.classify_all(&["atp_matches.csv"]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OverlappingRoles { ref roles, .. } if roles == &["a".to_string(), "b".to_string()]
        ));
    }

    #[test]
    fn test_table_validation() {
        assert!(matches!(RoleTable::new(vec![]), Err(PipelineError::NoRoles)));
        assert!(matches!(
            RoleTable::new(vec![
                Role::new("dup", OriginMatcher::contains("a")),
                Role::new("dup", OriginMatcher::contains("b")),
            ]),
            Err(PipelineError::DuplicateRole(name)) if name == "dup"
        ));
        assert!(matches!(
            RoleTable::new(vec![
                Role::new("all", OriginMatcher::Any),
                Role::new("some", OriginMatcher::contains("b")),
            ]),
            Err(PipelineError::OverlappingRoles { .. })
        ));
    }
}
