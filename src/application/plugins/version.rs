//! Plugin versions and dependency constraints
//!
//! Versions are dot-separated release numbers with an optional `-pre`
//! suffix (`1.2`, `0.9.1-beta.2`). Missing release numbers compare as zero,
//! so `1.0` and `1.0.0` are equal. A constraint is a comma-separated list of
//! clauses that must all hold: `>=1.0, <2`, `~=1.4`, `==1.*`, or a bare
//! version meaning equality.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::application::errors::PluginError;

fn invalid(version: &str, reason: &str) -> PluginError {
    PluginError::InvalidVersion {
        version: version.to_string(),
        reason: reason.to_string(),
    }
}

/// A parsed plugin version
#[derive(Debug, Clone)]
pub struct Version {
    release: Vec<u64>,
    pre: Option<String>,
}

impl Version {
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    fn part(&self, i: usize) -> u64 {
        self.release.get(i).copied().unwrap_or(0)
    }

    /// Whether the first `prefix.len()` release numbers equal `prefix`
    fn starts_with(&self, prefix: &[u64]) -> bool {
        prefix.iter().enumerate().all(|(i, n)| self.part(i) == *n)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            match self.part(i).cmp(&other.part(i)) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }

        // A prerelease sorts before its release
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => compare_pre(a, b),
        }
    }
}

fn compare_pre(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.split('.').collect();
    let b_parts: Vec<&str> = b.split('.').collect();
    for (x, y) in a_parts.iter().zip(b_parts.iter()) {
        let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a_parts.len().cmp(&b_parts.len())
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let text = text.strip_prefix('v').unwrap_or(text);
        // Build metadata never affects ordering
        let text = text.split('+').next().unwrap_or(text);

        let (release, pre) = match text.split_once('-') {
            Some((release, pre)) => (release, Some(pre)),
            None => (text, None),
        };
        if release.is_empty() {
            return Err(invalid(s, "missing release number"));
        }

        let release = release
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid(s, "release numbers must be integers"))?;

        if let Some(pre) = pre {
            let valid = pre
                .split('.')
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric()));
            if !valid {
                return Err(invalid(s, "invalid prerelease identifier"));
            }
        }

        Ok(Self {
            release,
            pre: pre.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    Compatible,
}

impl Op {
    fn as_str(&self) -> &str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Compatible => "~=",
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    Exact(Version),
    /// `1.2.*`
    Prefix(Vec<u64>),
}

#[derive(Debug, Clone)]
struct Clause {
    op: Op,
    target: Target,
}

impl Clause {
    fn parse(text: &str, whole: &str) -> Result<Self, PluginError> {
        let text = text.trim();
        // Two-character operators first
        let (op, rest) = [
            ("==", Op::Eq),
            ("!=", Op::Ne),
            (">=", Op::Ge),
            ("<=", Op::Le),
            ("~=", Op::Compatible),
            (">", Op::Gt),
            ("<", Op::Lt),
        ]
        .iter()
        .find_map(|(token, op)| text.strip_prefix(token).map(|rest| (*op, rest)))
        .unwrap_or((Op::Eq, text));
        let rest = rest.trim();

        let target = match rest.strip_suffix(".*") {
            Some(prefix) => {
                if !matches!(op, Op::Eq | Op::Ne) {
                    return Err(invalid(whole, "wildcards only work with == and !="));
                }
                let prefix = prefix
                    .split('.')
                    .map(|p| p.parse::<u64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| invalid(whole, "release numbers must be integers"))?;
                Target::Prefix(prefix)
            }
            None => Target::Exact(rest.parse()?),
        };

        if let (Op::Compatible, Target::Exact(v)) = (op, &target) {
            if v.release.len() < 2 {
                return Err(invalid(whole, "~= needs at least two release numbers"));
            }
        }
        Ok(Self { op, target })
    }

    fn matches(&self, version: &Version) -> bool {
        match (&self.target, self.op) {
            (Target::Prefix(prefix), Op::Eq) => version.starts_with(prefix),
            (Target::Prefix(prefix), _) => !version.starts_with(prefix),
            (Target::Exact(target), op) => match op {
                Op::Eq => version == target,
                Op::Ne => version != target,
                Op::Ge => version >= target,
                Op::Le => version <= target,
                Op::Gt => version > target,
                Op::Lt => version < target,
                Op::Compatible => {
                    // ~=1.4.2 means >=1.4.2 and ==1.4.*
                    let prefix = &target.release[..target.release.len() - 1];
                    version >= target && version.starts_with(prefix)
                }
            },
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Exact(v) => write!(f, "{}{}", self.op.as_str(), v),
            Target::Prefix(p) => {
                let parts: Vec<String> = p.iter().map(u64::to_string).collect();
                write!(f, "{}{}.*", self.op.as_str(), parts.join("."))
            }
        }
    }
}

/// A dependency constraint such as `>=1.0, <2`
#[derive(Debug, Clone)]
pub struct VersionReq {
    clauses: Vec<Clause>,
}

impl VersionReq {
    /// A constraint every version satisfies
    pub fn any() -> Self {
        Self { clauses: Vec::new() }
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|c| c.matches(version))
    }
}

impl FromStr for VersionReq {
    type Err = PluginError;

    /// Empty text and `*` accept any version
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() || text == "*" {
            return Ok(Self::any());
        }
        let clauses = text
            .split(',')
            .map(|clause| Clause::parse(clause, s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses })
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("*");
        }
        let clauses: Vec<String> = self.clauses.iter().map(Clause::to_string).collect();
        f.write_str(&clauses.join(", "))
    }
}

/// Check `actual` against `constraint` for `plugin`'s dependency on `dependency`
pub fn check_constraint(
    plugin: &str,
    dependency: &str,
    constraint: &str,
    actual: &str,
) -> Result<(), PluginError> {
    let req: VersionReq = constraint.parse()?;
    let version: Version = actual.parse()?;
    if req.matches(&version) {
        Ok(())
    } else {
        Err(PluginError::VersionConstraint {
            plugin: plugin.to_string(),
            dependency: dependency.to_string(),
            constraint: constraint.to_string(),
            actual: actual.to_string(),
        })
    }
}
