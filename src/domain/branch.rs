//! Branch resolution for freshly cloned repositories

/// Branch chosen for a working copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBranch {
    pub name: String,
    /// The remote had no usable branch; the default revision is checked out
    pub is_empty_repo: bool,
}

/// Pick the branch to check out.
///
/// Order: requested revision, configured default, remote HEAD, first listed
/// branch (flagged empty). Any `origin/` prefix is stripped from the result.
pub fn resolve_branch(
    remote_branches: &[String],
    requested: &str,
    default_revision: &str,
    remote_head: Option<&str>,
) -> ResolvedBranch {
    let names: Vec<&str> = remote_branches
        .iter()
        .map(|b| strip_origin(b.trim()))
        .filter(|b| !b.is_empty() && *b != "HEAD" && !b.starts_with("HEAD ->"))
        .collect();

    if names.is_empty() {
        return ResolvedBranch {
            name: default_revision.to_string(),
            is_empty_repo: true,
        };
    }

    let requested = strip_origin(requested.trim());
    if !requested.is_empty() && names.contains(&requested) {
        return found(requested);
    }
    if names.contains(&default_revision) {
        return found(default_revision);
    }
    if let Some(head) = remote_head.map(|h| strip_origin(h.trim())) {
        if !head.is_empty() {
            return found(head);
        }
    }
    ResolvedBranch {
        name: names[0].to_string(),
        is_empty_repo: true,
    }
}

fn found(name: &str) -> ResolvedBranch {
    ResolvedBranch {
        name: name.to_string(),
        is_empty_repo: false,
    }
}

/// Strip `origin/` and `refs/remotes/origin/` prefixes
pub fn strip_origin(branch: &str) -> &str {
    branch
        .strip_prefix("refs/remotes/origin/")
        .or_else(|| branch.strip_prefix("origin/"))
        .or_else(|| branch.strip_prefix("refs/heads/"))
        .unwrap_or(branch)
}
