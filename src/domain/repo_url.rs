//! Repository URL helpers
//!
//! Pure string transformations on provider URLs: sanitising user-supplied
//! clone URLs, deriving repo names, and computing the credential host key
//! the controller matches against.

use super::gitops_config::GitProvider;

pub const BITBUCKET_CLONE_BASE_URL: &str = "https://bitbucket.org/";

/// Marker a client sends when it wants the system-generated repository
pub const GIT_REPO_DEFAULT: &str = "Default";

/// Strip the user/org segment providers embed in clone URLs
///
/// `https://user@bitbucket.org/ws/repo.git` → `https://bitbucket.org/ws/repo.git`
/// `https://org@dev.azure.com/org/proj/_git/repo` → `https://dev.azure.com/org/proj/_git/repo`
pub fn sanitise_repo_url(provider: GitProvider, url: &str) -> String {
    let marker = match provider {
        GitProvider::BitbucketCloud => "bitbucket.org",
        GitProvider::AzureDevOps => "dev.azure.com",
        _ => return url.to_string(),
    };
    strip_userinfo_before(url, marker)
}

fn strip_userinfo_before(url: &str, host: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    match rest.find('@') {
        Some(at) if rest[at + 1..].starts_with(host) && !rest[..at].contains('/') => {
            format!("{}{}", &url[..scheme_end + 3], &rest[at + 1..])
        }
        _ => url.to_string(),
    }
}

/// Last path segment of a URL with any `.git` suffix removed
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// Generated repository name for an application
pub fn repo_name_for_app(prefix: &str, app_name: &str) -> String {
    let name = collapse_whitespace(app_name);
    if prefix.is_empty() {
        name
    } else {
        format!("{}-{}", prefix, name)
    }
}

/// Replace runs of whitespace with a single `-`
pub fn collapse_whitespace(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("-")
}

/// Host URL under which the controller stores credentials for this provider
///
/// `gitlab_group_path` is the resolved full path of the GitLab group; it is
/// only consulted for GitLab.
pub fn git_host_url_by_provider(
    provider: GitProvider,
    host: &str,
    github_org_id: &str,
    gitlab_group_path: &str,
    bitbucket_workspace_id: &str,
) -> Result<String, String> {
    match provider {
        GitProvider::GitHub => {
            if !host.starts_with("http://") && !host.starts_with("https://") {
                return Err(format!("invalid host url '{}'", host));
            }
            let mut url = url::Url::parse(host).map_err(|e| e.to_string())?;
            let path = format!(
                "{}/{}",
                url.path().trim_end_matches('/'),
                github_org_id.trim_matches('/')
            );
            url.set_path(&path);
            Ok(url.to_string())
        }
        GitProvider::GitLab => {
            if host.ends_with('/') {
                Ok(format!("{}{}", host, gitlab_group_path))
            } else {
                Ok(format!("{}/{}", host, gitlab_group_path))
            }
        }
        GitProvider::BitbucketCloud => {
            Ok(format!("{}{}", BITBUCKET_CLONE_BASE_URL, bitbucket_workspace_id))
        }
        GitProvider::AzureDevOps => Ok(host.to_string()),
    }
}

/// Hostname used as the controller's certificate key
pub fn server_name(host: &str) -> String {
    url::Url::parse(host)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| {
            host.trim_start_matches("https://")
                .trim_start_matches("http://")
                .split('/')
                .next()
                .unwrap_or_default()
                .to_string()
        })
}

/// Whether a repo URL lives under the given host prefix, ignoring trailing `/` and `.git`
pub fn url_has_prefix(repo_url: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    match repo_url.trim_end_matches(".git").strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitise_bitbucket_and_azure() {
        assert_eq!(
            sanitise_repo_url(
                GitProvider::BitbucketCloud,
                "https://bot@bitbucket.org/acme/web.git"
            ),
            "https://bitbucket.org/acme/web.git"
        );
        assert_eq!(
            sanitise_repo_url(
                GitProvider::AzureDevOps,
                "https://acme@dev.azure.com/acme/proj/_git/web"
            ),
            "https://dev.azure.com/acme/proj/_git/web"
        );
        assert_eq!(
            sanitise_repo_url(GitProvider::GitHub, "https://x@github.com/acme/web"),
            "https://x@github.com/acme/web"
        );
    }

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(repo_name_from_url("https://github.com/acme/web.git"), "web");
        assert_eq!(repo_name_from_url("https://github.com/acme/web/"), "web");
        assert_eq!(repo_name_from_url("web"), "web");
    }

    #[test]
    fn test_repo_name_for_app() {
        assert_eq!(repo_name_for_app("", "my  app"), "my-app");
        assert_eq!(repo_name_for_app("devtron", "web"), "devtron-web");
    }

    #[test]
    fn test_git_host_url_by_provider() {
        assert_eq!(
            git_host_url_by_provider(GitProvider::GitHub, "https://github.com", "acme", "", "")
                .unwrap(),
            "https://github.com/acme"
        );
        assert!(
            git_host_url_by_provider(GitProvider::GitHub, "github.com", "acme", "", "").is_err()
        );
        assert_eq!(
            git_host_url_by_provider(
                GitProvider::GitLab,
                "https://gitlab.com/",
                "",
                "acme/platform",
                ""
            )
            .unwrap(),
            "https://gitlab.com/acme/platform"
        );
        assert_eq!(
            git_host_url_by_provider(GitProvider::BitbucketCloud, "", "", "", "acme").unwrap(),
            "https://bitbucket.org/acme"
        );
    }

    #[test]
    fn test_server_name_and_prefix() {
        assert_eq!(server_name("https://git.example.com:8443/x"), "git.example.com");
        assert!(url_has_prefix(
            "https://github.com/acme/web.git",
            "https://github.com/acme/"
        ));
        assert!(!url_has_prefix("https://github.com/other/web", "https://github.com/acme"));
        assert!(!url_has_prefix("https://github.com/acme/web", ""));
    }
}
