//! Repository exclusion
//!
//! Removes repositories whose name is listed in the configured skip list.
//! Matching is exact and case-sensitive; the order of the remaining
//! repositories is preserved.

use std::collections::HashSet;
use tracing::debug;

use crate::github::RepositoryDescriptor;

/// Set of repository names to leave out of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    names: HashSet<String>,
}

impl ExclusionSet {
    /// Parse a comma-separated list such as `repo-a,repo-b`
    ///
    /// Surrounding whitespace is trimmed and empty entries are dropped, so
    /// `""` or `"a,,b"` never exclude a repository named `""`.
    pub fn parse(input: &str) -> Self {
        input.split(',').collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let names = iter
            .into_iter()
            .map(|name| name.as_ref().trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        Self { names }
    }
}

/// Drop every descriptor whose name is in `exclusions`
pub fn apply(
    repositories: Vec<RepositoryDescriptor>,
    exclusions: &ExclusionSet,
) -> Vec<RepositoryDescriptor> {
    if exclusions.is_empty() {
        return repositories;
    }
    debug!(
        "Applying {} exclusions to {} repositories",
        exclusions.len(),
        repositories.len()
    );

    repositories
        .into_iter()
        .filter(|repo| {
            let excluded = exclusions.contains(&repo.name);
            if excluded {
                debug!("Excluding repository: {}", repo.name);
            }
            !excluded
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn repo(name: &str) -> RepositoryDescriptor {
        RepositoryDescriptor {
            name: name.to_string(),
            full_name: format!("octocat/{}", name),
            owner: "octocat".to_string(),
            clone_url: format!("https://github.com/octocat/{}.git", name),
            private: false,
            default_branch: Some("main".to_string()),
        }
    }

    fn names(repos: &[RepositoryDescriptor]) -> Vec<&str> {
        repos.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_parse_comma_separated() {
        let set = ExclusionSet::parse("repo-a,repo-b");
        assert_eq!(set.len(), 2);
        assert!(set.contains("repo-a"));
        assert!(set.contains("repo-b"));
        assert!(!set.contains("repo-c"));
    }

    #[test]
    fn test_parse_empty_input_excludes_nothing() {
        let set = ExclusionSet::parse("");
        assert!(set.is_empty());
        assert!(!set.contains(""));

        let sparse = ExclusionSet::parse(",repo-a,, ,");
        assert_eq!(sparse.len(), 1);
        assert!(!sparse.contains(""));
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let set = ExclusionSet::parse(" repo-a , repo-b");
        assert!(set.contains("repo-a"));
        assert!(set.contains("repo-b"));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let set = ExclusionSet::parse("Repo-A");
        let kept = apply(vec![repo("repo-a"), repo("Repo-A")], &set);
        assert_eq!(names(&kept), vec!["repo-a"]);
    }

    #[test]
    fn test_skip_two_of_three() {
        let set = ExclusionSet::parse("repo-a,repo-b");
        let kept = apply(vec![repo("repo-a"), repo("repo-b"), repo("repo-c")], &set);
        assert_eq!(names(&kept), vec!["repo-c"]);
    }

    #[test]
    fn test_empty_skip_keeps_everything() {
        let kept = apply(vec![repo("repo-a")], &ExclusionSet::parse(""));
        assert_eq!(names(&kept), vec!["repo-a"]);
    }

    #[test]
    fn test_order_is_preserved() {
        let set = ExclusionSet::parse("b");
        let kept = apply(vec![repo("d"), repo("b"), repo("a"), repo("c")], &set);
        assert_eq!(names(&kept), vec!["d", "a", "c"]);
    }

    #[quickcheck]
    fn prop_keeps_exactly_unlisted_names(all: Vec<String>, skipped: Vec<String>) -> bool {
        let set: ExclusionSet = skipped.iter().collect();
        let input: Vec<RepositoryDescriptor> = all.iter().map(|n| repo(n)).collect();
        let expected: Vec<&str> = all
            .iter()
            .map(String::as_str)
            .filter(|n| !set.contains(n))
            .collect();
        let excluded_count = all.iter().filter(|n| set.contains(n)).count();

        let kept = apply(input, &set);
        names(&kept) == expected && kept.len() == all.len() - excluded_count
    }
}
