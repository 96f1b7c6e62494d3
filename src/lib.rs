//! # Casetrack (test case management API)
//!
//! `casetrack` serves a REST/JSON API over a test-case-management domain:
//! environment profiles, categories and their elements, environments, suites,
//! cases, case versions and case steps.
//!
//! ## Environment Model
//!
//! A category (e.g. "Operating System") owns elements ("Linux", "macOS").
//! An environment is a set of elements taken from distinct categories, owned
//! by a profile. Environments can be created one at a time or as the Cartesian
//! product of the elements of several categories in a single atomic request.
//!
//! ## Resources
//!
//! Every entity is exposed through a resource adapter that declares its field
//! allowlist, filters, orderings, permitted verbs and authorization policy.
//! List endpoints accept Django-style filters (`name=Foo`, `category__name=OS`,
//! `tags__in=1,2`); the selection endpoints additionally accept negated filters
//! (`name__ne=Foo`) for multi-select widgets.
//!
//! ## Authorization
//!
//! Reads are open. Writes require an API key (`username` + `api_key`) and the
//! permission named by the resource policy, for example
//! `environments.manage_environments`.

pub mod api;
pub mod cli;
pub mod model;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
