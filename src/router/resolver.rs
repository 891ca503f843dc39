//! Deployment resolution: requested model name -> provider deployment name.

use regex::RegexBuilder;

use crate::channel::DeploymentMapper;

/// A successful lookup in a channel's deployment mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentMatch {
    /// The mapper key that matched (the model itself for exact matches).
    pub pattern: String,
    pub deployment: String,
}

/// Match `value` against a `*` wildcard pattern, case-insensitively.
///
/// Non-`*` runs are matched literally; each `*` matches any (possibly
/// empty) sequence. A pattern without `*` only matches itself exactly.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == value {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }

    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    match RegexBuilder::new(&format!("^{}$", body))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.is_match(value),
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Invalid deployment pattern");
            false
        }
    }
}

/// Find the deployment for `model`: an exact key wins, otherwise the first
/// wildcard key (in mapper order) that matches.
pub fn find_deployment(mapper: &DeploymentMapper, model: &str) -> Option<DeploymentMatch> {
    if let Some(deployment) = mapper.get(model) {
        return Some(DeploymentMatch {
            pattern: model.to_string(),
            deployment: deployment.to_string(),
        });
    }

    mapper
        .iter()
        .find(|(pattern, _)| pattern.contains('*') && wildcard_match(pattern, model))
        .map(|(pattern, deployment)| DeploymentMatch {
            pattern: pattern.to_string(),
            deployment: deployment.to_string(),
        })
}
