use crate::common::error::RepoflowError;

/// repoflow全体で使用するResult型
pub type RepoflowResult<T> = Result<T, RepoflowError>;

/// Turns a missing value into an `InvalidRequest` error.
///
/// ```
/// use repoflow::common::result::OptionExt;
///
/// let feature: Option<&str> = None;
/// let error = feature.ok_or_invalid_request("feature_branch", "not configured").unwrap_err();
/// assert_eq!(error.to_string(), "Invalid feature_branch: not configured");
/// ```
pub trait OptionExt<T> {
    fn ok_or_invalid_request(
        self,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> RepoflowResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_invalid_request(
        self,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> RepoflowResult<T> {
        self.ok_or_else(|| RepoflowError::invalid_request(field, reason, None))
    }
}
