use std::fmt;

use anyhow::Error;

/// The outcome of calling [`FollowupAction::repair`].
#[derive(Debug, Clone)]
pub struct RepairResult {
    pub success: bool,
    pub message: String,
}

/// A concrete, confirmed repair that can be applied.
///
/// Produced by [`RepairAction::verify`] once a `RepairAction` has actually
/// scanned the repository and found something wrong. Calling `repair()`
/// performs the fix.
pub trait FollowupAction: fmt::Debug {
    fn message(&self) -> &str;
    fn repair(&self) -> Result<RepairResult, Error>;
}

/// A cooperative repair recommendation, *not* an error.
///
/// `Repository::verify` returns a lazy sequence of these. Each `RepairAction`
/// represents a category of check (for example "scan the block store for
/// corruption"); calling `verify()` on it actually performs the scan and
/// returns `Some(FollowupAction)` describing what needs fixing, or `None` if
/// nothing is wrong. The collaborator (CLI/GUI) decides whether to call
/// `repair()` on the returned `FollowupAction`, typically after confirming
/// with the user.
pub trait RepairAction: fmt::Debug {
    fn message(&self) -> &str;
    fn verify(&self) -> Result<Option<Box<dyn FollowupAction>>, Error>;
}
