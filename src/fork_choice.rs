//! Reorg policy. The index keeps whatever chain it is told to keep
//! consistent; which branch is "best" is decided here, outside the index.
use bitcoin::BlockHash;

/// A submitted header that would displace active headers.
///
/// Describes the first conflicting header only, so a run and the same
/// headers submitted one at a time present identical forks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fork {
    /// First height whose active header would be detached.
    pub height: u32,
    /// Active header at `height` today.
    pub displaced: BlockHash,
    /// Submitted header claiming `height`.
    pub incoming: BlockHash,
    /// Current tip `(height, hash)`.
    pub current_tip: (u32, BlockHash),
}

/// Decides whether a fork may replace the active chain.
pub trait ForkChoice: Send + Sync {
    /// `true` to detach everything from `fork.height` up and adopt the branch.
    fn accept(&self, fork: &Fork) -> bool;
}

/// Never reorg: any conflict is a `DuplicateConflict`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectForks;

impl ForkChoice for RejectForks {
    fn accept(&self, _fork: &Fork) -> bool {
        false
    }
}

/// Whatever the caller submits is the asserted best chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct FollowCaller;

impl ForkChoice for FollowCaller {
    fn accept(&self, _fork: &Fork) -> bool {
        true
    }
}

impl<F> ForkChoice for F
where
    F: Fn(&Fork) -> bool + Send + Sync,
{
    fn accept(&self, fork: &Fork) -> bool {
        self(fork)
    }
}
