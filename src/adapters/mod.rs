pub mod bitbucket;
pub mod gitea;
pub mod github;
pub mod gitlab;

use crate::block::{AdapterState, BlockDescriptor, Chunk, HosterType};
use crate::config::Tunables;
use crate::errors::AdapterError;
use crate::http_client::CrawlerHttpClient;
use futures_core::stream::Stream;
use std::pin::Pin;

/// A lazy sequence of `Chunk`s. Pull-based: dropping the stream (e.g. the
/// runner stopping early) cancels any pending sleep/request cleanly,
/// satisfying spec.md §9's "must be able to stop consuming early without
/// leaking resources".
pub type ChunkStream = Pin<Box<dyn Stream<Item = Chunk> + Send>>;

/// `empty_page_count` threshold past which `has_next` reports false,
/// regardless of the nominal ID range. Spec.md §9 calls this out as a
/// tunable heuristic for sparse ID spaces rather than a derived constant.
pub const EMPTY_PAGE_LIMIT: u32 = 10;

/// The variant set implementing the hoster-crawl capability. Spec.md §9's
/// design note calls for exactly this shape over a `dyn Trait`: "a
/// constructor from BlockDescriptor fields and a method producing a lazy
/// sequence of Chunks plus a termination predicate" behind one enum.
pub enum Adapter {
    GitHub(github::GitHubAdapter),
    Gitea(gitea::GiteaAdapter),
    GitLab(gitlab::GitLabAdapter),
    Bitbucket(bitbucket::BitbucketAdapter),
}

impl Adapter {
    /// Construct the adapter matching `block.hosting_service.type`,
    /// failing fast (`AdapterError::Config`) when required credentials are
    /// missing (GitHub requires a bearer token; Bitbucket requires OAuth
    /// client credentials).
    pub fn for_block(
        block: &BlockDescriptor,
        http: CrawlerHttpClient,
        tunables: Tunables,
    ) -> Result<Self, AdapterError> {
        match block.hosting_service.hoster_type {
            HosterType::Github => Ok(Adapter::GitHub(github::GitHubAdapter::new(block, http, tunables)?)),
            HosterType::Gitea => Ok(Adapter::Gitea(gitea::GiteaAdapter::new(block, http, tunables)?)),
            HosterType::Gitlab => Ok(Adapter::GitLab(gitlab::GitLabAdapter::new(block, http, tunables)?)),
            HosterType::Bitbucket => Ok(Adapter::Bitbucket(bitbucket::BitbucketAdapter::new(block, http, tunables)?)),
        }
    }

    pub fn state_from_block(&self, block: &BlockDescriptor) -> AdapterState {
        match self {
            Adapter::GitHub(a) => a.state_from_block(block),
            Adapter::Gitea(a) => a.state_from_block(block),
            Adapter::GitLab(a) => a.state_from_block(block),
            Adapter::Bitbucket(a) => a.state_from_block(block),
        }
    }

    pub fn set_state(&self, state: AdapterState) -> AdapterState {
        match self {
            Adapter::GitHub(a) => a.set_state(state),
            Adapter::Gitea(a) => a.set_state(state),
            Adapter::GitLab(a) => a.set_state(state),
            Adapter::Bitbucket(a) => a.set_state(state),
        }
    }

    pub fn has_next(&self, state: &AdapterState) -> bool {
        match self {
            Adapter::GitHub(a) => a.has_next(state),
            Adapter::Gitea(a) => a.has_next(state),
            Adapter::GitLab(a) => a.has_next(state),
            Adapter::Bitbucket(a) => a.has_next(state),
        }
    }

    pub fn crawl(&self, state: AdapterState) -> ChunkStream {
        match self {
            Adapter::GitHub(a) => a.crawl(state),
            Adapter::Gitea(a) => a.crawl(state),
            Adapter::GitLab(a) => a.crawl(state),
            Adapter::Bitbucket(a) => a.crawl(state),
        }
    }
}

/// Shared default-state bookkeeping every adapter's `set_state` performs:
/// bump the call counter `i`, and carry the `empty_page_count` forward.
/// Grounded on `original_source/crawlers/lib/platforms/github/github_v4.py`'s
/// `GitHubV4Crawler.set_state`, generalized since Gitea/GitLab/Bitbucket all
/// need the same two counters even though their page cursors differ.
pub fn bump_common_counters(state: &mut AdapterState) {
    let i = state.get_i64("i").unwrap_or(-1) + 1;
    state.set("i", i);
    let empty_page_count = state.get_u64("empty_page_count").unwrap_or(0);
    state.set("empty_page_count", empty_page_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::AdapterState;

    #[test]
    fn bump_common_counters_increments_i_and_keeps_empty_page_count() {
        let mut state = AdapterState::new();
        bump_common_counters(&mut state);
        assert_eq!(state.get_i64("i"), Some(0));
        assert_eq!(state.get_u64("empty_page_count"), Some(0));
        state.set("empty_page_count", 3u64);
        bump_common_counters(&mut state);
        assert_eq!(state.get_i64("i"), Some(1));
        assert_eq!(state.get_u64("empty_page_count"), Some(3));
    }
}
