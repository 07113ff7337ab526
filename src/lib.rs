/*!
Client-side query cache with request deduplication, retries, and
background refresh.

The `cache` module holds the core: a keyed [`cache::QueryStore`], the
[`cache::FetchCoordinator`] that drives all network activity for it, and
the subscription, mutation, and paging layers on top. The `rest` module
is a thin JSON client used by fetchers.
*/
pub mod cache;
pub mod error;
pub mod rest;
