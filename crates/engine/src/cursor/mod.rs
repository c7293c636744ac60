//! Cursor composition
//!
//! Three granularities, each built on the one below:
//!
//! | Cursor | Merges | Follows new |
//! |--------|--------|-------------|
//! | [`ReplicaCursor`] | one replica log, gated by the offline marker | - |
//! | [`DomainCursor`] | every replica of a domain, by CSN | replicas |
//! | [`MultiDomainCursor`] | every non-excluded domain, by CSN | domains and replicas |
//!
//! All of them implement [`ChangelogCursor`](changelog_core::ChangelogCursor):
//! `next()` never blocks and returns `false` when nothing is available
//! right now. Cursors following new logs hold a subscription which is
//! released by `close()` or on drop.

mod domain;
mod multi_domain;
mod replica;

pub use domain::DomainCursor;
pub use multi_domain::MultiDomainCursor;
pub use replica::ReplicaCursor;
