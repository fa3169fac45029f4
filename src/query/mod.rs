//! Query cache: structured keys, entry lifecycle, and the shared cache.

mod cache;
mod entry;
mod key;

pub use cache::QueryCache;
pub use entry::{EntryView, QueryStatus, ReadOptions};
pub use key::{QueryKey, Segment};
