//! Data models for charsync.

mod character;
mod page;

pub use character::{CharacterFilter, UpstreamRecord};
pub use page::{FetchPage, PageInfo};
