//! Upstream item source.
//!
//! The scheduler talks to the upstream through the [`ItemSource`] trait so
//! tests can script responses. [`HttpItemSource`] is the production
//! implementation; [`parse_items`] maps raw JSON into typed items.

use async_trait::async_trait;

use crate::types::TagKey;

mod client;
mod error;
mod parser;

pub use client::{HttpItemSource, UpstreamCredentials};
pub use error::UpstreamError;
pub use parser::{FetchedBatch, ParseError, parse_item, parse_items};

/// One bounded "items after cursor" query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub tag_key: TagKey,
    /// Only items with an id strictly greater than this are requested.
    pub after: u64,
    /// Maximum number of items to return.
    pub limit: u32,
}

impl FetchRequest {
    /// The upstream search expression: the tags, ascending id order, and the
    /// cursor filter.
    pub fn tag_expression(&self) -> String {
        format!("{} order:id id:>{}", self.tag_key, self.after)
    }
}

/// A source of new items for a tag key.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetches up to `request.limit` items with id greater than `request.after`,
    /// in ascending id order.
    ///
    /// Implementations may not honour the ordering or the filter exactly; the
    /// scheduler re-filters and re-sorts.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedBatch, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_expression_orders_ascending_after_cursor() {
        let request = FetchRequest {
            tag_key: TagKey::from_tags(["Dog"]).unwrap(),
            after: 0,
            limit: 20,
        };
        assert_eq!(request.tag_expression(), "dog order:id id:>0");
    }
}
