//! Feed and webhook administration.

mod error;
#[allow(clippy::module_inception)]
mod registry;
mod validate;


pub use error::RegistryError;
pub use registry::{
    FeedRegistry, FeedSpec, FeedUpdate, FeedView, RegistryDeps, WebhookSpec, WebhookUpdate,
    WebhookView,
};
pub use validate::{MAX_BATCH_SIZE, MAX_NAME_CHARS, validate_feed, validate_name, validate_url};
