//! News persistence
//!
//! Article bodies live in the object store; the time-series store carries
//! metadata plus the object key. A single item's failure never aborts the
//! batch.

mod extract;
mod store;

pub use extract::{extract_article_text, strip_tags};
pub use store::{NewsItem, NewsStore};
