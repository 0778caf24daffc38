//! Time-series persistence
//!
//! Records are normalized into points whose tag-keys index the query axes
//! and whose field-keys hold values. The store upserts by
//! `(measurement, tag-set, timestamp)`, which is the mechanism every
//! correction layer relies on.

mod point;
mod writer;

pub use point::{
    daily_point, fundamentals_point, news_point, quote_point, sanitize_field_text,
    sanitize_tag_value, DataPoint, FieldValue, GENERAL_TEXT_CAP, OBJECT_META_CAP,
};
pub use writer::{StoreSettings, TsWriter, WriterError};
