//! Request geometry: the area and period an analysis covers

mod bbox;
mod time_range;

pub use bbox::BoundingBox;
pub use time_range::TimeRange;
