mod fetcher;
mod normalize;
mod range;

pub use fetcher::{ApodClient, RetryPolicy, APOD_API_URL};
pub use normalize::normalize_entry;
pub use range::{parse_date, DateRange, RangeRequest};
