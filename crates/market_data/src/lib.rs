pub mod calendar;
pub mod remote;
pub mod retry;
pub mod traits;

pub use calendar::{SessionCalendar, SessionWindow, TradingCalendar};
pub use retry::{RetryPolicy, fetch_with_retry};
pub use traits::{FeedError, PriceFeed};
