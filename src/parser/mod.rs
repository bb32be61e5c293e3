//! Page parsing
//!
//! A [`Parser`] turns one fetched page into discovered items. The crawl engine
//! calls it once per page and forwards every emitted item in order.

pub mod listing;
pub mod selectors;

pub use listing::ListingParser;

use chrono::{DateTime, FixedOffset};
use std::sync::Arc;

use crate::models::DiscoveredItem;
use crate::utils::error::ParseError;

/// Extracts item identifiers from a raw page body
pub trait Parser: Send + Sync {
    /// Parse `body`, calling `emit` for each item in page order
    fn parse(&self, body: &[u8], emit: &mut dyn FnMut(DiscoveredItem)) -> Result<(), ParseError>;
}

/// Shared handle to a parser
pub type SharedParser = Arc<dyn Parser>;

/// Source of "now" in the configured zone; swapped out in tests
pub type Clock = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

/// Clock reading the system time in `tz`
pub fn system_clock(tz: FixedOffset) -> Clock {
    Arc::new(move || chrono::Utc::now().with_timezone(&tz))
}

/// Plain-text parser: every non-empty trimmed line is one item observed today
pub struct LineParser {
    clock: Clock,
}

impl LineParser {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }
}

impl Parser for LineParser {
    fn parse(&self, body: &[u8], emit: &mut dyn FnMut(DiscoveredItem)) -> Result<(), ParseError> {
        let text = std::str::from_utf8(body).map_err(|_| ParseError::InvalidEncoding)?;
        let today = crate::utils::start_of_day((self.clock)());

        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .for_each(|line| emit(DiscoveredItem::new(line, today)));

        Ok(())
    }
}
