//! Search-results parser for the classifieds site
//!
//! Only cards published today count as fresh; older cards are skipped so a
//! first scan does not flood a new subscriber with the whole back catalogue.

use chrono::Datelike;
use scraper::{ElementRef, Html};

use super::selectors::{
    card_date, CARD_DATE_INDEX, CARD_STATS_ITEM, CARD_TITLE_LINK, LISTING_CARD,
};
use super::{Clock, Parser};
use crate::models::DiscoveredItem;
use crate::utils::error::ParseError;
use crate::utils::start_of_day;

/// Parser for the site's search result pages; items are listing hrefs
pub struct ListingParser {
    clock: Clock,
}

impl ListingParser {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    /// Date text of a card, if the card shows one
    fn card_date_text(card: &ElementRef<'_>) -> Option<String> {
        card.select(&CARD_STATS_ITEM)
            .nth(CARD_DATE_INDEX)
            .and_then(|item| item.text().next())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    }
}

impl Parser for ListingParser {
    fn parse(&self, body: &[u8], emit: &mut dyn FnMut(DiscoveredItem)) -> Result<(), ParseError> {
        let html = std::str::from_utf8(body).map_err(|_| ParseError::InvalidEncoding)?;
        let document = Html::parse_document(html);

        let now = (self.clock)();
        let day = start_of_day(now);
        let today = card_date(now.day(), now.month());

        let mut cards = 0usize;
        let mut emitted = 0usize;
        for card in document.select(&LISTING_CARD) {
            cards += 1;

            match Self::card_date_text(&card) {
                Some(date) if date != today => continue,
                Some(_) => {}
                None => tracing::debug!("Listing card without a date, keeping it"),
            }

            for link in card.select(&CARD_TITLE_LINK) {
                if let Some(href) = link.value().attr("href") {
                    emit(DiscoveredItem::new(href, day));
                    emitted += 1;
                }
            }
        }

        tracing::debug!(cards, emitted, today = %today, "Parsed listing page");
        Ok(())
    }
}
