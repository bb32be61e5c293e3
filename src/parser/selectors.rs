//! CSS selectors and date vocabulary for the classifieds search page

use lazy_static::lazy_static;
use scraper::Selector;

// Helper macro to parse selectors safely at compile time
macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

lazy_static! {
    /// One listing card inside the search results section
    pub static ref LISTING_CARD: Selector =
        parse_selector!("section.a-list.a-search-list div.ddl_product.ddl_product_link");

    /// Card footer stats; the second one holds the publication date
    pub static ref CARD_STATS_ITEM: Selector = parse_selector!("div.card-stats__item");

    /// Card title link carrying the listing href
    pub static ref CARD_TITLE_LINK: Selector = parse_selector!("a[href].a-card__title");
}

/// Index of the date entry among a card's stats items
pub const CARD_DATE_INDEX: usize = 1;

/// Short month names as printed on cards ("24 окт.")
pub const SHORT_MONTH_NAMES: [&str; 12] = [
    "янв.", "фев.", "мар.", "апр.", "май", "июн.", "июл.", "авг.", "сен.", "окт.", "нояб.", "дек.",
];

/// Format a day the way cards print it, e.g. `24 окт.`
pub fn card_date(day: u32, month: u32) -> String {
    let name = SHORT_MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or_default();
    format!("{day} {name}")
}
