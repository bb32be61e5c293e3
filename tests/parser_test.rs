//! Listing parser against realistic search pages

mod common;

use krisha_scan::parser::{ListingParser, Parser};

use common::{almaty, fixed_clock, listing_card, listing_page};

fn parse(body: &str) -> Vec<String> {
    let parser = ListingParser::new(fixed_clock());
    let mut ids = Vec::new();
    parser
        .parse(body.as_bytes(), &mut |item| ids.push(item.id))
        .unwrap();
    ids
}

#[test]
fn test_todays_cards_in_page_order() {
    let body = listing_page(&[
        listing_card("/a/show/100", "24 окт."),
        listing_card("/a/show/200", "22 окт."),
        listing_card("/a/show/300", "24 окт."),
        listing_card("/a/show/400", "24 сен."),
    ]);

    assert_eq!(parse(&body), vec!["/a/show/100", "/a/show/300"]);
}

#[test]
fn test_promo_outside_results_is_ignored() {
    let body = listing_page(&[]);
    assert!(parse(&body).is_empty());
}

#[test]
fn test_items_are_stamped_with_local_midnight() {
    use chrono::TimeZone;

    let parser = ListingParser::new(fixed_clock());
    let body = listing_page(&[listing_card("/a/show/1", "24 окт.")]);

    let mut items = Vec::new();
    parser.parse(body.as_bytes(), &mut |item| items.push(item)).unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].observed_on,
        almaty().with_ymd_and_hms(2024, 10, 24, 0, 0, 0).unwrap()
    );
}

#[test]
fn test_empty_and_garbage_bodies() {
    assert!(parse("").is_empty());
    assert!(parse("<html><body><p>503 Service Unavailable</p></body></html>").is_empty());

    let parser = ListingParser::new(fixed_clock());
    assert!(parser.parse(&[0xc3, 0x28], &mut |_| {}).is_err());
}
