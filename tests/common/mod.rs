//! Common test utilities

use chrono::{DateTime, FixedOffset, TimeZone};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use krisha_scan::parser::Clock;
use krisha_scan::scanner::{Notifier, ScanConfig};
use krisha_scan::SubscriberKey;

/// UTC+5, the zone listings are dated in
#[allow(dead_code)]
pub fn almaty() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600).unwrap()
}

/// Fixed "now" on 24 October 2024, 13:00 local time
#[allow(dead_code)]
pub fn fixed_now() -> DateTime<FixedOffset> {
    almaty().with_ymd_and_hms(2024, 10, 24, 13, 0, 0).unwrap()
}

/// Clock frozen at [`fixed_now`]
#[allow(dead_code)]
pub fn fixed_clock() -> Clock {
    let now = fixed_now();
    Arc::new(move || now)
}

/// One search result card as the site renders it
#[allow(dead_code)]
pub fn listing_card(href: &str, date: &str) -> String {
    format!(
        r#"<div class="ddl_product ddl_product_link" data-id="{href}">
             <div class="a-card__header">
               <a class="a-card__title" href="{href}">2-комнатная квартира</a>
             </div>
             <div class="card-stats">
               <div class="card-stats__item">Алматы, Бостандыкский р-н</div>
               <div class="card-stats__item"> {date} </div>
               <div class="card-stats__item">37</div>
             </div>
           </div>"#
    )
}

/// Full search results page holding `cards`
#[allow(dead_code)]
pub fn listing_page(cards: &[String]) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Аренда квартир</title></head>
<body>
  <header><div class="ddl_product ddl_product_link"><a class="a-card__title" href="/a/show/ad">Promo</a></div></header>
  <section class="a-list a-search-list a-list-with-favs">
    {}
  </section>
</body>
</html>"#,
        cards.join("\n")
    )
}

/// Scan settings fast enough for tests
#[allow(dead_code)]
pub fn fast_scan_config() -> ScanConfig {
    ScanConfig {
        interval: Duration::from_millis(100),
        page_delay: Duration::from_millis(10),
        time_zone: almaty(),
        cache_capacity: 100,
        retention: Duration::from_secs(24 * 3600),
        store_timeout: Duration::from_secs(5),
    }
}

/// Notifier remembering every call
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingNotifier {
    pub notified: Mutex<Vec<(SubscriberKey, String)>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn items(&self) -> Vec<String> {
        self.notified
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id)| id.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, key: &SubscriberKey, item_id: &str) {
        self.notified
            .lock()
            .unwrap()
            .push((key.clone(), item_id.to_string()));
    }
}

/// Poll `check` until it holds or `timeout` passes
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
