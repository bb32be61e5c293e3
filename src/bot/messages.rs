//! Reply texts

/// Greeting sent on the first `/start` and when the bot joins a group
pub const WELCOME: &str = "🖖🏻 Greeting! I am krisha.kz notification bot!
🔎 Scanning in Almaty ⌚️ time zone.

🕹 Commands
/start - start bot
/stop - stop notifications
/url <filter> - url with query parameters, except page";

pub fn send_filter(user: &str, host: &str) -> String {
    format!("@{user}, Please send a /url command with {host} filter, except `page` parameter")
}

pub fn already_registered(user: &str) -> String {
    format!("@{user} already registered")
}

pub fn invalid_url(user: &str) -> String {
    format!("@{user}, Please enter a valid url")
}

pub fn foreign_host(user: &str, host: &str) -> String {
    format!("@{user}, Please enter a filter from {host}")
}

pub fn subscribed(user: &str) -> String {
    format!("@{user} subscribed for notifications")
}

pub fn already_subscribed(user: &str) -> String {
    format!("@{user} already subscribed")
}

pub fn subscribe_failed(user: &str) -> String {
    format!("failed to subscribe @{user}")
}

pub fn start_failed(user: &str) -> String {
    format!("failed to start scanning for @{user}")
}

pub fn stopped(user: &str) -> String {
    format!("Subscription stopped for @{user}")
}

pub fn not_subscribed(user: &str) -> String {
    format!("@{user} not subscribed")
}

pub fn unsubscribe_failed(user: &str) -> String {
    format!("failed to unsubscribe @{user}")
}

/// New listing notification; `href` is the site-relative link
pub fn notification(user: &str, host: &str, href: &str) -> String {
    format!("@{user} pls look at https://{host}{href}")
}
