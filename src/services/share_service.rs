use tracing::warn;
use url::Url;

#[derive(Debug, Clone)]
pub struct EventDetails {
    pub name: String,
    pub date: String,
    pub venue: String,
    pub time: String,
}

impl EventDetails {
    pub fn from_env() -> Self {
        Self {
            name: std::env::var("EVENT_NAME").unwrap_or_else(|_| "Rang Kasumbal".to_string()),
            date: std::env::var("EVENT_DATE").unwrap_or_default(),
            venue: std::env::var("EVENT_VENUE").unwrap_or_default(),
            time: std::env::var("EVENT_TIME").unwrap_or_default(),
        }
    }
}

pub fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// Best-effort TinyURL call. The shortener is a convenience, never a
/// dependency: any failure falls back to the long URL.
pub async fn shorten_url(long_url: &str) -> String {
    let client = reqwest::Client::new();
    let result = client
        .get("https://tinyurl.com/api-create.php")
        .query(&[("url", long_url)])
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => resp
            .text()
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| long_url.to_string()),
        Ok(resp) => {
            warn!("URL shortener returned {} for {}", resp.status(), long_url);
            long_url.to_string()
        }
        Err(e) => {
            warn!("URL shortener unreachable: {}", e);
            long_url.to_string()
        }
    }
}

pub fn build_share_message(event: &EventDetails, invitation_url: &str, invite_url: &str) -> String {
    format!(
        "I will be attending *{}*! Join me at this event.\n\n\
         📍 *Venue*: {}\n🗓️ *Date*: {} - {}\n\n\
         See my invitation: {}\n\nCreate your own invitation: {}",
        event.name, event.venue, event.date, event.time, invitation_url, invite_url
    )
}

/// Mobile devices get the app deep link, everything else the web client.
pub fn whatsapp_share_url(message: &str, user_agent: &str) -> String {
    let endpoint = if is_mobile_agent(user_agent) {
        "whatsapp://send"
    } else {
        "https://web.whatsapp.com/send"
    };
    // parse_with_params percent-encodes the message for us.
    match Url::parse_with_params(endpoint, &[("text", message)]) {
        Ok(url) => url.to_string(),
        Err(_) => endpoint.to_string(),
    }
}

fn is_mobile_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    ["android", "iphone", "ipad", "ipod"]
        .iter()
        .any(|needle| ua.contains(needle))
}
