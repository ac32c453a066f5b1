//! UI shell and ad suppressor.
//!
//! Ad slots consult the route gate at render time. On a cross-origin
//! isolated page they render nothing at all: no container node and no call
//! into the ad network client, so no ad script is ever enqueued there.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use toolkit_media_common::{AdsConfig, RouteGate};

use crate::tools::Tool;

/// Ad network integration.
pub trait AdNetworkClient: Send + Sync {
    /// Markup that asks the network to fill `slot_id`.
    fn request_slot_render(&self, slot_id: &str) -> String;

    /// Loader script included once per page that renders any slot.
    fn loader_script(&self) -> String;
}

/// Ad client using the global `adsbygoogle` push queue.
#[derive(Debug, Clone)]
pub struct PushQueueAdClient {
    client_id: Option<String>,
    script_url: String,
}

impl PushQueueAdClient {
    /// Create a client from configuration.
    pub fn from_config(config: &AdsConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            script_url: config.script_url.clone(),
        }
    }
}

impl AdNetworkClient for PushQueueAdClient {
    fn request_slot_render(&self, slot_id: &str) -> String {
        let client = self.client_id.as_deref().unwrap_or_default();
        format!(
            r#"<ins class="adsbygoogle" style="display:block" data-ad-client="{}" data-ad-slot="{}"></ins><script>(window.adsbygoogle = window.adsbygoogle || []).push({{}});</script>"#,
            escape(client),
            escape(slot_id),
        )
    }

    fn loader_script(&self) -> String {
        let mut src = self.script_url.clone();
        if let Some(client) = &self.client_id {
            let _ = write!(src, "?client={client}");
        }
        format!(
            r#"<script async src="{}" crossorigin="anonymous"></script>"#,
            escape(&src)
        )
    }
}

/// Whether ad slots may render on `path`.
pub fn should_render_ads(gate: &RouteGate, path: &str, ads_enabled: bool) -> bool {
    ads_enabled && !gate.is_isolated_path(path)
}

/// Renders ad slots for pages.
#[derive(Clone)]
pub struct AdSlots {
    gate: Arc<RouteGate>,
    client: Arc<dyn AdNetworkClient>,
    enabled: bool,
}

impl AdSlots {
    /// Create a renderer.
    pub fn new(gate: Arc<RouteGate>, client: Arc<dyn AdNetworkClient>, enabled: bool) -> Self {
        Self {
            gate,
            client,
            enabled,
        }
    }

    /// The gate deciding which pages suppress ads.
    pub fn gate(&self) -> &RouteGate {
        &self.gate
    }

    /// Whether ads render on `path`.
    pub fn enabled_for(&self, path: &str) -> bool {
        should_render_ads(&self.gate, path, self.enabled)
    }

    /// The slot container for `slot_id`, or `None` where ads are suppressed.
    ///
    /// The container exists even if the network leaves it empty.
    pub fn render(&self, path: &str, slot_id: &str) -> Option<String> {
        if !self.enabled_for(path) {
            return None;
        }
        Some(format!(
            r#"<div class="ad-slot" data-slot="{}">{}</div>"#,
            escape(slot_id),
            self.client.request_slot_render(slot_id)
        ))
    }

    /// The network loader script, or `None` where ads are suppressed.
    pub fn head(&self, path: &str) -> Option<String> {
        self.enabled_for(path).then(|| self.client.loader_script())
    }
}

impl std::fmt::Debug for AdSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdSlots")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Whether isolation-gated features work on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum FeatureAvailability {
    /// Everything the page needs is present.
    Available,
    /// The page cannot offer its isolation-gated features.
    Unsupported(String),
}

impl FeatureAvailability {
    /// Availability for a page that may expect isolation.
    ///
    /// A page that expects isolation but did not get it is reported as
    /// unsupported, the same as an environment lacking the features.
    pub fn for_page(expects_isolation: bool, cross_origin_isolated: bool) -> Self {
        if expects_isolation && !cross_origin_isolated {
            Self::Unsupported(
                "This page is not cross-origin isolated; multi-threaded processing is unavailable"
                    .to_string(),
            )
        } else {
            Self::Available
        }
    }

    /// Returns `true` if available.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Slot id of the banner under the tool header.
pub const TOP_SLOT: &str = "tool-top";

/// Slot id of the banner below the tool.
pub const BOTTOM_SLOT: &str = "tool-bottom";

/// Render a tool page.
///
/// Isolation and ad suppression both come from the gate held by `ads`.
pub fn render_tool_page(tool: Tool, path: &str, ads: &AdSlots) -> String {
    let isolated = ads.gate().is_isolated_path(path);
    let mut html = String::with_capacity(2048);

    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">");
    let _ = write!(html, "<title>{}</title>", escape(tool.title()));
    if let Some(script) = ads.head(path) {
        html.push_str(&script);
    }
    html.push_str("</head><body>");

    let _ = write!(
        html,
        r#"<main data-tool="{}" data-isolated="{isolated}" data-media-engine="{}">"#,
        tool.slug(),
        tool.uses_media_engine()
    );
    let _ = write!(html, "<h1>{}</h1>", escape(tool.title()));
    if let Some(slot) = ads.render(path, TOP_SLOT) {
        html.push_str(&slot);
    }
    html.push_str(r#"<section id="tool-root"></section>"#);
    if let Some(slot) = ads.render(path, BOTTOM_SLOT) {
        html.push_str(&slot);
    }
    html.push_str("</main></body></html>\n");

    html
}

fn escape(value: &str) -> String {
    v_htmlescape::escape(value).to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingClient {
        slot_requests: AtomicUsize,
        loader_requests: AtomicUsize,
    }

    impl AdNetworkClient for CountingClient {
        fn request_slot_render(&self, slot_id: &str) -> String {
            self.slot_requests.fetch_add(1, Ordering::SeqCst);
            format!("<ins data-slot=\"{slot_id}\"></ins>")
        }

        fn loader_script(&self) -> String {
            self.loader_requests.fetch_add(1, Ordering::SeqCst);
            "<script src=\"ads.js\"></script>".to_string()
        }
    }

    fn slots(client: Arc<CountingClient>) -> AdSlots {
        AdSlots::new(Arc::new(RouteGate::default()), client, true)
    }

    #[test]
    fn test_isolated_page_renders_no_ads() {
        let client = Arc::new(CountingClient::default());
        let ads = slots(Arc::clone(&client));

        for path in ["/tools/image-resizer", "/ja/tools/video-to-gif"] {
            assert!(ads.render(path, TOP_SLOT).is_none());
            assert!(ads.head(path).is_none());
        }
        assert_eq!(client.slot_requests.load(Ordering::SeqCst), 0);
        assert_eq!(client.loader_requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plain_page_renders_container() {
        let client = Arc::new(CountingClient::default());
        let ads = slots(Arc::clone(&client));

        let slot = ads.render("/tools/word-counter", TOP_SLOT).unwrap();
        assert!(slot.starts_with(r#"<div class="ad-slot" data-slot="tool-top">"#));
        assert_eq!(client.slot_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_ads_render_nothing() {
        let client = Arc::new(CountingClient::default());
        let ads = AdSlots::new(Arc::new(RouteGate::default()), client, false);

        assert!(ads.render("/tools/word-counter", TOP_SLOT).is_none());
    }

    #[test]
    fn test_should_render_ads_follows_gate() {
        let gate = RouteGate::default();
        for rule in gate.rules() {
            let pattern = rule.pattern().replace("**", "x").replace('*', "en");
            assert_eq!(should_render_ads(&gate, &pattern, true), !gate.is_isolated_path(&pattern));
        }
        assert!(!should_render_ads(&gate, "/tools/image-converter", true));
        assert!(should_render_ads(&gate, "/tools/password-generator", true));
    }

    #[test]
    fn test_push_queue_markup() {
        let client = PushQueueAdClient::from_config(&AdsConfig {
            client_id: Some("ca-pub-123".into()),
            ..Default::default()
        });

        let slot = client.request_slot_render("tool-top");
        assert!(slot.contains(r#"data-ad-client="ca-pub-123""#));
        assert!(slot.contains("window.adsbygoogle = window.adsbygoogle || []"));
        assert!(client.loader_script().contains("?client=ca-pub-123"));
    }

    #[test]
    fn test_feature_availability() {
        assert!(FeatureAvailability::for_page(false, false).is_available());
        assert!(FeatureAvailability::for_page(true, true).is_available());
        assert!(matches!(
            FeatureAvailability::for_page(true, false),
            FeatureAvailability::Unsupported(_)
        ));
    }

    #[test]
    fn test_render_tool_page() {
        let ads = slots(Arc::new(CountingClient::default()));

        let isolated = render_tool_page(Tool::ImageResizer, "/tools/image-resizer", &ads);
        assert!(isolated.contains(r#"data-isolated="true""#));
        assert!(!isolated.contains("ad-slot"));
        assert!(!isolated.contains("<script"));

        let plain = render_tool_page(Tool::WordCounter, "/tools/word-counter", &ads);
        assert!(plain.contains(r#"data-isolated="false""#));
        assert_eq!(plain.matches("class=\"ad-slot\"").count(), 2);
    }

    #[test]
    fn test_render_tool_page_follows_ads_gate() {
        let config = toolkit_media_common::IsolationConfig {
            isolated_paths: vec!["/tools/word-counter".into()],
            ..Default::default()
        };
        let gate = RouteGate::from_config(&config).unwrap();
        let ads = AdSlots::new(Arc::new(gate), Arc::new(CountingClient::default()), true);

        let page = render_tool_page(Tool::WordCounter, "/tools/word-counter", &ads);
        assert!(page.contains(r#"data-isolated="true""#));
        assert!(!page.contains("ad-slot"));
    }

    #[test]
    fn test_escape() {
        let escaped = escape(r#"<a href="x">&'"#);
        assert!(escaped.starts_with("&lt;a href=&quot;x&quot;&gt;&amp;"));
        assert!(!escaped.contains(['<', '>', '"', '\'']));
    }

    #[test]
    fn test_slot_id_cannot_leave_attribute() {
        let client = PushQueueAdClient::from_config(&AdsConfig {
            client_id: Some(r#"ca-pub-1" onload="alert(1)"#.into()),
            ..Default::default()
        });

        let slot = client.request_slot_render(r#"top"><script>x</script>"#);
        assert!(!slot.contains(r#"" onload=""#));
        assert!(!slot.contains("<script>x"));
        assert_eq!(slot.matches("<script>").count(), 1);
    }
}
