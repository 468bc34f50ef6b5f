//! Best-effort recovery of the address shown by a browser.

use super::host::ScreenNode;
use url::Url;

/// Address-bar view ids of the supported browsers, probed in order.
pub const ADDRESS_BAR_IDS: &[&str] = &[
    "com.android.chrome:id/url_bar",
    "org.mozilla.firefox:id/mozac_browser_toolbar_url_view",
    "org.mozilla.fenix:id/mozac_browser_toolbar_url_view",
    "com.sec.android.app.sbrowser:id/location_bar_edit_text",
    "com.microsoft.emmx:id/url_bar",
    "com.opera.browser:id/url_field",
    "com.opera.mini.native:id/url_view",
];

const URL_TERMINATORS: [char; 7] = [' ', '\n', '\r', '"', '\'', ')', '>'];

fn has_scheme(text: &str) -> bool {
    text.starts_with("http://") || text.starts_with("https://")
}

fn scheme_text(node: &ScreenNode) -> Option<String> {
    let text = node.text()?.trim();
    has_scheme(text).then(|| text.to_string())
}

/// Finds the displayed URL: known address bars first, then any node whose
/// text is a URL, then a scan of all gathered text.
pub fn extract_url(root: &ScreenNode) -> Option<String> {
    for id in ADDRESS_BAR_IDS {
        let hit = root
            .iter()
            .filter(|node| node.view_id.as_deref() == Some(*id))
            .find_map(scheme_text);
        if hit.is_some() {
            return hit;
        }
    }

    if let Some(url) = root.iter().find_map(scheme_text) {
        return Some(url);
    }

    url_from_text(&root.gather_text()).map(str::to_string)
}

/// First `https://` run in `text` (else the first `http://` run).
pub fn url_from_text(text: &str) -> Option<&str> {
    let start = text.find("https://").or_else(|| text.find("http://"))?;
    let rest = &text[start..];
    let scheme_len = if rest.starts_with("https://") { 8 } else { 7 };
    let end = rest[scheme_len..]
        .find(&URL_TERMINATORS[..])
        .map_or(rest.len(), |idx| idx + scheme_len);
    Some(&rest[..end])
}

/// Lower-cased host of an http(s) URL, without port.
pub fn extract_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_lowercase())
}
