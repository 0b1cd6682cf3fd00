//! Fixed client identity sent with every request.
//!
//! The host only serves the Markdown export and the mobile login to its own
//! app, so all traffic presents the mobile client's User-Agent together with
//! the login page as Referer.

/// User-Agent of the Yuque iOS app.
pub(crate) const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6_1 like Mac OS X) \
    AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/20G81 YuqueMobileApp/1.0.2 \
    (AppBuild/650 Device/Phone Locale/zh-cn Theme/light YuqueType/public)";

/// Accept header for workspace page fetches.
pub(crate) const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Accept-Language header for workspace page fetches.
pub(crate) const HTML_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Referer paired with the mobile User-Agent.
#[must_use]
pub(crate) fn default_referer(host: &str) -> String {
    format!("{}/login", host.trim_end_matches('/'))
}
