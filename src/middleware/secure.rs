//! Security response headers.
//!
//! [`Secure`] adds a conservative set of browser security headers to every
//! response, in a before-commit hook so it sees what the handler already set.
//! A header the handler set itself is never overwritten.
//!
//! | Header | Default |
//! |---|---|
//! | `Content-Security-Policy` | `default-src 'self';script-src 'self';…;upgrade-insecure-requests` |
//! | `Cross-Origin-Embedder-Policy` | not sent |
//! | `Cross-Origin-Opener-Policy` | `same-origin` |
//! | `Cross-Origin-Resource-Policy` | `same-origin` |
//! | `Origin-Agent-Cluster` | `?1` |
//! | `Referrer-Policy` | `no-referrer` |
//! | `Strict-Transport-Security` | `max-age=31536000; includeSubDomains` |
//! | `X-Content-Type-Options` | `nosniff` |
//! | `X-DNS-Prefetch-Control` | `off` |
//! | `X-Download-Options` | `noopen` |
//! | `X-Frame-Options` | `SAMEORIGIN` |
//! | `X-Permitted-Cross-Domain-Policies` | `none` |
//! | `X-XSS-Protection` | `0` |
//!
//! `X-Powered-By` is removed unless [`SecurityPolicy::x_powered_by`] is set.

use std::sync::Arc;

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

use crate::context::Context;
use crate::error::Error;
use crate::middleware::{Middleware, Next};

/// One header or directive of a [`SecurityPolicy`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Setting {
    /// The built-in value, or nothing for settings without one.
    #[default]
    Default,
    /// Never sent.
    Off,
    /// Sent with this value.
    Value(String),
}

impl Setting {
    fn resolve<'a>(&'a self, default: Option<&'a str>) -> Option<&'a str> {
        match self {
            Self::Default => default,
            Self::Off => None,
            Self::Value(value) => Some(value.as_str()),
        }
    }
}

impl From<&str> for Setting {
    fn from(value: &str) -> Self {
        Self::Value(value.to_owned())
    }
}

/// What [`Secure`] sends.
///
/// Directives and headers without a built-in value (`style-src-attr`,
/// `connect-src`, `Cross-Origin-Embedder-Policy`, …) are only sent when
/// given a [`Setting::Value`].
#[derive(Clone, Debug)]
pub struct SecurityPolicy {
    /// Send `Content-Security-Policy` at all.
    pub csp: bool,
    pub csp_default_src: Setting,
    pub csp_script_src: Setting,
    pub csp_script_src_attr: Setting,
    pub csp_style_src: Setting,
    pub csp_style_src_attr: Setting,
    pub csp_style_src_elem: Setting,
    pub csp_img_src: Setting,
    pub csp_font_src: Setting,
    pub csp_object_src: Setting,
    pub csp_child_src: Setting,
    pub csp_connect_src: Setting,
    pub csp_manifest_src: Setting,
    pub csp_media_src: Setting,
    pub csp_worker_src: Setting,
    pub csp_base_uri: Setting,
    pub csp_form_action: Setting,
    pub csp_frame_ancestors: Setting,
    pub csp_upgrade_insecure_requests: bool,

    pub cross_origin_embedder_policy: Setting,
    pub cross_origin_opener_policy: Setting,
    pub cross_origin_resource_policy: Setting,
    pub origin_agent_cluster: Setting,
    pub referrer_policy: Setting,
    pub strict_transport_security: Setting,
    pub x_content_type_options: Setting,
    pub x_dns_prefetch_control: Setting,
    pub x_download_options: Setting,
    pub x_frame_options: Setting,
    pub x_permitted_cross_domain_policies: Setting,
    pub x_xss_protection: Setting,

    /// Keep an `X-Powered-By` header the handler set.
    pub x_powered_by: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            csp: true,
            csp_default_src: Setting::Default,
            csp_script_src: Setting::Default,
            csp_script_src_attr: Setting::Default,
            csp_style_src: Setting::Default,
            csp_style_src_attr: Setting::Default,
            csp_style_src_elem: Setting::Default,
            csp_img_src: Setting::Default,
            csp_font_src: Setting::Default,
            csp_object_src: Setting::Default,
            csp_child_src: Setting::Default,
            csp_connect_src: Setting::Default,
            csp_manifest_src: Setting::Default,
            csp_media_src: Setting::Default,
            csp_worker_src: Setting::Default,
            csp_base_uri: Setting::Default,
            csp_form_action: Setting::Default,
            csp_frame_ancestors: Setting::Default,
            csp_upgrade_insecure_requests: true,
            cross_origin_embedder_policy: Setting::Default,
            cross_origin_opener_policy: Setting::Default,
            cross_origin_resource_policy: Setting::Default,
            origin_agent_cluster: Setting::Default,
            referrer_policy: Setting::Default,
            strict_transport_security: Setting::Default,
            x_content_type_options: Setting::Default,
            x_dns_prefetch_control: Setting::Default,
            x_download_options: Setting::Default,
            x_frame_options: Setting::Default,
            x_permitted_cross_domain_policies: Setting::Default,
            x_xss_protection: Setting::Default,
            x_powered_by: false,
        }
    }
}

impl SecurityPolicy {
    fn csp(&self) -> Option<String> {
        if !self.csp {
            return None;
        }

        let directives: [(&str, &Setting, Option<&str>); 17] = [
            ("default-src", &self.csp_default_src, Some("'self'")),
            ("script-src", &self.csp_script_src, Some("'self'")),
            ("script-src-attr", &self.csp_script_src_attr, Some("'none'")),
            ("style-src", &self.csp_style_src, Some("'self' https: 'unsafe-inline'")),
            ("style-src-attr", &self.csp_style_src_attr, None),
            ("style-src-elem", &self.csp_style_src_elem, None),
            ("img-src", &self.csp_img_src, Some("'self' data:")),
            ("font-src", &self.csp_font_src, Some("'self' https: data:")),
            ("object-src", &self.csp_object_src, Some("'none'")),
            ("child-src", &self.csp_child_src, None),
            ("connect-src", &self.csp_connect_src, None),
            ("manifest-src", &self.csp_manifest_src, None),
            ("media-src", &self.csp_media_src, None),
            ("worker-src", &self.csp_worker_src, None),
            ("base-uri", &self.csp_base_uri, Some("'self'")),
            ("form-action", &self.csp_form_action, Some("'self'")),
            ("frame-ancestors", &self.csp_frame_ancestors, Some("'self'")),
        ];

        let mut policy: Vec<String> = directives
            .into_iter()
            .filter_map(|(name, setting, default)| {
                setting.resolve(default).map(|value| format!("{name} {value}"))
            })
            .collect();

        if self.csp_upgrade_insecure_requests {
            policy.push("upgrade-insecure-requests".to_owned());
        }

        (!policy.is_empty()).then(|| policy.join(";"))
    }

    /// Every header this policy sends, resolved and validated.
    fn headers(&self) -> Result<Vec<(HeaderName, HeaderValue)>, Error> {
        let csp = self.csp();
        let plain: [(&'static str, Option<&str>); 13] = [
            ("content-security-policy", csp.as_deref()),
            ("cross-origin-embedder-policy", self.cross_origin_embedder_policy.resolve(None)),
            ("cross-origin-opener-policy", self.cross_origin_opener_policy.resolve(Some("same-origin"))),
            ("cross-origin-resource-policy", self.cross_origin_resource_policy.resolve(Some("same-origin"))),
            ("origin-agent-cluster", self.origin_agent_cluster.resolve(Some("?1"))),
            ("referrer-policy", self.referrer_policy.resolve(Some("no-referrer"))),
            (
                "strict-transport-security",
                self.strict_transport_security.resolve(Some("max-age=31536000; includeSubDomains")),
            ),
            ("x-content-type-options", self.x_content_type_options.resolve(Some("nosniff"))),
            ("x-dns-prefetch-control", self.x_dns_prefetch_control.resolve(Some("off"))),
            ("x-download-options", self.x_download_options.resolve(Some("noopen"))),
            ("x-frame-options", self.x_frame_options.resolve(Some("SAMEORIGIN"))),
            (
                "x-permitted-cross-domain-policies",
                self.x_permitted_cross_domain_policies.resolve(Some("none")),
            ),
            ("x-xss-protection", self.x_xss_protection.resolve(Some("0"))),
        ];

        plain
            .into_iter()
            .filter_map(|(name, value)| value.map(|value| (name, value)))
            .map(|(name, value)| {
                let header = HeaderValue::from_str(value).map_err(|_| Error::InvalidHeaderValue {
                    name,
                    value: value.to_owned(),
                })?;
                Ok((HeaderName::from_static(name), header))
            })
            .collect()
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// Adds the headers of a [`SecurityPolicy`] to every response.
///
/// Header values are validated once, when the middleware is built.
#[derive(Clone)]
pub struct Secure {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
    x_powered_by: bool,
}

impl Secure {
    pub fn new(policy: SecurityPolicy) -> Result<Self, Error> {
        Ok(Self {
            headers: Arc::new(policy.headers()?),
            x_powered_by: policy.x_powered_by,
        })
    }

    fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in self.headers.iter() {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }

        if !self.x_powered_by {
            headers.remove("x-powered-by");
        }
    }
}

impl Default for Secure {
    fn default() -> Self {
        let policy = SecurityPolicy::default();
        Self {
            // The built-in values are all valid header values.
            headers: Arc::new(policy.headers().unwrap_or_default()),
            x_powered_by: policy.x_powered_by,
        }
    }
}

impl Middleware for Secure {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) {
        let this = self.clone();
        ctx.response.register_before_commit(move |_, res| this.apply(res.headers_mut()));

        next.run(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(policy: SecurityPolicy, headers: &mut HeaderMap) {
        Secure::new(policy).unwrap().apply(headers);
    }

    #[test]
    fn default_policy() {
        let mut headers = HeaderMap::new();
        Secure::default().apply(&mut headers);

        assert_eq!(
            headers.get("content-security-policy").unwrap(),
            "default-src 'self';script-src 'self';script-src-attr 'none';\
             style-src 'self' https: 'unsafe-inline';img-src 'self' data:;\
             font-src 'self' https: data:;object-src 'none';base-uri 'self';\
             form-action 'self';frame-ancestors 'self';upgrade-insecure-requests"
        );
        assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
        assert_eq!(
            headers.get("strict-transport-security").unwrap(),
            "max-age=31536000; includeSubDomains"
        );
        assert_eq!(headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
        assert_eq!(headers.get("x-xss-protection").unwrap(), "0");
        assert!(!headers.contains_key("cross-origin-embedder-policy"));
        assert_eq!(headers.len(), 12);
    }

    #[test]
    fn handler_headers_win() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        headers.insert("x-powered-by", HeaderValue::from_static("strata"));

        apply(SecurityPolicy::default(), &mut headers);

        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert!(!headers.contains_key("x-powered-by"));
    }

    #[test]
    fn settings_override_and_disable() {
        let policy = SecurityPolicy {
            csp_default_src: Setting::Off,
            csp_script_src: "'self' cdn.example.com".into(),
            csp_connect_src: "'self' api.example.com".into(),
            csp_upgrade_insecure_requests: false,
            csp_style_src: Setting::Off,
            csp_script_src_attr: Setting::Off,
            csp_img_src: Setting::Off,
            csp_font_src: Setting::Off,
            csp_object_src: Setting::Off,
            csp_base_uri: Setting::Off,
            csp_form_action: Setting::Off,
            csp_frame_ancestors: Setting::Off,
            cross_origin_embedder_policy: "require-corp".into(),
            strict_transport_security: Setting::Off,
            x_powered_by: true,
            ..SecurityPolicy::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-powered-by", HeaderValue::from_static("strata"));

        apply(policy, &mut headers);

        assert_eq!(
            headers.get("content-security-policy").unwrap(),
            "script-src 'self' cdn.example.com;connect-src 'self' api.example.com"
        );
        assert_eq!(headers.get("cross-origin-embedder-policy").unwrap(), "require-corp");
        assert!(!headers.contains_key("strict-transport-security"));
        assert_eq!(headers.get("x-powered-by").unwrap(), "strata");
    }

    #[test]
    fn csp_can_be_dropped_entirely() {
        let mut headers = HeaderMap::new();
        apply(SecurityPolicy { csp: false, ..SecurityPolicy::default() }, &mut headers);

        assert!(!headers.contains_key("content-security-policy"));
        assert!(headers.contains_key("x-content-type-options"));
    }

    #[test]
    fn invalid_value_is_rejected_up_front() {
        let policy = SecurityPolicy { referrer_policy: "no\nreferrer".into(), ..SecurityPolicy::default() };

        match Secure::new(policy) {
            Err(Error::InvalidHeaderValue { name, .. }) => assert_eq!(name, "referrer-policy"),
            other => panic!("expected InvalidHeaderValue, got {:?}", other.err()),
        }
    }
}
