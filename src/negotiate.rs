//! HTTP content negotiation.
//!
//! A [`Negotiator`] holds the values the server can produce (its *offers*, in
//! preference order) and ranks them against the elements of a client's
//! `Accept-*` header. It is used by [`Compress`](crate::middleware::Compress)
//! for `Accept-Encoding`, and works the same way for `Accept` when built with
//! [`Negotiator::media_types`].
//!
//! ```rust
//! use strata::Negotiator;
//!
//! let negotiator = Negotiator::encodings(["br", "gzip"]);
//!
//! assert_eq!(negotiator.match_all(&["gzip;q=1.0", "br;q=0.5"]), ["gzip", "br"]);
//! assert_eq!(negotiator.best(&["gzip"]), ("gzip", true));
//! assert_eq!(negotiator.best::<&str>(&[]), ("br", false));
//! ```

use std::cmp::Reverse;
use std::collections::HashMap;

/// Quality of an element without a `q` parameter (`q=1`).
pub const MAX_QUALITY: u16 = 1000;

/// Ranks server offers against client `Accept-*` preferences.
#[derive(Clone, Debug, Default)]
pub struct Negotiator {
    offers: Vec<String>,
    parameterized: bool,
    media_type: bool,
}

impl Negotiator {
    /// Negotiator for plain tokens such as content codings or languages.
    ///
    /// Elements carry `;q=` parameters and `*` matches any offer.
    pub fn encodings<I, S>(offers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            offers: offers.into_iter().map(Into::into).collect(),
            parameterized: true,
            media_type: false,
        }
    }

    /// Negotiator for `type/subtype` offers, where `type/*` and `*/*` are the
    /// wildcard forms.
    pub fn media_types<I, S>(offers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { media_type: true, ..Self::encodings(offers) }
    }

    /// Whether elements may carry `;`-separated parameters. When `false`,
    /// every element is taken verbatim with full quality.
    pub fn parameterized(mut self, parameterized: bool) -> Self {
        self.parameterized = parameterized;
        self
    }

    /// Offers in server preference order.
    pub fn offers(&self) -> &[String] {
        &self.offers
    }

    /// Every offer with the quality it resolved to, best first.
    ///
    /// `header_values` are raw field values; each is split on `,` first.
    /// Offers nothing in the header matched carry `None` and rank as if their
    /// quality were zero. Ties keep server preference order.
    pub fn rank<S: AsRef<str>>(&self, header_values: &[S]) -> Vec<(&str, Option<u16>)> {
        let accepted = self.parse(header_values);

        let mut ranked: Vec<_> = self
            .offers
            .iter()
            .map(|offer| (offer.as_str(), self.resolve(&accepted, offer)))
            .collect();

        // `sort_by_key` is stable, which is what keeps the preference order.
        ranked.sort_by_key(|&(_, quality)| Reverse(quality.unwrap_or(0)));
        ranked
    }

    /// All offers, best first.
    pub fn match_all<S: AsRef<str>>(&self, header_values: &[S]) -> Vec<&str> {
        self.rank(header_values).into_iter().map(|(offer, _)| offer).collect()
    }

    /// Only the offers the client accepts (quality above zero), best first.
    pub fn accepted<S: AsRef<str>>(&self, header_values: &[S]) -> Vec<&str> {
        self.rank(header_values)
            .into_iter()
            .filter(|&(_, quality)| quality.is_some_and(|q| q > 0))
            .map(|(offer, _)| offer)
            .collect()
    }

    /// The best offer and whether the client actually accepts it.
    ///
    /// With no header values (or none that accept any offer) this returns
    /// the first offer and `false`: no negotiation happened, and the caller
    /// should fall back to its default rather than treat the offer as chosen.
    /// With no offers configured it returns `("", false)`.
    pub fn best<S: AsRef<str>>(&self, header_values: &[S]) -> (&str, bool) {
        match self.rank(header_values).first() {
            Some(&(offer, quality)) => (offer, quality.is_some_and(|q| q > 0)),
            None => ("", false),
        }
    }

    fn parse<S: AsRef<str>>(&self, header_values: &[S]) -> HashMap<String, u16> {
        header_values
            .iter()
            .flat_map(|value| value.as_ref().split(','))
            .map(str::trim)
            .filter(|element| !element.is_empty())
            .map(|element| {
                if self.parameterized {
                    parse_parameterized(element)
                } else {
                    (element.to_ascii_lowercase(), MAX_QUALITY)
                }
            })
            .collect()
    }

    fn resolve(&self, accepted: &HashMap<String, u16>, offer: &str) -> Option<u16> {
        let offer = offer.to_ascii_lowercase();

        // An exact entry wins even at q=0, so an explicit rejection is never
        // overridden by a wildcard.
        if let Some(&quality) = accepted.get(&offer) {
            return Some(quality);
        }

        if !self.media_type {
            return accepted.get("*").copied();
        }

        if let Some((base, _)) = offer.split_once('/') {
            if let Some(&quality) = accepted.get(&format!("{base}/*")) {
                return Some(quality);
            }
        }

        accepted.get("*/*").copied()
    }
}

/// Splits `key;p=v;q=0.5` into the lowercased key and its quality.
fn parse_parameterized(element: &str) -> (String, u16) {
    let mut parts = element.split(';');
    let key = parts.next().unwrap_or_default().trim().to_ascii_lowercase();

    for param in parts {
        let (name, value) = param.trim().split_once('=').unwrap_or((param.trim(), ""));

        if name.trim().eq_ignore_ascii_case("q") {
            return (key, parse_quality(value.trim()));
        }
    }

    (key, MAX_QUALITY)
}

/// `q` scaled to 0..=1000 and truncated. Anything unparseable counts as an
/// explicit rejection.
fn parse_quality(value: &str) -> u16 {
    match value.parse::<f64>() {
        Ok(q) if q.is_finite() => (q * f64::from(MAX_QUALITY)).trunc().clamp(0.0, 1000.0) as u16,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: &[&str] = &[];

    #[test]
    fn ranks_by_quality() {
        let negotiator = Negotiator::encodings(["br", "gzip"]);

        assert_eq!(negotiator.match_all(&["gzip;q=1.0", "br;q=0.5"]), ["gzip", "br"]);
        assert_eq!(negotiator.best(&["gzip;q=1.0", "br;q=0.5"]), ("gzip", true));
    }

    #[test]
    fn empty_header_keeps_preference_order() {
        let negotiator = Negotiator::encodings(["br", "gzip"]);

        assert_eq!(negotiator.match_all(NONE), ["br", "gzip"]);
        assert_eq!(negotiator.best(NONE), ("br", false));
        assert!(negotiator.accepted(NONE).is_empty());
    }

    #[test]
    fn no_offers() {
        let negotiator = Negotiator::encodings(Vec::<String>::new());

        assert!(negotiator.match_all(&["gzip"]).is_empty());
        assert_eq!(negotiator.best(&["gzip"]), ("", false));
    }

    #[test]
    fn media_type_wildcards() {
        let negotiator = Negotiator::media_types(["text/html", "image/png"]);

        assert_eq!(
            negotiator.match_all(&["text/*;q=0.8", "*/*;q=0.1"]),
            ["text/html", "image/png"],
        );
        assert_eq!(negotiator.accepted(&["text/*;q=0.8", "*/*;q=0.1"]).len(), 2);
    }

    #[test]
    fn exact_match_beats_preference_order() {
        let negotiator = Negotiator::media_types(["text/html", "image/png", "application/json"]);

        assert_eq!(
            negotiator.match_all(&["application/json", "text/html;q=0.8", "image/*;q=0.5"]),
            ["application/json", "text/html", "image/png"],
        );
    }

    #[test]
    fn star_matches_any_token() {
        let negotiator = Negotiator::encodings(["br", "gzip"]);

        assert_eq!(negotiator.best(&["*;q=0.3", "gzip"]), ("gzip", true));
        assert_eq!(negotiator.best(&["*"]), ("br", true));
    }

    #[test]
    fn explicit_zero_beats_wildcard() {
        let negotiator = Negotiator::encodings(["br", "gzip"]);

        assert_eq!(negotiator.accepted(&["br;q=0", "*"]), ["gzip"]);
        assert_eq!(negotiator.best(&["br;q=0", "gzip;q=0", "*"]), ("br", false));
    }

    #[test]
    fn malformed_quality_is_rejection() {
        let negotiator = Negotiator::encodings(["br", "gzip"]);

        assert_eq!(negotiator.rank(&["br;q=high", "gzip;q=0.25"]), [("gzip", Some(250)), ("br", Some(0))]);
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(parse_quality("2"), 1000);
        assert_eq!(parse_quality("-1"), 0);
        assert_eq!(parse_quality("0.001"), 1);
        assert_eq!(parse_quality("0.5"), 500);
        assert_eq!(parse_quality("0.9999"), 999);
        assert_eq!(parse_quality("0.0006"), 0);
        assert_eq!(parse_quality("NaN"), 0);
    }

    #[test]
    fn sub_thousandth_quality_rejects() {
        let negotiator = Negotiator::encodings(["br", "gzip"]);

        assert_eq!(negotiator.best(&["gzip;q=0.0006", "br;q=0"]), ("br", false));
        assert!(negotiator.accepted(&["gzip;q=0.0006"]).is_empty());
    }

    #[test]
    fn unmatched_header_is_not_a_match() {
        let negotiator = Negotiator::encodings(["br", "gzip"]);

        assert_eq!(negotiator.best(&["identity"]), ("br", false));
    }

    #[test]
    fn comma_separated_lines_and_case() {
        let negotiator = Negotiator::encodings(["br", "gzip"]);

        assert_eq!(negotiator.match_all(&["GZIP, br;Q=0.4"]), ["gzip", "br"]);
    }

    #[test]
    fn unparameterized_elements_are_verbatim() {
        let negotiator = Negotiator::encodings(["a;b", "c"]).parameterized(false);

        assert_eq!(negotiator.best(&["a;b"]), ("a;b", true));
    }
}
