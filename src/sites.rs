//! Closed site registry: one `SiteSpec` per supported domain, resolved
//! statically. Adding support for a site means adding an entry here; there
//! is no runtime discovery.

use anyhow::{Context, Result};
use regex::Regex;
use scraper::Selector;

use crate::model::Direction;

pub struct SiteSpec {
    pub name: &'static str,
    pub domains: &'static [&'static str],
    /// Selector for the node whose direct children form the volume stream.
    pub content_root: &'static str,
    /// Marker for the site's promotional footer; the marker and everything
    /// after it are stripped.
    pub promo_marker: &'static str,
    /// Elements stripped unconditionally.
    pub junk: &'static str,
    /// Pattern that reclassifies a paragraph as a part heading.
    pub part_marker: &'static str,
    pub language: &'static str,
    pub direction: Direction,
}

pub static ANIME_CENTER_BR: SiteSpec = SiteSpec {
    name: "animecenterbr",
    domains: &["animecenterbr"],
    content_root: ".post-text-content",
    promo_marker: ".awpa-title",
    junk: "script, noscript, ins",
    part_marker: r"(?i)^parte\W+\d+$",
    language: "pt-BR",
    direction: Direction::Rtl,
};

pub static SITES: &[&SiteSpec] = &[&ANIME_CENTER_BR];

pub fn resolve(domain: &str) -> Option<&'static SiteSpec> {
    SITES.iter().copied().find(|s| s.domains.contains(&domain))
}

/// Site for a full URL, keyed by the registrable label of its host
/// ("www.animecenterbr.com" -> "animecenterbr").
pub fn for_url(url: &str) -> Result<&'static SiteSpec> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("invalid URL {url}"))?;
    let host = parsed.host_str().context("URL without host")?;
    let domain = domain_label(host);
    resolve(domain).with_context(|| format!("no site registered for domain {domain}"))
}

fn domain_label(host: &str) -> &str {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        labels[labels.len() - 2]
    } else {
        host
    }
}

impl SiteSpec {
    // Selector strings are compile-time constants validated by tests, so a
    // parse failure here is a programming error.
    pub fn content_selector(&self) -> Selector {
        Selector::parse(self.content_root).expect("site content selector")
    }

    pub fn promo_selector(&self) -> Selector {
        Selector::parse(self.promo_marker).expect("site promo selector")
    }

    pub fn junk_selector(&self) -> Selector {
        Selector::parse(self.junk).expect("site junk selector")
    }

    pub fn part_marker_re(&self) -> Regex {
        Regex::new(self.part_marker).expect("site part marker")
    }
}
