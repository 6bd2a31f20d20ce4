use std::{fmt, str::FromStr};

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, PartialEq, Clone)]
pub enum HtmlTag {
    ATag(String),
    MailtoTag(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialNetwork {
    Facebook,
    Instagram,
    Twitter,
    Linkedin,
}

impl SocialNetwork {
    pub const ALL: [SocialNetwork; 4] = [
        SocialNetwork::Facebook,
        SocialNetwork::Instagram,
        SocialNetwork::Twitter,
        SocialNetwork::Linkedin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocialNetwork::Facebook => "facebook",
            SocialNetwork::Instagram => "instagram",
            SocialNetwork::Twitter => "twitter",
            SocialNetwork::Linkedin => "linkedin",
        }
    }

    fn from_host(host: &str) -> Option<Self> {
        let host = host
            .trim_start_matches("www.")
            .trim_start_matches("m.")
            .trim_start_matches("mobile.");
        match host {
            "facebook.com" | "fb.com" => Some(SocialNetwork::Facebook),
            "instagram.com" => Some(SocialNetwork::Instagram),
            "twitter.com" | "x.com" => Some(SocialNetwork::Twitter),
            "linkedin.com" => Some(SocialNetwork::Linkedin),
            _ => None,
        }
    }
}

impl fmt::Display for SocialNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SocialNetwork::ALL
            .into_iter()
            .find(|network| network.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("{} is not a known social network", s))
    }
}

/// Share widgets and tracking endpoints rather than a business profile.
const NON_PROFILE_PATHS: [&str; 9] = [
    "/sharer", "/share", "/intent", "/plugins", "/dialog", "/tr", "/home", "/login", "/hashtag",
];

/// Every `<a href>` on the page, with `mailto:` links split out.
pub fn collect_anchor_tags(html: &str) -> Vec<HtmlTag> {
    let document = Html::parse_document(html);
    let Ok(a_tag_selector) = Selector::parse("a[href]") else {
        return vec![];
    };

    document
        .select(&a_tag_selector)
        .filter_map(|tag| tag.value().attr("href"))
        .map(|href| href.trim())
        .filter(|href| !href.is_empty())
        .map(|href| match href.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => {
                let address = href[7..].split('?').next().unwrap_or_default();
                HtmlTag::MailtoTag(address.to_string())
            }
            _ => HtmlTag::ATag(href.to_string()),
        })
        .collect()
}

/// Canonical profile URL when the anchor points at a known social network.
pub fn extract_social_link(tag: &HtmlTag, base: &Url) -> Option<(SocialNetwork, String)> {
    let HtmlTag::ATag(href) = tag else {
        return None;
    };

    let url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_lowercase();
    let network = SocialNetwork::from_host(&host)?;

    let path = url.path().trim_end_matches('/');
    if path.is_empty()
        || NON_PROFILE_PATHS
            .iter()
            .any(|p| path == *p || path.starts_with(&format!("{}/", p)) || path.starts_with(&format!("{}.", p)))
    {
        return None;
    }

    let host = host.trim_start_matches("m.").trim_start_matches("mobile.");
    let host = match host.starts_with("www.") || host == "x.com" {
        true => host.to_string(),
        false => format!("www.{}", host),
    };

    Some((network, format!("https://{}{}", host, path)))
}

/// Registrable host of a website link, without `www.`.
pub fn extract_domain(tag: &HtmlTag) -> Option<String> {
    let HtmlTag::ATag(content) = tag else {
        return None;
    };

    let parsed_url = Url::parse(content).ok()?;
    match parsed_url.host_str() {
        Some("") | None => None,
        Some(any_host) if any_host.contains("google.") => None,
        Some(any_host) => Some(any_host.trim_start_matches("www.").to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::{collect_anchor_tags, extract_domain, extract_social_link, HtmlTag, SocialNetwork};

    fn base() -> Url {
        Url::parse("https://www.pequodspizza.com/").unwrap()
    }

    #[test]
    fn anchors_and_mailto_links_are_collected() {
        let html = r#"
            <a href="/menu">Menu</a>
            <a href="MAILTO:hello@pequods.com?subject=Hi">Mail</a>
            <a>no href</a>
            <a href="  ">blank</a>
        "#;

        let tags = collect_anchor_tags(html);

        assert_eq!(
            tags,
            vec![
                HtmlTag::ATag("/menu".to_string()),
                HtmlTag::MailtoTag("hello@pequods.com".to_string()),
            ]
        );
    }

    #[test]
    fn social_profiles_are_recognised_and_canonicalised() {
        let cases = [
            (
                "https://facebook.com/pequodspizza/?ref=page",
                SocialNetwork::Facebook,
                "https://www.facebook.com/pequodspizza",
            ),
            (
                "https://m.facebook.com/pequodspizza",
                SocialNetwork::Facebook,
                "https://www.facebook.com/pequodspizza",
            ),
            (
                "http://instagram.com/pequods_chicago#top",
                SocialNetwork::Instagram,
                "https://www.instagram.com/pequods_chicago",
            ),
            (
                "https://x.com/pequods",
                SocialNetwork::Twitter,
                "https://x.com/pequods",
            ),
            (
                "https://www.linkedin.com/company/pequods/",
                SocialNetwork::Linkedin,
                "https://www.linkedin.com/company/pequods",
            ),
        ];

        for (href, network, expected) in cases {
            let tag = HtmlTag::ATag(href.to_string());
            assert_eq!(
                extract_social_link(&tag, &base()),
                Some((network, expected.to_string())),
                "{}",
                href
            );
        }
    }

    #[test]
    fn share_widgets_and_other_hosts_are_ignored() {
        let hrefs = [
            "https://www.facebook.com/sharer/sharer.php?u=https://pequods.com",
            "https://twitter.com/intent/tweet?text=pizza",
            "https://www.facebook.com/",
            "https://www.yelp.com/biz/pequods",
            "/about",
            "javascript:void(0)",
        ];

        for href in hrefs {
            let tag = HtmlTag::ATag(href.to_string());
            assert_eq!(extract_social_link(&tag, &base()), None, "{}", href);
        }
    }

    #[test]
    fn mailto_tags_are_never_social_links() {
        let tag = HtmlTag::MailtoTag("hello@facebook.com".to_string());

        assert_eq!(extract_social_link(&tag, &base()), None);
    }

    #[test]
    fn extract_domain_strips_www() {
        let tag = HtmlTag::ATag("https://www.PequodsPizza.com/menu".to_string());

        assert_eq!(extract_domain(&tag), Some("pequodspizza.com".to_string()));
        assert_eq!(
            extract_domain(&HtmlTag::ATag("https://www.google.com/maps".to_string())),
            None
        );
    }

    #[test]
    fn social_network_round_trips_through_str() {
        for network in SocialNetwork::ALL {
            assert_eq!(network.as_str().parse::<SocialNetwork>(), Ok(network));
        }
    }
}
