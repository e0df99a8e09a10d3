//! Browser impersonation presets.
//!
//! Each preset bundles the three layers of a browser's wire identity:
//! the JA3 ClientHello spec, the Akamai H2 spec, and the default request
//! headers. The presets are a convenience over the spec-driven
//! mechanism, not a curated fingerprint database.

use crate::error::Result;
use crate::fingerprint::h2spec::H2Spec;
use crate::fingerprint::ja3::ClientHelloSpec;

/// Chrome desktop JA3 (stable across recent releases, GREASE excluded).
pub const CHROME_JA3: &str = "771,4865-4866-4867-49195-49199-49196-49200-52393-52392-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513,29-23-24,0";

/// Chrome Akamai H2 fingerprint.
pub const CHROME_AKAMAI: &str = "1:65536,2:0,4:6291456,6:262144|15663105|0|m,a,s,p";

/// Firefox desktop JA3.
pub const FIREFOX_JA3: &str = "771,4865-4867-4866-49195-49199-52393-52392-49196-49200-49162-49161-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-34-51-43-13-45-28,29-23-24-25-256-257,0";

/// Firefox Akamai H2 fingerprint, priority tree included.
pub const FIREFOX_AKAMAI: &str =
    "1:65536,4:131072,5:16384|12517377|3:0:0:201,5:0:0:101,7:0:0:1,9:0:7:1,11:0:3:1,13:0:0:241|m,p,a,s";

/// Safari desktop JA3.
pub const SAFARI_JA3: &str = "771,4865-4866-4867-49196-49195-52393-49200-49199-52392-49162-49161-49172-49171-157-156-53-47-49160-49170-10,0-23-65281-10-11-16-5-13-18-51-45-43-27,29-23-24-25,0";

/// Safari Akamai H2 fingerprint.
pub const SAFARI_AKAMAI: &str = "4:4194304,3:100|10485760|0|m,s,p,a";

/// A named browser profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Chrome,
    Firefox,
    Safari,
}

impl Profile {
    /// The JA3 string for this profile.
    pub fn ja3(&self) -> &'static str {
        match self {
            Self::Chrome => CHROME_JA3,
            Self::Firefox => FIREFOX_JA3,
            Self::Safari => SAFARI_JA3,
        }
    }

    /// The Akamai H2 string for this profile.
    pub fn akamai(&self) -> &'static str {
        match self {
            Self::Chrome => CHROME_AKAMAI,
            Self::Firefox => FIREFOX_AKAMAI,
            Self::Safari => SAFARI_AKAMAI,
        }
    }

    /// Parsed ClientHello spec.
    pub fn client_hello(&self) -> Result<ClientHelloSpec> {
        ClientHelloSpec::from_ja3(self.ja3())
    }

    /// Parsed H2 spec.
    pub fn h2_spec(&self) -> Result<H2Spec> {
        H2Spec::from_akamai(self.akamai())
    }

    /// Default user agent for this profile.
    pub fn user_agent(&self) -> &'static str {
        match self {
            Self::Chrome => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36"
            }
            Self::Firefox => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0"
            }
            Self::Safari => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15"
            }
        }
    }

    /// Default navigation headers, in browser emission order.
    pub fn headers(&self) -> Vec<(String, String)> {
        let owned = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        match self {
            Self::Chrome => owned(&[
                ("sec-ch-ua", r#""Chromium";v="130", "Google Chrome";v="130", "Not?A_Brand";v="99""#),
                ("sec-ch-ua-mobile", "?0"),
                ("sec-ch-ua-platform", r#""Windows""#),
                ("upgrade-insecure-requests", "1"),
                ("user-agent", self.user_agent()),
                ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7"),
                ("sec-fetch-site", "none"),
                ("sec-fetch-mode", "navigate"),
                ("sec-fetch-user", "?1"),
                ("sec-fetch-dest", "document"),
                ("accept-encoding", "gzip, deflate, br, zstd"),
                ("accept-language", "en-US,en;q=0.9"),
            ]),
            Self::Firefox => owned(&[
                ("user-agent", self.user_agent()),
                ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/png,image/svg+xml,*/*;q=0.8"),
                ("accept-language", "en-US,en;q=0.5"),
                ("accept-encoding", "gzip, deflate, br, zstd"),
                ("upgrade-insecure-requests", "1"),
                ("sec-fetch-dest", "document"),
                ("sec-fetch-mode", "navigate"),
                ("sec-fetch-site", "none"),
                ("sec-fetch-user", "?1"),
            ]),
            Self::Safari => owned(&[
                ("user-agent", self.user_agent()),
                ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
                ("accept-language", "en-US,en;q=0.9"),
                ("accept-encoding", "gzip, deflate, br"),
            ]),
        }
    }

    /// Header emission order for regular headers, lowercase names.
    pub fn header_order(&self) -> Vec<String> {
        self.headers().into_iter().map(|(k, _)| k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::h2spec::PseudoHeader;

    #[test]
    fn presets_parse() {
        for profile in [Profile::Chrome, Profile::Firefox, Profile::Safari] {
            profile.client_hello().unwrap();
            profile.h2_spec().unwrap();
        }
    }

    #[test]
    fn chrome_pseudo_order() {
        let spec = Profile::Chrome.h2_spec().unwrap();
        assert_eq!(
            spec.pseudo_order,
            vec![
                PseudoHeader::Method,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
                PseudoHeader::Path
            ]
        );
        assert_eq!(spec.conn_flow, 15663105);
    }

    #[test]
    fn firefox_has_priority_tree() {
        let spec = Profile::Firefox.h2_spec().unwrap();
        assert_eq!(spec.priorities.len(), 6);
        assert_eq!(spec.priorities[0].stream_id, 3);
    }

    #[test]
    fn profiles_round_trip_their_ja3() {
        for profile in [Profile::Chrome, Profile::Firefox, Profile::Safari] {
            let spec = profile.client_hello().unwrap();
            assert_eq!(spec.ja3(), profile.ja3());
        }
    }
}
