//! Navigator-level fingerprints: client hints and user-agent strings.
//!
//! These cover the request-header half of impersonation: `sec-ch-ua*`
//! values derived from a client-hint brand list, plus the matching
//! `user-agent`. Randomized generation takes an explicit RNG.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// One client-hint brand entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brand {
    pub brand: String,
    pub version: String,
}

/// Client-hint block of a navigator fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientHint {
    pub architecture: String,
    pub bitness: String,
    pub brands: Vec<Brand>,
    pub full_version_list: Vec<Brand>,
    pub mobile: bool,
    pub platform: String,
    pub platform_version: String,
    pub ua_full_version: String,
}

/// A navigator-level fingerprint: client hints plus navigator fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Navigator {
    #[serde(rename = "clientHint")]
    pub client_hint: ClientHint,
    #[serde(rename = "navigator.userAgent")]
    pub user_agent: String,
    #[serde(rename = "navigator.platform")]
    pub platform: String,
    #[serde(rename = "navigator.vendor")]
    pub vendor: String,
}

/// Browser family for randomized generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrowserFamily {
    #[default]
    Chrome,
    Edge,
    Opera,
}

impl Navigator {
    /// Parse a fingerprint from its JSON form.
    pub fn from_json(s: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// `sec-ch-ua` header value from the brand list.
    pub fn sec_ch_ua(&self) -> String {
        self.client_hint
            .brands
            .iter()
            .map(|b| format!(r#""{}";v="{}""#, b.brand, b.version))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `sec-ch-ua-mobile` header value.
    pub fn sec_ch_ua_mobile(&self) -> &'static str {
        if self.client_hint.mobile {
            "?1"
        } else {
            "?0"
        }
    }

    /// `sec-ch-ua-platform` header value.
    pub fn sec_ch_ua_platform(&self) -> String {
        format!(r#""{}""#, self.client_hint.platform)
    }

    /// Generate a randomized Windows desktop fingerprint for the given
    /// browser family and major version, using the caller's RNG.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, family: BrowserFamily, major: u32) -> Self {
        let build = rng.gen_range(100..1000);
        let patch = rng.gen_range(1..99);
        let full = format!("{major}.0.6{build}.{patch}");

        let mut nav = Navigator {
            client_hint: ClientHint {
                architecture: "x86".into(),
                bitness: "64".into(),
                brands: vec![
                    Brand {
                        brand: "Chromium".into(),
                        version: major.to_string(),
                    },
                    Brand {
                        brand: "Not=A?Brand".into(),
                        version: "24".into(),
                    },
                ],
                full_version_list: vec![
                    Brand {
                        brand: "Chromium".into(),
                        version: full.clone(),
                    },
                    Brand {
                        brand: "Not=A?Brand".into(),
                        version: "24.0.0.0".into(),
                    },
                ],
                mobile: false,
                platform: "Windows".into(),
                platform_version: "10.0.0".into(),
                ua_full_version: full.clone(),
            },
            user_agent: format!(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/{major}.0.0.0 Safari/537.36"
            ),
            platform: "Win32".into(),
            vendor: "Google Inc.".into(),
        };

        match family {
            BrowserFamily::Chrome => {}
            BrowserFamily::Edge => {
                nav.client_hint.brands = vec![
                    Brand {
                        brand: "Not A(Brand".into(),
                        version: "8".into(),
                    },
                    Brand {
                        brand: "Chromium".into(),
                        version: major.to_string(),
                    },
                    Brand {
                        brand: "Microsoft Edge".into(),
                        version: major.to_string(),
                    },
                ];
                nav.client_hint.full_version_list = vec![
                    Brand {
                        brand: "Not A(Brand".into(),
                        version: "8.0.0.0".into(),
                    },
                    Brand {
                        brand: "Chromium".into(),
                        version: full.clone(),
                    },
                    Brand {
                        brand: "Microsoft Edge".into(),
                        version: full.clone(),
                    },
                ];
                nav.user_agent = format!(
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/{major}.0.0.0 Safari/537.36 Edg/{major}.0.0.0"
                );
            }
            BrowserFamily::Opera => {
                nav.client_hint.brands = vec![
                    Brand {
                        brand: "Chromium".into(),
                        version: major.to_string(),
                    },
                    Brand {
                        brand: "Opera".into(),
                        version: major.to_string(),
                    },
                    Brand {
                        brand: "Not?A_Brand".into(),
                        version: "99".into(),
                    },
                ];
                nav.client_hint.full_version_list = vec![
                    Brand {
                        brand: "Chromium".into(),
                        version: full.clone(),
                    },
                    Brand {
                        brand: "Opera".into(),
                        version: full,
                    },
                    Brand {
                        brand: "Not?A_Brand".into(),
                        version: "99.0.0.0".into(),
                    },
                ];
                nav.user_agent = format!(
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/{major}.0.0.0 Safari/537.36 OPR/{major}.0.0.0"
                );
            }
        }
        nav
    }

    /// Request headers derived from this fingerprint, in browser order.
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("sec-ch-ua".into(), self.sec_ch_ua()),
            ("sec-ch-ua-mobile".into(), self.sec_ch_ua_mobile().into()),
            ("sec-ch-ua-platform".into(), self.sec_ch_ua_platform()),
            ("upgrade-insecure-requests".into(), "1".into()),
            ("user-agent".into(), self.user_agent.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn sec_ch_ua_formats_brand_list() {
        let nav = Navigator {
            client_hint: ClientHint {
                brands: vec![
                    Brand {
                        brand: "Chromium".into(),
                        version: "130".into(),
                    },
                    Brand {
                        brand: "Not=A?Brand".into(),
                        version: "24".into(),
                    },
                ],
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            nav.sec_ch_ua(),
            r#""Chromium";v="130", "Not=A?Brand";v="24""#
        );
    }

    #[test]
    fn mobile_flag_values() {
        let mut nav = Navigator::default();
        assert_eq!(nav.sec_ch_ua_mobile(), "?0");
        nav.client_hint.mobile = true;
        assert_eq!(nav.sec_ch_ua_mobile(), "?1");
    }

    #[test]
    fn generation_is_driven_by_the_caller_rng() {
        let mut rng = StepRng::new(42, 7);
        let a = Navigator::generate(&mut rng, BrowserFamily::Chrome, 130);
        let mut rng = StepRng::new(42, 7);
        let b = Navigator::generate(&mut rng, BrowserFamily::Chrome, 130);
        assert_eq!(a.client_hint.ua_full_version, b.client_hint.ua_full_version);
        assert!(a.user_agent.contains("Chrome/130.0.0.0"));
    }

    #[test]
    fn edge_family_brands() {
        let mut rng = StepRng::new(0, 1);
        let nav = Navigator::generate(&mut rng, BrowserFamily::Edge, 130);
        assert!(nav.user_agent.contains("Edg/130"));
        assert_eq!(nav.client_hint.brands.len(), 3);
    }

    #[test]
    fn json_round_trip() {
        let mut rng = StepRng::new(0, 1);
        let nav = Navigator::generate(&mut rng, BrowserFamily::Chrome, 130);
        let json = serde_json::to_string(&nav).unwrap();
        let parsed = Navigator::from_json(&json).unwrap();
        assert_eq!(parsed.user_agent, nav.user_agent);
        assert_eq!(parsed.client_hint.platform, "Windows");
    }
}
