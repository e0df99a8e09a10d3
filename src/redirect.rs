//! Redirect policies: ordered predicates over the next hop.

use std::sync::Arc;

use url::Url;

use crate::error::{Error, Result};

/// The hop being considered, plus every URL visited so far (the
/// original request first).
#[derive(Debug)]
pub struct RedirectAttempt<'a> {
    pub next: &'a Url,
    pub history: &'a [Url],
}

/// A policy predicate; the first error stops the chain and is returned
/// to the caller.
pub type RedirectPolicy = Arc<dyn Fn(&RedirectAttempt<'_>) -> Result<()> + Send + Sync>;

/// Follow at most `max` redirects.
pub fn max_redirects(max: u32) -> RedirectPolicy {
    Arc::new(move |attempt| {
        // history includes the original request.
        let redirects = attempt.history.len().saturating_sub(1) as u32;
        if redirects >= max {
            Err(Error::RedirectLimit { count: redirects })
        } else {
            Ok(())
        }
    })
}

/// Refuse all redirects.
pub fn no_redirects() -> RedirectPolicy {
    Arc::new(|_| Err(Error::request("redirects are disabled")))
}

/// Only follow redirects staying on the original host.
pub fn same_host() -> RedirectPolicy {
    Arc::new(|attempt| {
        let original = attempt.history.first().and_then(|u| u.host_str());
        if attempt.next.host_str() == original {
            Ok(())
        } else {
            Err(Error::request(format!(
                "redirect to foreign host {:?} refused",
                attempt.next.host_str().unwrap_or("")
            )))
        }
    })
}

/// Only follow redirects within the original registrable domain
/// (suffix match on the host).
pub fn same_domain() -> RedirectPolicy {
    Arc::new(|attempt| {
        let original = attempt
            .history
            .first()
            .and_then(|u| u.host_str())
            .map(root_domain);
        let next = attempt.next.host_str().map(root_domain);
        if next.is_some() && next == original {
            Ok(())
        } else {
            Err(Error::request("redirect outside original domain refused"))
        }
    })
}

/// Only allow redirects to the listed hosts.
pub fn allowed_hosts(hosts: Vec<String>) -> RedirectPolicy {
    Arc::new(move |attempt| {
        let next = attempt.next.host_str().unwrap_or("");
        if hosts.iter().any(|h| h.eq_ignore_ascii_case(next)) {
            Ok(())
        } else {
            Err(Error::request(format!("redirect host {next:?} not allowed")))
        }
    })
}

/// Only allow redirects into the listed domains (including
/// subdomains).
pub fn allowed_domains(domains: Vec<String>) -> RedirectPolicy {
    Arc::new(move |attempt| {
        let next = attempt.next.host_str().unwrap_or("").to_ascii_lowercase();
        let ok = domains.iter().any(|d| {
            let d = d.to_ascii_lowercase();
            next == d || next.ends_with(&format!(".{d}"))
        });
        if ok {
            Ok(())
        } else {
            Err(Error::request(format!(
                "redirect domain {next:?} not allowed"
            )))
        }
    })
}

/// Default: at most ten redirects.
pub fn default_policy() -> RedirectPolicy {
    max_redirects(10)
}

fn root_domain(host: &str) -> String {
    let parts: Vec<&str> = host.rsplitn(3, '.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[1], parts[0]).to_ascii_lowercase()
    } else {
        host.to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn max_redirects_counts_hops() {
        let policy = max_redirects(2);
        let next = url("https://example.com/2");
        let one_hop = [url("https://example.com/0"), url("https://example.com/1")];
        assert!(policy(&RedirectAttempt {
            next: &next,
            history: &one_hop[..1],
        })
        .is_ok());
        let three = [
            url("https://example.com/0"),
            url("https://example.com/1"),
            url("https://example.com/2"),
        ];
        let err = policy(&RedirectAttempt {
            next: &next,
            history: &three,
        })
        .unwrap_err();
        assert!(matches!(err, Error::RedirectLimit { count: 2 }));
    }

    #[test]
    fn same_host_refuses_foreign_hosts() {
        let policy = same_host();
        let history = [url("https://a.example.com/")];
        assert!(policy(&RedirectAttempt {
            next: &url("https://a.example.com/next"),
            history: &history,
        })
        .is_ok());
        assert!(policy(&RedirectAttempt {
            next: &url("https://evil.com/"),
            history: &history,
        })
        .is_err());
    }

    #[test]
    fn same_domain_allows_subdomains() {
        let policy = same_domain();
        let history = [url("https://www.example.com/")];
        assert!(policy(&RedirectAttempt {
            next: &url("https://api.example.com/"),
            history: &history,
        })
        .is_ok());
        assert!(policy(&RedirectAttempt {
            next: &url("https://example.org/"),
            history: &history,
        })
        .is_err());
    }

    #[test]
    fn allowed_hosts_is_exact() {
        let policy = allowed_hosts(vec!["cdn.example.com".to_string()]);
        let history = [url("https://example.com/")];
        assert!(policy(&RedirectAttempt {
            next: &url("https://cdn.example.com/x"),
            history: &history,
        })
        .is_ok());
        assert!(policy(&RedirectAttempt {
            next: &url("https://sub.cdn.example.com/x"),
            history: &history,
        })
        .is_err());
    }
}
