//! RTSP client authentication (RFC 2326 §D.2, RFC 2617).
//!
//! Cameras answer the first DESCRIBE with `401 Unauthorized` and one or more
//! `WWW-Authenticate` challenges. We prefer Digest over Basic when both are
//! offered and send the matching `Authorization` header on every subsequent
//! request of the connection.

use base64::prelude::{BASE64_STANDARD, Engine as _};

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic {
        realm: String,
    },
    Digest {
        realm: String,
        nonce: String,
        opaque: Option<String>,
        /// Set when the server offers `qop=auth`.
        qop_auth: bool,
    },
}

impl Challenge {
    /// Parse a single `WWW-Authenticate` header value.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        let params = parse_params(params);
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        if scheme.eq_ignore_ascii_case("digest") {
            let algorithm = get("algorithm").unwrap_or_else(|| "MD5".to_string());
            if !algorithm.eq_ignore_ascii_case("MD5") {
                tracing::warn!(algorithm, "unsupported digest algorithm");
                return None;
            }
            Some(Challenge::Digest {
                realm: get("realm").unwrap_or_default(),
                nonce: get("nonce")?,
                opaque: get("opaque"),
                qop_auth: get("qop")
                    .map(|q| q.split(',').any(|v| v.trim().eq_ignore_ascii_case("auth")))
                    .unwrap_or(false),
            })
        } else if scheme.eq_ignore_ascii_case("basic") {
            Some(Challenge::Basic {
                realm: get("realm").unwrap_or_default(),
            })
        } else {
            None
        }
    }

    /// Pick the strongest supported challenge among several headers.
    pub fn select<'a>(headers: impl Iterator<Item = &'a str>) -> Option<Self> {
        let mut basic = None;
        for header in headers {
            match Self::parse(header) {
                Some(digest @ Challenge::Digest { .. }) => return Some(digest),
                Some(other) => basic = basic.or(Some(other)),
                None => {}
            }
        }
        basic
    }
}

/// Credentials plus the challenge they answer.
///
/// Tracks the digest nonce count across requests on one connection.
#[derive(Debug, Clone)]
pub struct Authenticator {
    username: String,
    password: String,
    challenge: Challenge,
    nonce_count: u32,
}

impl Authenticator {
    pub fn new(username: &str, password: &str, challenge: Challenge) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            challenge,
            nonce_count: 0,
        }
    }

    /// Produce the `Authorization` header value for a request.
    pub fn authorization(&mut self, method: &str, uri: &str) -> String {
        match &self.challenge {
            Challenge::Basic { .. } => {
                let token =
                    BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password));
                format!("Basic {token}")
            }
            Challenge::Digest { .. } => {
                self.nonce_count += 1;
                let cnonce = format!("{:08x}", rand::random::<u32>());
                self.digest_header(method, uri, &cnonce)
            }
        }
    }

    fn digest_header(&self, method: &str, uri: &str, cnonce: &str) -> String {
        let Challenge::Digest {
            realm,
            nonce,
            opaque,
            qop_auth,
        } = &self.challenge
        else {
            return String::new();
        };

        let ha1 = md5_hex(&format!("{}:{}:{}", self.username, realm, self.password));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let nc = format!("{:08x}", self.nonce_count);

        let mut header = if *qop_auth {
            let response = md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"));
            format!(
                "Digest username=\"{}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", \
                 response=\"{response}\", qop=auth, nc={nc}, cnonce=\"{cnonce}\"",
                self.username
            )
        } else {
            let response = md5_hex(&format!("{ha1}:{nonce}:{ha2}"));
            format!(
                "Digest username=\"{}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", \
                 response=\"{response}\"",
                self.username
            )
        };

        if let Some(opaque) = opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        header
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Split `key="value", key=value` auth parameters. Quoted values may
/// contain commas.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        rest = rest[eq + 1..].trim_start();

        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let end = stripped.find('"').unwrap_or(stripped.len());
            value = stripped[..end].to_string();
            rest = stripped.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = &rest[end..];
        }
        params.push((key, value));
        rest = rest.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_digest_challenge() {
        let challenge = Challenge::parse(
            "Digest realm=\"IP Camera(12345)\", nonce=\"abc,def\", qop=\"auth,auth-int\", stale=\"FALSE\"",
        )
        .unwrap();
        assert_eq!(
            challenge,
            Challenge::Digest {
                realm: "IP Camera(12345)".into(),
                nonce: "abc,def".into(),
                opaque: None,
                qop_auth: true,
            }
        );
    }

    #[test]
    fn select_prefers_digest() {
        let headers = ["Basic realm=\"cam\"", "Digest realm=\"cam\", nonce=\"n\""];
        let selected = Challenge::select(headers.iter().copied()).unwrap();
        assert!(matches!(selected, Challenge::Digest { .. }));
    }

    #[test]
    fn basic_authorization() {
        let mut auth = Authenticator::new(
            "Aladdin",
            "open sesame",
            Challenge::Basic { realm: "cam".into() },
        );
        assert_eq!(
            auth.authorization("DESCRIBE", "rtsp://cam/"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn digest_matches_rfc2617_example() {
        let mut auth = Authenticator::new(
            "Mufasa",
            "Circle Of Life",
            Challenge::Digest {
                realm: "testrealm@host.com".into(),
                nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
                opaque: Some("5ccc069c403ebaf9f0171e9517f40e41".into()),
                qop_auth: true,
            },
        );
        auth.nonce_count = 1;
        let header = auth.digest_header("GET", "/dir/index.html", "0a4f113b");
        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
        assert!(header.contains("nc=00000001"));
        assert!(header.ends_with("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn digest_without_qop() {
        let mut auth = Authenticator::new(
            "admin",
            "secret",
            Challenge::Digest {
                realm: "cam".into(),
                nonce: "n1".into(),
                opaque: None,
                qop_auth: false,
            },
        );
        let header = auth.authorization("DESCRIBE", "rtsp://cam/live");
        let ha1 = md5_hex("admin:cam:secret");
        let ha2 = md5_hex("DESCRIBE:rtsp://cam/live");
        let expected = md5_hex(&format!("{ha1}:n1:{ha2}"));
        assert!(header.contains(&format!("response=\"{expected}\"")));
        assert!(!header.contains("cnonce"));
    }
}
