//! Certificate pinning for control-plane TLS connections.
//!
//! A pin is `sha256/<base64>` of the SHA-256 digest of a DER certificate,
//! the same form browsers and most HTTP stacks use. A host is satisfied when
//! *any* certificate in the presented chain matches one of its pins, so a
//! deployment can pin either the leaf or an intermediate.
//!
//! [`CertificatePinner::check`] works on every build. Enforcement inside the
//! TLS handshake needs the `tls` feature, which adds a rustls verifier (see
//! [`PinningVerifier`]).

#[cfg(feature = "tls")]
mod verifier;

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use crate::error::{IngestError, Result};

#[cfg(feature = "tls")]
pub use verifier::PinningVerifier;

const PIN_PREFIX: &str = "sha256/";

/// Which hosts are pinned and how strictly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePinningConfig {
    /// Host (or `*.domain` pattern) to accepted pins.
    pub pins: BTreeMap<String, BTreeSet<String>>,
    pub enable_pinning: bool,
    /// When false a mismatch is logged but the connection proceeds.
    pub enforce_pinning: bool,
}

impl CertificatePinningConfig {
    /// No pins, nothing checked.
    pub fn disabled() -> Self {
        Self {
            pins: BTreeMap::new(),
            enable_pinning: false,
            enforce_pinning: false,
        }
    }

    /// Enforced pinning for the given hosts.
    ///
    /// Hosts are lowercased. Hosts with no pins are skipped; if nothing
    /// remains, the result is [`disabled`](Self::disabled).
    pub fn create<H, P, S>(hosts: H) -> Self
    where
        H: IntoIterator<Item = (S, P)>,
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pins: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (host, host_pins) in hosts {
            let set: BTreeSet<String> = host_pins
                .into_iter()
                .map(Into::<String>::into)
                .filter(|pin| !pin.is_empty())
                .collect();
            if !set.is_empty() {
                let host: String = host.into();
                pins.entry(host.to_ascii_lowercase())
                    .or_default()
                    .extend(set);
            }
        }

        if pins.is_empty() {
            return Self::disabled();
        }
        Self {
            pins,
            enable_pinning: true,
            enforce_pinning: true,
        }
    }

    /// Keep checking pins but only report mismatches.
    pub fn report_only(mut self) -> Self {
        self.enforce_pinning = false;
        self
    }

    fn is_active(&self) -> bool {
        self.enable_pinning && !self.pins.is_empty()
    }
}

impl Default for CertificatePinningConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Compute the `sha256/<base64>` pin of a DER-encoded certificate.
///
/// ```
/// let pin = ingest::pinning::pin_for_der(b"");
/// assert_eq!(pin, "sha256/47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
/// ```
pub fn pin_for_der(der: &[u8]) -> String {
    format!("{PIN_PREFIX}{}", STANDARD.encode(Sha256::digest(der)))
}

/// Outcome of checking one chain against the configured pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinVerdict {
    /// Pinning is off.
    Disabled,
    /// The host has no pins.
    NotPinned,
    Matched,
    Mismatch,
}

/// Checks presented certificate chains against a [`CertificatePinningConfig`].
///
/// Immutable after construction; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CertificatePinner {
    config: CertificatePinningConfig,
}

impl CertificatePinner {
    pub fn new(config: CertificatePinningConfig) -> Self {
        if config.enable_pinning && config.pins.is_empty() {
            tracing::debug!("pinning enabled with no pins, treating as disabled");
        }
        Self { config }
    }

    pub fn config(&self) -> &CertificatePinningConfig {
        &self.config
    }

    /// Whether this build can enforce pins inside the TLS handshake.
    pub fn is_supported() -> bool {
        cfg!(feature = "tls")
    }

    /// Pins that apply to `host`: its exact entry plus any matching
    /// `*.domain` wildcard (one label deep).
    pub fn pins_for(&self, host: &str) -> Vec<&str> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let parent = host.split_once('.').map(|(_, rest)| rest);

        self.config
            .pins
            .iter()
            .filter(|(pattern, _)| match pattern.strip_prefix("*.") {
                Some(domain) => parent == Some(domain),
                None => **pattern == host,
            })
            .flat_map(|(_, pins)| pins.iter().map(String::as_str))
            .collect()
    }

    /// Check a DER certificate chain (leaf first) presented by `host`.
    pub fn check(&self, host: &str, chain: &[&[u8]]) -> PinVerdict {
        if !self.config.is_active() {
            return PinVerdict::Disabled;
        }
        let pins = self.pins_for(host);
        if pins.is_empty() {
            return PinVerdict::NotPinned;
        }

        let matched = chain
            .iter()
            .map(|der| pin_for_der(der))
            .any(|pin| pins.contains(&pin.as_str()));
        if matched {
            PinVerdict::Matched
        } else {
            PinVerdict::Mismatch
        }
    }

    /// Like [`check`](Self::check), but a mismatch is an error when pinning
    /// is enforced.
    pub fn verify(&self, host: &str, chain: &[&[u8]]) -> Result<()> {
        match self.check(host, chain) {
            PinVerdict::Mismatch if self.config.enforce_pinning => {
                tracing::warn!(host, "certificate pin mismatch, rejecting");
                Err(IngestError::PinningMismatch {
                    host: host.to_string(),
                })
            }
            PinVerdict::Mismatch => {
                tracing::warn!(host, "certificate pin mismatch (report only)");
                Ok(())
            }
            verdict => {
                tracing::trace!(host, ?verdict, "certificate pin check");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &[u8] = b"leaf certificate der";
    const INTERMEDIATE: &[u8] = b"intermediate certificate der";

    fn pinner(host: &str, der: &[u8]) -> CertificatePinner {
        CertificatePinner::new(CertificatePinningConfig::create([(
            host.to_string(),
            vec![pin_for_der(der)],
        )]))
    }

    #[test]
    fn pin_format() {
        let pin = pin_for_der(LEAF);
        assert!(pin.starts_with("sha256/"));
        // 32 digest bytes -> 44 base64 chars
        assert_eq!(pin.len(), "sha256/".len() + 44);
    }

    #[test]
    fn create_enables_and_enforces() {
        let config = CertificatePinningConfig::create([("NVR.example.com", vec!["sha256/abc"])]);
        assert!(config.enable_pinning);
        assert!(config.enforce_pinning);
        assert!(config.pins.contains_key("nvr.example.com"));
    }

    #[test]
    fn empty_map_is_disabled() {
        let none: Vec<(String, Vec<String>)> = Vec::new();
        assert_eq!(CertificatePinningConfig::create(none), CertificatePinningConfig::disabled());

        let config = CertificatePinningConfig::create([("a.example", Vec::<&str>::new())]);
        assert!(!config.enable_pinning);
    }

    #[test]
    fn any_certificate_in_chain_may_match() {
        let pinner = pinner("nvr.example.com", INTERMEDIATE);
        assert_eq!(
            pinner.check("nvr.example.com", &[LEAF, INTERMEDIATE]),
            PinVerdict::Matched
        );
        assert_eq!(pinner.check("nvr.example.com", &[LEAF]), PinVerdict::Mismatch);
        assert_eq!(pinner.check("other.example.com", &[LEAF]), PinVerdict::NotPinned);
    }

    #[test]
    fn verify_rejects_only_when_enforcing() {
        let enforcing = pinner("nvr.example.com", INTERMEDIATE);
        assert!(matches!(
            enforcing.verify("nvr.example.com", &[LEAF]),
            Err(IngestError::PinningMismatch { host }) if host == "nvr.example.com"
        ));

        let reporting = CertificatePinner::new(enforcing.config().clone().report_only());
        assert!(reporting.verify("nvr.example.com", &[LEAF]).is_ok());
    }

    #[test]
    fn disabled_never_checks() {
        let mut config = CertificatePinningConfig::create([("nvr.example.com", vec!["sha256/x"])]);
        config.enable_pinning = false;
        let pinner = CertificatePinner::new(config);
        assert_eq!(pinner.check("nvr.example.com", &[LEAF]), PinVerdict::Disabled);
        assert!(pinner.verify("nvr.example.com", &[LEAF]).is_ok());
    }

    #[test]
    fn wildcard_matches_one_label() {
        let pinner = pinner("*.cams.example.com", LEAF);
        assert_eq!(pinner.check("door.cams.example.com", &[LEAF]), PinVerdict::Matched);
        assert_eq!(pinner.check("cams.example.com", &[LEAF]), PinVerdict::NotPinned);
        assert_eq!(pinner.check("a.door.cams.example.com", &[LEAF]), PinVerdict::NotPinned);
    }

    #[test]
    fn supported_follows_tls_feature() {
        assert_eq!(CertificatePinner::is_supported(), cfg!(feature = "tls"));
    }
}
