use std::sync::Arc;

use rustls::client::WebPkiServerCertVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use super::CertificatePinner;
use crate::error::{IngestError, Result};

/// rustls verifier that runs normal WebPKI validation, then the pin check.
///
/// A pin mismatch on an enforcing pinner aborts the handshake.
#[derive(Debug)]
pub struct PinningVerifier {
    inner: Arc<WebPkiServerCertVerifier>,
    pinner: Arc<CertificatePinner>,
}

impl PinningVerifier {
    /// Validate against the bundled Mozilla roots.
    pub fn new(pinner: Arc<CertificatePinner>) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(pinner, roots)
    }

    pub fn with_roots(pinner: Arc<CertificatePinner>, roots: RootCertStore) -> Result<Self> {
        let inner = WebPkiServerCertVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| IngestError::Tls(e.to_string()))?;
        Ok(Self { inner, pinner })
    }

    /// A ready client config using this verifier and no client auth.
    pub fn client_config(self) -> ClientConfig {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(self))
            .with_no_client_auth()
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let verified = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;

        let host = server_name.to_str();
        let chain: Vec<&[u8]> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|cert| cert.as_ref())
            .collect();
        self.pinner
            .verify(&host, &chain)
            .map_err(|e| rustls::Error::General(e.to_string()))?;

        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
