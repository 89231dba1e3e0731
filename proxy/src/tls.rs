use crate::config::{ClientAuthMode, TlsOptions};
use crate::errors::{ProxyError, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// TLS is active only when certificate, key, and CA file are all set.
pub fn enabled(options: &TlsOptions) -> bool {
    !options.cert_file.is_empty() && !options.key_file.is_empty() && !options.ca_file.is_empty()
}

/// Builds the client-side TLS configuration for one endpoint.
///
/// TLS 1.3 only. With full TLS material configured, the CA file becomes the
/// root set and the client certificate is presented. Without it the
/// connector still supports https against the bundled web roots, so a
/// plaintext endpoint config can point at an https URL.
pub fn client_config(options: &TlsOptions) -> Result<ClientConfig> {
    let provider = default_provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|err| ProxyError::TlsConfig(err.to_string()))?;

    let builder = if options.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
    } else if enabled(options) {
        builder.with_root_certificates(load_ca_pool(&options.ca_file)?)
    } else {
        builder.with_root_certificates(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        })
    };

    if enabled(options) {
        builder
            .with_client_auth_cert(
                load_certs(&options.cert_file)?,
                load_key(&options.key_file)?,
            )
            .map_err(|err| ProxyError::TlsConfig(err.to_string()))
    } else {
        Ok(builder.with_no_client_auth())
    }
}

/// Builds the listener-side acceptor, or `None` when TLS is not configured.
///
/// The five configured client-auth names map onto webpki verification:
/// modes that request a certificate without requiring one allow
/// unauthenticated clients, the require modes do not, and any presented
/// certificate is verified against the configured CA.
pub fn server_acceptor(options: &TlsOptions) -> Result<Option<TlsAcceptor>> {
    if !enabled(options) {
        return Ok(None);
    }

    let provider = default_provider();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|err| ProxyError::TlsConfig(err.to_string()))?;

    let builder = match options.client_auth {
        ClientAuthMode::NoClientCert => builder.with_no_client_auth(),
        ClientAuthMode::RequestClientCert | ClientAuthMode::VerifyClientCertIfGiven => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(
                    Arc::new(load_ca_pool(&options.ca_file)?),
                    provider,
                )
                .allow_unauthenticated()
                .build()
                .map_err(|err| ProxyError::TlsConfig(err.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
        ClientAuthMode::RequireAnyClientCert | ClientAuthMode::RequireAndVerifyClientCert => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(
                    Arc::new(load_ca_pool(&options.ca_file)?),
                    provider,
                )
                .build()
                .map_err(|err| ProxyError::TlsConfig(err.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
    };

    let config = builder
        .with_single_cert(
            load_certs(&options.cert_file)?,
            load_key(&options.key_file)?,
        )
        .map_err(|err| ProxyError::TlsConfig(err.to_string()))?;

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

fn default_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|err| ProxyError::TlsConfig(format!("failed to read {path}: {err}")))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| ProxyError::TlsConfig(format!("failed to parse {path}: {err}")))
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|err| ProxyError::TlsConfig(format!("failed to read {path}: {err}")))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|err| ProxyError::TlsConfig(format!("failed to parse {path}: {err}")))?
        .ok_or_else(|| ProxyError::TlsConfig(format!("no private key found in {path}")))
}

fn load_ca_pool(path: &str) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(load_certs(path)?);
    if added == 0 {
        return Err(ProxyError::TlsConfig(format!(
            "no usable CA certificates in {path}"
        )));
    }
    Ok(roots)
}

/// Server certificate verifier for `insecure_skip_verify` endpoints.
/// Signatures are still checked; only the certificate chain is not.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_options() -> TlsOptions {
        TlsOptions {
            cert_file: "/nonexistent/client.crt".to_string(),
            key_file: "/nonexistent/client.key".to_string(),
            ca_file: "/nonexistent/ca.crt".to_string(),
            ..TlsOptions::default()
        }
    }

    #[test]
    fn enabled_requires_all_three_files() {
        assert!(!enabled(&TlsOptions::default()));

        let mut options = full_options();
        assert!(enabled(&options));

        options.ca_file.clear();
        assert!(!enabled(&options));
    }

    #[test]
    fn plaintext_endpoint_still_builds_a_client_config() {
        let config = client_config(&TlsOptions::default()).expect("client config");
        assert!(!config.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn insecure_skip_verify_builds_without_ca() {
        let options = TlsOptions {
            insecure_skip_verify: true,
            ..TlsOptions::default()
        };
        assert!(client_config(&options).is_ok());
    }

    #[test]
    fn missing_files_surface_as_tls_config_errors() {
        let err = client_config(&full_options()).expect_err("must fail");
        assert!(matches!(err, ProxyError::TlsConfig(_)));
        assert!(err.to_string().contains("/nonexistent/"));
    }

    #[test]
    fn acceptor_absent_without_tls_material() {
        let acceptor = server_acceptor(&TlsOptions::default()).expect("no acceptor");
        assert!(acceptor.is_none());
    }

    #[test]
    fn acceptor_with_missing_files_fails() {
        let mut options = full_options();
        options.client_auth = ClientAuthMode::RequireAndVerifyClientCert;
        assert!(matches!(
            server_acceptor(&options),
            Err(ProxyError::TlsConfig(_))
        ));
    }
}
