//! SNS webhook envelopes and their signature verification.
//!
//! SNS signs a canonical string built from a fixed, per-type list of
//! envelope fields with the key in the X.509 certificate at
//! `SigningCertURL` (signature version 1: RSA PKCS#1 v1.5 over SHA-1).

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use x509_cert::Certificate;
use reqwest::Url;
use x509_cert::der::{DecodePem, Encode};

const CERT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const NOTIFICATION_FIELDS: &[&str] = &["Message", "MessageId", "Subject", "Timestamp", "TopicArn", "Type"];

const CONFIRMATION_FIELDS: &[&str] = &[
    "Message",
    "MessageId",
    "SubscribeURL",
    "Timestamp",
    "Token",
    "TopicArn",
    "Type",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    SubscriptionConfirmation,
    Notification,
    UnsubscribeConfirmation,
    Unknown,
}

impl MessageType {
    pub fn parse(value: &str) -> Self {
        match value {
            "SubscriptionConfirmation" => Self::SubscriptionConfirmation,
            "Notification" => Self::Notification,
            "UnsubscribeConfirmation" => Self::UnsubscribeConfirmation,
            _ => Self::Unknown,
        }
    }

    /// Envelope fields covered by the signature, in signing order.
    pub fn signed_fields(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Notification => Some(NOTIFICATION_FIELDS),
            Self::SubscriptionConfirmation | Self::UnsubscribeConfirmation => {
                Some(CONFIRMATION_FIELDS)
            }
            Self::Unknown => None,
        }
    }
}

/// The outer webhook payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Envelope {
    #[serde(rename = "Type")]
    pub kind: String,
    pub message: String,
    pub message_id: String,
    pub subject: String,
    pub timestamp: String,
    pub topic_arn: String,
    pub token: String,
    #[serde(rename = "SubscribeURL")]
    pub subscribe_url: String,
    pub signature_version: String,
    pub signature: String,
    #[serde(rename = "SigningCertURL")]
    pub signing_cert_url: String,
}

impl Envelope {
    pub fn message_type(&self) -> MessageType {
        MessageType::parse(&self.kind)
    }

    fn field(&self, name: &str) -> &str {
        match name {
            "Message" => &self.message,
            "MessageId" => &self.message_id,
            "Subject" => &self.subject,
            "SubscribeURL" => &self.subscribe_url,
            "Timestamp" => &self.timestamp,
            "Token" => &self.token,
            "TopicArn" => &self.topic_arn,
            "Type" => &self.kind,
            _ => "",
        }
    }

    /// `name\nvalue\n` for every signed field with a non-empty value.
    pub fn signing_string(&self) -> Result<String, VerificationError> {
        let fields = self
            .message_type()
            .signed_fields()
            .ok_or_else(|| VerificationError::UnknownType(self.kind.clone()))?;

        let mut out = String::new();
        for name in fields {
            let value = self.field(name);
            if value.is_empty() {
                continue;
            }
            out.push_str(name);
            out.push('\n');
            out.push_str(value);
            out.push('\n');
        }
        Ok(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("notification verification failed: unknown message type '{0}'")]
    UnknownType(String),

    #[error("notification verification failed: bad signature encoding: {0}")]
    SignatureEncoding(#[from] base64::DecodeError),

    #[error("notification verification failed: untrusted signing certificate url '{0}'")]
    UntrustedCertificateUrl(String),

    #[error("notification verification failed: fetching signing certificate: {0}")]
    CertificateFetch(#[from] reqwest::Error),

    #[error("notification verification failed: signing certificate returned {0}")]
    CertificateStatus(reqwest::StatusCode),

    #[error("notification verification failed: bad signing certificate: {0}")]
    Certificate(String),

    #[error("notification verification failed: signature mismatch: {0}")]
    Signature(#[from] rsa::Error),
}

/// Verifies inbound envelopes. Certificates are fetched fresh for every
/// message, and only from the regional SNS endpoint over https.
#[derive(Clone)]
pub struct SnsVerifier {
    http: reqwest::Client,
    enabled: bool,
    cert_origin: (String, String, Option<u16>),
}

impl SnsVerifier {
    pub fn new(enabled: bool, region: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            enabled,
            cert_origin: ("https".into(), format!("sns.{region}.amazonaws.com"), Some(443)),
        }
    }

    /// Accept certificates served from `origin` (scheme, host and port)
    /// instead of the SNS endpoint.
    #[cfg(test)]
    pub fn trusting_origin(mut self, origin: &str) -> Self {
        let url = Url::parse(origin).unwrap();
        self.cert_origin = (
            url.scheme().to_string(),
            url.host_str().unwrap().to_string(),
            url.port_or_known_default(),
        );
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn verify(&self, envelope: &Envelope) -> Result<(), VerificationError> {
        if !self.enabled {
            return Ok(());
        }

        let signing_string = envelope.signing_string()?;
        self.check_certificate_url(&envelope.signing_cert_url)?;
        let signature = BASE64.decode(envelope.signature.trim())?;
        let pem = self.fetch_certificate(&envelope.signing_cert_url).await?;
        verify_with_certificate(&signing_string, &signature, &pem)
    }

    fn check_certificate_url(&self, raw: &str) -> Result<(), VerificationError> {
        let untrusted = || VerificationError::UntrustedCertificateUrl(raw.to_string());
        let url = Url::parse(raw).map_err(|_| untrusted())?;
        let (scheme, host, port) = &self.cert_origin;
        let trusted = url.scheme() == scheme
            && url.host_str().is_some_and(|h| h.eq_ignore_ascii_case(host))
            && url.port_or_known_default() == *port
            && url.username().is_empty()
            && url.password().is_none();
        if trusted { Ok(()) } else { Err(untrusted()) }
    }

    async fn fetch_certificate(&self, url: &str) -> Result<Vec<u8>, VerificationError> {
        tracing::debug!(url, "fetching signing certificate");
        let resp = self.http.get(url).timeout(CERT_FETCH_TIMEOUT).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(VerificationError::CertificateStatus(status));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Check `signature` over `signing_string` against the RSA key in the PEM
/// certificate.
pub fn verify_with_certificate(
    signing_string: &str,
    signature: &[u8],
    pem: &[u8],
) -> Result<(), VerificationError> {
    let cert = Certificate::from_pem(pem).map_err(|e| VerificationError::Certificate(e.to_string()))?;
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| VerificationError::Certificate(e.to_string()))?;
    let key = RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| VerificationError::Certificate(e.to_string()))?;

    let digest = Sha1::digest(signing_string.as_bytes());
    key.verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature)?;
    Ok(())
}
