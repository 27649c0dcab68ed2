//! HMAC-signed, short-lived document links.
//!
//! A link has the shape
//! `{base_url}/{object_key}?expires=<unix>&content-type=<mime>&signature=<b64url>`
//! with every key segment percent-encoded. The signature is HMAC-SHA256 over
//! the encoded path, `expires` and the content type, so it covers exactly the
//! bytes a document server sees. Whoever serves the documents verifies it with
//! the same secret through [`HmacLinkSigner::verify`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use kbchat_core::error::KnowledgeError;
use kbchat_core::knowledge::{LinkSigner, Source};
use reqwest::Url;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TITLE_SUFFIX: &str = " (Knowledge Base)";

pub struct HmacLinkSigner {
    base_url: String,
    secret: Vec<u8>,
    expires_secs: u64,
}

impl HmacLinkSigner {
    pub fn new(base_url: impl Into<String>, secret: impl Into<Vec<u8>>, expires_secs: u64) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            expires_secs,
        }
    }

    /// Base URL with the object key appended one encoded segment at a time.
    fn document_url(&self, object_key: &str) -> Result<Url, KnowledgeError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| signing_error(object_key, e))?;
        url.path_segments_mut()
            .map_err(|()| signing_error(object_key, "base url cannot carry a path"))?
            .pop_if_empty()
            .extend(object_key.split('/'));
        Ok(url)
    }

    fn mac(&self, path: &str, expires: i64, content_type: &str) -> Result<HmacSha256, KnowledgeError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| signing_error(path, e))?;
        mac.update(format!("{path}\n{expires}\n{content_type}").as_bytes());
        Ok(mac)
    }

    /// Link for `object_key` expiring at `expires` (unix seconds).
    pub fn link(&self, object_key: &str, expires: i64) -> Result<String, KnowledgeError> {
        let content_type = content_type_for(object_key);
        let mut url = self.document_url(object_key)?;
        let mac = self.mac(url.path(), expires, content_type)?;
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("content-type", content_type)
            .append_pair("signature", &signature);
        Ok(url.into())
    }

    /// Check a presented signature. Expired links never verify.
    pub fn verify(&self, object_key: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now > expires {
            return false;
        }
        let Ok(presented) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let Ok(url) = self.document_url(object_key) else {
            return false;
        };
        match self.mac(url.path(), expires, content_type_for(object_key)) {
            Ok(mac) => mac.verify_slice(&presented).is_ok(),
            Err(_) => false,
        }
    }
}

fn signing_error(key: &str, reason: impl ToString) -> KnowledgeError {
    KnowledgeError::Signing {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl LinkSigner for HmacLinkSigner {
    fn sign(&self, location: &str) -> Result<Source, KnowledgeError> {
        let object_key = object_key(location);
        if object_key.is_empty() {
            return Err(signing_error(location, "location has no object key"));
        }
        let expires = chrono::Utc::now().timestamp() + self.expires_secs as i64;
        Ok(Source {
            title: format!("{object_key}{TITLE_SUFFIX}"),
            uri: self.link(object_key, expires)?,
            key: location.to_string(),
        })
    }
}

/// Object key of a storage location: the path after the bucket for
/// `scheme://bucket/key` locations, the location itself otherwise.
pub fn object_key(location: &str) -> &str {
    match location.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, key)| key),
        None => location.trim_start_matches('/'),
    }
}

/// MIME type served for a document, from its extension.
pub fn content_type_for(object_key: &str) -> &'static str {
    let ext = object_key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
