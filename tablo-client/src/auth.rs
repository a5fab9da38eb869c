//! Request signing for the device API.
//!
//! Each request is signed with HMAC-MD5 over the method, the path, the MD5 of
//! the body and the request date:
//!
//! ```text
//! Authorization: tablo:{access_key}:{hex(HMAC_MD5(secret, "METHOD\nPATH\nMD5(body)\nDATE"))}
//! Date: DATE
//! ```
//!
//! The device rejects stale dates, so the same `DATE` must be sent in the
//! `Date` header.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};

use crate::error::{ClientError, ClientResult};

type HmacMd5 = Hmac<Md5>;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Clone, Default)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Build the `Authorization` header value for one request.
    pub fn authorization(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        date: &str,
    ) -> ClientResult<String> {
        let message = string_to_sign(method, path, body, date);
        let signature = hmac_md5_hex(self.secret_key.as_bytes(), message.as_bytes())?;
        Ok(format!("tablo:{}:{}", self.access_key, signature))
    }
}

// never print the secret
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

pub fn string_to_sign(method: &str, path: &str, body: &[u8], date: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        md5_hex(body),
        date
    )
}

pub fn http_date(now: DateTime<Utc>) -> String {
    now.format(HTTP_DATE_FORMAT).to_string()
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

pub fn hmac_md5_hex(key: &[u8], data: &[u8]) -> ClientResult<String> {
    let mut mac = HmacMd5::new_from_slice(key).map_err(|_| ClientError::InvalidKey)?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_md5_empty_body() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_hmac_md5_rfc2202() -> anyhow::Result<()> {
        assert_eq!(
            hmac_md5_hex(b"Jefe", b"what do ya want for nothing?")?,
            "750c783e6ab0b503eaa86e310a5db738"
        );
        assert_eq!(
            hmac_md5_hex(&[0x0b; 16], b"Hi There")?,
            "9294727a3638bb1c13f48ef8158bfc9d"
        );
        Ok(())
    }

    #[test]
    fn test_http_date() {
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(http_date(date), "Tue, 05 Mar 2024 07:08:09 GMT");
    }

    #[test]
    fn test_string_to_sign() {
        let message = string_to_sign(
            "post",
            "/guide/channels/S1/watch",
            b"",
            "Tue, 05 Mar 2024 07:08:09 GMT",
        );
        assert_eq!(
            message,
            "POST\n/guide/channels/S1/watch\nd41d8cd98f00b204e9800998ecf8427e\nTue, 05 Mar 2024 07:08:09 GMT"
        );
    }

    #[test]
    fn test_authorization_shape() -> anyhow::Result<()> {
        let credentials = Credentials::new("access", "secret");
        let date = "Tue, 05 Mar 2024 07:08:09 GMT";
        let header = credentials.authorization("GET", "/server/info", b"", date)?;

        let signature = header
            .strip_prefix("tablo:access:")
            .expect("missing tablo prefix");
        assert_eq!(signature.len(), 32);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        // same input, same signature; different body, different signature
        assert_eq!(
            header,
            credentials.authorization("GET", "/server/info", b"", date)?
        );
        assert_ne!(
            header,
            credentials.authorization("GET", "/server/info", b"{}", date)?
        );
        Ok(())
    }

    #[test]
    fn test_debug_hides_secret() {
        let credentials = Credentials::new("access", "very-secret");
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("access"));
        assert!(!printed.contains("very-secret"));
    }
}
