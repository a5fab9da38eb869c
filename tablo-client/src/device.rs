use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    Method, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, DATE},
};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use url::{ParseError, Url};

use crate::{
    auth::{Credentials, http_date},
    error::{ClientError, ClientResult},
    model::{Channel, ClientInfo, DeviceIdentity, KeepaliveResponse, WatchSession},
};

/// Operations the transcoding side needs from an appliance.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn identity(&self) -> ClientResult<DeviceIdentity>;

    async fn channel(&self, channel_id: &str) -> ClientResult<Channel>;

    /// Ask the device to tune `channel_id` and open a streaming session.
    async fn watch(&self, channel_id: &str, client: &ClientInfo) -> ClientResult<WatchSession>;

    /// Extend the session lease. Returns the refreshed session.
    async fn keepalive(&self, session: &WatchSession) -> ClientResult<WatchSession>;

    /// Returns `false` when the device no longer knows the session.
    async fn delete_session(&self, session: &WatchSession) -> ClientResult<bool>;
}

#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub base_url: Url,
    pub credentials: Credentials,
    pub timeout: Duration,
}

impl DeviceOptions {
    pub fn new(base_url: &str, credentials: Credentials) -> ClientResult<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            credentials,
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Device API over HTTP, every request signed with the configured credentials.
pub struct TabloDevice {
    base_url: Url,
    credentials: Credentials,
    http: reqwest::Client,
    identity: OnceCell<DeviceIdentity>,
}

impl TabloDevice {
    pub fn new(options: DeviceOptions) -> ClientResult<Self> {
        let http = reqwest::Client::builder().timeout(options.timeout).build()?;

        // normalised to a trailing slash; endpoint() pops it before appending
        let mut base_url = options.base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            credentials: options.credentials,
            http,
            identity: OnceCell::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL plus `segments`, each percent-encoded as a single path
    /// segment so ids cannot reach other endpoints.
    pub fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        if let Some(bad) = segments
            .iter()
            .find(|s| s.is_empty() || **s == "." || **s == "..")
        {
            return Err(ClientError::InvalidSegment(bad.to_string()));
        }

        let mut endpoint = self.base_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(endpoint)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> ClientResult<reqwest::Response> {
        let body = body.unwrap_or_default();
        let date = http_date(Utc::now());
        let authorization =
            self.credentials
                .authorization(method.as_str(), url.path(), &body, &date)?;

        log::debug!("Tablo: {} {}", method, url.path());

        let mut request = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, authorization)
            .header(DATE, date);
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        Ok(request.send().await?)
    }

    async fn request_json<T>(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> ClientResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(method, url, body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::HttpError(status));
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl DeviceApi for TabloDevice {
    async fn identity(&self) -> ClientResult<DeviceIdentity> {
        let identity = self
            .identity
            .get_or_try_init(|| async {
                let url = self.endpoint(&["server", "info"])?;
                let identity: DeviceIdentity = self.request_json(Method::GET, url, None).await?;
                log::info!(
                    "Tablo: connected to {} ({})",
                    identity.name,
                    identity.server_id
                );
                Ok::<_, ClientError>(identity)
            })
            .await?;
        Ok(identity.clone())
    }

    async fn channel(&self, channel_id: &str) -> ClientResult<Channel> {
        let url = self.endpoint(&["guide", "channels", channel_id])?;
        self.request_json(Method::GET, url, None).await
    }

    async fn watch(&self, channel_id: &str, client: &ClientInfo) -> ClientResult<WatchSession> {
        let url = self.endpoint(&["guide", "channels", channel_id, "watch"])?;
        let body = serde_json::to_vec(client)?;
        let mut session: WatchSession = self.request_json(Method::POST, url, Some(body)).await?;
        session.channel_id = channel_id.to_string();

        log::info!(
            "Tablo: watch session for channel {} (lease {}s)",
            channel_id,
            session.keepalive
        );
        Ok(session)
    }

    async fn keepalive(&self, session: &WatchSession) -> ClientResult<WatchSession> {
        let url = self.endpoint(&["player", "sessions", &session.token, "keepalive"])?;
        let response: KeepaliveResponse = self.request_json(Method::POST, url, None).await?;
        Ok(response.apply(session))
    }

    async fn delete_session(&self, session: &WatchSession) -> ClientResult<bool> {
        let url = self.endpoint(&["player", "sessions", &session.token])?;
        let response = self.send(Method::DELETE, url, None).await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ClientError::HttpError(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_keeps_prefix() -> anyhow::Result<()> {
        let device = TabloDevice::new(DeviceOptions::new(
            "http://10.0.0.5:8887/api",
            Credentials::default(),
        )?)?;
        assert_eq!(device.base_url().as_str(), "http://10.0.0.5:8887/api/");
        assert_eq!(
            device.base_url().join("server/info")?.path(),
            "/api/server/info"
        );
        Ok(())
    }

    #[test]
    fn test_endpoint_encodes_ids() -> anyhow::Result<()> {
        let device = TabloDevice::new(DeviceOptions::new(
            "http://10.0.0.5:8887/api",
            Credentials::default(),
        )?)?;

        let url = device.endpoint(&["guide", "channels", "S122912_503_01", "watch"])?;
        assert_eq!(url.path(), "/api/guide/channels/S122912_503_01/watch");

        let url = device.endpoint(&[
            "guide",
            "channels",
            "../../player/sessions/T1/keepalive?x#y",
            "watch",
        ])?;
        assert_eq!(
            url.path(),
            "/api/guide/channels/..%2F..%2Fplayer%2Fsessions%2FT1%2Fkeepalive%3Fx%23y/watch"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        Ok(())
    }

    #[test]
    fn test_endpoint_rejects_dot_segments() -> anyhow::Result<()> {
        let device = TabloDevice::new(DeviceOptions::new(
            "http://10.0.0.5:8887/",
            Credentials::default(),
        )?)?;
        for id in ["..", ".", ""] {
            assert!(matches!(
                device.endpoint(&["player", "sessions", id]),
                Err(ClientError::InvalidSegment(_))
            ));
        }
        assert_eq!(device.endpoint(&["server", "info"])?.path(), "/server/info");
        Ok(())
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            DeviceOptions::new("not a url", Credentials::default()),
            Err(ClientError::UrlParseError(_))
        ));
    }
}
