use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity reported by `GET /server/info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub server_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub local_address: Option<String>,
    #[serde(default)]
    pub model: Option<DeviceModel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub tuners: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub ota: Option<OtaChannel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtaChannel {
    pub major: u32,
    pub minor: u32,
    #[serde(default)]
    pub call_sign: String,
    #[serde(default)]
    pub network: Option<String>,
}

impl Channel {
    /// "7.1 KABC" style label, falling back to the channel name.
    pub fn display_name(&self) -> String {
        match &self.ota {
            Some(ota) if !ota.call_sign.is_empty() => {
                format!("{}.{} {}", ota.major, ota.minor, ota.call_sign)
            }
            _ => self.name.clone(),
        }
    }
}

/// Client description sent with every watch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub device_id: String,
    pub platform: String,
    pub bandwidth: Option<u64>,
    pub extra: ClientExtra,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientExtra {
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub lang: String,
    pub device_make: String,
    pub device_model: String,
    pub device_type: String,
    #[serde(rename = "deviceOSVersion")]
    pub device_os_version: String,
    pub limited_ad_tracking: u8,
}

impl ClientInfo {
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            device_id: device_id.clone(),
            platform: "android".to_string(),
            bandwidth: None,
            extra: ClientExtra {
                device_id,
                width: 1920,
                height: 1080,
                lang: "en_US".to_string(),
                device_make: "tablo-live".to_string(),
                device_model: "tablo-live".to_string(),
                device_type: "android".to_string(),
                device_os_version: "14".to_string(),
                limited_ad_tracking: 1,
            },
        }
    }

    /// A client description with a fresh random device id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Remote streaming session granted by a watch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSession {
    pub token: String,
    pub expires: DateTime<Utc>,
    /// Lease length in seconds; the session must be refreshed before it runs out.
    pub keepalive: u64,
    pub playlist_url: String,
    #[serde(default)]
    pub channel_id: String,
}

impl WatchSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// Keepalive responses only carry the fields that changed.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct KeepaliveResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub keepalive: Option<u64>,
}

impl KeepaliveResponse {
    pub(crate) fn apply(self, session: &WatchSession) -> WatchSession {
        let mut refreshed = session.clone();
        if let Some(token) = self.token {
            refreshed.token = token;
        }
        if let Some(expires) = self.expires {
            refreshed.expires = expires;
        }
        if let Some(keepalive) = self.keepalive {
            refreshed.keepalive = keepalive;
        }
        refreshed
    }
}
