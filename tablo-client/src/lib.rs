//! Client for the Tablo device API: request signing, device identity, channel
//! lookup and streaming session management.

pub mod auth;
pub mod device;
pub mod error;
pub mod model;

pub use auth::Credentials;
pub use device::{DeviceApi, DeviceOptions, TabloDevice};
pub use error::{ClientError, ClientResult};
pub use model::{Channel, ClientInfo, DeviceIdentity, OtaChannel, WatchSession};
