//! Storage key constants.

/// Storage keys used by the client
pub struct StorageKeys;

impl StorageKeys {
    /// Short-lived bearer credential
    pub const ACCESS_TOKEN: &'static str = "access_token";

    /// Long-lived credential exchanged for a new access token
    pub const REFRESH_TOKEN: &'static str = "refresh_token";

    /// Both credential keys, in write order.
    pub const CREDENTIAL_PAIR: [&'static str; 2] = [Self::ACCESS_TOKEN, Self::REFRESH_TOKEN];
}
