use serde::Deserialize;
use std::fmt;

/// Form posted by a user entering the code shown on their device.
#[derive(Clone, Deserialize)]
pub struct DeviceApprovalRequest {
    pub user_code: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DeviceApprovalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceApprovalRequest")
            .field("user_code", &self.user_code)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
