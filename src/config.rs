//! Ticket and OAuth settings.
//!
//! Defaults mirror a stock single sign-on deployment. `from_env` overlays
//! `SSO_*` variables (a `.env` file is honoured); unparsable values fall back
//! to the default.
use std::env;
use std::str::FromStr;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketProperties {
    pub tgt_max_time_to_live_in_seconds: i64,
    pub tgt_time_to_kill_in_seconds: i64,
    pub tgt_only_track_most_recent_session: bool,

    pub remember_me_enabled: bool,
    pub remember_me_time_to_kill_in_seconds: i64,

    pub timeout_max_time_to_live_in_seconds: i64,

    pub throttled_time_in_between_uses_in_seconds: i64,
    pub throttled_time_to_kill_in_seconds: i64,

    pub hard_timeout_time_to_kill_in_seconds: i64,

    pub st_number_of_uses: u32,
    pub st_time_to_kill_in_seconds: i64,

    pub pt_number_of_uses: u32,
    pub pt_time_to_kill_in_seconds: i64,
}

impl Default for TicketProperties {
    fn default() -> Self {
        Self {
            tgt_max_time_to_live_in_seconds: 28_800, // 8 hours
            tgt_time_to_kill_in_seconds: 7_200,      // 2 hours
            tgt_only_track_most_recent_session: true,
            remember_me_enabled: false,
            remember_me_time_to_kill_in_seconds: 1_209_600, // 14 days
            timeout_max_time_to_live_in_seconds: 0,
            throttled_time_in_between_uses_in_seconds: 0,
            throttled_time_to_kill_in_seconds: 0,
            hard_timeout_time_to_kill_in_seconds: 0,
            st_number_of_uses: 1,
            st_time_to_kill_in_seconds: 10,
            pt_number_of_uses: 1,
            pt_time_to_kill_in_seconds: 10,
        }
    }
}

impl TicketProperties {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let d = Self::default();
        Self {
            tgt_max_time_to_live_in_seconds: env_or(
                "SSO_TGT_MAX_TTL_SECONDS",
                d.tgt_max_time_to_live_in_seconds,
            ),
            tgt_time_to_kill_in_seconds: env_or(
                "SSO_TGT_TTK_SECONDS",
                d.tgt_time_to_kill_in_seconds,
            ),
            tgt_only_track_most_recent_session: env_or(
                "SSO_TGT_ONLY_TRACK_MOST_RECENT_SESSION",
                d.tgt_only_track_most_recent_session,
            ),
            remember_me_enabled: env_or("SSO_REMEMBER_ME_ENABLED", d.remember_me_enabled),
            remember_me_time_to_kill_in_seconds: env_or(
                "SSO_REMEMBER_ME_TTK_SECONDS",
                d.remember_me_time_to_kill_in_seconds,
            ),
            timeout_max_time_to_live_in_seconds: env_or(
                "SSO_TGT_TIMEOUT_MAX_TTL_SECONDS",
                d.timeout_max_time_to_live_in_seconds,
            ),
            throttled_time_in_between_uses_in_seconds: env_or(
                "SSO_TGT_THROTTLED_INTERVAL_SECONDS",
                d.throttled_time_in_between_uses_in_seconds,
            ),
            throttled_time_to_kill_in_seconds: env_or(
                "SSO_TGT_THROTTLED_TTK_SECONDS",
                d.throttled_time_to_kill_in_seconds,
            ),
            hard_timeout_time_to_kill_in_seconds: env_or(
                "SSO_TGT_HARD_TIMEOUT_TTK_SECONDS",
                d.hard_timeout_time_to_kill_in_seconds,
            ),
            st_number_of_uses: env_or("SSO_ST_NUMBER_OF_USES", d.st_number_of_uses),
            st_time_to_kill_in_seconds: env_or(
                "SSO_ST_TTK_SECONDS",
                d.st_time_to_kill_in_seconds,
            ),
            pt_number_of_uses: env_or("SSO_PT_NUMBER_OF_USES", d.pt_number_of_uses),
            pt_time_to_kill_in_seconds: env_or(
                "SSO_PT_TTK_SECONDS",
                d.pt_time_to_kill_in_seconds,
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthProperties {
    pub issuer: String,
    pub verification_uri: String,

    pub code_number_of_uses: u32,
    pub code_time_to_kill_in_seconds: i64,

    pub access_token_max_time_to_live_in_seconds: i64,
    pub access_token_time_to_kill_in_seconds: i64,
    pub create_as_jwt: bool,

    pub refresh_token_time_to_kill_in_seconds: i64,

    pub device_token_time_to_kill_in_seconds: i64,
    pub device_refresh_interval_in_seconds: i64,
    pub device_user_code_length: usize,
}

impl Default for OAuthProperties {
    fn default() -> Self {
        Self {
            issuer: "https://sso.example.org/oauth2.0".to_string(),
            verification_uri: "https://sso.example.org/oauth2.0/device".to_string(),
            code_number_of_uses: 1,
            code_time_to_kill_in_seconds: 30,
            access_token_max_time_to_live_in_seconds: 28_800,
            access_token_time_to_kill_in_seconds: 7_200,
            create_as_jwt: false,
            refresh_token_time_to_kill_in_seconds: 2_592_000, // 30 days
            device_token_time_to_kill_in_seconds: 300,
            device_refresh_interval_in_seconds: 15,
            device_user_code_length: 8,
        }
    }
}

impl OAuthProperties {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let d = Self::default();
        Self {
            issuer: env::var("SSO_OAUTH_ISSUER").unwrap_or(d.issuer),
            verification_uri: env::var("SSO_OAUTH_VERIFICATION_URI")
                .unwrap_or(d.verification_uri),
            code_number_of_uses: env_or("SSO_OAUTH_CODE_NUMBER_OF_USES", d.code_number_of_uses),
            code_time_to_kill_in_seconds: env_or(
                "SSO_OAUTH_CODE_TTK_SECONDS",
                d.code_time_to_kill_in_seconds,
            ),
            access_token_max_time_to_live_in_seconds: env_or(
                "SSO_OAUTH_ACCESS_TOKEN_MAX_TTL_SECONDS",
                d.access_token_max_time_to_live_in_seconds,
            ),
            access_token_time_to_kill_in_seconds: env_or(
                "SSO_OAUTH_ACCESS_TOKEN_TTK_SECONDS",
                d.access_token_time_to_kill_in_seconds,
            ),
            create_as_jwt: env_or("SSO_OAUTH_ACCESS_TOKEN_AS_JWT", d.create_as_jwt),
            refresh_token_time_to_kill_in_seconds: env_or(
                "SSO_OAUTH_REFRESH_TOKEN_TTK_SECONDS",
                d.refresh_token_time_to_kill_in_seconds,
            ),
            device_token_time_to_kill_in_seconds: env_or(
                "SSO_OAUTH_DEVICE_TOKEN_TTK_SECONDS",
                d.device_token_time_to_kill_in_seconds,
            ),
            device_refresh_interval_in_seconds: env_or(
                "SSO_OAUTH_DEVICE_REFRESH_INTERVAL_SECONDS",
                d.device_refresh_interval_in_seconds,
            ),
            device_user_code_length: env_or(
                "SSO_OAUTH_DEVICE_USER_CODE_LENGTH",
                d.device_user_code_length,
            ),
        }
    }
}
