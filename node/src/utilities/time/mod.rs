use chrono::Utc;

pub struct TrustChainTime;

impl TrustChainTime {
    /// Milliseconds since the unix epoch.
    pub fn now() -> u64 {
        Utc::now().timestamp_millis() as u64
    }
}
