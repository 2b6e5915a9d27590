use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// `run_<millis>_<6 hex>`.
pub fn generate_run_id() -> String {
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", now_ms(), &rand[..6])
}
