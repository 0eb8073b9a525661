use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Build timestamp, honouring `SOURCE_DATE_EPOCH` for reproducible builds.
fn build_epoch_secs() -> i64 {
    if let Some(secs) = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
    {
        return secs;
    }
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}

fn main() {
    let date = DateTime::<Utc>::from_timestamp(build_epoch_secs(), 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=DSS_SERVER_BUILD_DATE={date}");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=build.rs");
}
