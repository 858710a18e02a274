// 📝 Telemetry - tracing subscriber setup and key masking

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process.
///
/// Filter comes from `RUST_LOG` (default `info`). `LOG_FORMAT=json` switches to
/// JSON lines. Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}

/// Mask the middle half of a credential so it can appear in logs.
///
/// `"1234567890abcdef"` becomes `"1234********cdef"`.
pub fn censor_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let half = chars.len() / 2;
    let (first, second) = chars.split_at(half);

    let keep_front = first.len() / 2;
    let keep_back = second.len() - second.len() / 2;

    let mut out = String::with_capacity(chars.len());
    out.extend(&first[..keep_front]);
    out.extend(std::iter::repeat('*').take(first.len() - keep_front));
    out.extend(std::iter::repeat('*').take(second.len() - keep_back));
    out.extend(&second[second.len() - keep_back..]);
    out
}
