use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    pub static ref RUST_LOG_JSON: bool = std::env::var("RUST_LOG_JSON").is_ok();
}

/// Logging from `RUST_LOG`, disabled when it is not set.
pub fn init() {
    if let Ok(directives) = ::std::env::var("RUST_LOG") {
        init_with_directives(&directives);
    }
}

pub fn init_with_directives(directives: &str) {
    let initialized = pretty_env_logger::formatted_timed_builder()
        .parse_filters(directives)
        .format_timestamp_millis()
        .try_init();
    if initialized.is_err() {
        eprintln!("Logger is already initialized");
    }
}

/// Pretty printed JSON when `RUST_LOG_JSON` is set, `Debug` output otherwise.
pub fn pretty_json<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    if *RUST_LOG_JSON {
        match serde_json::to_string_pretty(value) {
            Ok(s) => s,
            Err(_) => format!("{value:?}"),
        }
    } else {
        format!("{value:?}")
    }
}
