use std::io::Write;

use env_logger::Env;

/// Initializes the global logger.
///
/// Filter comes from `RUST_LOG` (default `info`). Lines are prefixed with
/// a UTC timestamp, the level and the module target.
pub fn init() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
