use env_logger::{Builder, Env};

/// `GAZECTL_LOG` overrides the default `info` filter.
pub fn init() {
    Builder::from_env(Env::new().filter_or("GAZECTL_LOG", "info"))
        .format_timestamp_millis()
        .init();
}
