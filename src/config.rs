use std::time::Duration;

/// Server-side configuration, parsed with a hand-rolled `from_args` loop
/// rather than pulling in a flags crate — this store has few enough
/// options that `clap` would be scaffolding rather than a convenience.
///
/// Flag names keep the `--flag_name` convention an operator already
/// knows from the on-disk log/config vocabulary, rather than being
/// restyled to kebab-case.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub database_path: String,
    pub log_path: String,
    pub rdb_persistence: bool,
    pub rdb_timeout_minutes: u64,
    pub aof_persistence: bool,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: 8234,
            database_path: "./databases".to_string(),
            log_path: "./logs".to_string(),
            rdb_persistence: true,
            rdb_timeout_minutes: 30,
            aof_persistence: true,
            debug: false,
        }
    }
}

impl Config {
    pub fn from_args(args: &[String]) -> Self {
        let mut config = Config::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--port" => {
                    if i + 1 < args.len() {
                        if let Ok(p) = args[i + 1].parse() {
                            config.port = p;
                        }
                        i += 1;
                    }
                }
                "--bind" => {
                    if i + 1 < args.len() {
                        config.bind = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--database_path" => {
                    if i + 1 < args.len() {
                        config.database_path = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--log_path" => {
                    if i + 1 < args.len() {
                        config.log_path = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--RDB_persistence" => {
                    if i + 1 < args.len() {
                        config.rdb_persistence = args[i + 1] != "False" && args[i + 1] != "false";
                        i += 1;
                    }
                }
                "--RDB_timeout" => {
                    if i + 1 < args.len() {
                        if let Ok(t) = args[i + 1].parse() {
                            config.rdb_timeout_minutes = t;
                        }
                        i += 1;
                    }
                }
                "--AOF_persistence" => {
                    if i + 1 < args.len() {
                        config.aof_persistence = args[i + 1] != "False" && args[i + 1] != "false";
                        i += 1;
                    }
                }
                "--debug" => {
                    config.debug = true;
                }
                _ => {}
            }
            i += 1;
        }
        config
    }

    /// The active snapshot cadence: `RDB_timeout` is a minute count under
    /// normal operation, reinterpreted as seconds when `--debug` is set so
    /// the cut-over path can be exercised without waiting half an hour.
    pub fn snapshot_interval(&self) -> Duration {
        let unit = if self.debug { 1 } else { 60 };
        Duration::from_secs(self.rdb_timeout_minutes * unit)
    }
}

/// Client-side configuration for `crucible-cli`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: 8234,
        }
    }
}

impl ClientConfig {
    pub fn from_args(args: &[String]) -> Self {
        let mut config = ClientConfig::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--server_host" => {
                    if i + 1 < args.len() {
                        config.server_host = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--server_port" => {
                    if i + 1 < args.len() {
                        if let Ok(p) = args[i + 1].parse() {
                            config.server_port = p;
                        }
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        config
    }
}
