pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    /// Longest chunk prefix rendered by [`preview`].
    const PREVIEW_LIMIT: usize = 256;

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }

        let filter = match std::env::var("WEBSHELL_LOG_FILTER") {
            Ok(filter) => EnvFilter::new(filter),
            Err(_) => EnvFilter::new(default_filter_for(config.level)),
        };

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.level >= LogLevel::Debug)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .try_init()
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        Ok(())
    }

    /// The websocket stack logs every frame at trace; keep it at info.
    const NOISY_DEPENDENCIES: &[&str] = &["tokio_tungstenite", "tungstenite", "mio", "native_tls"];

    pub(crate) fn default_filter_for(level: LogLevel) -> String {
        match level {
            LogLevel::Trace => {
                let mut filter = String::from("info,webshell=trace,webshell_client=trace");
                for target in NOISY_DEPENDENCIES {
                    filter.push_str(&format!(",{target}=info"));
                }
                filter
            }
            LogLevel::Debug => "info,webshell=debug,webshell_client=debug".to_string(),
            LogLevel::Info => "info".to_string(),
            LogLevel::Warn => "warn".to_string(),
            LogLevel::Error => "error".to_string(),
        }
    }

    /// JSON-quoted text form of a chunk followed by its length, truncated
    /// for long output bursts.
    pub fn preview(bytes: &[u8]) -> String {
        let shown = &bytes[..bytes.len().min(PREVIEW_LIMIT)];
        let quoted = chunk_transport::json_string(shown);
        if shown.len() < bytes.len() {
            format!("{quoted}... ({} bytes)", bytes.len())
        } else {
            format!("{quoted} ({} bytes)", bytes.len())
        }
    }

    /// Preview for text, preview plus hexdump for anything that is not UTF-8.
    pub fn describe(bytes: &[u8]) -> String {
        if std::str::from_utf8(bytes).is_ok() {
            preview(bytes)
        } else {
            format!("{}\n{}", preview(bytes), hexdump(bytes))
        }
    }

    pub fn hexdump(bytes: &[u8]) -> String {
        use std::fmt::Write as _;
        const WIDTH: usize = 16;
        let mut out = String::new();
        for (row, line) in bytes.chunks(WIDTH).enumerate() {
            let _ = write!(out, "{:08x}  ", row * WIDTH);
            for column in 0..WIDTH {
                match line.get(column) {
                    Some(byte) => {
                        let _ = write!(out, "{byte:02x} ");
                    }
                    None => out.push_str("   "),
                }
            }
            out.push(' ');
            out.extend(line.iter().map(|&byte| {
                if byte.is_ascii_graphic() || byte == b' ' {
                    byte as char
                } else {
                    '.'
                }
            }));
            out.push('\n');
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn preview_quotes_control_bytes() {
            assert_eq!(preview(b"ls\r\n"), "\"ls\\r\\n\" (4 bytes)");
            assert_eq!(preview(b"\x1b[0m"), "\"\\u001b[0m\" (4 bytes)");
        }

        #[test]
        fn preview_truncates_long_chunks() {
            let long = vec![b'x'; PREVIEW_LIMIT + 10];
            assert!(preview(&long).ends_with(&format!("... ({} bytes)", PREVIEW_LIMIT + 10)));
        }

        #[test]
        fn hexdump_shows_offsets_and_printables() {
            let dump = hexdump(b"ls\r\n");
            assert!(dump.starts_with("00000000  6c 73 0d 0a "));
            assert!(dump.trim_end().ends_with("ls.."));
        }

        #[test]
        fn describe_adds_hexdump_for_binary() {
            assert!(!describe(b"ok").contains('\n'));
            assert!(describe(&[0xe4, 0xb8]).contains("00000000  e4 b8"));
        }

        #[test]
        fn trace_filter_quiets_websocket_internals() {
            let filter = default_filter_for(LogLevel::Trace);
            assert!(filter.starts_with("info,webshell=trace"));
            assert!(filter.contains(",tungstenite=info"));
        }

        #[test]
        fn quieter_levels_apply_everywhere() {
            assert_eq!(default_filter_for(LogLevel::Warn), "warn");
            assert_eq!(default_filter_for(LogLevel::Error), "error");
            assert!(!default_filter_for(LogLevel::Debug).contains("tungstenite"));
        }
    }
}
