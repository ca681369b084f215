use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use signoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field<'a> {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: &'a str,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let max_connections = config.database.max_connections.to_string();
    let timeout_secs = config.database.timeout_secs.to_string();
    let port = config.server.port.to_string();
    let graceful_shutdown_secs = config.server.graceful_shutdown_secs.to_string();
    let log_format = format!("{:?}", config.logging.format).to_lowercase();
    let allow_resubmission = config.approvals.allow_resubmission.to_string();
    let max_approval_level = config.approvals.max_approval_level.to_string();
    let default_page_size = config.approvals.default_page_size.to_string();
    let max_page_size = config.approvals.max_page_size.to_string();

    let fields = [
        Field { key_path: "database.url", env_keys: &["SIGNOFF_DATABASE_URL"], value: &config.database.url },
        Field {
            key_path: "database.max_connections",
            env_keys: &["SIGNOFF_DATABASE_MAX_CONNECTIONS"],
            value: &max_connections,
        },
        Field {
            key_path: "database.timeout_secs",
            env_keys: &["SIGNOFF_DATABASE_TIMEOUT_SECS"],
            value: &timeout_secs,
        },
        Field {
            key_path: "server.bind_address",
            env_keys: &["SIGNOFF_SERVER_BIND_ADDRESS"],
            value: &config.server.bind_address,
        },
        Field { key_path: "server.port", env_keys: &["SIGNOFF_SERVER_PORT"], value: &port },
        Field {
            key_path: "server.graceful_shutdown_secs",
            env_keys: &["SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            value: &graceful_shutdown_secs,
        },
        Field {
            key_path: "logging.level",
            env_keys: &["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"],
            value: &config.logging.level,
        },
        Field {
            key_path: "logging.format",
            env_keys: &["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"],
            value: &log_format,
        },
        Field {
            key_path: "approvals.allow_resubmission",
            env_keys: &["SIGNOFF_APPROVALS_ALLOW_RESUBMISSION"],
            value: &allow_resubmission,
        },
        Field {
            key_path: "approvals.max_approval_level",
            env_keys: &["SIGNOFF_APPROVALS_MAX_APPROVAL_LEVEL"],
            value: &max_approval_level,
        },
        Field {
            key_path: "approvals.default_page_size",
            env_keys: &["SIGNOFF_APPROVALS_DEFAULT_PAGE_SIZE"],
            value: &default_page_size,
        },
        Field {
            key_path: "approvals.max_page_size",
            env_keys: &["SIGNOFF_APPROVALS_MAX_PAGE_SIZE"],
            value: &max_page_size,
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        format!("- {} = {} (source: {source})", field.key_path, field.value)
    }));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("signoff.toml"), PathBuf::from("config/signoff.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn contains_path_walks_nested_tables() {
        let doc: toml::Value = "[approvals]\nallow_resubmission = false\n".parse().expect("toml");

        assert!(contains_path(&doc, "approvals.allow_resubmission"));
        assert!(!contains_path(&doc, "approvals.max_page_size"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
