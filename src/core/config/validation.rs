use thiserror::Error;

use super::settings::AppConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.host.trim().is_empty() {
        return Err(invalid("server.host", "must not be empty"));
    }

    if config.session.idle_timeout_secs == 0 {
        return Err(invalid("session.idle_timeout_secs", "must be at least 1"));
    }
    if config.session.send_buffer == 0 {
        return Err(invalid("session.send_buffer", "must be at least 1"));
    }

    if config.storage.upload_dir.trim().is_empty() {
        return Err(invalid("storage.upload_dir", "must not be empty"));
    }
    if config.storage.database_file.trim().is_empty() {
        return Err(invalid("storage.database_file", "must not be empty"));
    }
    if config.storage.max_upload_bytes == 0 {
        return Err(invalid("storage.max_upload_bytes", "must be at least 1"));
    }

    if config.llm.request_timeout_secs == 0 {
        return Err(invalid("llm.request_timeout_secs", "must be at least 1"));
    }
    if let Some(temperature) = config.llm.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(invalid("llm.temperature", "must be between 0.0 and 2.0"));
        }
    }

    let rag = &config.rag;
    if rag.chunk_size == 0 {
        return Err(invalid("rag.chunk_size", "must be at least 1"));
    }
    if rag.chunk_overlap >= rag.chunk_size {
        return Err(invalid(
            "rag.chunk_overlap",
            format!("must be smaller than chunk_size ({})", rag.chunk_size),
        ));
    }
    if rag.top_k == 0 {
        return Err(invalid("rag.top_k", "must be at least 1"));
    }
    if rag.embed_batch_size == 0 {
        return Err(invalid("rag.embed_batch_size", "must be at least 1"));
    }

    Ok(())
}
