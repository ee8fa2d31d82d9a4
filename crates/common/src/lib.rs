//! Shared configuration and helpers for echelon components

pub mod paths;
pub mod policy;
pub mod settings;

pub use policy::CommandPolicy;
pub use settings::{Settings, SuStrategy};

/// Redact sensitive values from a command line before it is logged.
///
/// Tokens carrying inline secrets (`token=`, `password=`, `SECRET=`) and
/// values following secret-taking flags are replaced with `***`. Setting
/// `ECHELON_LOG_OPTS=raw` disables redaction for local debugging.
pub fn redact_command(command: &str) -> String {
    if std::env::var("ECHELON_LOG_OPTS").as_deref() == Ok("raw") {
        return command.to_string();
    }

    let tokens = echelon_cmdline::tokenize(command).tokens;
    let mut redacted = Vec::with_capacity(tokens.len());
    let mut mask_next = false;

    for token in tokens {
        if mask_next {
            redacted.push("***".to_string());
            mask_next = false;
            continue;
        }

        if token.contains("token=") || token.contains("password=") || token.contains("SECRET=") {
            let parts: Vec<&str> = token.splitn(2, '=').collect();
            if parts.len() == 2 {
                redacted.push(format!("{}=***", parts[0]));
                continue;
            }
        }

        if matches!(token.as_str(), "--token" | "--password" | "-p" | "-H" | "--header") {
            mask_next = true;
        }
        redacted.push(token);
    }

    redacted.join(" ")
}
