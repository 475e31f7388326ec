#![forbid(unsafe_code)]

use quorum_engines::{SecretValue, SecretVault};

pub fn execute_vault_command(
    vault: &SecretVault,
    subcommand: &str,
    secret_id: Option<&str>,
    value: Option<&SecretValue>,
) -> Result<String, String> {
    match subcommand {
        "set" => {
            let id = require_secret_id(secret_id)?;
            let value = value.ok_or_else(|| "missing secret input value".to_string())?;
            vault
                .set_secret(id, value)
                .map_err(|e| format!("failed to store secret: {e}"))?;
            Ok("OK".to_string())
        }
        "has" => {
            let id = require_secret_id(secret_id)?;
            let has = vault
                .has_secret(id)
                .map_err(|e| format!("failed to check secret: {e}"))?;
            Ok(if has { "YES" } else { "NO" }.to_string())
        }
        "del" => {
            let id = require_secret_id(secret_id)?;
            let removed = vault
                .delete_secret(id)
                .map_err(|e| format!("failed to delete secret: {e}"))?;
            Ok(if removed { "OK" } else { "NOT_FOUND" }.to_string())
        }
        "ls" => {
            let ids = vault
                .list_secret_ids()
                .map_err(|e| format!("failed to list secrets: {e}"))?;
            Ok(ids.join("\n"))
        }
        _ => Err(format!(
            "unknown vault subcommand: {subcommand}. expected one of: set, has, del, ls"
        )),
    }
}

/// Text input is trimmed. Binary input is raw bytes, or hex when typed at a prompt.
pub fn parse_secret_input(
    raw: Vec<u8>,
    binary: bool,
    from_prompt: bool,
) -> Result<SecretValue, String> {
    if binary && !from_prompt {
        if raw.is_empty() {
            return Err("secret value must not be empty".to_string());
        }
        return Ok(SecretValue::Binary(raw));
    }
    let text = String::from_utf8(raw).map_err(|_| "secret value must be UTF-8".to_string())?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("secret value must not be empty".to_string());
    }
    if binary {
        let hex_digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(hex_digits)
            .map_err(|_| "binary secrets typed at a prompt must be hex".to_string())?;
        return Ok(SecretValue::Binary(bytes));
    }
    Ok(SecretValue::Text(trimmed.to_string()))
}

fn require_secret_id(raw: Option<&str>) -> Result<&str, String> {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| "missing secret id".to_string())
}
