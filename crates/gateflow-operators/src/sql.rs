//! Statement rendering. Every statement an operator sends is built here.

use gateflow_core::task::CopyFormat;
use gateflow_warehouse::ObjectStoreCredentials;

/// How a `COPY` authenticates.
#[derive(Clone, Copy)]
pub enum CopyCredentials<'a> {
    Keys(&'a ObjectStoreCredentials),
    Role(&'a str),
}

pub fn delete_all(table: &str) -> String {
    format!("DELETE FROM {table}")
}

pub fn truncate(table: &str) -> String {
    format!("TRUNCATE TABLE {table}")
}

pub fn insert_select(table: &str, query: &str) -> String {
    format!("INSERT INTO {table}\n{}", query.trim())
}

fn format_clause(format: &CopyFormat) -> String {
    match format {
        CopyFormat::JsonAuto => "FORMAT AS JSON 'auto'".to_string(),
        CopyFormat::JsonPaths(uri) => format!("FORMAT AS JSON '{uri}'"),
    }
}

fn render_copy(
    table: &str,
    source: &str,
    format: &CopyFormat,
    creds: CopyCredentials<'_>,
    redact: bool,
) -> String {
    let mut out = format!("COPY {table}\nFROM '{source}'\n");
    match creds {
        CopyCredentials::Keys(keys) => {
            let secret = if redact { "***" } else { keys.secret_access_key.as_str() };
            out.push_str(&format!("ACCESS_KEY_ID '{}'\n", keys.access_key_id));
            out.push_str(&format!("SECRET_ACCESS_KEY '{secret}'\n"));
            if let Some(token) = &keys.session_token {
                let token = if redact { "***" } else { token.as_str() };
                out.push_str(&format!("SESSION_TOKEN '{token}'\n"));
            }
        }
        CopyCredentials::Role(arn) => out.push_str(&format!("IAM_ROLE '{arn}'\n")),
    }
    out.push_str(&format_clause(format));
    out
}

pub fn copy(table: &str, source: &str, format: &CopyFormat, creds: CopyCredentials<'_>) -> String {
    render_copy(table, source, format, creds, false)
}

/// The same statement with secrets masked, for logs.
pub fn copy_redacted(
    table: &str,
    source: &str,
    format: &CopyFormat,
    creds: CopyCredentials<'_>,
) -> String {
    render_copy(table, source, format, creds, true)
}
