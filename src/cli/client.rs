use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use std::time::Duration;

use crate::core::terminal::{
    print_error, print_info, print_schedule, print_status, print_success, print_warn,
    styled_status,
};

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")
}

/// Pull the most useful message out of an error body.
pub(crate) fn error_message(status: StatusCode, body: &serde_json::Value) -> String {
    let detail = body
        .get("error")
        .or_else(|| body.get("detail"))
        .and_then(|v| v.as_str());
    match detail {
        Some(msg) => format!("HTTP error: {} - {}", status, msg),
        None => format!("HTTP error: {}", status),
    }
}

async fn send(request: reqwest::RequestBuilder, api_url: &str) -> Result<(StatusCode, serde_json::Value)> {
    let resp = request
        .send()
        .await
        .map_err(|e| anyhow!("failed to connect to API at {}: {}", api_url, e))?;
    let status = resp.status();
    let body = resp
        .json::<serde_json::Value>()
        .await
        .unwrap_or(serde_json::Value::Null);
    Ok((status, body))
}

fn text<'a>(value: &'a serde_json::Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("-")
}

fn count(value: &serde_json::Value, key: &str) -> u64 {
    value.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

/// One-line description of a run summary from `/status`.
pub(crate) fn last_run_line(run: &serde_json::Value) -> String {
    format!(
        "{} {} ({}/{} databases, {} ms)",
        text(run, "run_id"),
        styled_status(text(run, "status")),
        count(run, "databases_succeeded"),
        count(run, "databases_total"),
        count(run, "duration_ms")
    )
}

fn print_report(body: &serde_json::Value) {
    let names: Vec<&str> = body
        .get("database_names")
        .and_then(|v| v.as_array())
        .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
        .unwrap_or_default();
    print_status(
        "Databases",
        &format!("{} ({})", count(body, "databases_configured"), names.join(", ")),
    );
    print_schedule(text(body, "scheduler_cron"), text(body, "timezone"));
    if body.get("currently_running").and_then(|v| v.as_bool()) == Some(true) {
        print_warn("A backup run is in progress");
    }

    match body.get("last_run").filter(|run| !run.is_null()) {
        Some(run) => {
            print_status("Last run", &last_run_line(run));
            if let Some(error) = run.get("error").and_then(|v| v.as_str()) {
                println!("    {}", error);
            }
            for result in run.get("backups").and_then(|v| v.as_array()).into_iter().flatten() {
                let error = result
                    .get("error")
                    .and_then(|v| v.as_str())
                    .map(|e| format!(": {}", e))
                    .unwrap_or_default();
                println!(
                    "    {} {}{}",
                    text(result, "database_identifier"),
                    styled_status(text(result, "status")),
                    error
                );
            }
        }
        None => print_info("No backup runs have been executed yet"),
    }
}

/// Human report by default; `raw` prints the JSON body as served.
pub async fn status(api_url: &str, raw: bool) -> Result<i32> {
    let client = http_client()?;
    let (status, body) = send(client.get(format!("{}/status", api_url)), api_url).await?;
    if !status.is_success() {
        print_error(&error_message(status, &body));
        return Ok(1);
    }
    if raw {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print_report(&body);
    }
    Ok(0)
}

pub async fn trigger_backup(api_url: &str, project: &str) -> Result<i32> {
    let client = http_client()?;
    let url = format!("{}/run/{}", api_url, urlencoding::encode(project));
    let (status, body) = send(client.post(url), api_url).await?;
    if !status.is_success() {
        print_error(&error_message(status, &body));
        return Ok(1);
    }

    if body.get("status").and_then(|v| v.as_str()) == Some("accepted") {
        let message = body
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Backup started for project: {}", project));
        print_success(&message);
    } else {
        println!("{}", serde_json::to_string_pretty(&body)?);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_error_then_detail() {
        let body = serde_json::json!({ "error": "project not found: ghost" });
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, &body),
            "HTTP error: 404 Not Found - project not found: ghost"
        );

        let body = serde_json::json!({ "detail": "Backup job is already running" });
        assert!(error_message(StatusCode::CONFLICT, &body).ends_with("Backup job is already running"));

        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, &serde_json::Value::Null),
            "HTTP error: 502 Bad Gateway"
        );
    }

    #[test]
    fn last_run_line_summarises_counts_and_status() {
        console::set_colors_enabled(false);
        let run = serde_json::json!({
            "run_id": "run-20260307-003000",
            "status": "partial",
            "databases_total": 3,
            "databases_succeeded": 2,
            "duration_ms": 4521
        });
        assert_eq!(
            last_run_line(&run),
            "run-20260307-003000 partial (2/3 databases, 4521 ms)"
        );
        assert_eq!(
            last_run_line(&serde_json::json!({})),
            "- - (0/0 databases, 0 ms)"
        );
    }

    #[tokio::test]
    async fn unreachable_api_is_an_error() {
        let err = status("http://127.0.0.1:1", true).await.unwrap_err();
        assert!(err.to_string().contains("failed to connect to API"));
    }
}
