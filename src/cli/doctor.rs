//! `fca-session doctor` - configuration and reachability diagnostics.
//!
//! Validates configuration and probes the services a login depends on.
//! Each check reports pass/fail with a short detail line.

use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::session::cookies::ORIGIN_URL;
use crate::settings::fca_dir;

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(toml_path: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    println!("fca-session doctor");
    println!("==================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;
    let config = Config::from_env_with_toml(toml_path).map_err(|e| e.to_string());

    // ── Configuration checks ──────────────────────────────────

    check("Settings directory", check_fca_dir(), &mut passed, &mut failed);

    check(
        "Configuration",
        check_config(&config),
        &mut passed,
        &mut failed,
    );

    check(
        "Credential login",
        check_credentials(&config),
        &mut passed,
        &mut failed,
    );

    check(
        "Backup database",
        check_backup_db(&config),
        &mut passed,
        &mut failed,
    );

    // ── Reachability checks ───────────────────────────────────

    match &config {
        Ok(config) => {
            let timeout = config.network.http_timeout.min(Duration::from_secs(15));
            check(
                "Login API",
                probe_http_endpoint("Login API", &config.login.api_server, timeout).await,
                &mut passed,
                &mut failed,
            );
            check(
                "Web origin",
                probe_http_endpoint("Web origin", ORIGIN_URL, timeout).await,
                &mut passed,
                &mut failed,
            );
        }
        Err(_) => {
            check(
                "Reachability",
                CheckResult::Skip("configuration is invalid".to_string()),
                &mut passed,
                &mut failed,
            );
        }
    }

    // ── Summary ───────────────────────────────────────────────

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 && strict {
        anyhow::bail!("doctor strict mode failed with {failed} check(s)");
    }

    Ok(())
}

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_fca_dir() -> CheckResult {
    let dir = fca_dir();

    if dir.exists() {
        if dir.is_dir() {
            CheckResult::Pass(format!("{}", dir.display()))
        } else {
            CheckResult::Fail(format!("{} exists but is not a directory", dir.display()))
        }
    } else {
        CheckResult::Pass(format!("{} will be created on first run", dir.display()))
    }
}

fn check_config(config: &Result<Config, String>) -> CheckResult {
    match config {
        Ok(config) => CheckResult::Pass(format!(
            "auto-login {}, {} attempt(s), task timeout {}ms",
            if config.login.auto_login { "on" } else { "off" },
            config.login.max_attempts,
            config.network.task_timeout.as_millis()
        )),
        Err(e) => CheckResult::Fail(e.clone()),
    }
}

fn check_credentials(config: &Result<Config, String>) -> CheckResult {
    let Ok(config) = config else {
        return CheckResult::Skip("configuration is invalid".to_string());
    };
    if !config.login.auto_login {
        return CheckResult::Skip("auto-login disabled".to_string());
    }
    match &config.login.credentials {
        Some(credentials) => CheckResult::Pass(format!(
            "{}{}",
            crate::session::login_provider::mask(&credentials.email, 2),
            if credentials.two_factor.is_some() {
                " (with two-factor secret)"
            } else {
                ""
            }
        )),
        None => CheckResult::Fail(
            "auto-login is on but no credentials are configured (set FCA_EMAIL and FCA_PASSWORD)"
                .to_string(),
        ),
    }
}

fn check_backup_db(config: &Result<Config, String>) -> CheckResult {
    let Ok(config) = config else {
        return CheckResult::Skip("configuration is invalid".to_string());
    };
    if !config.backup.enabled {
        return CheckResult::Skip("backups disabled".to_string());
    }
    if !cfg!(feature = "libsql") {
        return CheckResult::Fail("built without the libsql feature".to_string());
    }
    let path = &config.backup.libsql_path;
    if path.exists() {
        CheckResult::Pass(format!("libSQL database exists ({})", path.display()))
    } else {
        CheckResult::Pass(format!(
            "libSQL database not found at {} (will be created on first login)",
            path.display()
        ))
    }
}

async fn probe_http_endpoint(label: &str, endpoint: &str, timeout: Duration) -> CheckResult {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return CheckResult::Fail(format!("{label} endpoint is empty"));
    }

    let url = match reqwest::Url::parse(endpoint) {
        Ok(url) => url,
        Err(e) => {
            return CheckResult::Fail(format!(
                "{label} endpoint URL is invalid ({}): {e}",
                redact_url_for_display(endpoint)
            ));
        }
    };

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => return CheckResult::Fail(format!("cannot construct HTTP client: {e}")),
    };

    match client.get(url.clone()).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_server_error() {
                CheckResult::Fail(format!(
                    "{label} reachable but unhealthy ({} at {})",
                    status,
                    redact_url_for_display(url.as_str())
                ))
            } else {
                CheckResult::Pass(format!(
                    "{} ({status})",
                    redact_url_for_display(url.as_str())
                ))
            }
        }
        Err(e) => CheckResult::Fail(format!(
            "{label} unreachable ({}): {e}",
            redact_url_for_display(url.as_str())
        )),
    }
}

fn redact_url_for_display(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() {
                let _ = url.set_username("redacted");
            }
            if url.password().is_some() {
                let _ = url.set_password(Some("redacted"));
            }
            url.to_string()
        }
        Err(_) => "<invalid-url>".to_string(),
    }
}
