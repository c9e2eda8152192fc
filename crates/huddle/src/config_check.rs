use std::path::Path;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CheckResult {
    pub name: &'static str,
    pub severity: Severity,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Default)]
pub(crate) struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub(crate) fn push(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    fn check(&mut self, name: &'static str, severity: Severity, passed: bool, message: String) {
        self.push(CheckResult {
            name,
            severity,
            passed,
            message,
        });
    }

    pub(crate) fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn error_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.severity == Severity::Error && !r.passed)
            .count()
    }

    fn warning_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.severity == Severity::Warning && !r.passed)
            .count()
    }

    fn format_result(r: &CheckResult) -> String {
        let icon = if r.severity == Severity::Info {
            "·"
        } else if r.passed {
            "✓"
        } else {
            match r.severity {
                Severity::Warning => "⚠",
                _ => "✗",
            }
        };
        format!("{icon} {}", r.message)
    }

    pub(crate) fn to_summary_string(&self) -> String {
        let mut lines: Vec<String> = self.results.iter().map(Self::format_result).collect();
        let errors = self.error_count();
        let warnings = self.warning_count();
        if errors == 0 && warnings == 0 {
            lines.push("\nall checks passed".to_owned());
        } else {
            lines.push(format!("\n{errors} error(s), {warnings} warning(s)"));
        }
        lines.join("\n")
    }

    pub(crate) fn print_human(&self) {
        println!("{}", self.to_summary_string());
    }

    pub(crate) fn print_json(&self) {
        let value = self.to_json_value();
        println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_default()
        );
    }

    pub(crate) fn to_json_value(&self) -> serde_json::Value {
        let checks: Vec<serde_json::Value> = self
            .results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "severity": r.severity.as_str(),
                    "passed": r.passed,
                    "message": r.message,
                })
            })
            .collect();

        serde_json::json!({
            "passed": !self.has_errors(),
            "errors": self.error_count(),
            "warnings": self.warning_count(),
            "checks": checks,
        })
    }
}

pub(crate) fn validate_config(config_path: &Path) -> CheckReport {
    let mut report = CheckReport::default();

    let config = match Config::load(config_path) {
        Ok(c) => {
            report.check(
                "toml_parse",
                Severity::Error,
                true,
                "config syntax valid".to_owned(),
            );
            c
        }
        Err(e) => {
            report.check("toml_parse", Severity::Error, false, format!("{e:#}"));
            return report;
        }
    };

    check_server(&mut report, &config);
    check_reconnect(&mut report, &config);

    let toast_ok = config.notifications.toast_ms > 0;
    report.check(
        "toast_duration",
        Severity::Error,
        toast_ok,
        if toast_ok {
            format!("toasts dismiss after {} ms", config.notifications.toast_ms)
        } else {
            "notifications.toast_ms must be greater than zero".to_owned()
        },
    );

    report
}

fn check_server(report: &mut CheckReport, config: &Config) {
    let api_url = config.server.api_url.trim();
    let api_ok = api_url.starts_with("http://") || api_url.starts_with("https://");
    report.check(
        "api_url",
        Severity::Error,
        api_ok,
        if api_ok {
            format!("api: {api_url}")
        } else {
            format!("server.api_url '{api_url}' must start with http:// or https://")
        },
    );

    let push_url = config.push_url();
    let push_ok = push_url.starts_with("ws://") || push_url.starts_with("wss://");
    report.check(
        "push_url",
        Severity::Error,
        push_ok,
        if push_ok {
            format!("push: {push_url}")
        } else {
            format!("push url '{push_url}' must start with ws:// or wss://")
        },
    );
    if config.server.push_url.is_none() {
        report.check(
            "push_url_derived",
            Severity::Info,
            true,
            "push url derived from server.api_url".to_owned(),
        );
    }

    let timeout_ok = config.server.request_timeout_ms > 0;
    report.check(
        "request_timeout",
        Severity::Error,
        timeout_ok,
        if timeout_ok {
            format!("request timeout: {} ms", config.server.request_timeout_ms)
        } else {
            "server.request_timeout_ms must be greater than zero".to_owned()
        },
    );
}

fn check_reconnect(report: &mut CheckReport, config: &Config) {
    let reconnect = &config.reconnect;

    let delay_ok = reconnect.delay_ms > 0;
    report.check(
        "reconnect_delay",
        Severity::Error,
        delay_ok,
        if delay_ok {
            format!("reconnect delay: {} ms", reconnect.delay_ms)
        } else {
            "reconnect.delay_ms must be greater than zero".to_owned()
        },
    );

    let factor_ok = reconnect.factor.is_finite() && reconnect.factor >= 1.0;
    report.check(
        "reconnect_factor",
        Severity::Error,
        factor_ok,
        if factor_ok {
            format!("reconnect factor: {}", reconnect.factor)
        } else {
            format!(
                "reconnect.factor must be a finite number >= 1 (got {})",
                reconnect.factor
            )
        },
    );

    match reconnect.max_delay_ms {
        Some(max) if max < reconnect.delay_ms => report.check(
            "reconnect_max_delay",
            Severity::Error,
            false,
            format!(
                "reconnect.max_delay_ms ({max}) is below reconnect.delay_ms ({})",
                reconnect.delay_ms
            ),
        ),
        Some(_) if factor_ok && reconnect.factor <= 1.0 => report.check(
            "reconnect_max_delay",
            Severity::Warning,
            false,
            "reconnect.max_delay_ms has no effect while reconnect.factor is 1".to_owned(),
        ),
        Some(max) => report.check(
            "reconnect_max_delay",
            Severity::Info,
            true,
            format!("reconnect delay capped at {max} ms"),
        ),
        None if reconnect.factor > 1.0 => report.check(
            "reconnect_max_delay",
            Severity::Warning,
            false,
            "reconnect.max_delay_ms unset, backoff is capped at reconnect.delay_ms".to_owned(),
        ),
        None => report.check(
            "reconnect_max_delay",
            Severity::Info,
            true,
            "reconnect retries forever at a fixed interval".to_owned(),
        ),
    }
}
