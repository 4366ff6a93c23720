//! Console output for provisioning runs.
//!
//! Step progress, per-step results, the final run summary and the status
//! report. Structured logs go through `tracing`; this is the human view.

use colored::Colorize;

use crate::status::StatusReport;
use crate::summary::{RunSummary, StepOutcome};

/// Width of section rules.
const RULE_WIDTH: usize = 60;

/// Print a section header framed by thin rules.
pub fn print_section(title: &str) {
    let rule = "─".repeat(RULE_WIDTH);
    println!("\n{}\n {}\n{}", rule.bright_black(), title.cyan().bold(), rule.bright_black());
}

/// Print the header line for step `current` of `total`.
pub fn print_progress_step(current: usize, total: usize, step: &str) {
    let width = total.to_string().len();
    println!(
        "{} {}",
        format!("step {current:>width$}/{total}").bright_black(),
        step.cyan().bold()
    );
}

/// Print a completed-action line under the current step.
pub fn print_success(message: &str) {
    println!("  {} {message}", "ok".green().bold());
}

/// Print an advisory failure line.
pub fn print_warning(message: &str) {
    println!("  {} {}", "warn".yellow().bold(), message.yellow());
}

/// Print a fatal failure line to stderr.
pub fn print_error(message: &str) {
    eprintln!("  {} {}", "fail".red().bold(), message.red());
}

/// Print a hint line.
pub fn print_info(message: &str) {
    println!("  {} {message}", "note".blue());
}

/// Print a skipped-step line.
pub fn print_skipped(message: &str) {
    println!("  {} {}", "skip".bright_black(), message.bright_black());
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}

/// Print a list item.
pub fn print_list_item(item: &str) {
    println!("  {} {item}", "•".bright_black());
}

/// One summary row: result tag, padded step name, detail.
fn step_line(step: &str, outcome: &StepOutcome, width: usize) -> String {
    let name = format!("{step:<width$}");
    match outcome {
        StepOutcome::Completed(detail) => format!("  {} {} {detail}", "ok  ".green(), name.bold()),
        StepOutcome::Skipped(detail) => format!(
            "  {} {} {}",
            "skip".bright_black(),
            name.bold(),
            detail.bright_black()
        ),
        StepOutcome::Warning(detail) => format!(
            "  {} {} {}",
            "warn".yellow(),
            name.bold(),
            detail.yellow()
        ),
    }
}

/// Print the final run summary.
pub fn print_summary(summary: &RunSummary) {
    print_section("Provisioning Summary");

    let width = summary.steps.iter().map(|r| r.step.len()).max().unwrap_or(0);
    for record in &summary.steps {
        println!("{}", step_line(&record.step, &record.outcome, width));
    }

    println!();
    if let Some(ready) = &summary.readiness {
        print_kv("Server version", &ready.version);
    }
    if let Some(endpoint) = &summary.endpoint {
        print_kv("Endpoint", endpoint);
    }
    for path in &summary.log_paths {
        print_kv("Log", &path.display().to_string());
    }
    if let Some(script) = &summary.status_script {
        print_kv("Status check", &script.display().to_string());
    }

    let warnings = summary.warnings().len();
    println!();
    if warnings == 0 {
        print_success("Provisioning complete");
    } else {
        print_success(&format!("Provisioning complete with {warnings} warning(s)"));
    }
}

/// Print a status report.
pub fn print_status(report: &StatusReport, model: &str, endpoint: &str) {
    print_section("Inference Server Status");

    match (&report.server_version, &report.server_error) {
        (Some(version), _) => print_success(&format!("Server ready (version {version})")),
        (None, Some(err)) => print_error(&format!("Server not responding: {err}")),
        (None, None) => print_error("Server not responding"),
    }

    println!();
    print_info("Installed models:");
    if report.installed.is_empty() {
        print_list_item("(none)");
    }
    for entry in &report.installed {
        print_list_item(&format!("{} {}", entry.name, entry.details));
    }

    print_info("Loaded models:");
    if report.loaded.is_empty() {
        print_list_item("(none)");
    }
    for entry in &report.loaded {
        print_list_item(&format!("{} {}", entry.name, entry.details));
    }

    println!();
    if report.model_present {
        print_kv("Model", &format!("{model} (present)"));
    } else {
        print_warning(&format!("Model {model} is not installed"));
    }
    print_kv("Endpoint", endpoint);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_line_aligns_names() {
        colored::control::set_override(false);

        let done = step_line("gpu", &StepOutcome::Completed("1 GPU(s) detected".into()), 13);
        let skipped = step_line(
            "model",
            &StepOutcome::Skipped("deepseek-r1:14b already present".into()),
            13,
        );
        let warned = step_line("loaded-models", &StepOutcome::Warning("ps failed".into()), 13);

        assert_eq!(done, "  ok   gpu           1 GPU(s) detected");
        assert_eq!(skipped, "  skip model         deepseek-r1:14b already present");
        assert_eq!(warned, "  warn loaded-models ps failed");
    }
}
