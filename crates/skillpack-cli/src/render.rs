use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use skillpack_core::SkillError;
use skillpack_installer::{
    InstallOutcome, LockInfo, RemovalFinding, UninstallOutcome, UpdateOutcome,
    VersionComparison,
};
use skillpack_security::{HardLinkWarning, SymlinkSummary};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "err" => "[ERR]",
                "crit" => "[CRIT]",
                _ => "[..]",
            };
            format!("{} {message}", colorize(status_style(status), badge))
        }
    }
}

fn status_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "err" | "crit" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    let style = Style::new().fg_color(Some(color.into()));
    if status == "crit" {
        style.effects(Effects::BOLD)
    } else {
        style
    }
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn format_comparison_lines(comparison: &VersionComparison) -> Vec<String> {
    let mut lines = vec![format!(
        "changes: {} added, {} modified, {} removed, size {:+} bytes",
        comparison.files_added.len(),
        comparison.files_modified.len(),
        comparison.files_removed.len(),
        comparison.size_change
    )];
    for (marker, paths) in [
        ("+", &comparison.files_added),
        ("~", &comparison.files_modified),
        ("-", &comparison.files_removed),
    ] {
        lines.extend(
            paths
                .iter()
                .map(|path| format!("  {marker} {}", path.display())),
        );
    }
    lines
}

fn format_findings(findings: &[RemovalFinding]) -> Vec<String> {
    findings
        .iter()
        .map(|finding| format!("  - {}", finding.message()))
        .collect()
}

pub(crate) fn format_update_lines(outcome: &UpdateOutcome, style: OutputStyle) -> Vec<String> {
    match outcome {
        UpdateOutcome::Success(success) => {
            let mut lines = vec![render_status_line(
                style,
                "ok",
                &format!("updated {} at {}", success.name, success.path.display()),
            )];
            lines.extend(format_comparison_lines(&success.comparison));
            if let Some(backup) = &success.backup_path {
                lines.push(format!("backup kept at {}", backup.display()));
            }
            lines
        }
        UpdateOutcome::DryRun(preview) => {
            let mut lines = vec![render_status_line(
                style,
                "info",
                &format!("dry run: would update {} at {}", preview.name, preview.path.display()),
            )];
            lines.extend(format_comparison_lines(&preview.comparison));
            if preview.hard_link_files > 0 {
                lines.push(format!(
                    "{} hard-linked file(s) would need --force",
                    preview.hard_link_files
                ));
            }
            lines
        }
        UpdateOutcome::RolledBack(rolled_back) => {
            let mut lines = vec![
                render_status_line(
                    style,
                    "warn",
                    &format!(
                        "update of {} failed during {}; the previous version was restored",
                        rolled_back.name,
                        rolled_back.failed_state.as_str()
                    ),
                ),
                format!("reason: {}", rolled_back.failure_reason),
            ];
            if let Some(backup) = &rolled_back.backup_path {
                lines.push(format!("backup kept at {}", backup.display()));
            }
            lines
        }
        UpdateOutcome::RollbackFailed(failed) => {
            let mut lines = vec![
                render_status_line(
                    style,
                    "crit",
                    &format!(
                        "update of {} failed and the previous version could not be restored",
                        failed.name
                    ),
                ),
                format!("update error: {}", failed.failure_reason),
                format!("rollback error: {}", failed.rollback_error),
                format!("backup: {}", failed.backup_path.display()),
                "recovery:".to_string(),
            ];
            lines.extend(
                failed
                    .recovery_instructions
                    .iter()
                    .enumerate()
                    .map(|(index, step)| format!("  {}. {step}", index + 1)),
            );
            lines
        }
    }
}

pub(crate) fn format_uninstall_lines(outcome: &UninstallOutcome, style: OutputStyle) -> Vec<String> {
    match outcome {
        UninstallOutcome::Removed(result) => {
            let mut lines = vec![render_status_line(
                style,
                "ok",
                &format!(
                    "removed {} ({} files, {} directories, {} bytes)",
                    result.name,
                    result.report.files_removed,
                    result.report.directories_removed,
                    result.report.bytes_freed
                ),
            )];
            if !result.overridden.is_empty() {
                lines.push("removed despite:".to_string());
                lines.extend(format_findings(&result.overridden));
            }
            lines
        }
        UninstallOutcome::DryRun(preview) => {
            let mut lines = vec![render_status_line(
                style,
                "info",
                &format!(
                    "dry run: would remove {} ({} entries, {} bytes)",
                    preview.path.display(),
                    preview.entries,
                    preview.bytes
                ),
            )];
            lines.extend(format_findings(&preview.findings));
            lines
        }
        UninstallOutcome::NeedsConfirmation(failure) => {
            let mut lines = vec![render_status_line(
                style,
                "warn",
                &format!(
                    "{} contains data that may not belong to the skill; rerun with --force to remove it",
                    failure.path.display()
                ),
            )];
            lines.extend(format_findings(&failure.findings));
            lines
        }
    }
}

pub(crate) fn format_install_lines(outcome: &InstallOutcome, style: OutputStyle) -> Vec<String> {
    match outcome {
        InstallOutcome::Installed {
            name,
            path,
            files,
            bytes,
        } => vec![render_status_line(
            style,
            "ok",
            &format!(
                "installed {name} at {} ({files} entries, {bytes} bytes)",
                path.display()
            ),
        )],
        InstallOutcome::DryRun {
            name,
            path,
            files,
            bytes,
        } => vec![render_status_line(
            style,
            "info",
            &format!(
                "dry run: would install {name} at {} ({files} entries, {bytes} bytes)",
                path.display()
            ),
        )],
    }
}

pub(crate) fn format_check_lines(
    summary: &SymlinkSummary,
    hard_links: Option<&HardLinkWarning>,
    style: OutputStyle,
) -> Vec<String> {
    let concerns = summary.has_security_concerns || hard_links.is_some();
    let mut lines = vec![render_status_line(
        style,
        if concerns { "warn" } else { "ok" },
        &format!(
            "symlinks: {} total, {} escaping, {} directory",
            summary.total_symlinks, summary.escaping_symlinks, summary.directory_symlinks
        ),
    )];
    if let Some(warning) = &summary.warning {
        lines.push(warning.clone());
    }
    match hard_links {
        Some(warning) => {
            lines.push(warning.message.clone());
            lines.extend(warning.files.iter().map(|file| {
                format!(
                    "  - {} ({} links)",
                    file.relative_path.display(),
                    file.link_count
                )
            }));
        }
        None => lines.push("hard links: none".to_string()),
    }
    lines
}

pub(crate) fn format_lock_lines(lock_path: &std::path::Path, info: Option<&LockInfo>) -> Vec<String> {
    match info {
        None => vec![format!("not locked ({} absent)", lock_path.display())],
        Some(info) => {
            let mut lines = vec![
                format!("locked: {}", lock_path.display()),
                format!("  operation: {}", info.operation_type),
                format!("  pid: {}", info.pid),
                format!("  since: unix {}", info.timestamp),
            ];
            if let Some(package) = &info.package_path {
                lines.push(format!("  package: {package}"));
            }
            lines.push(
                "delete the lock file only if that process is no longer running".to_string(),
            );
            lines
        }
    }
}

pub(crate) fn format_error_lines(err: &anyhow::Error, style: OutputStyle) -> Vec<String> {
    let Some(skill_error) = err.downcast_ref::<SkillError>() else {
        return vec![render_status_line(style, "err", &format!("{err:#}"))];
    };
    match skill_error {
        SkillError::Critical {
            backup_path,
            recovery_instructions,
            ..
        } => {
            let mut lines = vec![render_status_line(style, "crit", &format!("{err:#}"))];
            if let Some(backup) = backup_path {
                lines.push(format!("backup: {}", backup.display()));
            }
            lines.extend(
                recovery_instructions
                    .iter()
                    .enumerate()
                    .map(|(index, step)| format!("  {}. {step}", index + 1)),
            );
            lines
        }
        SkillError::PartialFailure { errors, .. } => {
            let mut lines = vec![render_status_line(style, "err", &format!("{err:#}"))];
            lines.extend(errors.iter().map(|error| format!("  - {error}")));
            lines
        }
        _ => vec![render_status_line(style, "err", &format!("{err:#}"))],
    }
}
