//! Terminal rendering of events and status changes.

use colored::{ColoredString, Colorize};
use rr_protocol::ipc::{Event, EventKind};
use rr_protocol::process_models::{ProcessRecord, ProcessStatus};

pub fn event_line(event: &Event) -> String {
    let label = kind_label(event.kind);
    let payload = &event.payload;

    let mut detail = Vec::new();
    if let Some(job) = &payload.job {
        detail.push(job.bold().to_string());
    }
    if let Some(step) = &payload.step {
        let name = match &step.lib {
            Some(lib) => format!("{lib}.{}", step.name),
            None => step.name.clone(),
        };
        detail.push(name.bold().to_string());
        if !step.args.is_empty() && event.kind == EventKind::StepStart {
            detail.push(format!("[{}]", step.args.join(", ")).dimmed().to_string());
        }
    }
    if let Some(status) = &payload.status {
        detail.push(outcome(status).to_string());
    }
    if let Some(ms) = payload.duration_ms {
        detail.push(format!("({ms} ms)").dimmed().to_string());
    }

    let mut line = format!("{:>4} {label} {}", event.seq, detail.join(" "));
    for log in &payload.logs {
        let level = log.level.as_deref().unwrap_or("LOG");
        line.push_str(&format!("\n          {} {}", level.dimmed(), log.message));
    }
    if let Some(message) = &payload.message {
        line.push_str(&format!("\n          {}", message.red()));
    }
    line
}

fn kind_label(kind: EventKind) -> ColoredString {
    let text = format!("{:<10}", kind.as_str());
    match kind {
        EventKind::JobStart | EventKind::JobEnd => text.cyan().bold(),
        EventKind::StepStart | EventKind::StepEnd => text.blue(),
        EventKind::JobError => text.red().bold(),
    }
}

fn outcome(status: &str) -> ColoredString {
    match status {
        "SUCCESS" => status.green(),
        "STOPPED" => status.yellow(),
        _ => status.red(),
    }
}

pub fn status(status: ProcessStatus) -> ColoredString {
    match status {
        ProcessStatus::Pending | ProcessStatus::Running => status.as_str().normal(),
        ProcessStatus::WaitingStep => status.as_str().yellow(),
        ProcessStatus::Completed => status.as_str().green().bold(),
        ProcessStatus::Failed => status.as_str().red().bold(),
        ProcessStatus::Stopped => status.as_str().yellow().bold(),
    }
}

pub fn summary(record: &ProcessRecord) -> String {
    let mut line = format!(
        "{} {} after {} step(s)",
        record.process_id.bold(),
        status(record.status),
        record.steps_completed
    );
    if let Some(failure) = &record.failure {
        if let Some(code) = failure.exit_code {
            line.push_str(&format!(" (exit code {code})"));
        }
        line.push_str(&format!("\n{}", failure.diagnostic.red()));
    }
    line
}
