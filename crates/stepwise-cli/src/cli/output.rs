//! Shared terminal rendering helpers.

use anyhow::Result;
use console::{StyledObject, style};
use serde::Serialize;
use stepwise_core::engine::ResultCode;
use stepwise_types::execution::ExecutionStatus;

/// Pretty-print any serializable value as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Status text colored by outcome.
pub fn styled_status(status: ExecutionStatus) -> StyledObject<&'static str> {
    let text = style(status.as_str());
    match status {
        ExecutionStatus::Completed => text.green(),
        ExecutionStatus::Running => text.cyan(),
        ExecutionStatus::Paused => text.yellow(),
        ExecutionStatus::Failed => text.red(),
        ExecutionStatus::Cancelled => text.dim(),
    }
}

/// Report a command error on stderr, or as a JSON object on stdout.
pub fn print_error(message: &str, code: ResultCode, json: bool) {
    if json {
        let out = serde_json::json!({ "error": message, "code": code });
        match serde_json::to_string_pretty(&out) {
            Ok(text) => println!("{text}"),
            Err(_) => eprintln!("{message}"),
        }
        return;
    }
    eprintln!("{} {}", style("error:").red().bold(), message);
}

/// Milliseconds as a compact human duration.
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration_ms(42), "42ms");
        assert_eq!(format_duration_ms(1_500), "1.5s");
        assert_eq!(format_duration_ms(125_000), "2m05s");
    }
}
