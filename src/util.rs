use std::time::Duration;

/// Compact age rendering for the shell tables, e.g. "4m 12s".
pub fn format_age(age: Duration) -> String {
	let total_secs = age.as_secs();

	if total_secs < 60 {
		return format!("{}s", total_secs);
	}

	let minutes = total_secs / 60;
	let seconds = total_secs % 60;

	if minutes < 60 {
		return format!("{}m {}s", minutes, seconds);
	}

	format!("{}h {}m", minutes / 60, minutes % 60)
}
