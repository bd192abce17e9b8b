use console::pad_str_with;
use dialoguer::{theme::ColorfulTheme, Input};
use num_format::{Locale, ToFormattedString};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::app_state::AppState;
use crate::util::format_age;

/// Interactive operator shell. Returns when the operator types `exit`; the
/// caller uses that as the graceful-shutdown signal.
pub async fn interactive_shell(state: Arc<AppState>) {
	// Recommend the 'exit' command instead of CTRL+C so shutdown always runs
	// the graceful path.
	ctrlc::set_handler(|| {
		println!("Received CTRL+C. Type 'exit' to shut the gateway down cleanly.");
	})
	.expect("Error setting CTRL+C handler.");

	let (stop_shell_tx, mut stop_shell_rx) = broadcast::channel::<()>(1);

	tokio::spawn(async move {
		let shell_theme = ColorfulTheme::default();

		loop {
			let command: String = match Input::with_theme(&shell_theme).interact_text() {
				Ok(command) => command,
				Err(_) => {
					// No usable terminal (e.g. running under a supervisor);
					// leave shutdown to the process signal.
					std::future::pending::<()>().await;
					unreachable!();
				}
			};

			match command.to_lowercase().as_str() {
				"exit" => {
					let _ = stop_shell_tx.send(());
					break;
				},
				"help" => help_command(),
				"stores" => stores_command(state.clone()),
				"sessions" => sessions_command(state.clone()),
				"uploads" => uploads_command(state.clone()),
				other => println!("Unknown command '{}'. Type 'help' for the command list.", other)
			}
		}
	});

	let _ = stop_shell_rx.recv().await;
	println!("Shell stopping.");
}

// Commands

fn help_command() {
	println!("Commands:");
	println!("  stores    List configured storages");
	println!("  sessions  List connected sessions");
	println!("  uploads   List in-flight uploads");
	println!("  exit      Shut the gateway down cleanly");
}

fn stores_command(state: Arc<AppState>) {
	let mut output_text = String::new();

	let header = format!(
		"{}| Kind  | Permission entries\n",
		pad_str_with("Name", 24, console::Alignment::Left, None, ' ')
	);
	output_text.push_str(console::style(header).cyan().bold().to_string().as_str());

	for store in state.config.storages.iter() {
		output_text.push_str(&format!(
			"{}| {} | {}\n",
			pad_str_with(store.name.as_str(), 24, console::Alignment::Left, None, ' '),
			pad_str_with(store.kind.as_str(), 5, console::Alignment::Left, None, ' '),
			store.permissions.len()
		));
	}

	println!("\n{}", output_text);
}

fn sessions_command(state: Arc<AppState>) {
	let sessions = state.hub.session_snapshot();

	if sessions.is_empty() {
		println!("No connected sessions.");
		return;
	}

	let mut output_text = String::new();

	let header = format!(
		"{}| {}| Kind    | Idle\n",
		pad_str_with("Session", 18, console::Alignment::Left, None, ' '),
		pad_str_with("Identity", 28, console::Alignment::Left, None, ' ')
	);
	output_text.push_str(console::style(header).cyan().bold().to_string().as_str());

	for session in sessions {
		output_text.push_str(&format!(
			"{}| {}| {:?} | {}\n",
			pad_str_with(session.id.as_str(), 18, console::Alignment::Left, None, ' '),
			pad_str_with(session.claims.display(), 28, console::Alignment::Left, None, ' '),
			session.kind,
			format_age(session.idle_for())
		));
	}

	println!("\n{}", output_text);
}

fn uploads_command(state: Arc<AppState>) {
	if state.uploads.is_empty() {
		println!("No in-flight uploads.");
		return;
	}

	println!("{} in-flight upload(s):", state.uploads.len().to_formatted_string(&Locale::en));

	let mut output_text = String::new();

	let header = format!(
		"{}| {}| Kind  | {}| Idle\n",
		pad_str_with("Store", 16, console::Alignment::Left, None, ' '),
		pad_str_with("Path", 36, console::Alignment::Left, None, ' '),
		pad_str_with("Owner", 27, console::Alignment::Left, None, ' ')
	);
	output_text.push_str(console::style(header).cyan().bold().to_string().as_str());

	for upload in state.uploads.snapshot() {
		output_text.push_str(&format!(
			"{}| {}| {} | {}| {}\n",
			pad_str_with(upload.store.as_str(), 16, console::Alignment::Left, None, ' '),
			pad_str_with(upload.path.as_str(), 36, console::Alignment::Left, None, ' '),
			pad_str_with(upload.kind.as_str(), 5, console::Alignment::Left, None, ' '),
			pad_str_with(upload.owner.display(), 27, console::Alignment::Left, None, ' '),
			format_age(upload.idle_for())
		));
	}

	println!("\n{}", output_text);
}
