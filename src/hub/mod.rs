pub mod handlers;
pub mod messages;
pub mod pumps;
pub mod session;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::constants;
use crate::storage::{ProviderRegistry, StorageProvider};
use crate::uploads::{UploadKey, UploadRegistry};

use messages::Frame;
use session::{Session, TransportKind};

/// Owns the set of connected sessions and the two background reapers.
/// Registration and unregistration are serialised through the event loop so
/// the session set has a single writer.
pub struct Hub {
	pub config: Arc<Config>,
	pub providers: Arc<ProviderRegistry>,
	pub uploads: Arc<UploadRegistry>,
	pub cancel: CancellationToken,

	sessions: DashMap<String, Arc<Session>>,

	register_tx: mpsc::Sender<Arc<Session>>,
	unregister_tx: mpsc::Sender<String>,

	// Reserved for future server-push fan-out; nothing subscribes yet.
	#[allow(dead_code)]
	broadcast_tx: broadcast::Sender<Frame>,

	event_rx: StdMutex<Option<(mpsc::Receiver<Arc<Session>>, mpsc::Receiver<String>)>>
}

impl Hub {
	pub fn new(config: Arc<Config>, providers: Arc<ProviderRegistry>, uploads: Arc<UploadRegistry>) -> Arc<Hub> {
		let (register_tx, register_rx) = mpsc::channel(64);
		let (unregister_tx, unregister_rx) = mpsc::channel(64);
		let (broadcast_tx, _) = broadcast::channel(64);

		Arc::new(Hub {
			config,
			providers,
			uploads,
			cancel: CancellationToken::new(),
			sessions: DashMap::new(),
			register_tx,
			unregister_tx,
			broadcast_tx,
			event_rx: StdMutex::new(Some((register_rx, unregister_rx)))
		})
	}

	/// Starts the event loop and both reapers. Runs until the hub token is
	/// cancelled; on the way out every remaining session is unregistered.
	pub async fn run(self: Arc<Hub>) {
		let (mut register_rx, mut unregister_rx) = self
			.event_rx
			.lock()
			.unwrap()
			.take()
			.expect("hub event loop started twice");

		tokio::spawn(self.clone().session_reaper());
		tokio::spawn(self.clone().upload_reaper());

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => break,

				registered = register_rx.recv() => {
					if let Some(session) = registered {
						debug!("Session {} registered ({:?}, {})", session.id, session.kind, session.claims.display());
						self.sessions.insert(session.id.clone(), session);
					}
				},

				unregistered = unregister_rx.recv() => {
					if let Some(session_id) = unregistered {
						self.drop_session(&session_id);
					}
				}
			}
		}

		let remaining: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();

		for session_id in remaining {
			self.drop_session(&session_id);
		}

		info!("Session hub stopped.");
	}

	pub async fn register(&self, session: Arc<Session>) {
		let _ = self.register_tx.send(session).await;
	}

	pub fn unregister(&self, session_id: &str) {
		let _ = self.unregister_tx.try_send(session_id.to_string());
	}

	pub fn find_session(&self, session_id: &str) -> Option<Arc<Session>> {
		self.sessions.get(session_id).map(|entry| entry.value().clone())
	}

	pub fn session_snapshot(&self) -> Vec<Arc<Session>> {
		self.sessions.iter().map(|entry| entry.value().clone()).collect()
	}

	/// The actual unregistration: close the queue, cancel the session token
	/// and reclaim uploads the departing identity left behind.
	fn drop_session(&self, session_id: &str) {
		let session = match self.sessions.remove(session_id) {
			Some((_, session)) => session,
			None => return
		};

		session.close_outbound();
		session.cancel.cancel();

		let orphaned = self.uploads.keys_owned_by(&session.claims);

		if !orphaned.is_empty() {
			debug!(
				"Session {} left {} in-flight upload(s); scheduling cancel",
				session.id,
				orphaned.len()
			);
		}

		for key in orphaned {
			self.schedule_upload_cancel(key);
		}

		debug!("Session {} unregistered", session_id);
	}

	/// Cancels one upload at its provider in a detached task so a slow
	/// backend can't stall the caller. The provider removes the registry
	/// entry and reclaims partial state.
	fn schedule_upload_cancel(&self, key: UploadKey) {
		let providers = self.providers.clone();
		let uploads = self.uploads.clone();

		tokio::spawn(async move {
			let entry = match uploads.get(&key) {
				Some(entry) => entry,
				None => return
			};

			let provider = match providers.get(&key.0) {
				Ok(provider) => provider,
				Err(err) => {
					// No provider can reclaim it; drop the entry so it does
					// not linger forever.
					warn!("No provider for orphaned upload '{}:{}': {}", key.0, key.1, err);
					uploads.remove(&key);
					return;
				}
			};

			let cancel = CancellationToken::new();
			let deadline = Duration::from_secs(constants::UPLOAD_CANCEL_DEADLINE_SECONDS);

			match timeout(deadline, provider.cancel_upload(&cancel, &entry.owner, &entry.path)).await {
				Ok(Ok(())) => debug!("Upload '{}:{}' cancelled at provider", key.0, key.1),
				Ok(Err(err)) => warn!("Cancelling upload '{}:{}' failed: {}", key.0, key.1, err),
				Err(_) => warn!("Cancelling upload '{}:{}' timed out", key.0, key.1)
			}
		});
	}

	/// Expires idle polling sessions. Duplex liveness is the pumps' job.
	async fn session_reaper(self: Arc<Hub>) {
		let mut ticker = interval(Duration::from_secs(constants::SESSION_REAPER_PERIOD_SECONDS));
		let idle_limit = Duration::from_secs(self.config.timeouts.idle);

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => break,
				_ = ticker.tick() => {}
			}

			let expired: Vec<String> = self
				.sessions
				.iter()
				.filter(|entry| {
					entry.value().kind == TransportKind::Polling && entry.value().idle_for() > idle_limit
				})
				.map(|entry| entry.key().clone())
				.collect();

			for session_id in expired {
				debug!("Reaping idle polling session {}", session_id);
				self.unregister(&session_id);
			}
		}
	}

	/// Expires uploads nobody has touched within the orphan TTL.
	async fn upload_reaper(self: Arc<Hub>) {
		let mut ticker = interval(Duration::from_secs(constants::UPLOAD_REAPER_PERIOD_SECONDS));
		let ttl = self.config.orphan_upload_ttl();

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => break,
				_ = ticker.tick() => {}
			}

			for key in self.uploads.stale_keys(ttl) {
				info!("Reaping orphaned upload '{}:{}'", key.0, key.1);
				self.schedule_upload_cancel(key);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::claims::UserClaims;

	fn test_hub() -> Arc<Hub> {
		Hub::new(
			Arc::new(Config::default()),
			Arc::new(ProviderRegistry::new()),
			Arc::new(UploadRegistry::new())
		)
	}

	#[tokio::test]
	async fn register_and_unregister_flow() {
		let hub = test_hub();
		let runner = tokio::spawn(hub.clone().run());

		let (session, _rx) = Session::new_duplex(UserClaims::anonymous(), &hub.cancel);
		let session = Arc::new(session);
		let session_id = session.id.clone();

		hub.register(session.clone()).await;

		// The event loop owns the set; give it a turn to apply the message.
		tokio::task::yield_now().await;
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(hub.find_session(&session_id).is_some());

		hub.unregister(&session_id);
		tokio::time::sleep(Duration::from_millis(20)).await;

		assert!(hub.find_session(&session_id).is_none());
		assert!(session.cancel.is_cancelled());
		assert!(session.outbound().is_none());

		hub.cancel.cancel();
		runner.await.unwrap();
	}

	#[tokio::test]
	async fn shutdown_unregisters_every_session() {
		let hub = test_hub();
		let runner = tokio::spawn(hub.clone().run());

		let mut ids = Vec::new();

		for _ in 0..3 {
			let (session, _rx) = Session::new_duplex(UserClaims::anonymous(), &hub.cancel);
			let session = Arc::new(session);
			ids.push(session.id.clone());
			hub.register(session).await;
		}

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(hub.session_snapshot().len(), 3);

		hub.cancel.cancel();
		runner.await.unwrap();

		for id in ids {
			assert!(hub.find_session(&id).is_none());
		}
	}
}
