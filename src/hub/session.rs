use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use nanoid::nanoid;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::claims::UserClaims;
use crate::constants;
use crate::hub::messages::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
	/// WebSocket client with reader/writer pumps attached.
	Duplex,

	/// Long-poll client; responses travel on the HTTP response, the outbound
	/// queue is a placeholder nobody drains.
	Polling
}

/// One connected client. Created on transport accept, destroyed by the hub's
/// unregister path; the identity never changes in between.
pub struct Session {
	pub id: String,
	pub claims: UserClaims,
	pub kind: TransportKind,
	pub cancel: CancellationToken,
	last_activity: StdMutex<Instant>,
	outbound_tx: StdMutex<Option<mpsc::Sender<Frame>>>
}

impl Session {
	/// Builds a duplex session plus the receiving end of its outbound queue,
	/// which the writer pump takes ownership of.
	pub fn new_duplex(claims: UserClaims, parent: &CancellationToken) -> (Session, mpsc::Receiver<Frame>) {
		let (tx, rx) = mpsc::channel(constants::OUTBOUND_QUEUE_CAPACITY);

		let session = Session {
			id: nanoid!((constants::SESSION_ID_LENGTH)),
			claims,
			kind: TransportKind::Duplex,
			cancel: parent.child_token(),
			last_activity: StdMutex::new(Instant::now()),
			outbound_tx: StdMutex::new(Some(tx))
		};

		(session, rx)
	}

	pub fn new_polling(id: String, claims: UserClaims, parent: &CancellationToken) -> Session {
		let (tx, rx) = mpsc::channel(constants::OUTBOUND_QUEUE_CAPACITY);

		// Nothing ever drains a polling queue.
		drop(rx);

		Session {
			id,
			claims,
			kind: TransportKind::Polling,
			cancel: parent.child_token(),
			last_activity: StdMutex::new(Instant::now()),
			outbound_tx: StdMutex::new(Some(tx))
		}
	}

	pub fn touch(&self) {
		*self.last_activity.lock().unwrap() = Instant::now();
	}

	pub fn idle_for(&self) -> Duration {
		self.last_activity.lock().unwrap().elapsed()
	}

	/// A sender for the outbound queue, or None once the hub has closed it.
	pub fn outbound(&self) -> Option<mpsc::Sender<Frame>> {
		self.outbound_tx.lock().unwrap().clone()
	}

	/// Drops the queue sender so the writer pump observes end-of-queue.
	/// Called only from the hub's unregister path.
	pub fn close_outbound(&self) {
		self.outbound_tx.lock().unwrap().take();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn claims() -> UserClaims {
		UserClaims::anonymous()
	}

	#[tokio::test]
	async fn enqueued_frames_arrive_in_order() {
		let root = CancellationToken::new();
		let (session, mut rx) = Session::new_duplex(claims(), &root);

		let tx = session.outbound().unwrap();
		for i in 0..5 {
			tx.send(Frame::response("pong", &i, None)).await.unwrap();
		}

		for i in 0..5 {
			let frame = rx.recv().await.unwrap();
			assert_eq!(frame.payload, Some(serde_json::json!(i)));
		}
	}

	#[tokio::test]
	async fn closing_the_queue_ends_the_receiver() {
		let root = CancellationToken::new();
		let (session, mut rx) = Session::new_duplex(claims(), &root);

		session.close_outbound();

		assert!(session.outbound().is_none());
		assert!(rx.recv().await.is_none());
	}

	#[test]
	fn child_token_follows_parent_cancellation() {
		let root = CancellationToken::new();
		let (session, _rx) = Session::new_duplex(claims(), &root);

		assert!(!session.cancel.is_cancelled());
		root.cancel();
		assert!(session.cancel.is_cancelled());
	}
}
