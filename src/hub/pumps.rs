use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::constants;
use crate::error::GatewayError;
use crate::hub::handlers;
use crate::hub::messages::Frame;
use crate::hub::session::Session;
use crate::hub::Hub;

/// Runs both pumps for one duplex session. Returns when the reader exits;
/// by then the session has been handed to the hub's unregister path, which
/// is the only place that tears the transport down.
pub async fn run_session(hub: Arc<Hub>, session: Arc<Session>, socket: WebSocket, outbound_rx: mpsc::Receiver<Frame>) {
	let (sink, stream) = socket.split();

	let writer = tokio::spawn(writer_pump(session.clone(), sink, outbound_rx, hub.config.ping_interval()));

	reader_pump(hub.clone(), session.clone(), stream).await;

	hub.unregister(&session.id);

	// Unregister cancels the session token and closes the queue, so the
	// writer winds down on its own.
	let _ = writer.await;
}

/// Serialises every outbound write: queued frames, keep-alive probes and the
/// final close frame all leave through here.
async fn writer_pump(
	session: Arc<Session>,
	mut sink: SplitSink<WebSocket, Message>,
	mut outbound_rx: mpsc::Receiver<Frame>,
	ping_interval: Duration
) {
	let write_deadline = Duration::from_secs(constants::WRITE_DEADLINE_SECONDS);

	// Probe slightly ahead of the interval the client was told, so a healthy
	// peer always sees traffic before its own timer fires.
	let mut ticker = interval(ping_interval * 9 / 10);
	ticker.tick().await; // The first tick is immediate.

	loop {
		tokio::select! {
			_ = session.cancel.cancelled() => {
				let _ = timeout(write_deadline, sink.send(Message::Close(None))).await;
				break;
			},

			queued = outbound_rx.recv() => {
				let frame = match queued {
					Some(frame) => frame,
					None => {
						// Queue closed by the unregister path.
						let _ = timeout(write_deadline, sink.send(Message::Close(None))).await;
						break;
					}
				};

				let text = match serde_json::to_string(&frame) {
					Ok(text) => text,
					Err(err) => {
						debug!("Session {}: dropping unserialisable frame: {}", session.id, err);
						continue;
					}
				};

				match timeout(write_deadline, sink.send(Message::Text(text))).await {
					Ok(Ok(())) => {},
					_ => break
				}
			},

			_ = ticker.tick() => {
				match timeout(write_deadline, sink.send(Message::Ping(Vec::new()))).await {
					Ok(Ok(())) => {},
					_ => break
				}
			}
		}
	}
}

/// Decodes inbound frames under the read deadline and fans each one out to a
/// handler task. Exits on cancellation, transport close, deadline or decode
/// error.
async fn reader_pump(hub: Arc<Hub>, session: Arc<Session>, mut stream: SplitStream<WebSocket>) {
	let read_deadline = hub.config.ping_interval() * constants::READ_DEADLINE_PING_MULTIPLIER;

	loop {
		let next = tokio::select! {
			_ = session.cancel.cancelled() => break,
			next = timeout(read_deadline, stream.next()) => next
		};

		let message = match next {
			Err(_) => {
				debug!("Session {}: read deadline exceeded", session.id);
				break;
			},
			Ok(None) => break,
			Ok(Some(Err(err))) => {
				debug!("Session {}: transport error: {}", session.id, err);
				break;
			},
			Ok(Some(Ok(message))) => message
		};

		match message {
			Message::Pong(_) | Message::Ping(_) => session.touch(),

			Message::Close(_) => break,

			Message::Text(text) => {
				if text.len() > constants::MAX_CONTROL_FRAME_SIZE {
					debug!("Session {}: inbound frame over {} bytes", session.id, constants::MAX_CONTROL_FRAME_SIZE);
					break;
				}

				session.touch();

				match serde_json::from_str::<Frame>(&text) {
					Ok(frame) => spawn_handler(hub.clone(), session.clone(), frame),
					Err(err) => {
						debug!("Session {}: undecodable frame: {}", session.id, err);
						break;
					}
				}
			},

			Message::Binary(_) => {
				debug!("Session {}: unexpected binary frame", session.id);
				break;
			}
		}
	}
}

/// One task per inbound frame: handlers run concurrently and may finish out
/// of order; the request id restores pairing on the client side.
fn spawn_handler(hub: Arc<Hub>, session: Arc<Session>, frame: Frame) {
	tokio::spawn(async move {
		let handler_cancel = session.cancel.child_token();
		let request_id = frame.request_id.clone();
		let handler_timeout = Duration::from_secs(constants::HANDLER_TIMEOUT_SECONDS);

		let response = tokio::select! {
			// The session is gone; nobody is waiting for a response.
			_ = handler_cancel.cancelled() => return,

			result = timeout(handler_timeout, handlers::dispatch(&hub, &session.claims, &handler_cancel, frame)) => {
				match result {
					Ok(response) => response,
					Err(_) => Frame::error(&GatewayError::Timeout, request_id)
				}
			}
		};

		let outbound = match session.outbound() {
			Some(outbound) => outbound,
			None => return
		};

		tokio::select! {
			_ = session.cancel.cancelled() => {},
			_ = handler_cancel.cancelled() => {},
			sent = outbound.send(response) => { let _ = sent; }
		}
	});
}
