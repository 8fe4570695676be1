//! WebSocket upgrade + per-connection session loop.
//!
//! Each connection owns one `DuelClient`. The loop `select!`s over socket
//! input, pushed challenge changes, pushed leaderboard changes and finished
//! assistant requests; every duel state change is sent as a full `duel` view.
//! The client is torn down when the socket goes away.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    Query, State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::client::DuelClient;
use crate::domain::{UserId, LEADERBOARD};
use crate::error::DuelError;
use crate::identity::resolve_user_id;
use crate::leaderboard::{self, leaderboard_query};
use crate::logic::{do_explain, do_quiz_hint};
use crate::protocol::{duel_view, ClientWsMessage, ServerWsMessage};
use crate::state::AppState;
use crate::util::trunc_for_log;

#[derive(Debug, Deserialize)]
pub struct WsParams {
  pub token: Option<String>,
}

#[instrument(level = "info", skip_all)]
pub async fn ws_upgrade(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
  Query(params): Query<WsParams>,
) -> impl IntoResponse {
  let user_id = resolve_user_id(params.token.as_deref());
  info!(target: "duel_backend", %user_id, "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state, user_id))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, user_id: UserId) {
  let mut client = match state.open_duel(user_id.clone()).await {
    Ok(c) => c,
    Err(e) => {
      error!(target: "duel_backend", error = %e, "Could not start duel session");
      send(&mut socket, &error_message(&e)).await;
      return;
    }
  };
  let mut board = match state.store.subscribe(LEADERBOARD, leaderboard_query()).await {
    Ok(sub) => sub,
    Err(e) => {
      error!(target: "duel_backend", error = %e, "Could not subscribe to leaderboard");
      send(&mut socket, &error_message(&e)).await;
      client.teardown();
      return;
    }
  };
  // Initial replay is summarized by the first leaderboard message.
  while board.try_recv().is_some() {}

  let (assistant_tx, mut assistant_rx) = mpsc::unbounded_channel::<ServerWsMessage>();
  info!(target: "duel_backend", subscribers = state.store.subscriber_count(), "WebSocket connected");

  let mut greeting = vec![
    ServerWsMessage::Welcome { user_id: user_id.clone(), points: client.state().points },
    ServerWsMessage::Duel { duel: duel_view(client.state()) },
  ];
  greeting.extend(leaderboard_message(&state).await);
  let mut open = send_all(&mut socket, greeting).await;

  while open {
    let out: Vec<ServerWsMessage> = tokio::select! {
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(msg) => {
            debug!(target: "duel_backend", "WS received: {:?}", &msg);
            handle_client_ws(msg, &state, &mut client, &assistant_tx).await
          }
          Err(e) => vec![ServerWsMessage::Error { message: format!("Invalid JSON: {}", e), retry: false }],
        },
        Some(Ok(Message::Ping(payload))) => {
          let _ = socket.send(Message::Pong(payload)).await;
          vec![]
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Err(e)) => {
          debug!(target: "duel_backend", error = %e, "WS receive error");
          break;
        }
        Some(Ok(_)) => vec![],
      },
      Some(change) = client.next_change() => {
        if client.apply_change(change).await {
          vec![ServerWsMessage::Duel { duel: duel_view(client.state()) }]
        } else {
          vec![]
        }
      }
      changed = board.recv() => match changed {
        Some(_) => {
          // Coalesce a burst of writes into one refresh.
          while board.try_recv().is_some() {}
          leaderboard_message(&state).await
        }
        None => break,
      },
      Some(reply) = assistant_rx.recv() => vec![reply],
    };
    open = send_all(&mut socket, out).await;
  }

  client.teardown();
  info!(target: "duel_backend", "WebSocket disconnected");
}

/// Dispatch one client message. Returns the replies to send right away;
/// assistant answers arrive later through `assistant_tx`.
#[instrument(level = "info", skip(state, client, assistant_tx), fields(me = %client.me()))]
async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &Arc<AppState>,
  client: &mut DuelClient,
  assistant_tx: &mpsc::UnboundedSender<ServerWsMessage>,
) -> Vec<ServerWsMessage> {
  match msg {
    ClientWsMessage::Ping => vec![ServerWsMessage::Pong],

    ClientWsMessage::FindOpponent => {
      let res = client.find_or_create().await;
      duel_reply(res, client)
    }

    ClientWsMessage::SubmitSolution => {
      let res = client.submit_solution().await;
      duel_reply(res, client)
    }

    ClientWsMessage::PlayAgain => {
      let res = client.play_again();
      duel_reply(res, client)
    }

    ClientWsMessage::Leaderboard => leaderboard_message(state).await,

    ClientWsMessage::SetName { name } => {
      // The leaderboard subscription pushes the updated board.
      match leaderboard::set_name(&state.store, client.me(), &name).await {
        Ok(()) => {
          info!(target: "duel", me = %client.me(), name = %trunc_for_log(&name, 40), "Display name set");
          vec![]
        }
        Err(e) => vec![error_message(&e)],
      }
    }

    ClientWsMessage::Explain { topic, style } => {
      let (state, tx) = (state.clone(), assistant_tx.clone());
      tokio::spawn(async move {
        let text = do_explain(&state, &topic, &style).await;
        let _ = tx.send(ServerWsMessage::Assistant { text });
      });
      vec![]
    }

    ClientWsMessage::QuizHint { question, style } => {
      let (state, tx) = (state.clone(), assistant_tx.clone());
      tokio::spawn(async move {
        let text = do_quiz_hint(&state, &question, &style).await;
        let _ = tx.send(ServerWsMessage::Assistant { text });
      });
      vec![]
    }
  }
}

/// Current view, preceded by an error when the operation failed.
fn duel_reply(res: Result<(), DuelError>, client: &DuelClient) -> Vec<ServerWsMessage> {
  let mut out = Vec::with_capacity(2);
  if let Err(e) = res {
    out.push(error_message(&e));
  }
  out.push(ServerWsMessage::Duel { duel: duel_view(client.state()) });
  out
}

fn error_message(err: &DuelError) -> ServerWsMessage {
  ServerWsMessage::Error {
    message: err.user_message(),
    retry: !matches!(err, DuelError::InvalidTransition { .. }),
  }
}

async fn leaderboard_message(state: &AppState) -> Vec<ServerWsMessage> {
  match leaderboard::ranked(&state.store).await {
    Ok(entries) => vec![ServerWsMessage::Leaderboard { entries }],
    Err(e) => vec![error_message(&e)],
  }
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e), "retry": false }).to_string()
  });
  if let Err(e) = socket.send(Message::Text(out)).await {
    error!(target: "duel_backend", error = %e, "WS send error");
    return false;
  }
  true
}

async fn send_all(socket: &mut WebSocket, msgs: Vec<ServerWsMessage>) -> bool {
  for msg in &msgs {
    if !send(socket, msg).await {
      return false;
    }
  }
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::machine::Phase;

  fn duel_status(msgs: &[ServerWsMessage]) -> Option<Phase> {
    msgs.iter().rev().find_map(|m| match m {
      ServerWsMessage::Duel { duel } => Some(duel.status),
      _ => None,
    })
  }

  async fn session(state: &Arc<AppState>, me: &str) -> DuelClient {
    state.open_duel(me.into()).await.unwrap()
  }

  #[tokio::test]
  async fn duel_messages_drive_two_sessions() {
    let state = Arc::new(AppState::for_tests().await);
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut a = session(&state, "A").await;
    let mut b = session(&state, "B").await;

    let out = handle_client_ws(ClientWsMessage::FindOpponent, &state, &mut a, &tx).await;
    assert_eq!(duel_status(&out), Some(Phase::Waiting));

    let out = handle_client_ws(ClientWsMessage::FindOpponent, &state, &mut b, &tx).await;
    assert_eq!(duel_status(&out), Some(Phase::InProgress));

    let out = handle_client_ws(ClientWsMessage::SubmitSolution, &state, &mut b, &tx).await;
    match out.last() {
      Some(ServerWsMessage::Duel { duel }) => {
        assert_eq!(duel.status, Phase::Completed);
        assert_eq!(duel.points, 100);
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[tokio::test]
  async fn wrong_phase_reports_error_without_retry() {
    let state = Arc::new(AppState::for_tests().await);
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut a = session(&state, "A").await;

    let out = handle_client_ws(ClientWsMessage::SubmitSolution, &state, &mut a, &tx).await;
    assert_eq!(out.len(), 2);
    assert!(matches!(&out[0], ServerWsMessage::Error { retry: false, .. }));
    assert_eq!(duel_status(&out), Some(Phase::Idle));
  }

  #[tokio::test]
  async fn store_outage_is_retryable() {
    let state = Arc::new(AppState::for_tests().await);
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut a = session(&state, "A").await;
    state.store.set_online(false);

    let out = handle_client_ws(ClientWsMessage::FindOpponent, &state, &mut a, &tx).await;
    assert!(matches!(&out[0], ServerWsMessage::Error { retry: true, .. }));
    assert_eq!(duel_status(&out), Some(Phase::Idle));
  }

  #[tokio::test]
  async fn set_name_shows_up_on_the_leaderboard() {
    let state = Arc::new(AppState::for_tests().await);
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut a = session(&state, "A").await;

    let out = handle_client_ws(ClientWsMessage::SetName { name: "Ada".into() }, &state, &mut a, &tx).await;
    assert!(out.is_empty());
    let out = handle_client_ws(ClientWsMessage::Leaderboard, &state, &mut a, &tx).await;
    match &out[0] {
      ServerWsMessage::Leaderboard { entries } => {
        let me = entries.iter().find(|e| e.user_id == "A").unwrap();
        assert_eq!((me.name.as_str(), me.points), ("Ada", 0));
        assert_eq!(me.rank, entries.len());
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[tokio::test]
  async fn assistant_replies_arrive_on_the_side_channel() {
    let state = Arc::new(AppState::for_tests().await);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut a = session(&state, "A").await;

    let out = handle_client_ws(
      ClientWsMessage::Explain { topic: "variables".into(), style: "Explain me like I'm five".into() },
      &state,
      &mut a,
      &tx,
    )
    .await;
    assert!(out.is_empty());
    match rx.recv().await {
      Some(ServerWsMessage::Assistant { text }) => assert!(text.starts_with("A variable is like a box")),
      other => panic!("unexpected {other:?}"),
    }
  }

  // ---------- full sessions over real sockets ----------

  use std::net::SocketAddr;
  use std::time::Duration;

  use futures::{SinkExt, StreamExt};
  use serde_json::{json, Value};
  use tokio_tungstenite::{connect_async, tungstenite::Message as Frame, MaybeTlsStream, WebSocketStream};

  type TestSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

  async fn serve(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, crate::routes::build_router(state)).await.unwrap();
    });
    addr
  }

  async fn connect(addr: SocketAddr, token: &str) -> TestSocket {
    let (ws, _) = connect_async(format!("ws://{addr}/ws?token={token}")).await.unwrap();
    ws
  }

  async fn send_json(ws: &mut TestSocket, msg: Value) {
    ws.send(Frame::Text(msg.to_string())).await.unwrap();
  }

  /// Skips server messages until one matches.
  async fn until(ws: &mut TestSocket, pred: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
      loop {
        match ws.next().await {
          Some(Ok(Frame::Text(txt))) => {
            let msg: Value = serde_json::from_str(&txt).unwrap();
            if pred(&msg) {
              return msg;
            }
          }
          Some(Ok(_)) => {}
          other => panic!("socket ended: {other:?}"),
        }
      }
    })
    .await
    .expect("no matching server message")
  }

  fn is_duel(status: &'static str) -> impl Fn(&Value) -> bool {
    move |msg| msg["type"] == "duel" && msg["duel"]["status"] == status
  }

  fn has_row(msg: &Value, user: &str, points: i64) -> bool {
    msg["type"] == "leaderboard"
      && msg["entries"]
        .as_array()
        .map_or(false, |rows| rows.iter().any(|r| r["userId"] == user && r["points"] == points))
  }

  #[tokio::test]
  async fn two_sockets_play_a_duel_and_release_subscriptions_on_close() {
    let state = Arc::new(AppState::for_tests().await);
    let baseline = state.store.subscriber_count();
    let addr = serve(state.clone()).await;

    let mut a = connect(addr, "A").await;
    let mut b = connect(addr, "B").await;
    for (ws, me) in [(&mut a, "A"), (&mut b, "B")] {
      let welcome = until(ws, |m| m["type"] == "welcome").await;
      assert_eq!(welcome["userId"], me);
      until(ws, is_duel("idle")).await;
      until(ws, |m| m["type"] == "leaderboard").await;
    }
    assert!(state.store.subscriber_count() > baseline);

    send_json(&mut a, json!({ "type": "find_opponent" })).await;
    until(&mut a, is_duel("waiting")).await;
    send_json(&mut b, json!({ "type": "find_opponent" })).await;
    let joined = until(&mut b, is_duel("in-progress")).await;
    // A only learns about the opponent through the pushed challenge change.
    let pushed = until(&mut a, is_duel("in-progress")).await;
    assert_eq!(pushed["duel"]["challenge"]["id"], joined["duel"]["challenge"]["id"]);

    send_json(&mut b, json!({ "type": "submit_solution" })).await;
    let won = until(&mut b, is_duel("completed")).await;
    assert_eq!(won["duel"]["outcome"], "won");
    assert_eq!(won["duel"]["points"], 100);

    let lost = until(&mut a, is_duel("completed")).await;
    assert_eq!(lost["duel"]["outcome"], "lost");
    until(&mut a, |m| has_row(m, "B", 100)).await;

    // One write burst, one leaderboard push.
    leaderboard::seed(&state.store, &[("x1", "X1", 5), ("x2", "X2", 6), ("x3", "X3", 7)]).await.unwrap();
    until(&mut a, |m| has_row(m, "x3", 7)).await;
    send_json(&mut a, json!({ "type": "ping" })).await;
    let next = until(&mut a, |m| m["type"] == "pong" || has_row(m, "x1", 5)).await;
    assert_eq!(next["type"], "pong", "burst produced a second leaderboard push");

    a.close(None).await.unwrap();
    b.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
      while state.store.subscriber_count() > baseline {
        tokio::time::sleep(Duration::from_millis(10)).await;
      }
    })
    .await
    .expect("closed sessions kept their subscriptions");
  }
}
