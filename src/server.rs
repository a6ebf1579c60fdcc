use std::convert::Infallible;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::Response;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::chat::ChatService;
use crate::error::{AuthError, ChatError};
use crate::messages::{ClientEvent, ErrorBody, LoginRequest, LoginResponse, SendRequest, ServerEvent};
use crate::presence::{ConnectionId, Outbound};
use crate::session::{bearer_token, Claims};

const MAX_BODY_BYTES: u64 = 64 * 1024;

pub fn routes(
    service: ChatService,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_service = warp::any().map(move || service.clone());
    let authorization = warp::header::optional::<String>("authorization");

    let register = warp::path!("register")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_service.clone())
        .then(handle_register);

    let login = warp::path!("login")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_service.clone())
        .then(handle_login);

    let history = warp::path!("chat" / String / String)
        .and(warp::get())
        .and(authorization.clone())
        .and(with_service.clone())
        .then(handle_history);

    // Raw bytes so the token is checked before the body is parsed.
    let send = warp::path!("chat")
        .and(warp::post())
        .and(authorization.clone())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_service.clone())
        .then(handle_send);

    let ws = warp::path!("ws")
        .and(warp::ws())
        .and(authorization)
        .and(with_service)
        .then(handle_upgrade);

    let health = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "status": "ok" })).into_response());

    register
        .or(login)
        .unify()
        .or(history)
        .unify()
        .or(send)
        .unify()
        .or(ws)
        .unify()
        .or(health)
        .unify()
        .recover(handle_rejection)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_headers(["authorization", "content-type"])
                .allow_methods(["GET", "POST"]),
        )
        .with(warp::log("private_chat::http"))
}

fn error_reply(err: &ChatError) -> Response {
    warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            message: err.to_string(),
        }),
        err.status(),
    )
    .into_response()
}

fn token_from(header: Option<&str>) -> Result<&str, ChatError> {
    header
        .and_then(bearer_token)
        .ok_or(ChatError::Unauthenticated(AuthError::Malformed))
}

async fn handle_register(request: LoginRequest, service: ChatService) -> Response {
    match service.register(&request.username, &request.password).await {
        Ok(()) => warp::reply::with_status(
            warp::reply::json(&json!({ "username": request.username })),
            StatusCode::CREATED,
        )
        .into_response(),
        Err(e) => error_reply(&e),
    }
}

async fn handle_login(request: LoginRequest, service: ChatService) -> Response {
    match service.login(&request.username, &request.password).await {
        Ok(token) => warp::reply::json(&LoginResponse { token }).into_response(),
        Err(e) => error_reply(&e),
    }
}

async fn handle_history(
    user_a: String,
    user_b: String,
    authorization: Option<String>,
    service: ChatService,
) -> Response {
    let token = match token_from(authorization.as_deref()) {
        Ok(token) => token,
        Err(e) => return error_reply(&e),
    };
    match service.fetch_history(token, &user_a, &user_b).await {
        Ok(messages) => warp::reply::json(&messages).into_response(),
        Err(e) => error_reply(&e),
    }
}

async fn handle_send(authorization: Option<String>, body: Bytes, service: ChatService) -> Response {
    let token = match token_from(authorization.as_deref()) {
        Ok(token) => token,
        Err(e) => return error_reply(&e),
    };
    let sender = match service.authenticate(token) {
        Ok(sender) => sender,
        Err(e) => return error_reply(&e),
    };
    let request: SendRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return warp::reply::with_status(
                warp::reply::json(&ErrorBody {
                    message: format!("Invalid request body: {e}"),
                }),
                StatusCode::BAD_REQUEST,
            )
            .into_response()
        }
    };
    match service.send_as(&sender, request).await {
        Ok(stored) => {
            warp::reply::with_status(warp::reply::json(&stored), StatusCode::CREATED).into_response()
        }
        Err(e) => error_reply(&e),
    }
}

/// A bearer header on the upgrade request binds the connection up front;
/// otherwise the client must send a `join` event carrying its token.
async fn handle_upgrade(ws: Ws, authorization: Option<String>, service: ChatService) -> Response {
    let session = match authorization.as_deref() {
        None => None,
        Some(header) => {
            let bound = token_from(Some(header)).and_then(|token| service.authorize_join(token, None));
            match bound {
                Ok(claims) => Some(claims),
                Err(e) => return error_reply(&e),
            }
        }
    };
    ws.on_upgrade(move |socket| handle_connection(socket, service, session))
        .into_response()
}

fn send_event(outbound: &Outbound, event: &ServerEvent) {
    if let Ok(text) = serde_json::to_string(event) {
        let _ = outbound.send(Message::text(text));
    }
}

/// The live binding of one socket: its presence registration and the
/// moment its session token stops being valid.
struct Binding {
    id: ConnectionId,
    expires_at: i64,
}

async fn bind(
    service: &ChatService,
    outbound: &Outbound,
    current: &mut Option<Binding>,
    claims: Claims,
) {
    unbind(service, current).await;
    let username = claims.sub;
    *current = Some(Binding {
        id: service.presence().register(&username, outbound.clone()).await,
        expires_at: claims.exp,
    });
    info!(
        "Connection joined as {username} ({} active)",
        service.presence().connection_count(&username).await
    );
    send_event(outbound, &ServerEvent::Joined { username });
}

async fn unbind(service: &ChatService, current: &mut Option<Binding>) -> Option<String> {
    let binding = current.take()?;
    service.presence().unregister(binding.id).await
}

/// Resolves once the bound session expires; never while unbound.
async fn session_expiry(current: Option<&Binding>) {
    match current {
        Some(binding) => {
            let remaining = binding.expires_at.saturating_sub(Utc::now().timestamp());
            sleep(Duration::from_secs(u64::try_from(remaining).unwrap_or(0))).await;
        }
        None => std::future::pending().await,
    }
}

async fn handle_connection(ws: WebSocket, service: ChatService, session: Option<Claims>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                warn!("Failed to send WebSocket message: {e}");
                break;
            }
        }
    });

    let mut connection: Option<Binding> = None;
    if let Some(claims) = session {
        bind(&service, &tx, &mut connection, claims).await;
    }

    loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            () = session_expiry(connection.as_ref()) => {
                if let Some(username) = unbind(&service, &mut connection).await {
                    info!("Session of {username} expired; live delivery stopped");
                }
                let expired = ChatError::Unauthenticated(AuthError::Expired);
                send_event(&tx, &ServerEvent::Error { message: expired.to_string() });
                continue;
            }
        };
        let Some(result) = next else {
            break;
        };
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!("WebSocket error: {e}");
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_str() else {
            continue;
        };
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(ClientEvent::Join { token, username }) => {
                match service.authorize_join(&token, username.as_deref()) {
                    Ok(claims) => bind(&service, &tx, &mut connection, claims).await,
                    Err(e) => send_event(&tx, &ServerEvent::Error { message: e.to_string() }),
                }
            }
            Ok(ClientEvent::Leave) => {
                if let Some(username) = unbind(&service, &mut connection).await {
                    info!("{username} left the live channel");
                }
            }
            Err(e) => {
                send_event(
                    &tx,
                    &ServerEvent::Error {
                        message: format!("Unrecognised event: {e}"),
                    },
                );
            }
        }
    }

    if let Some(username) = unbind(&service, &mut connection).await {
        info!("{username} disconnected");
    }
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {e}"))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected a JSON body".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required".to_string())
    } else if let Some(e) = err.find::<warp::reject::MissingHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {err:?}");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };
    Ok(warp::reply::with_status(warp::reply::json(&ErrorBody { message }), status).into_response())
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tempfile::TempDir;
    use warp::http::StatusCode;

    use super::*;
    use crate::chat::tests::{service_in, service_with_ttl};
    use crate::messages::StoredMessage;

    async fn app(dir: &TempDir) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + 'static {
        routes(service_in(dir).await)
    }

    async fn login<F>(filter: &F, username: &str, password: &str) -> String
    where
        F: Filter + Clone + Send + Sync + 'static,
        F::Extract: Reply + Send,
    {
        let res = warp::test::request()
            .method("POST")
            .path("/login")
            .json(&json!({ "username": username, "password": password }))
            .reply(filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: LoginResponse = serde_json::from_slice(res.body()).unwrap();
        body.token
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials_generically() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        for (username, password) in [("alice", "wrong"), ("nobody", "pw1")] {
            let res = warp::test::request()
                .method("POST")
                .path("/login")
                .json(&json!({ "username": username, "password": password }))
                .reply(&filter)
                .await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
            let body: ErrorBody = serde_json::from_slice(res.body()).unwrap();
            assert_eq!(body.message, "Invalid username or password");
        }
    }

    #[tokio::test]
    async fn register_then_login() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        let res = warp::test::request()
            .method("POST")
            .path("/register")
            .json(&json!({ "username": "dave", "password": "pw4" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);

        let again = warp::test::request()
            .method("POST")
            .path("/register")
            .json(&json!({ "username": "dave", "password": "other" }))
            .reply(&filter)
            .await;
        assert_eq!(again.status(), StatusCode::CONFLICT);

        login(&filter, "dave", "pw4").await;
    }

    #[tokio::test]
    async fn alice_bob_carol_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        let alice = login(&filter, "alice", "pw1").await;

        let res = warp::test::request()
            .method("POST")
            .path("/chat")
            .header("authorization", bearer(&alice))
            .json(&json!({ "sender": "alice", "receiver": "bob", "content": "hi" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let sent: StoredMessage = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(sent.sender, "alice");
        assert_eq!(sent.content, "hi");

        let res = warp::test::request()
            .path("/chat/alice/bob")
            .header("authorization", bearer(&alice))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let alice_view: Vec<StoredMessage> = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(alice_view, vec![sent]);

        let bob = login(&filter, "bob", "pw2").await;
        let res = warp::test::request()
            .path("/chat/alice/bob")
            .header("authorization", bearer(&bob))
            .reply(&filter)
            .await;
        let bob_view: Vec<StoredMessage> = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(bob_view, alice_view);

        let res = warp::test::request()
            .path("/chat/alice/carol")
            .header("authorization", bearer(&bob))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn history_entries_carry_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        let alice = login(&filter, "alice", "pw1").await;
        warp::test::request()
            .method("POST")
            .path("/chat")
            .header("authorization", bearer(&alice))
            .json(&json!({ "receiver": "bob", "content": "hi" }))
            .reply(&filter)
            .await;
        let res = warp::test::request()
            .path("/chat/bob/alice")
            .header("authorization", bearer(&alice))
            .reply(&filter)
            .await;
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        let entry = &body.as_array().unwrap()[0];
        for field in ["id", "sender", "receiver", "content", "createdAt"] {
            assert!(entry.get(field).is_some(), "missing {field}");
        }
    }

    #[tokio::test]
    async fn chat_routes_require_a_valid_token() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;

        let res = warp::test::request().path("/chat/alice/bob").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = warp::test::request()
            .method("POST")
            .path("/chat")
            .header("authorization", "Bearer not-a-token")
            .json(&json!({ "receiver": "bob", "content": "hi" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        // Unauthenticated requests are rejected before the body is even parsed.
        let res = warp::test::request()
            .method("POST")
            .path("/chat")
            .body("{not json")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let bob = login(&filter, "bob", "pw2").await;
        let res = warp::test::request()
            .path("/chat/alice/bob")
            .header("authorization", bearer(&bob))
            .reply(&filter)
            .await;
        let history: Vec<StoredMessage> = serde_json::from_slice(res.body()).unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn send_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        let alice = login(&filter, "alice", "pw1").await;

        let cases = [
            (json!({ "sender": "bob", "receiver": "carol", "content": "x" }), StatusCode::FORBIDDEN),
            (json!({ "receiver": "bob", "content": "" }), StatusCode::BAD_REQUEST),
            (json!({ "receiver": "", "content": "x" }), StatusCode::BAD_REQUEST),
            (json!({ "content": "x" }), StatusCode::BAD_REQUEST),
            (json!({ "receiver": "bob smith", "content": "x" }), StatusCode::BAD_REQUEST),
            (json!({ "receiver": "a/b", "content": "x" }), StatusCode::BAD_REQUEST),
        ];
        for (body, expected) in cases {
            let res = warp::test::request()
                .method("POST")
                .path("/chat")
                .header("authorization", bearer(&alice))
                .json(&body)
                .reply(&filter)
                .await;
            assert_eq!(res.status(), expected, "{body}");
        }

        let res = warp::test::request()
            .method("POST")
            .path("/chat")
            .header("authorization", bearer(&alice))
            .body("{not json")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = warp::test::request()
            .path("/chat/alice/bob%20smith")
            .header("authorization", bearer(&alice))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bodies_without_content_length_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        let res = warp::test::request()
            .method("POST")
            .path("/login")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::LENGTH_REQUIRED);
    }

    #[tokio::test]
    async fn unknown_route_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        let res = warp::test::request().path("/nope").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res = warp::test::request().path("/health").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    async fn recv_event(client: &mut warp::test::WsClient) -> ServerEvent {
        let message = client.recv().await.unwrap();
        serde_json::from_str(message.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn live_delivery_reaches_joined_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        let alice = login(&filter, "alice", "pw1").await;
        let bob = login(&filter, "bob", "pw2").await;

        let mut bob_ws = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        bob_ws
            .send_text(json!({ "event": "join", "data": { "token": bob, "username": "bob" } }).to_string())
            .await;
        assert_eq!(
            recv_event(&mut bob_ws).await,
            ServerEvent::Joined { username: "bob".into() }
        );

        let res = warp::test::request()
            .method("POST")
            .path("/chat")
            .header("authorization", bearer(&alice))
            .json(&json!({ "receiver": "bob", "content": "ping" }))
            .reply(&filter)
            .await;
        let sent: StoredMessage = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(recv_event(&mut bob_ws).await, ServerEvent::ChatMessage(sent));
    }

    #[tokio::test]
    async fn join_with_someone_elses_name_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        let carol = login(&filter, "carol", "pw3").await;
        let alice = login(&filter, "alice", "pw1").await;

        let mut ws = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        ws.send_text(json!({ "event": "join", "data": { "token": carol, "username": "bob" } }).to_string())
            .await;
        assert!(matches!(recv_event(&mut ws).await, ServerEvent::Error { .. }));

        ws.send_text(json!({ "event": "join", "data": { "username": "bob", "token": "forged" } }).to_string())
            .await;
        assert!(matches!(recv_event(&mut ws).await, ServerEvent::Error { .. }));

        // Nothing was bound, so a message to bob is stored but not pushed here.
        let res = warp::test::request()
            .method("POST")
            .path("/chat")
            .header("authorization", bearer(&alice))
            .json(&json!({ "receiver": "bob", "content": "secret" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        ws.send_text(json!({ "event": "join", "data": { "token": carol } }).to_string())
            .await;
        assert_eq!(
            recv_event(&mut ws).await,
            ServerEvent::Joined { username: "carol".into() }
        );
    }

    #[tokio::test]
    async fn bearer_header_binds_on_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let filter = app(&dir).await;
        let bob = login(&filter, "bob", "pw2").await;

        let mut ws = warp::test::ws()
            .path("/ws")
            .header("authorization", bearer(&bob))
            .handshake(filter.clone())
            .await
            .unwrap();
        assert_eq!(
            recv_event(&mut ws).await,
            ServerEvent::Joined { username: "bob".into() }
        );

        let refused = warp::test::ws()
            .path("/ws")
            .header("authorization", "Bearer forged")
            .handshake(filter.clone())
            .await;
        assert!(refused.is_err());
    }

    async fn join(client: &mut warp::test::WsClient, token: &str) {
        client
            .send_text(json!({ "event": "join", "data": { "token": token } }).to_string())
            .await;
        assert!(matches!(recv_event(client).await, ServerEvent::Joined { .. }));
    }

    async fn wait_for_count(service: &ChatService, username: &str, expected: usize) {
        for _ in 0..100 {
            if service.presence().connection_count(username).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{username} never reached {expected} connection(s)");
    }

    #[tokio::test]
    async fn closing_the_socket_unregisters_it() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir).await;
        let filter = routes(service.clone());
        let bob = login(&filter, "bob", "pw2").await;

        let mut ws = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        join(&mut ws, &bob).await;
        assert_eq!(service.presence().connection_count("bob").await, 1);

        ws.send(Message::close()).await;
        wait_for_count(&service, "bob", 0).await;
    }

    #[tokio::test]
    async fn leave_stops_delivery_but_keeps_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir).await;
        let filter = routes(service.clone());
        let alice = login(&filter, "alice", "pw1").await;
        let bob = login(&filter, "bob", "pw2").await;

        let mut ws = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        join(&mut ws, &bob).await;
        ws.send_text(json!({ "event": "leave" }).to_string()).await;
        wait_for_count(&service, "bob", 0).await;

        let res = warp::test::request()
            .method("POST")
            .path("/chat")
            .header("authorization", bearer(&alice))
            .json(&json!({ "receiver": "bob", "content": "after leave" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);

        // The next frame is the reply to this event, not a pushed message.
        ws.send_text(json!({ "event": "wave" }).to_string()).await;
        assert!(matches!(recv_event(&mut ws).await, ServerEvent::Error { .. }));

        let history = service.fetch_history(&bob, "alice", "bob").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn binding_ends_when_the_session_expires() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_ttl(&dir, chrono::Duration::seconds(2)).await;
        let filter = routes(service.clone());
        let bob = login(&filter, "bob", "pw2").await;

        let mut ws = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        join(&mut ws, &bob).await;
        assert_eq!(service.presence().connection_count("bob").await, 1);

        let event = tokio::time::timeout(Duration::from_secs(5), recv_event(&mut ws))
            .await
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::Error {
                message: ChatError::Unauthenticated(AuthError::Expired).to_string()
            }
        );
        assert_eq!(service.presence().connection_count("bob").await, 0);
    }
}
