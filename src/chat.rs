use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::credentials::{validate_username, CredentialStore};
use crate::error::{ChatError, InvalidRequest};
use crate::messages::{SendRequest, ServerEvent, StoredMessage};
use crate::presence::{DeliveryResult, Presence};
use crate::session::{Claims, SessionIssuer};
use crate::store::{ConversationKey, MessageStore};

/// Coordinates login, sending and history. Every entry point except login
/// and registration verifies the session token before touching the message
/// store or the presence registry.
#[derive(Clone)]
pub struct ChatService {
    credentials: Arc<dyn CredentialStore>,
    sessions: SessionIssuer,
    store: Arc<dyn MessageStore>,
    presence: Presence,
    max_content_len: usize,
}

impl ChatService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: SessionIssuer,
        store: Arc<dyn MessageStore>,
        presence: Presence,
        max_content_len: usize,
    ) -> Self {
        Self {
            credentials,
            sessions,
            store,
            presence,
            max_content_len,
        }
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), ChatError> {
        self.credentials.register(username, password).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String, ChatError> {
        match self.credentials.verify(username, password).await {
            Ok(subject) => {
                let token = self.sessions.issue(&subject).map_err(|e| {
                    error!("Failed to issue session for {subject}: {e}");
                    ChatError::Internal(e.to_string())
                })?;
                info!("User {subject} logged in");
                Ok(token)
            }
            Err(ChatError::StorageUnavailable(reason)) => Err(ChatError::StorageUnavailable(reason)),
            Err(_) => {
                warn!("Failed login attempt");
                Err(ChatError::AuthenticationFailed)
            }
        }
    }

    pub fn authenticate(&self, token: &str) -> Result<String, ChatError> {
        self.claims(token).map(|claims| claims.sub)
    }

    fn claims(&self, token: &str) -> Result<Claims, ChatError> {
        self.sessions.verify(token).map_err(|e| {
            debug!("Rejected session token: {e}");
            ChatError::Unauthenticated(e)
        })
    }

    /// Sends on behalf of `sender`, which must be the subject returned by
    /// [`ChatService::authenticate`]: validate, persist, then push to the
    /// receiver's live connections.
    pub async fn send_as(
        &self,
        sender: &str,
        request: SendRequest,
    ) -> Result<StoredMessage, ChatError> {
        self.validate(sender, &request)?;

        let stored = self
            .store
            .append(sender, &request.receiver, &request.content)
            .await
            .map_err(|e| {
                error!("Failed to persist message from {sender}: {e}");
                e
            })?;

        match self
            .presence
            .deliver(&stored.receiver, &ServerEvent::ChatMessage(stored.clone()))
            .await
        {
            DeliveryResult::Delivered(count) => {
                debug!("Message {} pushed to {} connection(s)", stored.id, count);
            }
            DeliveryResult::NoActiveConnection => {
                debug!("{} is offline; message {} kept for history", stored.receiver, stored.id);
            }
        }
        Ok(stored)
    }

    pub async fn fetch_history(
        &self,
        token: &str,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        let caller = self.authenticate(token)?;
        validate_username(user_a)?;
        validate_username(user_b)?;
        if !ConversationKey::new(user_a, user_b).contains(&caller) {
            warn!("{caller} attempted to read conversation {user_a}/{user_b}");
            return Err(ChatError::Forbidden);
        }
        self.store.query(user_a, user_b).await
    }

    /// Resolves the session a real-time connection may bind to. The
    /// binding lasts until the returned claims expire.
    pub fn authorize_join(&self, token: &str, claimed: Option<&str>) -> Result<Claims, ChatError> {
        let claims = self.claims(token)?;
        match claimed {
            Some(claimed) if claimed != claims.sub => {
                warn!("Connection authenticated as {} tried to join as {claimed}", claims.sub);
                Err(ChatError::Forbidden)
            }
            _ => Ok(claims),
        }
    }

    fn validate(&self, sender: &str, request: &SendRequest) -> Result<(), InvalidRequest> {
        match request.sender.as_deref() {
            Some("") => return Err(InvalidRequest::EmptySender),
            Some(claimed) if claimed != sender => {
                warn!("{sender} tried to send as {claimed}");
                return Err(InvalidRequest::SenderMismatch);
            }
            _ => {}
        }
        if request.receiver.is_empty() {
            return Err(InvalidRequest::EmptyReceiver);
        }
        validate_username(&request.receiver)?;
        if request.content.is_empty() {
            return Err(InvalidRequest::EmptyContent);
        }
        if request.content.chars().count() > self.max_content_len {
            return Err(InvalidRequest::ContentTooLong(self.max_content_len));
        }
        Ok(())
    }
}
