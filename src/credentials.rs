use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use log::{info, warn};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::{ChatError, InvalidRequest};

const USERS_FILE: &str = "users.jsonl";
const MAX_USERNAME_LEN: usize = 32;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the username on success. Unknown users and wrong passwords
    /// both yield `AuthenticationFailed`.
    async fn verify(&self, username: &str, password: &str) -> Result<String, ChatError>;

    async fn register(&self, username: &str, password: &str) -> Result<(), ChatError>;
}

#[derive(Clone, Serialize, Deserialize)]
struct UserRecord {
    username: String,
    credential_hash: String,
}

pub fn validate_username(username: &str) -> Result<(), InvalidRequest> {
    let valid = !username.is_empty()
        && username.chars().count() <= MAX_USERNAME_LEN
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(InvalidRequest::InvalidUsername)
    }
}

/// Argon2id-hashed users, appended as JSON lines under the data directory.
pub struct FileCredentialStore {
    users: RwLock<HashMap<String, String>>,
    file: Mutex<fs::File>,
    hasher: Arc<Argon2<'static>>,
    dummy_hash: Arc<String>,
}

impl FileCredentialStore {
    pub async fn open(data_dir: &Path) -> Result<Self, ChatError> {
        Self::open_with_params(data_dir, Params::default()).await
    }

    pub async fn open_with_params(data_dir: &Path, params: Params) -> Result<Self, ChatError> {
        fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(USERS_FILE);
        let users = load_users(&path).await?;
        info!("Loaded {} user(s) from {}", users.len(), path.display());

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let hasher = Arc::new(Argon2::new(Algorithm::Argon2id, Version::V0x13, params));
        let dummy_hash = hash_blocking(hasher.clone(), "placeholder-password".to_string()).await?;

        Ok(Self {
            users: RwLock::new(users),
            file: Mutex::new(file),
            hasher,
            dummy_hash: Arc::new(dummy_hash),
        })
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn verify(&self, username: &str, password: &str) -> Result<String, ChatError> {
        let stored = self.users.read().await.get(username).cloned();
        let known = stored.is_some();
        // Unknown users are checked against a dummy hash so both failure paths cost the same.
        let hash = stored.unwrap_or_else(|| self.dummy_hash.as_ref().clone());

        let hasher = self.hasher.clone();
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || {
            PasswordHash::new(&hash)
                .map(|parsed| hasher.verify_password(password.as_bytes(), &parsed).is_ok())
                .unwrap_or(false)
        })
        .await
        .map_err(|e| ChatError::StorageUnavailable(e.to_string()))?;

        if known && matches {
            Ok(username.to_string())
        } else {
            Err(ChatError::AuthenticationFailed)
        }
    }

    async fn register(&self, username: &str, password: &str) -> Result<(), ChatError> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(InvalidRequest::InvalidPassword.into());
        }
        if self.users.read().await.contains_key(username) {
            return Err(ChatError::UsernameTaken);
        }

        let credential_hash = hash_blocking(self.hasher.clone(), password.to_string()).await?;
        let record = UserRecord {
            username: username.to_string(),
            credential_hash,
        };

        let mut users = self.users.write().await;
        // Re-check under the write lock; a concurrent registration may have won.
        if users.contains_key(username) {
            return Err(ChatError::UsernameTaken);
        }
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| ChatError::StorageUnavailable(e.to_string()))?;
        line.push(b'\n');
        {
            let mut file = self.file.lock().await;
            file.write_all(&line).await?;
            file.sync_data().await?;
        }
        users.insert(record.username, record.credential_hash);
        info!("Registered user {username}");
        Ok(())
    }
}

async fn load_users(path: &Path) -> Result<HashMap<String, String>, ChatError> {
    let mut users = HashMap::new();
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(users),
        Err(e) => return Err(e.into()),
    };
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<UserRecord>(line) {
            // Later records win, which is how a credential hash is rotated.
            Ok(record) => {
                users.insert(record.username, record.credential_hash);
            }
            Err(e) => warn!("Skipping corrupt user record at line {}: {}", index + 1, e),
        }
    }
    Ok(users)
}

async fn hash_blocking(hasher: Arc<Argon2<'static>>, password: String) -> Result<String, ChatError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        hasher
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ChatError::StorageUnavailable(format!("password hashing failed: {e}")))
    })
    .await
    .map_err(|e| ChatError::StorageUnavailable(e.to_string()))?
}
