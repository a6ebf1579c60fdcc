use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::ChatError;
use crate::messages::StoredMessage;

const MESSAGES_FILE: &str = "messages.jsonl";

/// Order-independent identity of a two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey(String, String);

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.0 == username || self.1 == username
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<StoredMessage, ChatError>;

    /// All messages exchanged between `a` and `b` in either direction,
    /// oldest first.
    async fn query(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, ChatError>;
}

struct Writer {
    file: fs::File,
    last_created: Option<DateTime<Utc>>,
    /// Set when a failed write could not be rolled back; the log tail is
    /// unknown and no further records are accepted.
    poisoned: bool,
}

impl Writer {
    /// Appends one record durably, or leaves the file as it was.
    async fn write_record(&mut self, line: &[u8]) -> std::io::Result<()> {
        let start = self.file.metadata().await?.len();
        let result = async {
            self.file.write_all(line).await?;
            self.file.flush().await?;
            self.file.sync_data().await
        }
        .await;
        if let Err(e) = result {
            match self.file.set_len(start).await {
                Ok(()) => warn!("Rolled back partial message record: {e}"),
                Err(truncate) => {
                    error!("Failed to roll back message log after {e}: {truncate}");
                    self.poisoned = true;
                }
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Append-only JSON-lines message log with an in-memory per-conversation index.
pub struct FileMessageStore {
    writer: Mutex<Writer>,
    index: RwLock<HashMap<ConversationKey, Vec<StoredMessage>>>,
}

impl FileMessageStore {
    pub async fn open(data_dir: &Path) -> Result<Self, ChatError> {
        fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(MESSAGES_FILE);

        let mut index: HashMap<ConversationKey, Vec<StoredMessage>> = HashMap::new();
        let mut last_created: Option<DateTime<Utc>> = None;
        let mut count = 0usize;
        let mut needs_newline = false;
        match fs::read_to_string(&path).await {
            Ok(contents) => {
                needs_newline = !contents.is_empty() && !contents.ends_with('\n');
                for (line_no, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StoredMessage>(line) {
                        Ok(message) => {
                            last_created = last_created.max(Some(message.created_at));
                            index
                                .entry(ConversationKey::new(&message.sender, &message.receiver))
                                .or_default()
                                .push(message);
                            count += 1;
                        }
                        Err(e) => warn!("Skipping corrupt message record at line {}: {}", line_no + 1, e),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(
            "Loaded {} message(s) in {} conversation(s) from {}",
            count,
            index.len(),
            path.display()
        );

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        if needs_newline {
            // Terminate a torn record so the next append starts on its own line.
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        Ok(Self {
            writer: Mutex::new(Writer {
                file,
                last_created,
                poisoned: false,
            }),
            index: RwLock::new(index),
        })
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn append(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<StoredMessage, ChatError> {
        // Held until the index is updated, so log order and index order agree.
        let mut writer = self.writer.lock().await;
        if writer.poisoned {
            return Err(ChatError::StorageUnavailable(
                "message log needs recovery; restart the service".to_string(),
            ));
        }

        let now = Utc::now();
        let created_at = match writer.last_created {
            Some(last) if last > now => last,
            _ => now,
        };
        let message = StoredMessage {
            id: Uuid::now_v7(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            content: content.to_string(),
            created_at,
        };

        let mut line = serde_json::to_vec(&message)
            .map_err(|e| ChatError::StorageUnavailable(e.to_string()))?;
        line.push(b'\n');
        writer.write_record(&line).await?;
        writer.last_created = Some(created_at);

        self.index
            .write()
            .await
            .entry(ConversationKey::new(sender, receiver))
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn query(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, ChatError> {
        let index = self.index.read().await;
        Ok(index
            .get(&ConversationKey::new(a, b))
            .cloned()
            .unwrap_or_default())
    }
}
