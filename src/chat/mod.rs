pub mod chats;
pub mod messages;
pub mod reactions;

use rusqlite::Connection;

use crate::error::AppError;
use crate::events::ReactionMap;

/// Normalize a participant pair: the lexicographically smaller id is always
/// first. Keeps the (participant_a, participant_b) unique index effective
/// regardless of who initiates.
pub(crate) fn normalize_pair(x: &str, y: &str) -> (String, String) {
    if x < y {
        (x.to_string(), y.to_string())
    } else {
        (y.to_string(), x.to_string())
    }
}

/// A chat row as needed for participation checks and fan-out targeting.
pub(crate) struct ChatRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
}

impl ChatRow {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// The other party: the fan-out audience for every chat mutation.
    pub fn counterpart_of(&self, user_id: &str) -> String {
        if self.participant_a == user_id {
            self.participant_b.clone()
        } else {
            self.participant_a.clone()
        }
    }
}

/// Load a chat and verify the caller participates in it.
/// NotFound if the chat does not exist, Unauthorized if the caller is a
/// stranger to it.
pub(crate) fn load_chat_for(
    conn: &Connection,
    chat_id: &str,
    user_id: &str,
) -> Result<ChatRow, AppError> {
    let chat = conn
        .query_row(
            "SELECT id, participant_a, participant_b FROM chats WHERE id = ?1",
            rusqlite::params![chat_id],
            |row| {
                Ok(ChatRow {
                    id: row.get(0)?,
                    participant_a: row.get(1)?,
                    participant_b: row.get(2)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("chat not found"),
            other => AppError::Store(other),
        })?;

    if !chat.is_participant(user_id) {
        return Err(AppError::Unauthorized("not a participant of this chat"));
    }

    Ok(chat)
}

/// Full reaction state for a message: emoji -> reacting user ids.
/// Rows come back ordered so the map is deterministic.
pub(crate) fn reaction_map(
    conn: &Connection,
    message_id: &str,
) -> Result<ReactionMap, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT emoji, user_id FROM reactions WHERE message_id = ?1 ORDER BY emoji, user_id",
    )?;

    let mut map = ReactionMap::new();
    let rows = stmt.query_map(rusqlite::params![message_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows.filter_map(|r| r.ok()) {
        map.entry(row.0).or_default().push(row.1);
    }
    Ok(map)
}
