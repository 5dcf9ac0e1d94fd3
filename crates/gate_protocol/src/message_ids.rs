//! Explicit registration of business message ids.
//!
//! The table is built once at startup, usually from the `[messages]` config
//! section, and is read-only afterwards. Ids 0 and 1 belong to the heartbeat
//! and cannot be registered.

use std::collections::HashMap;

use crate::error::MessageIdError;
use crate::packet::is_reserved_msg_id;

/// Name of the login message every gateway deployment must register.
pub const LOGIN: &str = "login";

/// Default id for [`LOGIN`].
pub const DEFAULT_LOGIN_MSG_ID: i32 = 11000;

/// Immutable name <-> id mapping for business messages.
#[derive(Debug, Clone, Default)]
pub struct MessageIdTable {
    by_name: HashMap<String, i32>,
    by_id: HashMap<i32, String>,
}

impl MessageIdTable {
    pub fn builder() -> MessageIdTableBuilder {
        MessageIdTableBuilder::default()
    }

    pub fn id_of(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: i32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// The registered login id, if any.
    pub fn login_id(&self) -> Option<i32> {
        self.id_of(LOGIN)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Collects registrations and checks them before freezing into a table.
#[derive(Debug, Default)]
pub struct MessageIdTableBuilder {
    table: MessageIdTable,
}

impl MessageIdTableBuilder {
    /// Registers `name` under `id`.
    ///
    /// # Errors
    ///
    /// Fails for reserved ids and for names or ids that are already taken.
    pub fn register(mut self, name: impl Into<String>, id: i32) -> Result<Self, MessageIdError> {
        let name = name.into();
        if is_reserved_msg_id(id) {
            return Err(MessageIdError::Reserved { name, id });
        }
        if self.table.by_name.contains_key(&name) {
            return Err(MessageIdError::DuplicateName(name));
        }
        if let Some(existing) = self.table.by_id.get(&id) {
            return Err(MessageIdError::DuplicateId {
                id,
                existing: existing.clone(),
            });
        }
        self.table.by_name.insert(name.clone(), id);
        self.table.by_id.insert(id, name);
        Ok(self)
    }

    pub fn build(self) -> MessageIdTable {
        self.table
    }
}
