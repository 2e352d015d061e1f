//! Persisted notification preferences.

use serde::{Deserialize, Serialize};

use crate::storage::{Storage, StorageError};

/// Storage key for [`NotificationSettings`].
pub const SETTINGS_KEY: &str = "chat_notification_settings";

const DEFAULT_VOLUME: f32 = 0.5;

/// Alert categories that can be toggled individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertCategory {
    NewMessage,
    ConversationUpdate,
    Assignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryToggles {
    pub new_message: bool,
    pub conversation_update: bool,
    pub assignment: bool,
}

impl Default for CategoryToggles {
    fn default() -> Self {
        Self {
            new_message: true,
            conversation_update: true,
            assignment: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub desktop_enabled: bool,
    pub sound_enabled: bool,
    /// Playback volume in `0.0..=1.0`.
    pub volume: f32,
    pub types: CategoryToggles,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            desktop_enabled: true,
            sound_enabled: true,
            volume: DEFAULT_VOLUME,
            types: CategoryToggles::default(),
        }
    }
}

impl NotificationSettings {
    /// Everything on at full volume.
    pub fn most_alerting() -> Self {
        Self {
            volume: 1.0,
            ..Self::default()
        }
    }

    /// Read stored settings, falling back to defaults.
    pub fn load(storage: Option<&Storage>) -> Self {
        storage
            .and_then(|s| s.load::<Self>(SETTINGS_KEY))
            .unwrap_or_default()
            .normalized()
    }

    pub fn save(&self, storage: &Storage) -> Result<(), StorageError> {
        storage.save(SETTINGS_KEY, self)
    }

    pub fn allows(&self, category: AlertCategory) -> bool {
        match category {
            AlertCategory::NewMessage => self.types.new_message,
            AlertCategory::ConversationUpdate => self.types.conversation_update,
            AlertCategory::Assignment => self.types.assignment,
        }
    }

    /// Clamp the volume into range; NaN becomes the default.
    pub fn normalized(mut self) -> Self {
        self.volume = if self.volume.is_nan() {
            DEFAULT_VOLUME
        } else {
            self.volume.clamp(0.0, 1.0)
        };
        self
    }
}
