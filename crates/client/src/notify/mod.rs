//! Process-wide alert dispatcher.
//!
//! One [`NotificationDispatcher`] serves the whole process. Any number of
//! stream connections can be attached; every event is keyed and remembered,
//! so an event seen twice alerts once.

mod desktop;
mod settings;
mod sound;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chatdesk_shared::{ChatMessage, Conversation, SenderType, ServerEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::Storage;
use crate::ws::StreamConnection;

pub use desktop::{DesktopNotifier, LogNotifier, NotifyError, Permission};
pub use settings::{AlertCategory, CategoryToggles, NotificationSettings, SETTINGS_KEY};
pub use sound::{default_sound, AlertSound, SoundError, TerminalBell, Tone};
#[cfg(feature = "audio")]
pub use sound::RodioSound;

const RECENT_KEYS: usize = 512;

/// An alert that passed the settings gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub category: AlertCategory,
    /// Shown on the desktop even while the console has focus.
    pub forced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundOutcome {
    Muted,
    Asset,
    /// The asset failed and the generated tone played instead.
    Tone,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopOutcome {
    Disabled,
    SuppressedWhileFocused,
    Shown,
    PermissionDenied,
    Failed,
}

/// What `notify` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// The category or both master toggles are off.
    Skipped,
    Delivered {
        sound: SoundOutcome,
        desktop: DesktopOutcome,
    },
}

/// Snapshot for settings screens.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherStatus {
    pub permission: Permission,
    pub settings: NotificationSettings,
}

/// Construction options for [`NotificationDispatcher`].
pub struct DispatcherOptions {
    pub storage: Option<Storage>,
    pub notifier: Arc<dyn DesktopNotifier>,
    pub sound: Arc<dyn AlertSound>,
    /// Operator whose assignments raise alerts.
    pub operator_id: Option<String>,
    /// Ignore stored preferences and alert on everything.
    pub force_all: bool,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Mutex<NotificationSettings>,
    storage: Option<Storage>,
    notifier: Arc<dyn DesktopNotifier>,
    sound: Arc<dyn AlertSound>,
    operator_id: Option<String>,
    focused: AtomicBool,
    seen: Mutex<Seen>,
    alerts: broadcast::Sender<Alert>,
}

/// Dedup memory plus what is known about each conversation.
#[derive(Default)]
struct Seen {
    order: VecDeque<String>,
    keys: HashSet<String>,
    /// Conversation id → assigned operator id.
    conversations: HashMap<String, Option<String>>,
    /// No "new conversation" alerts until the initial list has been seen.
    seeded: bool,
}

impl Seen {
    /// Remember `key`; false if it was already seen.
    fn first_sight(&mut self, key: String) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        if self.order.len() >= RECENT_KEYS {
            if let Some(old) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

impl NotificationDispatcher {
    pub fn new(options: DispatcherOptions) -> Self {
        let settings = if options.force_all {
            info!("alert preferences overridden, every alert forced on");
            NotificationSettings::most_alerting()
        } else {
            NotificationSettings::load(options.storage.as_ref())
        };
        let (alerts, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                settings: Mutex::new(settings),
                storage: options.storage,
                notifier: options.notifier,
                sound: options.sound,
                operator_id: options.operator_id,
                focused: AtomicBool::new(false),
                seen: Mutex::new(Seen::default()),
                alerts,
            }),
        }
    }

    fn settings_guard(&self) -> MutexGuard<'_, NotificationSettings> {
        self.inner.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn seen(&self) -> MutexGuard<'_, Seen> {
        self.inner.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn settings(&self) -> NotificationSettings {
        self.settings_guard().clone()
    }

    /// Change settings and persist them.
    pub fn update_settings(&self, change: impl FnOnce(&mut NotificationSettings)) -> NotificationSettings {
        let updated = {
            let mut settings = self.settings_guard();
            change(&mut settings);
            *settings = settings.clone().normalized();
            settings.clone()
        };
        if let Some(storage) = &self.inner.storage {
            if let Err(e) = updated.save(storage) {
                warn!(error = %e, "failed to persist notification settings");
            }
        }
        updated
    }

    pub fn status(&self) -> DispatcherStatus {
        DispatcherStatus {
            permission: self.inner.notifier.permission(),
            settings: self.settings(),
        }
    }

    /// Whether the console window currently has focus.
    pub fn set_focused(&self, focused: bool) {
        self.inner.focused.store(focused, Ordering::Relaxed);
    }

    /// Alerts that fired, for in-app toasts.
    pub fn alerts(&self) -> broadcast::Receiver<Alert> {
        self.inner.alerts.subscribe()
    }

    /// Ask for notification permission once at startup.
    pub async fn request_permission(&self) -> Permission {
        let notifier = &self.inner.notifier;
        match notifier.permission() {
            Permission::Default => {
                let granted = notifier.request_permission().await;
                if granted == Permission::Denied {
                    warn!("desktop notifications denied, alerts will be sound-only");
                }
                granted
            }
            other => other,
        }
    }

    /// Record conversations loaded from the backend so their updates are not
    /// mistaken for new conversations.
    pub fn seed_conversations<'a>(&self, conversations: impl IntoIterator<Item = &'a Conversation>) {
        let mut seen = self.seen();
        for conv in conversations {
            seen.conversations
                .entry(conv.id.clone())
                .or_insert_with(|| conv.admin_id.clone());
        }
        seen.seeded = true;
    }

    /// Feed every event of `connection` through this dispatcher.
    pub fn attach(&self, connection: &StreamConnection) -> JoinHandle<()> {
        let mut events = connection.subscribe();
        let dispatcher = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        dispatcher.handle_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "alert listener fell behind the stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Map a stream event to an alert and fire it, at most once per event.
    pub async fn handle_event(&self, event: &ServerEvent) -> Option<AlertOutcome> {
        let alert = self.alert_for(event)?;
        Some(self.fire(alert).await)
    }

    fn alert_for(&self, event: &ServerEvent) -> Option<Alert> {
        let mut seen = self.seen();
        match event {
            ServerEvent::NewMessage(msg) => {
                if msg.sender_type != SenderType::User {
                    return None;
                }
                if !seen.first_sight(format!("message:{}", msg.id)) {
                    return None;
                }
                Some(Alert {
                    title: format!("New message from {}", sender_label(msg)),
                    body: message_body(msg),
                    category: AlertCategory::NewMessage,
                    forced: false,
                })
            }
            ServerEvent::ConversationUpdate(update) => {
                let known = seen.conversations.get(&update.id).cloned();
                let seeded = seen.seeded;
                match known {
                    None => {
                        seen.conversations
                            .insert(update.id.clone(), update.admin_id.clone());
                        if !seeded || !seen.first_sight(format!("conversation:{}", update.id)) {
                            return None;
                        }
                        let who = update
                            .user_name
                            .as_deref()
                            .filter(|n| !n.trim().is_empty())
                            .unwrap_or("A customer");
                        Some(Alert {
                            title: "New conversation".to_string(),
                            body: format!("{who} started a conversation"),
                            category: AlertCategory::ConversationUpdate,
                            forced: true,
                        })
                    }
                    Some(previous_admin) => {
                        let Some(admin_id) = update.admin_id.clone() else {
                            return None;
                        };
                        seen.conversations
                            .insert(update.id.clone(), Some(admin_id.clone()));
                        let for_me = self.inner.operator_id.as_deref() == Some(admin_id.as_str());
                        if !for_me || previous_admin.as_deref() == Some(admin_id.as_str()) {
                            return None;
                        }
                        if !seen.first_sight(format!("assignment:{}:{admin_id}", update.id)) {
                            return None;
                        }
                        let who = update
                            .user_name
                            .as_deref()
                            .filter(|n| !n.trim().is_empty())
                            .unwrap_or("A conversation");
                        Some(Alert {
                            title: "Conversation assigned to you".to_string(),
                            body: format!("{who} is now yours"),
                            category: AlertCategory::Assignment,
                            forced: false,
                        })
                    }
                }
            }
            _ => None,
        }
    }

    /// Fire an alert, gated by settings and focus.
    pub async fn notify(&self, title: &str, body: &str, category: AlertCategory, force: bool) -> AlertOutcome {
        self.fire(Alert {
            title: title.to_string(),
            body: body.to_string(),
            category,
            forced: force,
        })
        .await
    }

    async fn fire(&self, alert: Alert) -> AlertOutcome {
        let settings = self.settings();
        if !settings.allows(alert.category) || (!settings.desktop_enabled && !settings.sound_enabled) {
            debug!(category = ?alert.category, "alert skipped by settings");
            return AlertOutcome::Skipped;
        }

        let sound = if settings.sound_enabled {
            self.play_sound(settings.volume)
        } else {
            SoundOutcome::Muted
        };

        let desktop = if !settings.desktop_enabled {
            DesktopOutcome::Disabled
        } else if self.inner.focused.load(Ordering::Relaxed) && !alert.forced {
            DesktopOutcome::SuppressedWhileFocused
        } else {
            self.show_desktop(&alert).await
        };

        debug!(category = ?alert.category, ?sound, ?desktop, "alert fired");
        let _ = self.inner.alerts.send(alert);
        AlertOutcome::Delivered { sound, desktop }
    }

    fn play_sound(&self, volume: f32) -> SoundOutcome {
        let sound = &self.inner.sound;
        match sound.play_asset(volume) {
            Ok(()) => SoundOutcome::Asset,
            Err(e) => {
                debug!(error = %e, "sound asset unavailable, playing tone");
                match sound.play_tone(Tone::ALERT, volume) {
                    Ok(()) => SoundOutcome::Tone,
                    Err(e) => {
                        warn!(error = %e, "alert tone failed");
                        SoundOutcome::Failed
                    }
                }
            }
        }
    }

    async fn show_desktop(&self, alert: &Alert) -> DesktopOutcome {
        let notifier = &self.inner.notifier;
        let permission = match notifier.permission() {
            Permission::Default => notifier.request_permission().await,
            other => other,
        };
        if permission != Permission::Granted {
            debug!("desktop notification blocked by permission");
            return DesktopOutcome::PermissionDenied;
        }
        match notifier.show(&alert.title, &alert.body) {
            Ok(()) => DesktopOutcome::Shown,
            Err(e) => {
                warn!(error = %e, "desktop notification failed");
                DesktopOutcome::Failed
            }
        }
    }
}

fn sender_label(msg: &ChatMessage) -> &str {
    msg.sender_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or("customer")
}

fn message_body(msg: &ChatMessage) -> String {
    let text = msg.preview_text();
    if text.is_empty() {
        "Sent an attachment".to_string()
    } else {
        text
    }
}
