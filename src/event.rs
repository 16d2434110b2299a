//! Account events and waiting for an action to finish.
//!
//! Long-running operations (booting an instance, resizing a disk, ...) are
//! reported through the account event feed. [`Client::wait_for_event_finished`]
//! polls that feed for the event matching an [`EventQuery`] and resolves once
//! it reaches a terminal status.

use crate::{
    filter::Order,
    pagination::ListOptions,
    resource::Identified,
    wait::{poll_ticker, WaitTarget},
    Client, Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// Endpoint of the account event feed.
pub const EVENTS_ENDPOINT: &str = "account/events";

/// Status of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Started,
    Finished,
    Failed,
    Notification,
    /// A status this client does not know about.
    #[serde(untagged)]
    Other(String),
}

impl EventStatus {
    /// `finished` and `failed` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Finished | EventStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventStatus::Scheduled => "scheduled",
            EventStatus::Started => "started",
            EventStatus::Finished => "finished",
            EventStatus::Failed => "failed",
            EventStatus::Notification => "notification",
            EventStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of entity an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Linode,
    Disk,
    Domain,
    #[serde(rename = "nodebalancer")]
    NodeBalancer,
    Volume,
    Image,
    Firewall,
    Database,
    /// An entity type this client does not know about.
    #[serde(untagged)]
    Other(String),
}

impl EntityType {
    /// Whether events for this entity type carry a numeric entity id that
    /// the event feed can be filtered by.
    pub fn has_numeric_id(&self) -> bool {
        matches!(
            self,
            EntityType::Linode | EntityType::Disk | EntityType::Domain | EntityType::NodeBalancer
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Linode => "linode",
            EntityType::Disk => "disk",
            EntityType::Domain => "domain",
            EntityType::NodeBalancer => "nodebalancer",
            EntityType::Volume => "volume",
            EntityType::Image => "image",
            EntityType::Firewall => "firewall",
            EntityType::Database => "database",
            EntityType::Other(s) => s,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity id as it appears in the event feed; numeric for most entity
/// types, a string for a few (e.g. image ids).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(u64),
    Str(String),
}

impl EntityId {
    /// The numeric id, parsing string ids that hold a number.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            EntityId::Int(id) => Some(*id),
            EntityId::Str(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(id) => write!(f, "{}", id),
            EntityId::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        EntityId::Int(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Str(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId::Str(id)
    }
}

/// The action an event records, e.g. `linode_boot`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventAction(Cow<'static, str>);

impl EventAction {
    pub const LINODE_CREATE: EventAction = EventAction::from_static("linode_create");
    pub const LINODE_BOOT: EventAction = EventAction::from_static("linode_boot");
    pub const LINODE_REBOOT: EventAction = EventAction::from_static("linode_reboot");
    pub const LINODE_SHUTDOWN: EventAction = EventAction::from_static("linode_shutdown");
    pub const LINODE_DELETE: EventAction = EventAction::from_static("linode_delete");
    pub const LINODE_RESIZE: EventAction = EventAction::from_static("linode_resize");
    pub const LINODE_CLONE: EventAction = EventAction::from_static("linode_clone");
    pub const LINODE_SNAPSHOT: EventAction = EventAction::from_static("linode_snapshot");
    pub const BACKUPS_RESTORE: EventAction = EventAction::from_static("backups_restore");
    pub const DISK_CREATE: EventAction = EventAction::from_static("disk_create");
    pub const DISK_RESIZE: EventAction = EventAction::from_static("disk_resize");
    pub const DISK_DELETE: EventAction = EventAction::from_static("disk_delete");
    pub const VOLUME_CREATE: EventAction = EventAction::from_static("volume_create");
    pub const VOLUME_ATTACH: EventAction = EventAction::from_static("volume_attach");
    pub const VOLUME_DETACH: EventAction = EventAction::from_static("volume_detach");
    pub const IMAGE_UPLOAD: EventAction = EventAction::from_static("image_upload");

    /// An action by its wire name.
    pub const fn from_static(name: &'static str) -> Self {
        EventAction(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        EventAction(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The entity an event refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntity {
    pub id: Option<EntityId>,
    #[serde(rename = "type")]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// An entry of the account event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub action: EventAction,
    pub status: EventStatus,
    #[serde(default)]
    pub entity: Option<EventEntity>,
    #[serde(default, with = "crate::timestamp::option")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub percent_complete: Option<u8>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Identified for Event {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Identifies the event [`Client::wait_for_event_finished`] waits for.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub action: EventAction,
    /// Events created before this instant are ignored.
    pub min_start: DateTime<Utc>,
}

impl EventQuery {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<EntityId>,
        action: EventAction,
        min_start: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            action,
            min_start,
        }
    }

    /// The filter sent with every poll. Only entity types with numeric ids
    /// are narrowed server side; the rest are matched locally.
    fn base_filter(&self) -> Result<Map<String, Value>> {
        let mut filter = Map::new();
        filter.insert("seen".to_string(), Value::Bool(false));
        filter.insert("+order_by".to_string(), json!("created"));
        filter.insert("+order".to_string(), json!(Order::Desc.as_str()));

        if self.entity_type.has_numeric_id() {
            let id = self.entity_id.as_u64().ok_or_else(|| {
                Error::ConfigurationError(format!(
                    "{} events need a numeric entity id, got '{}'",
                    self.entity_type, self.entity_id
                ))
            })?;
            filter.insert("entity.id".to_string(), json!(id));
            filter.insert("entity.type".to_string(), json!(self.entity_type.as_str()));
        }

        Ok(filter)
    }

    fn matches(&self, event: &Event) -> bool {
        if event.action != self.action {
            return false;
        }

        let Some(entity) = &event.entity else {
            return false;
        };
        if entity.entity_type.as_ref() != Some(&self.entity_type) {
            return false;
        }
        let same_id = entity
            .id
            .as_ref()
            .is_some_and(|id| id.to_string() == self.entity_id.to_string());
        if !same_id {
            return false;
        }

        match event.created {
            Some(created) => created >= self.min_start,
            None => {
                tracing::warn!(event_id = event.id, "Event has no creation time");
                true
            }
        }
    }
}

impl Client {
    /// Waits for the event described by `query` to finish.
    ///
    /// Polls the account event feed every poll interval. Once the matching
    /// event has been seen, later polls only ask for events at or after it.
    /// Returns the event when it finishes, [`Error::EventFailed`] when it
    /// fails, and [`Error::WaitTimeout`] when `timeout` passes first.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chrono::Utc;
    /// use cirrus::event::{EntityType, EventAction, EventQuery};
    /// use cirrus::Client;
    /// use std::time::Duration;
    ///
    /// # async fn example(client: Client) -> Result<(), cirrus::Error> {
    /// let started = Utc::now();
    /// // ... issue the boot request ...
    /// let query = EventQuery::new(EntityType::Linode, 123, EventAction::LINODE_BOOT, started);
    /// let event = client.wait_for_event_finished(&query, Duration::from_secs(240)).await?;
    /// println!("boot finished as event {}", event.id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn wait_for_event_finished(&self, query: &EventQuery, timeout: Duration) -> Result<Event> {
        let base_filter = query.base_filter()?;
        let subject = format!("{} {}", query.entity_type, query.entity_id);

        tracing::info!(
            entity = %subject,
            action = %query.action,
            min_start = %query.min_start,
            timeout_secs = timeout.as_secs(),
            "Waiting for event to finish"
        );

        let watch = async {
            let mut ticker = poll_ticker(self.poll_interval());
            let mut first_seen: Option<u64> = None;
            let mut last_logged: Option<String> = None;

            loop {
                ticker.tick().await;

                let mut filter = base_filter.clone();
                if let Some(id) = first_seen {
                    filter.insert("id".to_string(), json!({ "+gte": id }));
                }
                let options = ListOptions::new()
                    .page(1)
                    .filter(Value::Object(filter).to_string());
                let events = self.list_page::<Event>(EVENTS_ENDPOINT, &options).await?.data;

                let mut progress = None;
                for event in events {
                    if !query.matches(&event) {
                        continue;
                    }
                    if first_seen.is_none() {
                        tracing::debug!(event_id = event.id, "Found matching event");
                        first_seen = Some(event.id);
                    }

                    match event.status {
                        EventStatus::Failed => {
                            tracing::warn!(entity = %subject, action = %query.action, "Event failed");
                            return Err(Error::EventFailed {
                                message: format!("{} action {} failed", subject, query.action),
                                event: Box::new(event),
                            });
                        }
                        EventStatus::Finished => {
                            tracing::info!(
                                entity = %subject,
                                action = %query.action,
                                event_id = event.id,
                                "Event finished"
                            );
                            return Ok(event);
                        }
                        ref status => {
                            progress = Some(format!(
                                "{} action {} is {} ({}% complete)",
                                subject,
                                query.action,
                                status,
                                event.percent_complete.unwrap_or(0)
                            ));
                        }
                    }
                }

                if progress.is_some() && progress != last_logged {
                    if let Some(message) = &progress {
                        tracing::info!(event_id = first_seen, "{}", message);
                    }
                    last_logged = progress;
                }
            }
        };

        match tokio::time::timeout(timeout, watch).await {
            Ok(result) => result,
            Err(_) => {
                let target = WaitTarget::new(
                    query.entity_type.as_str(),
                    &query.entity_id,
                    format!("{} event", query.action),
                    EventStatus::Finished.as_str(),
                );
                tracing::warn!(waiting_for = %target, "Timed out waiting for event");
                Err(target.timeout_error())
            }
        }
    }
}
