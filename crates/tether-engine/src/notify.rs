//! The change-notification listener.
//!
//! One listener per context consumes the store's notification channel and
//! dispatches each committed mutation: identity re-keys and deletion flags
//! land on live instances first, then value-update handlers fire for every
//! changed column with a registration. Handlers run as independent spawned
//! tasks; dispatch order follows commit order, completion order does not.
//!
//! A local write already updated the instance cache before its own commit,
//! so its echo arrives with a value the cache already holds and fires no
//! handlers a second time.

use std::time::Duration;

use sqlx::postgres::PgListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tether_sql::{CHANGE_CHANNEL, SqlError};
use tether_types::{ChangeEvent, ChangeOp, IdentityTuple, Link, ScalarValue};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::fields::EntityType;

const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Handle to a running change listener. Dropping it does not stop the
/// listener; call [`Self::shutdown`].
pub struct ChangeListener {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl ChangeListener {
    /// Stop the listener and wait for its worker to exit.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            return;
        }
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Change listener worker join failed");
        }
    }
}

impl EngineContext {
    /// Start consuming change notifications for this context.
    ///
    /// Triggers must already be installed on the tables of interest (see
    /// [`Self::watch`]); events for unwatched or unbound tables are
    /// silently skipped. A dropped connection is retried with backoff;
    /// notifications committed while disconnected are lost, which is the
    /// channel's own delivery contract.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sql`] if the channel subscription fails.
    pub async fn start_listener(&self) -> Result<ChangeListener, EngineError> {
        let mut listener = PgListener::connect_with(self.store().pool())
            .await
            .map_err(SqlError::from)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(SqlError::from)?;
        tracing::info!(channel = CHANGE_CHANNEL, "Change listener started");

        let (shutdown, mut stop) = watch::channel(false);
        let context = self.clone();
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    received = listener.recv() => match received {
                        Ok(notification) => {
                            match serde_json::from_str::<ChangeEvent>(notification.payload()) {
                                Ok(event) => context.dispatch_event(&event).await,
                                Err(e) => tracing::warn!(
                                    error = %e,
                                    "Discarding malformed change payload"
                                ),
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                "Change listener connection lost; reconnecting"
                            );
                            tokio::time::sleep(RECONNECT_BACKOFF).await;
                        }
                    }
                }
            }
            tracing::debug!("Change listener stopped");
        });

        Ok(ChangeListener { shutdown, worker })
    }

    /// Dispatch one decoded change event. Never fails: per-column problems
    /// are logged and skipped so one bad event cannot stall the stream.
    pub(crate) async fn dispatch_event(&self, event: &ChangeEvent) {
        for entity_type in self.types_snapshot() {
            if entity_type.descriptor().table == event.table {
                self.apply_row_effects(&entity_type, event);
            }
        }
        self.dispatch_value_changes(event).await;
    }

    /// Identity re-keys and deletion flags for instances whose own row
    /// mutated. These run before any handler sees the event.
    fn apply_row_effects(&self, entity_type: &EntityType, event: &ChangeEvent) {
        let descriptor = entity_type.descriptor();
        match event.op {
            ChangeOp::Update if event.identity_changed(descriptor) => {
                let (before, after) = match (
                    event.identity_before(descriptor),
                    event.identity_after(descriptor),
                ) {
                    (Ok(Some(before)), Ok(Some(after))) => (before, after),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::warn!(
                            type_tag = entity_type.type_tag(),
                            error = %e,
                            "Skipping identity re-key for undecodable event"
                        );
                        return;
                    }
                    _ => return,
                };
                self.update_identity(entity_type.type_tag(), &before, &after);
            }
            ChangeOp::Delete => {
                let tuple = match event.identity_before(descriptor) {
                    Ok(Some(tuple)) => tuple,
                    Ok(None) => return,
                    Err(e) => {
                        tracing::warn!(
                            type_tag = entity_type.type_tag(),
                            error = %e,
                            "Skipping deletion flag for undecodable event"
                        );
                        return;
                    }
                };
                let key = (entity_type.type_tag().to_owned(), tuple.clone());
                if self.shared().identity_map.mark_deleted(&key).is_some() {
                    tracing::debug!(
                        type_tag = entity_type.type_tag(),
                        identity = %tuple,
                        "Flagged instance deleted"
                    );
                }
            }
            ChangeOp::Insert | ChangeOp::Update => {}
        }
    }

    /// Fire value-update handlers for every changed, watched column.
    async fn dispatch_value_changes(&self, event: &ChangeEvent) {
        if event.op == ChangeOp::Delete {
            return;
        }

        for column in self.shared().registry.watched_columns(&event.table) {
            if !event.column_changed(&column) {
                continue;
            }
            for registration in self.shared().registry.matching(&event.table, &column) {
                let decode = |side: &std::collections::BTreeMap<String, serde_json::Value>| {
                    side.get(&column)
                        .map(|json| registration.column_type.decode(&column, json))
                        .unwrap_or(Ok(ScalarValue::Null))
                };
                let (old, new) = match (decode(&event.old), decode(&event.new)) {
                    (Ok(old), Ok(new)) => (old, new),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::warn!(
                            column = column.as_str(),
                            type_tag = registration.type_tag.as_str(),
                            error = %e,
                            "Skipping undecodable column change"
                        );
                        continue;
                    }
                };

                let Some(tuple) = self.holder_identity(&registration.type_tag, registration.holder_link.as_ref(), event) else {
                    continue;
                };
                let handle = match self.get_instance(&registration.type_tag, &tuple).await {
                    Ok(Some(handle)) => handle,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(
                            type_tag = registration.type_tag.as_str(),
                            identity = %tuple,
                            error = %e,
                            "Skipping change dispatch; holder lookup failed"
                        );
                        continue;
                    }
                };

                // The echo of a local write: the cache already holds the
                // value, and the writer fired its handlers at write time.
                if handle.inner().cached(&registration.field).as_ref() == Some(&new) {
                    continue;
                }
                handle.inner().cache_put(&registration.field, new.clone());

                let handler = std::sync::Arc::clone(&registration.handler);
                let change = crate::registry::ValueChange { old, new };
                tokio::spawn(async move {
                    handler(handle, change);
                });
            }
        }
    }

    /// Resolve the identity tuple of the entity holding a changed column.
    ///
    /// Plain columns: the event row is the holder's own. Foreign columns:
    /// the event row links back to the holder through the registration's
    /// link, whose remote columns are the holder's identity columns.
    fn holder_identity(
        &self,
        type_tag: &str,
        holder_link: Option<&Link>,
        event: &ChangeEvent,
    ) -> Option<IdentityTuple> {
        let entity_type = self.entity_type(type_tag).ok()?;
        let descriptor = entity_type.descriptor();

        let Some(link) = holder_link else {
            return match event.identity_after(descriptor) {
                Ok(tuple) => tuple,
                Err(e) => {
                    tracing::warn!(type_tag, error = %e, "Undecodable holder identity");
                    None
                }
            };
        };

        let mut values = Vec::with_capacity(descriptor.identity_columns.len());
        for column in &descriptor.identity_columns {
            let pair = link.pairs.iter().find(|p| p.remote == *column)?;
            let encoded = event.new.get(&pair.local)?;
            let ty = descriptor.column(column).map(|c| c.ty)?;
            match ty.decode(column, encoded) {
                Ok(value) => values.push(value),
                Err(e) => {
                    tracing::warn!(type_tag, column = column.as_str(), error = %e, "Undecodable link value");
                    return None;
                }
            }
        }
        Some(IdentityTuple::new(values))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::collections::BTreeMap;

    use chrono::Utc;
    use serde_json::json;
    use tether_types::{ColumnType, TableRef};

    use super::*;

    #[test]
    fn payloads_from_the_commit_hook_decode() {
        // Shape produced by the trigger's json_build_object call.
        let payload = r#"{
            "at": "2026-08-30T12:00:00Z",
            "table": {"schema": "public", "table": "users"},
            "op": "update",
            "old": {"id": 1, "name": "alice"},
            "new": {"id": 1, "name": "bob"}
        }"#;
        let event: ChangeEvent = serde_json::from_str(payload).expect("decode");
        assert_eq!(event.op, ChangeOp::Update);
        assert_eq!(event.table, TableRef::new("public", "users"));
        assert!(event.column_changed("name"));
        assert!(!event.column_changed("id"));
    }

    #[test]
    fn changed_columns_decode_under_declared_types() {
        let event = ChangeEvent {
            at: Utc::now(),
            table: TableRef::new("public", "users"),
            op: ChangeOp::Update,
            old: BTreeMap::from([("age".to_owned(), json!(30))]),
            new: BTreeMap::from([("age".to_owned(), json!(31))]),
        };
        let old = ColumnType::Int
            .decode("age", event.old.get("age").unwrap())
            .expect("old");
        let new = ColumnType::Int
            .decode("age", event.new.get("age").unwrap())
            .expect("new");
        assert_eq!(old, ScalarValue::Int(30));
        assert_eq!(new, ScalarValue::Int(31));
    }
}
