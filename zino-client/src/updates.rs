// Update handler: applies pushed notifications to the event map

//! The update handler
//!
//! Consumes notification records and reconciles the manager's event map:
//! `state`, `attr`, `history` and `log` signals trigger a full re-fetch of
//! the event from the server; `scavenged` (and, with autoremove enabled, a
//! state change to `closed`) evicts it. Updates for ids the manager has
//! never seen are skipped unless they are `state` transitions, because new
//! events always announce themselves with a state change out of
//! `embryonic`.
//!
//! Unknown update types are logged and swallowed; they must never take the
//! update loop down.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::manager::EventManager;
use crate::notify::Notification;

/// Administrative state name that triggers autoremove.
const CLOSED: &str = "closed";

/// Push-driven reconciler for one [`EventManager`].
///
/// Single reader: the handler borrows the manager exclusively and is not
/// re-entrant.
#[derive(Debug)]
pub struct UpdateHandler<'m> {
    manager: &'m mut EventManager,
    autoremove: bool,
}

impl<'m> UpdateHandler<'m> {
    /// Build a handler from an authenticated manager.
    ///
    /// Connects and ties the notification channel if the manager does not
    /// have one yet.
    pub async fn new(manager: &'m mut EventManager) -> Result<UpdateHandler<'m>> {
        if !manager.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        manager.ensure_notify_channel().await?;
        let autoremove = manager.autoremove();
        Ok(Self {
            manager,
            autoremove,
        })
    }

    /// Access the manager while the handler holds it.
    pub fn manager(&mut self) -> &mut EventManager {
        self.manager
    }

    /// Poll once and apply at most one update.
    ///
    /// Returns the changed event id, or `None` when nothing arrived within
    /// `wait`, the update was skipped, or its type was unknown. After a
    /// change the caller can consult `removed_ids` to distinguish an
    /// eviction from a modification.
    pub async fn get_event_update(&mut self, wait: Duration) -> Result<Option<u32>> {
        let Some(update) = self.manager.poll_notification(wait).await? else {
            return Ok(None);
        };
        self.apply(update).await
    }

    async fn apply(&mut self, update: Notification) -> Result<Option<u32>> {
        let id = update.id;
        // Ignore non-state updates for unknown ids: fetching here could
        // store a partially initialised event. New events always open with
        // a state transition from embryonic.
        if update.kind != "state" && !self.manager.events.contains_key(&id) {
            log::debug!("skipping {} update for unknown event {id}", update.kind);
            return Ok(None);
        }
        match update.kind.as_str() {
            "state" => {
                let new_state = update.info.split_whitespace().nth(1);
                if new_state == Some(CLOSED) && self.autoremove {
                    log::info!("event {id} closed, autoremoving");
                    self.manager.remove_event(id);
                    return Ok(Some(id));
                }
                self.refresh(id).await
            }
            "attr" | "history" | "log" => self.refresh(id).await,
            // Scavenge is unconditional; it does not consult autoremove.
            "scavenged" => {
                self.manager.remove_event(id);
                Ok(Some(id))
            }
            other => {
                log::warn!("ignoring unknown update type {other:?} for event {id}");
                Ok(None)
            }
        }
    }

    /// Re-fetch an event after a change signal.
    ///
    /// A protocol failure here means the case vanished between the push and
    /// the fetch; the id is recorded as removed, mirroring `get_events`.
    async fn refresh(&mut self, id: u32) -> Result<Option<u32>> {
        match self.manager.get_updated_event_for_id(id).await {
            Ok(event) => {
                self.manager.store_event(event);
                Ok(Some(id))
            }
            Err(Error::Protocol(reason)) => {
                log::warn!("event {id} vanished during refresh ({reason}); removing");
                self.manager.remove_event(id);
                Ok(Some(id))
            }
            Err(err) => Err(err),
        }
    }
}
