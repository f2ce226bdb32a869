// Event manager: owns the live event map and the session

//! The event manager
//!
//! Owns the map of live events, the set of removed event ids, and the two
//! protocol channels. All server access goes through the manager; events
//! are only ever mutated by re-fetching their full attribute set from the
//! server, never by editing local state (history and log attachment being
//! the one exception).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::channel::Channel;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{AdmState, Event, EventDetails, HistoryEntry, LogEntry};
use crate::history;
use crate::notify::{Notification, NotificationChannel};
use crate::parser;

/// The two channels making up one logical session.
#[derive(Debug)]
struct Session {
    request: Channel,
    notify: Option<NotificationChannel>,
}

/// Client-side view of the server's live events.
#[derive(Debug)]
pub struct EventManager {
    config: Config,
    session: Option<Session>,
    /// Live events by id.
    pub events: BTreeMap<u32, Event>,
    /// Ids that have been evicted at least once.
    pub removed_ids: BTreeSet<u32>,
}

impl EventManager {
    /// Build a manager with an unconnected session.
    pub fn configure(config: Config) -> Self {
        Self {
            config,
            session: None,
            events: BTreeMap::new(),
            removed_ids: BTreeSet::new(),
        }
    }

    /// The connection parameters this manager was configured with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether closed events should be dropped from the map.
    pub fn autoremove(&self) -> bool {
        self.config.autoremove
    }

    /// Open the request channel, then the notification channel, then tie.
    ///
    /// When the config carries credentials the request channel
    /// authenticates during connect and the notification channel is tied
    /// right away; otherwise the tie is deferred until after
    /// [`EventManager::authenticate`].
    pub async fn connect(&mut self) -> Result<()> {
        let mut request = Channel::new(&self.config);
        request.connect().await?;
        self.session = Some(Session {
            request,
            notify: None,
        });
        if self.is_authenticated() {
            self.ensure_notify_channel().await?;
        }
        Ok(())
    }

    /// Authenticate the session, optionally overriding the configured
    /// credentials.
    pub async fn authenticate(
        &mut self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        self.request()?.authenticate(username, password).await
    }

    /// Close both channels. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Some(notify) = session.notify.as_mut() {
                notify.close();
            }
            session.request.close();
            log::debug!("disconnected from {}", self.config.server);
        }
    }

    /// Check that the session is set up and connected.
    ///
    /// With `quiet` the outcome is reported as a boolean; otherwise a
    /// missing session raises [`Error::NotConnected`].
    pub fn verify_session(&self, quiet: bool) -> Result<bool> {
        let connected = self
            .session
            .as_ref()
            .is_some_and(|s| s.request.is_connected());
        if connected || quiet {
            Ok(connected)
        } else {
            Err(Error::NotConnected)
        }
    }

    /// True while the request channel is connected.
    pub fn is_connected(&self) -> bool {
        self.verify_session(true).unwrap_or(false)
    }

    /// True once the request channel has authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.request.is_authenticated())
    }

    /// True once the notification channel is connected and tied.
    pub fn has_notification_channel(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.notify.as_ref())
            .is_some_and(|n| n.is_ready())
    }

    fn request(&mut self) -> Result<&mut Channel> {
        self.session
            .as_mut()
            .map(|s| &mut s.request)
            .ok_or(Error::NotConnected)
    }

    /// Connect and tie the notification channel if it is absent.
    ///
    /// The channel only becomes visible to polling once `ntie` returned
    /// 200; a half-tied socket is discarded on error.
    pub(crate) async fn ensure_notify_channel(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        if session.notify.as_ref().is_some_and(|n| n.is_ready()) {
            return Ok(());
        }
        let timeout = Duration::from_secs(self.config.timeout);
        let (mut channel, key) =
            NotificationChannel::connect(&self.config.server, self.config.notify_port, timeout)
                .await?;
        session.request.ntie(&key).await?;
        channel.mark_tied();
        session.notify = Some(channel);
        log::debug!("notification channel tied");
        Ok(())
    }

    /// Poll the notification channel once. Used by the update handler.
    pub(crate) async fn poll_notification(
        &mut self,
        wait: Duration,
    ) -> Result<Option<Notification>> {
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        let notify = session.notify.as_mut().ok_or(Error::NotConnected)?;
        notify.poll(wait).await
    }

    /// Store an event, clearing any stale removal record for its id.
    pub(crate) fn store_event(&mut self, event: Event) {
        self.removed_ids.remove(&event.id);
        self.events.insert(event.id, event);
    }

    /// Refresh the whole event map from the server.
    ///
    /// Ids that fail to fetch (typically: the case vanished between the
    /// listing and the fetch) are recorded in `removed_ids` instead of
    /// failing the refresh; connection losses still propagate.
    pub async fn get_events(&mut self) -> Result<()> {
        let ids = self.request()?.case_ids().await?;
        for id in ids {
            match self.create_event_from_id(id).await {
                Ok(event) => self.store_event(event),
                Err(
                    err @ (Error::Protocol(_)
                    | Error::Retry(_)
                    | Error::Validation(_)
                    | Error::UnknownEventType(_)),
                ) => {
                    log::warn!("could not fetch event {id}: {err}; marking removed");
                    self.remove_event(id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Fetch and parse a single event, without history or log.
    pub async fn create_event_from_id(&mut self, id: u32) -> Result<Event> {
        let lines = self.request()?.raw_attributes(id).await?;
        parser::parse_attributes(&lines)
    }

    /// Fetch a fully populated event: attributes, history and log.
    ///
    /// The three sub-requests read consecutive server snapshots; a change
    /// in between is acceptable because the next update notification will
    /// retrigger the fetch.
    pub async fn get_updated_event_for_id(&mut self, id: u32) -> Result<Event> {
        let mut event = self.create_event_from_id(id).await?;
        event.history = self.get_history_for_id(id).await?;
        event.log = self.get_log_for_id(id).await?;
        Ok(event)
    }

    /// Fetch the parsed history of an event.
    pub async fn get_history_for_id(&mut self, id: u32) -> Result<Vec<HistoryEntry>> {
        let lines = self.request()?.raw_history(id).await?;
        history::parse_history(&lines)
    }

    /// Fetch the parsed log of an event.
    pub async fn get_log_for_id(&mut self, id: u32) -> Result<Vec<LogEntry>> {
        let lines = self.request()?.raw_log(id).await?;
        history::parse_log(&lines)
    }

    /// Attach a history list to a stored event, returning the event.
    pub fn set_history_for_event(
        &mut self,
        id: u32,
        history_list: Vec<HistoryEntry>,
    ) -> Option<&Event> {
        let event = self.events.get_mut(&id)?;
        event.history = history_list;
        Some(event)
    }

    /// Attach a log list to a stored event, returning the event.
    pub fn set_log_for_event(&mut self, id: u32, log_list: Vec<LogEntry>) -> Option<&Event> {
        let event = self.events.get_mut(&id)?;
        event.log = log_list;
        Some(event)
    }

    /// Change the administrative state of an event on the server.
    ///
    /// On success the event is re-fetched, stored and returned. Reopening
    /// a closed event surfaces as [`Error::EventClosed`].
    pub async fn change_admin_state_for_id(
        &mut self,
        id: u32,
        admin_state: AdmState,
    ) -> Result<Event> {
        self.request()?.set_state(id, admin_state).await?;
        let event = self.get_updated_event_for_id(id).await?;
        self.store_event(event.clone());
        Ok(event)
    }

    /// Add a history entry to an event on the server.
    ///
    /// On success the event is re-fetched, stored and returned.
    pub async fn add_history_entry_for_id(&mut self, id: u32, message: &str) -> Result<Event> {
        self.request()?.add_history(id, message).await?;
        let event = self.get_updated_event_for_id(id).await?;
        self.store_event(event.clone());
        Ok(event)
    }

    /// Clear flapping state of a portstate event.
    ///
    /// Returns `false` without touching the server for other variants.
    pub async fn clear_flapping(&mut self, event: &Event) -> Result<bool> {
        let EventDetails::PortState(details) = &event.details else {
            return Ok(false);
        };
        self.request()?
            .clear_flapping(&event.router, details.if_index)
            .await?;
        Ok(true)
    }

    /// Trigger a server-side repoll of the object behind an event.
    ///
    /// Portstate events repoll the interface, everything else the router.
    pub async fn poll_event(&mut self, event: &Event) -> Result<()> {
        match &event.details {
            EventDetails::PortState(details) => {
                let if_index = details.if_index;
                self.request()?.poll_interface(&event.router, if_index).await
            }
            _ => self.request()?.poll_router(&event.router).await,
        }
    }

    /// Evict an event and record its id as removed.
    pub fn remove_event(&mut self, id: u32) {
        self.events.remove(&id);
        self.removed_ids.insert(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu;
    use crate::event::EventKind;

    async fn connected_manager() -> EventManager {
        emu::full_manager(Vec::new(), false).await
    }

    #[tokio::test]
    async fn test_verify_session() {
        let manager = EventManager::configure(Config::new("127.0.0.1"));
        assert!(!manager.verify_session(true).unwrap());
        assert!(matches!(
            manager.verify_session(false),
            Err(Error::NotConnected)
        ));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_get_events_populates_map() {
        let mut manager = connected_manager().await;
        assert!(manager.events.is_empty());
        manager.get_events().await.unwrap();
        assert_eq!(manager.events.len(), 2);
        assert!(manager.events.contains_key(&32802));
        assert!(manager.events.contains_key(&34978));
        assert_eq!(manager.events[&32802].kind(), EventKind::Bgp);
        assert_eq!(manager.events[&32802].router, "uninett-gsw2");
        assert_eq!(manager.events[&32802].adm_state, AdmState::Working);
    }

    #[tokio::test]
    async fn test_get_updated_event_attaches_history_and_log() {
        let mut manager = connected_manager().await;
        let event = manager.get_updated_event_for_id(32802).await.unwrap();
        assert_eq!(event.history.len(), 2);
        assert_eq!(event.history[0].user, history::SYSTEM_USER);
        assert_eq!(event.history[1].user, "runarb");
        assert_eq!(event.history[1].log, "Testmelding ifra pyRitz");
        assert_eq!(event.log.len(), 2);
        assert_eq!(event.log[0].log, "some log message");
    }

    #[tokio::test]
    async fn test_add_history_entry_returns_refetched_event() {
        let mut manager = connected_manager().await;
        let event = manager
            .add_history_entry_for_id(40959, "Testmelding ifra pyRitz")
            .await
            .unwrap();
        assert_eq!(event.id, 40959);
        assert_eq!(event.history.last().unwrap().log, "Testmelding ifra pyRitz");
        assert!(manager.events.contains_key(&40959));
    }

    #[tokio::test]
    async fn test_change_admin_state_reopen_closed() {
        let mut manager = connected_manager().await;
        let err = manager
            .change_admin_state_for_id(40960, AdmState::Open)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EventClosed(40960)));
    }

    #[tokio::test]
    async fn test_change_admin_state_stores_event() {
        let mut manager = connected_manager().await;
        let event = manager
            .change_admin_state_for_id(40959, AdmState::Waiting)
            .await
            .unwrap();
        assert_eq!(event.id, 40959);
        assert!(manager.events.contains_key(&40959));
    }

    #[tokio::test]
    async fn test_remove_event_moves_id_to_removed() {
        let mut manager = connected_manager().await;
        manager.get_events().await.unwrap();
        manager.remove_event(32802);
        assert!(!manager.events.contains_key(&32802));
        assert!(manager.removed_ids.contains(&32802));
        // Never simultaneously live and removed.
        for id in manager.events.keys() {
            assert!(!manager.removed_ids.contains(id));
        }
    }

    #[tokio::test]
    async fn test_clear_flapping_only_for_portstate() {
        let mut manager = connected_manager().await;
        manager.get_events().await.unwrap();
        let portstate = manager.get_updated_event_for_id(40959).await.unwrap();
        let bgp = manager.events[&32802].clone();
        assert!(manager.clear_flapping(&portstate).await.unwrap());
        assert!(!manager.clear_flapping(&bgp).await.unwrap());
    }

    #[tokio::test]
    async fn test_poll_event_dispatches_per_variant() {
        let mut manager = connected_manager().await;
        manager.get_events().await.unwrap();
        let portstate = manager.get_updated_event_for_id(40959).await.unwrap();
        let bgp = manager.events[&32802].clone();
        manager.poll_event(&portstate).await.unwrap();
        manager.poll_event(&bgp).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_history_for_event() {
        let mut manager = connected_manager().await;
        manager.get_events().await.unwrap();
        let history_list = manager.get_history_for_id(32802).await.unwrap();
        let event = manager.set_history_for_event(32802, history_list).unwrap();
        assert_eq!(event.history.len(), 2);
        assert!(manager.set_history_for_event(1, Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_connect_ties_notification_channel() {
        let manager = connected_manager().await;
        assert!(manager.has_notification_channel());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut manager = connected_manager().await;
        assert!(manager.is_connected());
        manager.disconnect().await;
        assert!(!manager.is_connected());
        manager.disconnect().await;
        assert!(matches!(
            manager.get_events().await.unwrap_err(),
            Error::NotConnected
        ));
    }
}
