//! A [`Saver`] writing session events through a [`Connector`].

use async_trait::async_trait;
use observability_deps::tracing::{debug, trace};
use sessiondb_write::{CommitError, Connector, statement, store};

use super::{
    SaveError, Saver,
    event::{EventKind, SessionEvent},
};
use crate::consumer::Message;

const INSERT_SESSION: &str = "INSERT INTO sessions \
    (session_id, project_id, start_ts, user_agent, user_country, user_id) \
    VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT DO NOTHING";

const INSERT_PAGE: &str = "INSERT INTO events.pages \
    (session_id, message_id, timestamp, path, referrer, load_time) \
    VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT DO NOTHING";

const INSERT_CLICK: &str = "INSERT INTO events.clicks \
    (session_id, message_id, timestamp, label, selector) \
    VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING";

const INSERT_INPUT: &str = "INSERT INTO events.inputs \
    (session_id, message_id, timestamp, label, value) \
    VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING";

const INSERT_CUSTOM: &str = "INSERT INTO events_common.customs \
    (session_id, seq_index, timestamp, name, payload) \
    VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING";

const UPDATE_DURATION: &str = "UPDATE sessions SET duration = $2 WHERE session_id = $1";

/// Autocomplete kinds, the `type` column of the `autocomplete` table.
pub mod autocomplete {
    pub const LOCATION: &str = "LOCATION";
    pub const CLICK: &str = "CLICK";
    pub const INPUT: &str = "INPUT";
    pub const CUSTOM: &str = "CUSTOM";
}

/// Decodes [`SessionEvent`]s and turns each into session statements, autocomplete rows and
/// `sessions` counter updates.
///
/// A `session_end` event finalizes the session: its batch is flushed immediately and the
/// session is no longer tracked.
#[derive(Debug)]
pub struct SessionSaver {
    connector: Connector,
}

impl SessionSaver {
    pub fn new(connector: Connector) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    async fn save(&mut self, event: SessionEvent) -> Result<(), sessiondb_write::Error> {
        let SessionEvent {
            session_id,
            project_id,
            timestamp,
            kind,
        } = event;
        let conn = &mut self.connector;

        match kind {
            EventKind::SessionStart {
                user_agent,
                user_country,
                user_id,
            } => {
                conn.batch_queue(
                    session_id,
                    statement!(
                        INSERT_SESSION,
                        session_id,
                        project_id,
                        timestamp,
                        user_agent,
                        user_country,
                        user_id
                    ),
                )
                .await?;
            }
            EventKind::Page {
                message_id,
                path,
                referrer,
                load_time,
            } => {
                conn.insert_autocomplete_value(project_id, autocomplete::LOCATION, path.as_str())?;
                conn.batch_queue(
                    session_id,
                    statement!(
                        INSERT_PAGE,
                        session_id,
                        message_id,
                        timestamp,
                        path,
                        referrer,
                        load_time
                    ),
                )
                .await?;
                conn.update_session_events(session_id, 1, 1).await?;
            }
            EventKind::Click {
                message_id,
                label,
                selector,
            } => {
                conn.insert_autocomplete_value(project_id, autocomplete::CLICK, label.as_str())?;
                conn.batch_queue(
                    session_id,
                    statement!(INSERT_CLICK, session_id, message_id, timestamp, label, selector),
                )
                .await?;
                conn.update_session_events(session_id, 1, 0).await?;
            }
            EventKind::Input {
                message_id,
                label,
                value,
            } => {
                conn.insert_autocomplete_value(project_id, autocomplete::INPUT, label.as_str())?;
                conn.batch_queue(
                    session_id,
                    statement!(INSERT_INPUT, session_id, message_id, timestamp, label, value),
                )
                .await?;
                conn.update_session_events(session_id, 1, 0).await?;
            }
            EventKind::Custom {
                message_id,
                name,
                payload,
            } => {
                conn.insert_autocomplete_value(project_id, autocomplete::CUSTOM, name.as_str())?;
                conn.batch_queue(
                    session_id,
                    statement!(INSERT_CUSTOM, session_id, message_id, timestamp, name, payload),
                )
                .await?;
                conn.update_session_events(session_id, 1, 0).await?;
            }
            EventKind::SessionEnd { duration } => {
                conn.batch_queue(
                    session_id,
                    statement!(UPDATE_DURATION, session_id, duration),
                )
                .await?;
                conn.close_session(session_id).await?;
                debug!(%session_id, duration, "session finalized");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Saver for SessionSaver {
    async fn handle(&mut self, message: Message) -> Result<(), SaveError> {
        let event = SessionEvent::decode(message.payload())?;
        trace!(
            offset = message.offset(),
            session_id = %event.session_id,
            "decoded session event"
        );
        self.save(event).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CommitError> {
        self.connector.commit_batches().await
    }

    async fn close(&mut self) -> Result<(), store::Error> {
        self.connector.close().await
    }
}
