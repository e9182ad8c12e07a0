use crate::db::models::recording_models::RecordingSearchQuery;
use crate::db::repositories::{RecordingRepository, StreamRepository};
use crate::domain::{
    RecordedSpan, Recording, RecordingSnapshot, RetentionPolicy, Stream, Timeline,
};
use crate::error::{Error, Result};
use crate::messaging::commands::{RecordingCommand, RECORDINGS_EXCHANGE};
use crate::messaging::{EventPublisher, MessageBroker};
use crate::metrics;
use crate::utils::KeyedLocks;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound of recordings considered for one timeline
const TIMELINE_MAX_RECORDINGS: i64 = 10_000;

/// Recording orchestration: start/stop, search and timeline
pub struct RecordingService {
    streams: Arc<dyn StreamRepository>,
    recordings: Arc<dyn RecordingRepository>,
    broker: Arc<dyn MessageBroker>,
    events: EventPublisher,
    stream_locks: KeyedLocks<Uuid>,
}

impl RecordingService {
    pub fn new(
        streams: Arc<dyn StreamRepository>,
        recordings: Arc<dyn RecordingRepository>,
        broker: Arc<dyn MessageBroker>,
        events: EventPublisher,
    ) -> Self {
        Self {
            streams,
            recordings,
            broker,
            events,
            stream_locks: KeyedLocks::new(),
        }
    }

    pub async fn start_recording(
        &self,
        stream_id: Uuid,
        retention_days: u32,
    ) -> Result<RecordingSnapshot> {
        let stream = self
            .streams
            .find_by_id(stream_id)
            .await?
            .map(Stream::restore)
            .ok_or_else(|| Error::NotFound(format!("Stream {} not found", stream_id)))?;
        if !stream.is_running() {
            return Err(Error::InvalidState(format!(
                "Stream {} is {}, not running",
                stream_id,
                stream.status()
            )));
        }

        let _guard = self.stream_locks.lock(&stream_id).await;

        if let Some(active) = self.recordings.find_active_by_stream(stream_id).await? {
            return Err(Error::Conflict(format!(
                "Stream {} already has active recording {}",
                stream_id, active.id
            )));
        }

        let policy = RetentionPolicy::new(retention_days)?;
        let mut recording = Recording::start(stream_id, stream.tenant_id(), policy, Utc::now());
        // the unique index turns a lost race into Conflict
        self.recordings.insert(&recording.snapshot()).await?;

        let command = RecordingCommand::Start {
            recording_id: recording.id(),
            stream_id,
            tenant_id: stream.tenant_id().to_string(),
            source_url: stream.source_url().to_string(),
        };
        if let Err(e) = self.send(&command).await {
            error!(
                "Failed to dispatch capture of recording {}, closing it: {}",
                recording.id(),
                e
            );
            recording.mark_error(Utc::now())?;
            self.recordings.update(&recording.snapshot()).await?;
            self.events.publish_domain(recording.take_events()).await;
            self.refresh_gauge().await;
            return Err(e);
        }

        self.events.publish_domain(recording.take_events()).await;
        self.refresh_gauge().await;

        info!(
            "Recording {} started on stream {} ({})",
            recording.id(),
            stream_id,
            policy
        );
        Ok(recording.snapshot())
    }

    pub async fn stop_recording(&self, recording_id: Uuid) -> Result<RecordingSnapshot> {
        let stream_id = self.load(recording_id).await?.stream_id();
        let _guard = self.stream_locks.lock(&stream_id).await;

        let mut recording = self.load(recording_id).await?;
        recording.stop(Utc::now())?;
        self.recordings.update(&recording.snapshot()).await?;

        // capture is bounded by its maximum duration if the stop never arrives
        if let Err(e) = self.send(&RecordingCommand::Stop { recording_id }).await {
            error!(
                "Failed to dispatch stop of recording {}: {}",
                recording_id, e
            );
        }

        self.events.publish_domain(recording.take_events()).await;
        self.refresh_gauge().await;

        info!(
            "Recording {} stopped after {}s",
            recording_id,
            recording.duration_seconds()
        );
        Ok(recording.snapshot())
    }

    pub async fn get_recording(&self, recording_id: Uuid) -> Result<RecordingSnapshot> {
        Ok(self.load(recording_id).await?.snapshot())
    }

    /// Live recordings ordered by start time, optionally restricted to a stream
    /// and to those overlapping `[from, to)`
    pub async fn search_recordings(
        &self,
        stream_id: Option<Uuid>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecordingSnapshot>> {
        if let (Some(from), Some(to)) = (from, to) {
            if from >= to {
                return Err(Error::Validation(format!(
                    "Search range start {} must be before end {}",
                    from, to
                )));
            }
        }
        let query = RecordingSearchQuery {
            stream_id,
            ..Default::default()
        }
        .between(from, to);
        self.recordings.search(&query).await
    }

    pub async fn get_timeline(
        &self,
        stream_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Timeline> {
        if from >= to {
            return Err(Error::Validation(format!(
                "Timeline start {} must be before end {}",
                from, to
            )));
        }

        let query = RecordingSearchQuery {
            limit: Some(TIMELINE_MAX_RECORDINGS),
            ..RecordingSearchQuery::for_stream(stream_id)
        }
        .between(Some(from), Some(to));
        let recordings = self.recordings.search(&query).await?;
        if recordings.is_empty() {
            return Err(Error::NotFound(format!(
                "No recordings for stream {} between {} and {}",
                stream_id, from, to
            )));
        }

        let now = Utc::now();
        let spans = recordings.iter().map(|r| RecordedSpan {
            recording_id: r.id,
            start: r.started_at,
            end: r.stopped_at.unwrap_or(now).min(to),
        });
        Ok(Timeline::build(stream_id, from, to, spans))
    }

    /// Flag a recording as evidence of an incident, exempting it from retention
    pub async fn set_incident(&self, recording_id: Uuid, incident: bool) -> Result<RecordingSnapshot> {
        self.load(recording_id).await?.set_incident(incident)?;
        let stored = self
            .recordings
            .set_flags(recording_id, Some(incident), None)
            .await?;
        info!("Recording {} incident flag set to {}", recording_id, incident);
        Ok(stored)
    }

    pub async fn set_legal_hold(&self, recording_id: Uuid, legal_hold: bool) -> Result<RecordingSnapshot> {
        self.load(recording_id).await?.set_legal_hold(legal_hold)?;
        let stored = self
            .recordings
            .set_flags(recording_id, None, Some(legal_hold))
            .await?;
        info!("Recording {} legal hold set to {}", recording_id, legal_hold);
        Ok(stored)
    }

    async fn send(&self, command: &RecordingCommand) -> Result<()> {
        let body = serde_json::to_value(command)?;
        self.broker
            .publish(RECORDINGS_EXCHANGE, command.routing_key(), &body)
            .await
    }

    /// Soft-deleted recordings are reported as missing
    async fn load(&self, recording_id: Uuid) -> Result<Recording> {
        match self.recordings.find_by_id(recording_id).await? {
            Some(r) if r.deleted_at.is_none() => Ok(Recording::restore(r)),
            _ => Err(Error::NotFound(format!(
                "Recording {} not found",
                recording_id
            ))),
        }
    }

    async fn refresh_gauge(&self) {
        match self.recordings.count_active().await {
            Ok(count) => metrics::set_active_recordings(count),
            Err(e) => warn!("Failed to refresh active recordings gauge: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecordingStatus, StreamStatus};
    use crate::messaging::commands::{RECORDING_START_KEY, RECORDING_STOP_KEY};
    use crate::testing::{Harness, TENANT};
    use chrono::Duration;

    fn service(h: &Harness) -> RecordingService {
        RecordingService::new(
            h.repos.streams.clone(),
            h.repos.recordings.clone(),
            h.broker.clone(),
            h.events(),
        )
    }

    #[tokio::test]
    async fn start_conflict_stop_start_again() {
        let h = Harness::new();
        let svc = service(&h);
        let stream = h.running_stream().await;

        let first = svc.start_recording(stream.id, 15).await.unwrap();
        assert_eq!(first.status, RecordingStatus::Recording);
        assert_eq!(first.tenant_id, TENANT);
        assert_eq!(first.retention_policy.days(), 15);

        assert!(matches!(
            svc.start_recording(stream.id, 15).await,
            Err(Error::Conflict(_))
        ));

        let stopped = svc.stop_recording(first.id).await.unwrap();
        assert_eq!(stopped.status, RecordingStatus::Stopped);
        assert!(stopped.stopped_at.is_some());

        let second = svc.start_recording(stream.id, 30).await.unwrap();
        assert_ne!(second.id, first.id);

        let keys: Vec<String> = h
            .broker
            .published()
            .await
            .into_iter()
            .filter(|m| m.exchange == RECORDINGS_EXCHANGE)
            .map(|m| m.routing_key)
            .collect();
        assert_eq!(keys, vec![RECORDING_START_KEY, RECORDING_STOP_KEY, RECORDING_START_KEY]);
    }

    #[tokio::test]
    async fn start_command_carries_source_and_tenant() {
        let h = Harness::new();
        let svc = service(&h);
        let stream = h.running_stream().await;
        let recording = svc.start_recording(stream.id, 7).await.unwrap();

        let published = h.broker.published().await;
        let start = published
            .iter()
            .find(|m| m.routing_key == RECORDING_START_KEY)
            .unwrap();
        let command: RecordingCommand = serde_json::from_value(start.payload.clone()).unwrap();
        assert_eq!(
            command,
            RecordingCommand::Start {
                recording_id: recording.id,
                stream_id: stream.id,
                tenant_id: TENANT.to_string(),
                source_url: stream.source_url.clone(),
            }
        );
    }

    #[tokio::test]
    async fn start_preconditions() {
        let h = Harness::new();
        let svc = service(&h);

        assert!(matches!(
            svc.start_recording(Uuid::new_v4(), 7).await,
            Err(Error::NotFound(_))
        ));

        let mut stopped = h.running_stream().await;
        stopped.camera_id = Uuid::new_v4();
        stopped.id = Uuid::new_v4();
        stopped.status = StreamStatus::Stopped;
        h.repos.streams.insert(&stopped).await.unwrap();
        assert!(matches!(
            svc.start_recording(stopped.id, 7).await,
            Err(Error::InvalidState(_))
        ));

        let running = h.running_stream().await;
        assert!(matches!(
            svc.start_recording(running.id, 10).await,
            Err(Error::Validation(_))
        ));
        assert!(h.repos.recordings.find_active_by_stream(running.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_starts_yield_one_recording() {
        let h = Harness::new();
        let svc = Arc::new(service(&h));
        let stream = h.running_stream().await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.start_recording(stream.id, 7).await })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, Error::Conflict(_)), "{e}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn stop_requires_active_recording() {
        let h = Harness::new();
        let svc = service(&h);
        let stream = h.running_stream().await;
        let recording = svc.start_recording(stream.id, 7).await.unwrap();

        svc.stop_recording(recording.id).await.unwrap();
        assert!(matches!(
            svc.stop_recording(recording.id).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            svc.stop_recording(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn search_filters_by_stream_and_range() {
        let h = Harness::new();
        let svc = service(&h);
        let now = Utc::now();
        let old = h.stored_recording(TENANT, 7, now - Duration::days(3), 10).await;
        let recent = h.stored_recording(TENANT, 7, now - Duration::minutes(5), 10).await;

        let all = svc.search_recordings(None, None, None).await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![old.id, recent.id]);

        let last_day = svc
            .search_recordings(None, Some(now - Duration::days(1)), Some(now))
            .await
            .unwrap();
        assert_eq!(last_day.len(), 1);
        assert_eq!(last_day[0].id, recent.id);

        let by_stream = svc.search_recordings(Some(old.stream_id), None, None).await.unwrap();
        assert_eq!(by_stream.len(), 1);

        assert!(matches!(
            svc.search_recordings(None, Some(now), Some(now)).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn timeline_reports_gaps_and_open_recordings() {
        let h = Harness::new();
        let svc = service(&h);
        let stream = h.running_stream().await;
        let now = Utc::now();

        let mut earlier = h.stored_recording(TENANT, 7, now - Duration::hours(2), 10).await;
        earlier.stream_id = stream.id;
        earlier.started_at = now - Duration::hours(3);
        h.recordings.put(earlier.clone()).await;

        let open = svc.start_recording(stream.id, 7).await.unwrap();
        let mut backdated = h.recording(open.id).await;
        backdated.started_at = now - Duration::minutes(30);
        h.recordings.put(backdated).await;

        let timeline = svc
            .get_timeline(stream.id, now - Duration::hours(4), now + Duration::hours(1))
            .await
            .unwrap();
        assert!(timeline.has_gaps);
        let coverage: Vec<bool> = timeline.segments.iter().map(|s| s.has_recording).collect();
        assert_eq!(coverage, vec![false, true, false, true, false]);
        assert_eq!(timeline.segments[3].recording_ids, vec![open.id]);
        assert!(timeline.total_duration_seconds >= 3600 + 1800);

        assert!(matches!(
            svc.get_timeline(stream.id, now - Duration::days(30), now - Duration::days(29))
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn flags_are_persisted() {
        let h = Harness::new();
        let svc = service(&h);
        let recording = h.stored_recording(TENANT, 7, Utc::now(), 10).await;

        let held = svc.set_legal_hold(recording.id, true).await.unwrap();
        assert!(held.legal_hold);
        let flagged = svc.set_incident(recording.id, true).await.unwrap();
        assert!(flagged.incident && flagged.legal_hold);
        assert!(h.recording(recording.id).await.incident);
    }

    #[tokio::test]
    async fn hold_placed_while_stopping_survives_the_stop() {
        let h = Harness::new();
        let svc = service(&h);
        let stream = h.running_stream().await;
        let recording = svc.start_recording(stream.id, 7).await.unwrap();

        h.recordings.hold_before_next_write(recording.id).await;
        svc.stop_recording(recording.id).await.unwrap();

        let stored = h.recording(recording.id).await;
        assert_eq!(stored.status, RecordingStatus::Stopped);
        assert!(stored.legal_hold);
    }
}
