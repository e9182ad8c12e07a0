use chrono::{DateTime, Utc};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSegment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub has_recording: bool,
    /// Recordings covering this segment; empty for gaps
    pub recording_ids: Vec<Uuid>,
}

impl TimelineSegment {
    pub fn duration_seconds(&self) -> u64 {
        (self.end - self.start).num_seconds().max(0) as u64
    }
}

impl Serialize for TimelineSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut segment = serializer.serialize_struct("TimelineSegment", 5)?;
        segment.serialize_field("start", &self.start)?;
        segment.serialize_field("end", &self.end)?;
        segment.serialize_field("duration_seconds", &self.duration_seconds())?;
        segment.serialize_field("has_recording", &self.has_recording)?;
        segment.serialize_field("recording_ids", &self.recording_ids)?;
        segment.end()
    }
}

/// Recorded coverage of one stream over a time range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub stream_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub segments: Vec<TimelineSegment>,
    pub total_duration_seconds: u64,
    pub has_gaps: bool,
}

/// A recorded interval fed into the timeline builder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedSpan {
    pub recording_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Timeline {
    /// Clip spans to `[start, end)`, merge overlaps and fill holes with gap segments.
    /// Callers validate that `start < end`.
    pub fn build(
        stream_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        spans: impl IntoIterator<Item = RecordedSpan>,
    ) -> Self {
        let mut clipped: Vec<RecordedSpan> = spans
            .into_iter()
            .map(|span| RecordedSpan {
                recording_id: span.recording_id,
                start: span.start.max(start),
                end: span.end.min(end),
            })
            .filter(|span| span.start < span.end)
            .collect();
        clipped.sort_by_key(|span| (span.start, span.end));

        let mut merged: Vec<TimelineSegment> = Vec::new();
        for span in clipped {
            match merged.last_mut() {
                Some(last) if span.start <= last.end => {
                    last.end = last.end.max(span.end);
                    last.recording_ids.push(span.recording_id);
                }
                _ => merged.push(TimelineSegment {
                    start: span.start,
                    end: span.end,
                    has_recording: true,
                    recording_ids: vec![span.recording_id],
                }),
            }
        }

        let total_duration_seconds = merged.iter().map(|s| s.duration_seconds()).sum();

        let mut segments = Vec::with_capacity(merged.len() * 2 + 1);
        let mut cursor = start;
        for segment in merged {
            if segment.start > cursor {
                segments.push(gap(cursor, segment.start));
            }
            cursor = segment.end;
            segments.push(segment);
        }
        if cursor < end {
            segments.push(gap(cursor, end));
        }

        let has_gaps = segments.iter().any(|s| !s.has_recording);

        Self {
            stream_id,
            start,
            end,
            segments,
            total_duration_seconds,
            has_gaps,
        }
    }
}

fn gap(start: DateTime<Utc>, end: DateTime<Utc>) -> TimelineSegment {
    TimelineSegment {
        start,
        end,
        has_recording: false,
        recording_ids: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn span(from: i64, to: i64) -> RecordedSpan {
        RecordedSpan {
            recording_id: Uuid::new_v4(),
            start: t(from),
            end: t(to),
        }
    }

    #[test]
    fn empty_range_is_one_gap() {
        let tl = Timeline::build(Uuid::new_v4(), t(0), t(60), vec![]);
        assert_eq!(tl.segments.len(), 1);
        assert!(!tl.segments[0].has_recording);
        assert!(tl.has_gaps);
        assert_eq!(tl.total_duration_seconds, 0);
    }

    #[test]
    fn full_coverage_has_no_gaps() {
        let tl = Timeline::build(Uuid::new_v4(), t(10), t(20), vec![span(0, 30)]);
        assert_eq!(tl.segments.len(), 1);
        assert_eq!(tl.segments[0].start, t(10));
        assert_eq!(tl.segments[0].end, t(20));
        assert!(!tl.has_gaps);
        assert_eq!(tl.total_duration_seconds, 600);
    }

    #[test]
    fn holes_become_gaps() {
        let tl = Timeline::build(
            Uuid::new_v4(),
            t(0),
            t(60),
            vec![span(40, 50), span(10, 20)],
        );
        let coverage: Vec<bool> = tl.segments.iter().map(|s| s.has_recording).collect();
        assert_eq!(coverage, vec![false, true, false, true, false]);
        assert_eq!(tl.segments[2].start, t(20));
        assert_eq!(tl.segments[2].end, t(40));
        assert_eq!(tl.total_duration_seconds, 20 * 60);
    }

    #[test]
    fn overlaps_are_merged_not_double_counted() {
        let a = span(0, 30);
        let b = span(20, 40);
        let tl = Timeline::build(Uuid::new_v4(), t(0), t(40), vec![a, b]);
        assert_eq!(tl.segments.len(), 1);
        assert_eq!(tl.segments[0].recording_ids, vec![a.recording_id, b.recording_id]);
        assert_eq!(tl.total_duration_seconds, 40 * 60);
    }

    #[test]
    fn touching_spans_merge() {
        let tl = Timeline::build(Uuid::new_v4(), t(0), t(20), vec![span(0, 10), span(10, 20)]);
        assert_eq!(tl.segments.len(), 1);
        assert!(!tl.has_gaps);
    }

    #[test]
    fn spans_outside_range_are_ignored() {
        let tl = Timeline::build(Uuid::new_v4(), t(0), t(10), vec![span(-30, -5), span(20, 30)]);
        assert_eq!(tl.segments.len(), 1);
        assert!(!tl.segments[0].has_recording);
    }

    #[test]
    fn serialized_segments_carry_their_duration() {
        let tl = Timeline::build(Uuid::new_v4(), t(0), t(30), vec![span(10, 20)]);
        let json = serde_json::to_value(&tl).unwrap();
        let durations: Vec<u64> = json["segments"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["duration_seconds"].as_u64().unwrap())
            .collect();
        assert_eq!(durations, vec![600, 600, 600]);
        assert_eq!(json["total_duration_seconds"], 600);
    }
}
