//! Purpose: Define a stable, structured JSON schema for download-event notices.
//! Exports: `Notice`, `notice_json`, `now_rfc3339`.
//! Role: Shared contract helper for the CLI's per-event output lines.
//! Invariants: One notice per event; JSON schema is additive-only once published.
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::event::{DownloadEvent, Gid};
use crate::core::handler::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub event: DownloadEvent,
    pub gid: Gid,
    pub session: SessionId,
    pub time: String,
}

impl Notice {
    pub fn new(event: DownloadEvent, gid: Gid, session: SessionId) -> Self {
        Self {
            event,
            gid,
            session,
            time: now_rfc3339(),
        }
    }
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.event.as_str()));
    inner.insert("code".to_string(), json!(notice.event.code()));
    inner.insert("gid".to_string(), json!(notice.gid.to_hex()));
    inner.insert("session".to_string(), json!(notice.session.get()));
    inner.insert("time".to_string(), json!(notice.time));

    let mut outer = Map::new();
    outer.insert("event".to_string(), Value::Object(inner));
    Value::Object(outer)
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::{Notice, notice_json};
    use crate::core::event::{DownloadEvent, Gid};
    use crate::core::handler::SessionId;

    #[test]
    fn notice_json_has_required_fields() {
        let notice = Notice {
            event: DownloadEvent::Complete,
            gid: Gid::new(0x2089b05ecca3d829),
            session: SessionId::next(),
            time: "2026-02-01T00:00:00Z".to_string(),
        };

        let value = notice_json(&notice);
        let obj = value
            .get("event")
            .and_then(|v| v.as_object())
            .expect("event object");

        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("complete"));
        assert_eq!(obj.get("code").and_then(|v| v.as_i64()), Some(4));
        assert_eq!(
            obj.get("gid").and_then(|v| v.as_str()),
            Some("2089b05ecca3d829")
        );
        assert_eq!(
            obj.get("session").and_then(|v| v.as_u64()),
            Some(notice.session.get())
        );
        assert_eq!(
            obj.get("time").and_then(|v| v.as_str()),
            Some("2026-02-01T00:00:00Z")
        );
        assert_eq!(obj.len(), 5);
    }

    #[test]
    fn new_notice_is_stamped_now() {
        let notice = Notice::new(DownloadEvent::Start, Gid::new(1), SessionId::next());
        let value = notice_json(&notice);
        assert_eq!(value["event"]["kind"], "start");
        assert!(value["event"]["time"].as_str().unwrap().contains('T'));
    }
}
