//! Session export: JSON values for tooling, markdown for humans.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use serde_json::{json, Value};

use crate::session::{InterventionPayload, SessionRecord};

pub fn transcript_json(record: &SessionRecord) -> Value {
    json!({
        "sessionId": record.session_id,
        "title": record.title,
        "agenda": record.agenda,
        "participants": record.participants,
        "transcript": record.transcript,
    })
}

pub fn interventions_json(record: &SessionRecord) -> Value {
    let interventions: Vec<InterventionPayload> = record
        .interventions
        .iter()
        .map(InterventionPayload::from)
        .collect();
    json!({
        "sessionId": record.session_id,
        "interventions": interventions,
        "parkingLot": record.parking_lot,
    })
}

pub fn to_markdown(record: &SessionRecord) -> String {
    let mut out = String::new();
    let title = if record.title.is_empty() {
        record.session_id.as_str()
    } else {
        record.title.as_str()
    };
    let _ = writeln!(out, "# {}", title);
    let _ = writeln!(out);
    if !record.agenda.is_empty() {
        let _ = writeln!(out, "**Agenda:** {}", record.agenda);
        let _ = writeln!(out);
    }

    if !record.participants.is_empty() {
        let _ = writeln!(out, "## Participants");
        let _ = writeln!(out);
        for p in &record.participants {
            if p.role.is_empty() {
                let _ = writeln!(out, "- {} ({} turns)", p.name, p.speaking_count);
            } else {
                let _ = writeln!(out, "- {}, {} ({} turns)", p.name, p.role, p.speaking_count);
            }
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Transcript");
    let _ = writeln!(out);
    if record.transcript.is_empty() {
        let _ = writeln!(out, "_No transcript._");
    }
    for entry in &record.transcript {
        let _ = writeln!(
            out,
            "- `{}` **{}:** {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.speaker,
            entry.text
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Interventions");
    let _ = writeln!(out);
    if record.interventions.is_empty() {
        let _ = writeln!(out, "_None._");
    }
    for i in &record.interventions {
        let _ = writeln!(
            out,
            "- `{}` [{}] {}",
            i.timestamp.format("%H:%M:%S"),
            i.intervention_type,
            i.message
        );
        if let Some(principle) = &i.violated_principle {
            let _ = writeln!(out, "  - Principle: {}", principle);
        }
        for citation in i.citations() {
            let _ = writeln!(out, "  - Source: {}", citation);
        }
    }

    if !record.parking_lot.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Parking lot");
        let _ = writeln!(out);
        for item in &record.parking_lot {
            let _ = writeln!(out, "- {}", item);
        }
    }
    out
}

pub fn write_markdown(record: &SessionRecord, path: &Path) -> io::Result<()> {
    std::fs::write(path, to_markdown(record))
}

pub fn write_json(record: &SessionRecord, path: &Path) -> io::Result<()> {
    let value = json!({
        "transcript": transcript_json(record),
        "interventions": interventions_json(record),
    });
    let body = serde_json::to_string_pretty(&value)?;
    std::fs::write(path, body)
}
