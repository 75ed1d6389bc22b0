use super::models::{NewRecording, Recording};
use super::{Result, Store, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::de::DeserializeOwned;

impl Store {
    pub fn insert_recording(&self, recording: NewRecording) -> Result<Recording> {
        self.with_connection(|conn| insert_recording_impl(conn, recording))
    }

    /// Oldest first.
    pub fn recordings_for_patient(&self, patient_id: i64) -> Result<Vec<Recording>> {
        self.with_connection(|conn| recordings_for_patient_impl(conn, patient_id))
    }

    pub fn delete_recording(&self, id: i64) -> Result<()> {
        self.with_connection(|conn| delete_recording_impl(conn, id))
    }
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn recording_from_row(row: &Row<'_>) -> rusqlite::Result<Recording> {
    Ok(Recording {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        patient_name: row.get(2)?,
        patient_age: row.get(3)?,
        emotions: json_column(row, 4)?,
        emotion_percentages: json_column(row, 5)?,
        timestamp: timestamp_column(row, 6)?,
    })
}

fn insert_recording_impl(conn: &mut Connection, recording: NewRecording) -> Result<Recording> {
    let emotions = serde_json::to_string(&recording.emotions)?;
    let percentages = serde_json::to_string(&recording.emotion_percentages)?;
    let timestamp = recording
        .timestamp
        .to_rfc3339_opts(SecondsFormat::AutoSi, true);

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO recordings (
            patient_id, patient_name, patient_age, emotions, emotion_percentages, timestamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            recording.patient_id,
            recording.patient_name,
            recording.patient_age,
            emotions,
            percentages,
            timestamp,
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    tracing::debug!(recording_id = id, patient_id = recording.patient_id, "recording inserted");

    Ok(Recording {
        id,
        patient_id: recording.patient_id,
        patient_name: recording.patient_name,
        patient_age: recording.patient_age,
        emotions: recording.emotions,
        emotion_percentages: recording.emotion_percentages,
        timestamp: recording.timestamp,
    })
}

fn recordings_for_patient_impl(conn: &Connection, patient_id: i64) -> Result<Vec<Recording>> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, patient_name, patient_age, emotions, emotion_percentages, timestamp
         FROM recordings WHERE patient_id = ?1 ORDER BY id",
    )?;
    let recordings = stmt
        .query_map(params![patient_id], recording_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(recordings)
}

fn delete_recording_impl(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM recordings WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(StoreError::NotFound {
            entity: "analysis",
            id,
        });
    }
    tracing::debug!(recording_id = id, "recording deleted");
    Ok(())
}
