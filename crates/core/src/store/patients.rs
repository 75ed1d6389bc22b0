use super::models::{NewPatient, Patient};
use super::{Result, Store, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Row};

impl Store {
    pub fn add_patient(&self, patient: NewPatient) -> Result<Patient> {
        self.with_connection(|conn| add_patient_impl(conn, patient))
    }

    pub fn list_patients(&self) -> Result<Vec<Patient>> {
        self.with_connection(|conn| list_patients_impl(conn))
    }

    pub fn get_patient(&self, id: i64) -> Result<Option<Patient>> {
        self.with_connection(|conn| get_patient_impl(conn, id))
    }

    /// Remove a patient and every recording filed under their id.
    pub fn delete_patient(&self, id: i64) -> Result<()> {
        self.with_connection(|conn| delete_patient_impl(conn, id))
    }
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        name: row.get(1)?,
        age: row.get(2)?,
    })
}

fn add_patient_impl(conn: &Connection, patient: NewPatient) -> Result<Patient> {
    conn.execute(
        "INSERT INTO patients (name, age) VALUES (?1, ?2)",
        params![patient.name, patient.age],
    )?;
    let id = conn.last_insert_rowid();
    tracing::debug!(patient_id = id, "patient inserted");
    Ok(Patient {
        id,
        name: patient.name,
        age: patient.age,
    })
}

fn list_patients_impl(conn: &Connection) -> Result<Vec<Patient>> {
    let mut stmt = conn.prepare("SELECT id, name, age FROM patients ORDER BY id")?;
    let patients = stmt
        .query_map([], patient_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(patients)
}

fn get_patient_impl(conn: &Connection, id: i64) -> Result<Option<Patient>> {
    let patient = conn
        .query_row(
            "SELECT id, name, age FROM patients WHERE id = ?1",
            params![id],
            patient_from_row,
        )
        .optional()?;
    Ok(patient)
}

fn delete_patient_impl(conn: &mut Connection, id: i64) -> Result<()> {
    let tx = conn.transaction()?;
    let recordings = tx.execute("DELETE FROM recordings WHERE patient_id = ?1", params![id])?;
    let patients = tx.execute("DELETE FROM patients WHERE id = ?1", params![id])?;
    if patients == 0 {
        // Dropping `tx` rolls the recording delete back.
        return Err(StoreError::NotFound {
            entity: "patient",
            id,
        });
    }
    tx.commit()?;
    tracing::debug!(patient_id = id, recordings, "patient deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreLocation;
    use crate::store::NewRecording;
    use chrono::Utc;

    fn store() -> Store {
        Store::open(StoreLocation::Memory).unwrap()
    }

    fn new_patient(name: &str, age: i64) -> NewPatient {
        NewPatient {
            name: name.to_owned(),
            age,
        }
    }

    fn recording_for(patient_id: i64) -> NewRecording {
        NewRecording {
            patient_id,
            patient_name: "x".to_owned(),
            patient_age: 1,
            emotions: vec!["sad".to_owned()],
            emotion_percentages: vec![100.0],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn add_then_get_and_list() {
        let store = store();
        assert!(store.list_patients().unwrap().is_empty());
        let a = store.add_patient(new_patient("Ada", 36)).unwrap();
        let b = store.add_patient(new_patient("Alan", 41)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.get_patient(a.id).unwrap(), Some(a.clone()));
        assert_eq!(store.list_patients().unwrap(), vec![a, b]);
        assert_eq!(store.get_patient(999).unwrap(), None);
    }

    #[test]
    fn delete_patient_cascades_to_recordings() {
        let store = store();
        let a = store.add_patient(new_patient("Ada", 36)).unwrap();
        let b = store.add_patient(new_patient("Alan", 41)).unwrap();
        store.insert_recording(recording_for(a.id)).unwrap();
        store.insert_recording(recording_for(a.id)).unwrap();
        store.insert_recording(recording_for(b.id)).unwrap();

        store.delete_patient(a.id).unwrap();

        assert_eq!(store.get_patient(a.id).unwrap(), None);
        assert!(store.recordings_for_patient(a.id).unwrap().is_empty());
        assert_eq!(store.recordings_for_patient(b.id).unwrap().len(), 1);
    }

    #[test]
    fn deleting_missing_patient_is_not_found_and_changes_nothing() {
        let store = store();
        // Recording filed under an id that has no patient row.
        store.insert_recording(recording_for(77)).unwrap();
        let err = store.delete_patient(77).unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                entity: "patient",
                id: 77
            }
        ));
        assert_eq!(store.recordings_for_patient(77).unwrap().len(), 1);
    }
}
