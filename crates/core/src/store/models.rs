use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    pub age: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPatient {
    pub name: String,
    pub age: i64,
}

/// One stored analysis; patient name and age are copied at write time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Recording {
    pub id: i64,
    pub patient_id: i64,
    pub patient_name: String,
    pub patient_age: i64,
    pub emotions: Vec<String>,
    pub emotion_percentages: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NewRecording {
    pub patient_id: i64,
    pub patient_name: String,
    pub patient_age: i64,
    pub emotions: Vec<String>,
    pub emotion_percentages: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}
