use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use emotion_monitor_core::store::{NewPatient, NewRecording, Patient, Recording};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const UPLOAD_FIELD: &str = "file";

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ping", get(ping))
        .route("/predict", post(predict))
        .route("/addnewpatient", post(add_patient))
        .route("/getpatients", get(list_patients))
        .route("/getpatient/:patient_id", get(get_patient))
        .route("/deletepatient/:patient_id", get(delete_patient))
        .route("/deleteanalysis/:analysis_id", get(delete_analysis))
        .route("/getanalysis/:patient_id", get(get_analysis))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_id(raw: &str, what: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {what} ID format")))
}

fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

async fn root() -> Json<Value> {
    message("Welcome to the emotion monitor API")
}

async fn ping() -> Json<&'static str> {
    Json("Hello, I am alive")
}

#[derive(Debug, Deserialize)]
struct PredictQuery {
    patient_id: Option<String>,
    patient_age: Option<String>,
    patient_name: Option<String>,
}

struct PredictTarget {
    patient_id: i64,
    patient_age: i64,
    patient_name: String,
}

impl PredictQuery {
    fn validate(self) -> Result<PredictTarget, ApiError> {
        let missing = |name: &str| ApiError::BadRequest(format!("Missing query parameter: {name}"));
        let patient_id = self.patient_id.ok_or_else(|| missing("patient_id"))?;
        let patient_age = self.patient_age.ok_or_else(|| missing("patient_age"))?;
        let patient_name = self.patient_name.ok_or_else(|| missing("patient_name"))?;
        Ok(PredictTarget {
            patient_id: parse_id(&patient_id, "patient")?,
            patient_age: patient_age
                .trim()
                .parse()
                .map_err(|_| ApiError::BadRequest("Invalid patient age".to_owned()))?,
            patient_name,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub patient_id: i64,
    pub patient_name: String,
    pub patient_age: i64,
    pub emotions: Vec<String>,
    pub emotion_percentages: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

impl From<Recording> for PredictResponse {
    fn from(r: Recording) -> Self {
        Self {
            patient_id: r.patient_id,
            patient_name: r.patient_name,
            patient_age: r.patient_age,
            emotions: r.emotions,
            emotion_percentages: r.emotion_percentages,
            timestamp: r.timestamp,
        }
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::Rejected {
        status: err.status(),
        detail: err.body_text(),
    }
}

async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Bytes, ApiError> {
    let mut multipart = multipart.map_err(|rejection| ApiError::Rejected {
        status: rejection.status(),
        detail: rejection.body_text(),
    })?;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(UPLOAD_FIELD) {
            return field.bytes().await.map_err(multipart_error);
        }
    }
    Err(ApiError::BadRequest(format!(
        "Missing multipart field: {UPLOAD_FIELD}"
    )))
}

async fn predict(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let target = query.validate()?;
    let upload = read_upload(multipart).await?;
    tracing::info!(
        patient_id = target.patient_id,
        upload_bytes = upload.len(),
        "prediction requested"
    );

    let outcome = state.pipeline.analyze(upload).await?;

    let recording = NewRecording {
        patient_id: target.patient_id,
        patient_name: target.patient_name,
        patient_age: target.patient_age,
        emotions: outcome.labels,
        emotion_percentages: outcome.percentages,
        timestamp: Utc::now(),
    };
    let stored = state
        .with_store(move |store| store.insert_recording(recording))
        .await?;

    Ok(Json(stored.into()))
}

async fn add_patient(
    State(state): State<AppState>,
    payload: Result<Json<NewPatient>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(patient) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let created = state
        .with_store(move |store| store.add_patient(patient))
        .await?;
    tracing::info!(patient_id = created.id, "patient added");
    Ok(Json(json!({
        "message": "Patient added successfully!",
        "id": created.id,
    })))
}

async fn list_patients(State(state): State<AppState>) -> Result<Json<Vec<Patient>>, ApiError> {
    let patients = state.with_store(|store| store.list_patients()).await?;
    Ok(Json(patients))
}

async fn get_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<Patient>, ApiError> {
    let id = parse_id(&patient_id, "patient")?;
    state
        .with_store(move |store| store.get_patient(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Patient not found".to_owned()))
}

async fn delete_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&patient_id, "patient")?;
    state
        .with_store(move |store| store.delete_patient(id))
        .await?;
    tracing::info!(patient_id = id, "patient deleted");
    Ok(message("Patient and their analysis deleted successfully!"))
}

async fn delete_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&analysis_id, "analysis")?;
    state
        .with_store(move |store| store.delete_recording(id))
        .await?;
    tracing::info!(analysis_id = id, "analysis deleted");
    Ok(message("Analysis deleted successfully!"))
}

async fn get_analysis(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<Vec<Recording>>, ApiError> {
    let id = parse_id(&patient_id, "patient")?;
    let recordings = state
        .with_store(move |store| store.recordings_for_patient(id))
        .await?;
    if recordings.is_empty() {
        return Err(ApiError::NotFound(
            "No analysis found for the specified patient".to_owned(),
        ));
    }
    Ok(Json(recordings))
}
