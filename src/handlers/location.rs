use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Deserialize;

use crate::handlers::{authenticated_user, ErrorResponse};
use crate::middleware::auth::Claims;
use crate::services::location_processor::{
    DeviceInfo, IncomingLocation, LocationProcessor, ProcessError,
};
use crate::services::region_index::RegionIndex;
use crate::utils::config::Config;
use crate::utils::validators::validate_coordinates;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub h3_res8: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub device_uuid: Option<String>,
    pub device_name: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub h3_res8: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct BatchIngestRequest {
    pub locations: Vec<BatchLocation>,
    pub device_uuid: Option<String>,
    pub device_name: Option<String>,
    pub platform: Option<String>,
}

/// Coordinate-only variant for clients without an H3 library.
#[derive(Debug, Deserialize)]
pub struct SimpleIngestRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub device_uuid: Option<String>,
    pub device_name: Option<String>,
    pub platform: Option<String>,
}

fn error_response(e: ProcessError) -> HttpResponse {
    match e {
        ProcessError::Validation(reason) => {
            log::warn!("❌ Ingest rejected: {}", reason);
            HttpResponse::BadRequest().json(ErrorResponse::new(reason))
        }
        ProcessError::Db(e) => {
            log::error!("❌ Database error during ingest: {}", e);
            HttpResponse::ServiceUnavailable()
                .json(ErrorResponse::new("Storage temporarily unavailable"))
        }
        ProcessError::Internal(e) => {
            log::error!("❌ Internal error during ingest: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Internal error"))
        }
    }
}

pub async fn ingest(
    db: web::Data<DatabaseConnection>,
    regions: web::Data<Arc<RegionIndex>>,
    claims: web::ReqData<Claims>,
    req: web::Json<IngestRequest>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if let Err(reason) = validate_coordinates(req.latitude, req.longitude) {
        return HttpResponse::BadRequest().json(ErrorResponse::new(reason.to_string()));
    }

    let req = req.into_inner();
    let processor = LocationProcessor::new(db.get_ref().clone(), regions.get_ref().clone(), user_id);
    let device = DeviceInfo {
        device_uuid: req.device_uuid,
        device_name: req.device_name,
        platform: req.platform,
    };
    let location = IncomingLocation {
        latitude: req.latitude,
        longitude: req.longitude,
        h3_res8: Some(req.h3_res8),
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };

    match processor.process_location(location, &device).await {
        Ok(summary) => {
            log::info!(
                "📍 User {} ingested 1 location ({} new cells)",
                user_id,
                summary.new_cells
            );
            HttpResponse::Ok().json(summary)
        }
        Err(e) => error_response(e),
    }
}

pub async fn ingest_batch(
    db: web::Data<DatabaseConnection>,
    regions: web::Data<Arc<RegionIndex>>,
    config: web::Data<Config>,
    claims: web::ReqData<Claims>,
    req: web::Json<BatchIngestRequest>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let req = req.into_inner();
    let processor = LocationProcessor::new(db.get_ref().clone(), regions.get_ref().clone(), user_id);
    let device = DeviceInfo {
        device_uuid: req.device_uuid,
        device_name: req.device_name,
        platform: req.platform,
    };
    let locations: Vec<IncomingLocation> = req
        .locations
        .into_iter()
        .map(|l| IncomingLocation {
            latitude: l.latitude,
            longitude: l.longitude,
            h3_res8: Some(l.h3_res8),
            timestamp: l.timestamp.unwrap_or_else(Utc::now),
        })
        .collect();

    match processor
        .process_batch(locations, &device, config.max_batch_size)
        .await
    {
        Ok(batch) => {
            log::info!(
                "📍 User {} batch: {} processed, {} failed",
                user_id,
                batch.processed,
                batch.failed
            );
            HttpResponse::Ok().json(batch)
        }
        Err(e) => error_response(e),
    }
}

pub async fn ingest_simple(
    db: web::Data<DatabaseConnection>,
    regions: web::Data<Arc<RegionIndex>>,
    claims: web::ReqData<Claims>,
    req: web::Json<SimpleIngestRequest>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if let Err(reason) = validate_coordinates(req.latitude, req.longitude) {
        return HttpResponse::BadRequest().json(ErrorResponse::new(reason.to_string()));
    }

    let req = req.into_inner();
    let processor = LocationProcessor::new(db.get_ref().clone(), regions.get_ref().clone(), user_id);
    let device = DeviceInfo {
        device_uuid: req.device_uuid,
        device_name: req.device_name,
        platform: req.platform,
    };
    let location = IncomingLocation {
        latitude: req.latitude,
        longitude: req.longitude,
        h3_res8: None,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };

    match processor.process_location(location, &device).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => error_response(e),
    }
}
