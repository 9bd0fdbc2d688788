use actix_web::{web, HttpResponse, Responder};
use sea_orm::DatabaseConnection;
use serde::Deserialize;

use crate::handlers::{authenticated_user, ErrorResponse};
use crate::middleware::auth::Claims;
use crate::services::map_service::{Bbox, MapService};
use crate::utils::validators::validate_bbox;

#[derive(Debug, Deserialize)]
pub struct ViewportQuery {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
    /// Only the polygon endpoint looks at this; defaults to a city-level view.
    pub zoom: Option<f64>,
}

fn parse_bbox(query: &ViewportQuery) -> Result<Bbox, HttpResponse> {
    validate_bbox(query.min_lng, query.min_lat, query.max_lng, query.max_lat).map_err(|e| {
        HttpResponse::BadRequest().json(ErrorResponse::new(e.to_string()))
    })?;

    Ok(Bbox {
        min_lng: query.min_lng,
        min_lat: query.min_lat,
        max_lng: query.max_lng,
        max_lat: query.max_lat,
    })
}

pub async fn summary(
    db: web::Data<DatabaseConnection>,
    claims: web::ReqData<Claims>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let service = MapService::new(db.get_ref().clone(), user_id);
    match service.get_summary().await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => {
            log::error!("❌ Failed to build map summary: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to load map data"))
        }
    }
}

pub async fn cells(
    db: web::Data<DatabaseConnection>,
    claims: web::ReqData<Claims>,
    query: web::Query<ViewportQuery>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let bbox = match parse_bbox(&query) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let service = MapService::new(db.get_ref().clone(), user_id);
    match service.get_cells_in_viewport(bbox).await {
        Ok(cells) => HttpResponse::Ok().json(cells),
        Err(e) => {
            log::error!("❌ Failed to load viewport cells: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to load map data"))
        }
    }
}

pub async fn polygons(
    db: web::Data<DatabaseConnection>,
    claims: web::ReqData<Claims>,
    query: web::Query<ViewportQuery>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let bbox = match parse_bbox(&query) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let zoom = query.zoom.unwrap_or(12.0);

    let service = MapService::new(db.get_ref().clone(), user_id);
    match service.get_polygons_in_viewport(bbox, zoom).await {
        Ok(collection) => HttpResponse::Ok().json(collection),
        Err(e) => {
            log::error!("❌ Failed to build viewport polygons: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to load map data"))
        }
    }
}
