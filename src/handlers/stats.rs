use actix_web::{web, HttpResponse, Responder};
use sea_orm::DatabaseConnection;
use serde::Deserialize;

use crate::handlers::{authenticated_user, ErrorResponse};
use crate::middleware::auth::Claims;
use crate::services::stats_service::{SortField, SortOrder, StatsService};

const MAX_PAGE_SIZE: u64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

struct ListParams {
    sort_by: SortField,
    order: SortOrder,
    limit: u64,
    offset: u64,
}

fn parse_list_query(query: &ListQuery) -> Result<ListParams, HttpResponse> {
    let sort_by = match &query.sort_by {
        Some(raw) => SortField::parse(raw).ok_or_else(|| {
            HttpResponse::BadRequest().json(ErrorResponse::new(format!(
                "Invalid sort_by '{}': expected coverage_pct, first_visited_at, last_visited_at or name",
                raw
            )))
        })?,
        None => SortField::LastVisitedAt,
    };

    let order = match &query.order {
        Some(raw) => SortOrder::parse(raw).ok_or_else(|| {
            HttpResponse::BadRequest().json(ErrorResponse::new(format!(
                "Invalid order '{}': expected asc or desc",
                raw
            )))
        })?,
        None => SortOrder::Desc,
    };

    Ok(ListParams {
        sort_by,
        order,
        limit: query.limit.unwrap_or(50).min(MAX_PAGE_SIZE),
        offset: query.offset.unwrap_or(0),
    })
}

pub async fn overview(
    db: web::Data<DatabaseConnection>,
    claims: web::ReqData<Claims>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let service = StatsService::new(db.get_ref().clone(), user_id);
    match service.get_overview().await {
        Ok(overview) => HttpResponse::Ok().json(overview),
        Err(e) => {
            log::error!("❌ Failed to build stats overview: {}", e);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Failed to load statistics"))
        }
    }
}

pub async fn countries(
    db: web::Data<DatabaseConnection>,
    claims: web::ReqData<Claims>,
    query: web::Query<ListQuery>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let params = match parse_list_query(&query) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let service = StatsService::new(db.get_ref().clone(), user_id);
    match service
        .get_countries(params.sort_by, params.order, params.limit, params.offset)
        .await
    {
        Ok(countries) => HttpResponse::Ok().json(countries),
        Err(e) => {
            log::error!("❌ Failed to list visited countries: {}", e);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Failed to load statistics"))
        }
    }
}

pub async fn regions(
    db: web::Data<DatabaseConnection>,
    claims: web::ReqData<Claims>,
    query: web::Query<ListQuery>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let params = match parse_list_query(&query) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let service = StatsService::new(db.get_ref().clone(), user_id);
    match service
        .get_regions(params.sort_by, params.order, params.limit, params.offset)
        .await
    {
        Ok(regions) => HttpResponse::Ok().json(regions),
        Err(e) => {
            log::error!("❌ Failed to list visited regions: {}", e);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Failed to load statistics"))
        }
    }
}

pub async fn achievements(
    db: web::Data<DatabaseConnection>,
    claims: web::ReqData<Claims>,
) -> impl Responder {
    let user_id = match authenticated_user(&claims) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let service = StatsService::new(db.get_ref().clone(), user_id);
    match service.get_achievements().await {
        Ok(achievements) => HttpResponse::Ok().json(achievements),
        Err(e) => {
            log::error!("❌ Failed to list achievements: {}", e);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Failed to load achievements"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults_to_recency() {
        let query = ListQuery {
            sort_by: None,
            order: None,
            limit: None,
            offset: None,
        };
        let params = parse_list_query(&query).ok().unwrap();
        assert_eq!(params.sort_by, SortField::LastVisitedAt);
        assert_eq!(params.order, SortOrder::Desc);
        assert_eq!(params.limit, 50);
        assert_eq!(params.offset, 0);
    }

    #[test]
    fn test_list_query_caps_page_size() {
        let query = ListQuery {
            sort_by: Some("name".to_string()),
            order: Some("asc".to_string()),
            limit: Some(10_000),
            offset: Some(20),
        };
        let params = parse_list_query(&query).ok().unwrap();
        assert_eq!(params.sort_by, SortField::Name);
        assert_eq!(params.order, SortOrder::Asc);
        assert_eq!(params.limit, MAX_PAGE_SIZE);
        assert_eq!(params.offset, 20);
    }

    #[test]
    fn test_list_query_rejects_unknown_fields() {
        let query = ListQuery {
            sort_by: Some("visit_count".to_string()),
            order: None,
            limit: None,
            offset: None,
        };
        assert!(parse_list_query(&query).is_err());
    }
}
