use crate::{
    database::connection::DbPool,
    middleware::auth::AuthenticatedUser,
    models::contribution::{Contribution, CreateContribution},
    requests::contribution::ContributionRequest,
    services::access,
    utils::helpers::ApiResponse,
};
use actix_web::{HttpResponse, Result, web};
use tracing::{error, info};
use uuid::Uuid;

pub async fn create(
    pool: web::Data<DbPool>,
    request: web::Json<ContributionRequest>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    if !access::is_finance_official(&user) {
        return Ok(HttpResponse::Forbidden().json(ApiResponse::<()>::error(
            "Only finance officials can open contributions".to_string(),
        )));
    }

    info!("Creating contribution '{}' by {}", request.title, user.user_id);

    let create_contribution = CreateContribution {
        created_by: user.user_id,
        title: request.title.clone(),
        description: request.description.clone(),
        category: request.category,
        amount: request.amount,
        due_date: request.due_date,
    };

    match Contribution::create(&pool, create_contribution).await {
        Ok(contribution) => Ok(HttpResponse::Created().json(ApiResponse::success(contribution))),
        Err(e) => {
            error!("Failed to create contribution: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to create contribution".to_string(),
                )),
            )
        }
    }
}

pub async fn all(pool: web::Data<DbPool>) -> Result<HttpResponse> {
    match Contribution::find_all(&pool).await {
        Ok(contributions) => Ok(HttpResponse::Ok().json(ApiResponse::success(contributions))),
        Err(e) => {
            error!("Error getting contributions: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve contributions".to_string(),
                )),
            )
        }
    }
}

pub async fn get_contribution(
    pool: web::Data<DbPool>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let contribution_id = path.into_inner();

    match Contribution::find_by_id(&pool, contribution_id).await {
        Ok(Some(contribution)) => Ok(HttpResponse::Ok().json(ApiResponse::success(contribution))),
        Ok(None) => Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
            "Contribution not found".to_string(),
        ))),
        Err(e) => {
            error!("Database error getting contribution: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve contribution".to_string(),
                )),
            )
        }
    }
}
