use axum::{extract::State, Json};
use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    auth::{AdminUser, PublicUser},
    error::AppError,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct AdminResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total_users: usize,
    pub users: Vec<PublicUser>,
}

#[derive(Debug, Serialize)]
pub struct ManagementOrders {
    pub orders: Vec<serde_json::Value>,
}

#[instrument(skip(state))]
pub async fn dashboard(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<AdminResponse<Dashboard>>, AppError> {
    let users: Vec<PublicUser> = state
        .users
        .list()
        .await?
        .iter()
        .map(PublicUser::from_user)
        .collect();

    info!(admin = %admin.email, total = users.len(), "admin dashboard served");
    Ok(Json(AdminResponse {
        success: true,
        message: "Admin Dashboard".into(),
        data: Dashboard {
            total_users: users.len(),
            users,
        },
    }))
}

/// Orders are not tracked yet; the listing is always empty.
#[instrument(skip_all)]
pub async fn management_orders(AdminUser(_admin): AdminUser) -> Json<AdminResponse<ManagementOrders>> {
    Json(AdminResponse {
        success: true,
        message: "Management Orders".into(),
        data: ManagementOrders { orders: Vec::new() },
    })
}
