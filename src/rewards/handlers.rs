use axum::{extract::State, Json};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::AppError,
    extract::ApiJson,
    rewards::dto::{CheckoutRequest, CheckoutResponse, OrderAck},
    state::AppState,
};

#[instrument(skip(state, body))]
pub async fn checkout(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ApiJson(body): ApiJson<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    if !body.amount.is_finite() || body.amount <= 0.0 {
        warn!(email = %principal.email, amount = body.amount, "rejected checkout amount");
        return Err(AppError::Validation("Amount must be a positive number".into()));
    }
    let product_id = body.product_id.trim();
    if product_id.is_empty() {
        return Err(AppError::Validation("productId is required".into()));
    }

    info!(email = %principal.email, amount = body.amount, product_id, "order placed");
    if let Some(credit) = state.rewards.on_purchase(&principal.email, body.amount).await? {
        info!(
            buyer = %principal.email,
            referrer = %credit.referrer_email,
            bonus = credit.bonus,
            "referral reward sent"
        );
    }

    Ok(Json(CheckoutResponse {
        success: true,
        message: "Order created".into(),
        data: OrderAck {
            order_id: format!("ORD-{}", Uuid::new_v4().simple()),
            amount: body.amount,
        },
    }))
}
