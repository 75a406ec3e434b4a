use crate::types::{CreateUserRequest, UpdateUserRequest, User};
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::HashMap;

/// Coins granted when a profile record is first created.
pub const STARTING_COINS: i64 = 30;

// Per-action generation costs.
pub const OUTLINE_COST: i64 = 5;
pub const CHARACTER_COST: i64 = 10;
pub const SCRIPT_COST: i64 = 5;
pub const RENDER_COST: i64 = 5;
pub const EDIT_COST: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum CoinError {
    #[error("insufficient coin balance")]
    Insufficient,
    #[error("coin update failed: {0}")]
    Update(String),
}

pub fn is_conditional_check_failed(message: &str) -> bool {
    message.contains("ConditionalCheckFailed")
}

/// Atomically deduct `amount` coins. The condition keeps the balance from
/// ever going negative, including under concurrent deductions from multiple
/// tabs or devices. Returns the new balance.
pub async fn deduct_coins(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    amount: i64,
) -> Result<i64, CoinError> {
    let pk = format!("USER#{}", user_id);

    let result = client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("ADD coins :delta")
        .condition_expression("attribute_exists(PK) AND coins >= :amount")
        .expression_attribute_values(":delta", AttributeValue::N((-amount).to_string()))
        .expression_attribute_values(":amount", AttributeValue::N(amount.to_string()))
        .return_values(ReturnValue::UpdatedNew)
        .send()
        .await;

    match result {
        Ok(output) => {
            let balance = output
                .attributes()
                .and_then(|attrs| attrs.get("coins"))
                .and_then(|v| v.as_n().ok())
                .and_then(|n| n.parse().ok())
                .unwrap_or_default();
            Ok(balance)
        }
        Err(e) => {
            let message = format!("{:?}", e);
            if is_conditional_check_failed(&message) {
                Err(CoinError::Insufficient)
            } else {
                tracing::error!("Coin deduction failed for {}: {}", user_id, message);
                Err(CoinError::Update(message))
            }
        }
    }
}

/// Return coins after a failed generation stage. Best effort: a lost refund
/// is logged, the stage error still reaches the caller.
pub async fn refund_coins(client: &DynamoClient, table_name: &str, user_id: &str, amount: i64) {
    let pk = format!("USER#{}", user_id);

    let result = client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("ADD coins :amount")
        .condition_expression("attribute_exists(PK)")
        .expression_attribute_values(":amount", AttributeValue::N(amount.to_string()))
        .send()
        .await;

    if let Err(e) = result {
        tracing::error!("Failed to refund {} coins to {}: {:?}", amount, user_id, e);
    }
}

pub fn coin_error_response(err: CoinError) -> Result<Response<Body>, Error> {
    let (status, code) = match err {
        CoinError::Insufficient => (StatusCode::PAYMENT_REQUIRED, "InsufficientCoins"),
        CoinError::Update(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CoinUpdateFailed"),
    };

    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({"error": code, "message": err.to_string()})
                .to_string()
                .into(),
        )
        .map_err(Box::new)?)
}

fn user_from_item(user_id: &str, item: &HashMap<String, AttributeValue>) -> User {
    User {
        user_id: user_id.to_string(),
        username: item
            .get("username")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .unwrap_or_default(),
        coins: item
            .get("coins")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
            .unwrap_or_default(),
        first_recharge_used: item
            .get("first_recharge_used")
            .and_then(|v| v.as_bool().ok())
            .copied()
            .unwrap_or(false),
        created_at: item
            .get("created_at")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .unwrap_or_default(),
        last_login: item
            .get("last_login")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string()),
    }
}

/// Create the profile record after signup. Safe to call more than once: an
/// existing record is returned untouched instead of being clobbered.
pub async fn create_user(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateUserRequest = serde_json::from_slice(body)?;

    let now = chrono::Utc::now().to_rfc3339();
    let pk = format!("USER#{}", user_id);

    let result = client
        .put_item()
        .table_name(table_name)
        .item("PK", AttributeValue::S(pk.clone()))
        .item("SK", AttributeValue::S(pk.clone()))
        .item("username", AttributeValue::S(req.username.clone()))
        .item("coins", AttributeValue::N(STARTING_COINS.to_string()))
        .item("first_recharge_used", AttributeValue::Bool(false))
        .item("created_at", AttributeValue::S(now.clone()))
        .condition_expression("attribute_not_exists(PK)")
        .send()
        .await;

    match result {
        Ok(_) => {
            let user = User {
                user_id: user_id.to_string(),
                username: req.username,
                coins: STARTING_COINS,
                first_recharge_used: false,
                created_at: now,
                last_login: None,
            };

            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header("Content-Type", "application/json")
                .header("Access-Control-Allow-Origin", "*")
                .body(serde_json::to_string(&user)?.into())
                .map_err(Box::new)?)
        }
        Err(e) => {
            let message = format!("{:?}", e);
            if is_conditional_check_failed(&message) {
                tracing::info!("Profile already exists for {}", user_id);
                return get_user(client, table_name, user_id).await;
            }
            Err(message.into())
        }
    }
}

/// Fetch the current user's profile, touching last_login.
pub async fn get_user(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let pk = format!("USER#{}", user_id);

    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk.clone()))
        .send()
        .await?;

    if let Some(item) = result.item() {
        let mut user = user_from_item(user_id, item);

        let now = chrono::Utc::now().to_rfc3339();
        let _ = client
            .update_item()
            .table_name(table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S(pk))
            .update_expression("SET last_login = :login")
            .expression_attribute_values(":login", AttributeValue::S(now.clone()))
            .send()
            .await;
        user.last_login = Some(now);

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(serde_json::to_string(&user)?.into())
            .map_err(Box::new)?)
    } else {
        Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(
                serde_json::json!({"error": "User not found"})
                    .to_string()
                    .into(),
            )
            .map_err(Box::new)?)
    }
}

/// Merge-update the profile.
pub async fn update_user(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateUserRequest = serde_json::from_slice(body)?;
    let pk = format!("USER#{}", user_id);

    if let Some(username) = req.username {
        client
            .update_item()
            .table_name(table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S(pk))
            .update_expression("SET username = :username")
            .expression_attribute_values(":username", AttributeValue::S(username))
            .send()
            .await?;
    }

    get_user(client, table_name, user_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_check_failure_is_recognized() {
        let sdk_debug = "ServiceError(ServiceError { source: ConditionalCheckFailedException(\
                         ConditionalCheckFailedException { message: Some(\"The conditional \
                         request failed\") }) })";
        assert!(is_conditional_check_failed(sdk_debug));
        assert!(!is_conditional_check_failed(
            "ThrottlingException: Rate exceeded"
        ));
    }

    #[test]
    fn generation_costs_are_positive() {
        for cost in [OUTLINE_COST, CHARACTER_COST, SCRIPT_COST, RENDER_COST, EDIT_COST] {
            assert!(cost > 0);
        }
        assert!(STARTING_COINS >= CHARACTER_COST);
    }
}
