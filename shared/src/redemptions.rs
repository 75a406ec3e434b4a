use crate::types::{RedeemRequest, RedeemResponse};
use aws_sdk_dynamodb::types::{AttributeValue, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{http::StatusCode, Body, Error, Response};

/// Codes are distributed in print and chat; accept sloppy input.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// The transaction is canceled when another redemption won the race.
pub fn is_transaction_canceled(message: &str) -> bool {
    message.contains("TransactionCanceled") || message.contains("ConditionalCheckFailed")
}

fn error_response(
    status: StatusCode,
    code: &str,
    message: &str,
) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({"error": code, "message": message})
                .to_string()
                .into(),
        )
        .map_err(Box::new)?)
}

/// Redeem a coin code. The status flip on the code record and the coin
/// credit on the user record happen in one transaction conditioned on the
/// code still being pending, so a code spends at most once even when two
/// devices try it at the same moment.
pub async fn redeem_code(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: RedeemRequest = serde_json::from_slice(body)?;
    let code = normalize_code(&req.code);
    if code.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "InvalidCode",
            "Redemption code must not be empty",
        );
    }

    let code_pk = format!("CODE#{}", code);

    let code_result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(code_pk.clone()))
        .key("SK", AttributeValue::S("METADATA".to_string()))
        .send()
        .await?;

    let Some(code_item) = code_result.item() else {
        return error_response(
            StatusCode::NOT_FOUND,
            "CodeNotFound",
            "Redemption code not found",
        );
    };

    let status = code_item
        .get("status")
        .and_then(|v| v.as_s().ok())
        .map(|s| s.as_str())
        .unwrap_or("");
    if status != "pending" {
        return error_response(
            StatusCode::CONFLICT,
            "CodeAlreadyUsed",
            "Redemption code has already been used",
        );
    }

    let value: i64 = code_item
        .get("value")
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    if value <= 0 {
        return error_response(
            StatusCode::CONFLICT,
            "InvalidCode",
            "Redemption code has no value",
        );
    }

    let user_pk = format!("USER#{}", user_id);
    let user_result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(user_pk.clone()))
        .key("SK", AttributeValue::S(user_pk.clone()))
        .send()
        .await?;

    let Some(user_item) = user_result.item() else {
        return error_response(StatusCode::NOT_FOUND, "UserNotFound", "User not found");
    };

    let first_recharge = !user_item
        .get("first_recharge_used")
        .and_then(|v| v.as_bool().ok())
        .copied()
        .unwrap_or(false);
    let prior_coins: i64 = user_item
        .get("coins")
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    let now = chrono::Utc::now().to_rfc3339();

    let mark_code_used = Update::builder()
        .table_name(table_name)
        .key("PK", AttributeValue::S(code_pk.clone()))
        .key("SK", AttributeValue::S("METADATA".to_string()))
        .update_expression("SET #status = :used, used_by = :user, used_at = :now")
        .condition_expression("#status = :pending")
        .expression_attribute_names("#status", "status")
        .expression_attribute_values(":used", AttributeValue::S("used".to_string()))
        .expression_attribute_values(":pending", AttributeValue::S("pending".to_string()))
        .expression_attribute_values(":user", AttributeValue::S(user_id.to_string()))
        .expression_attribute_values(":now", AttributeValue::S(now))
        .build()
        .map_err(|e| format!("Failed to build code update: {:?}", e))?;

    let credit_user = Update::builder()
        .table_name(table_name)
        .key("PK", AttributeValue::S(user_pk.clone()))
        .key("SK", AttributeValue::S(user_pk.clone()))
        .update_expression("ADD coins :value SET first_recharge_used = :true")
        .condition_expression("attribute_exists(PK)")
        .expression_attribute_values(":value", AttributeValue::N(value.to_string()))
        .expression_attribute_values(":true", AttributeValue::Bool(true))
        .build()
        .map_err(|e| format!("Failed to build coin credit: {:?}", e))?;

    let transact_result = client
        .transact_write_items()
        .transact_items(TransactWriteItem::builder().update(mark_code_used).build())
        .transact_items(TransactWriteItem::builder().update(credit_user).build())
        .send()
        .await;

    if let Err(e) = transact_result {
        let message = format!("{:?}", e);
        if is_transaction_canceled(&message) {
            tracing::info!("Redemption lost the race for code {}", code);
            return error_response(
                StatusCode::CONFLICT,
                "CodeAlreadyUsed",
                "Redemption code has already been used",
            );
        }
        return Err(message.into());
    }

    tracing::info!("Code {} redeemed by {} for {} coins", code, user_id, value);

    let response = RedeemResponse {
        coins: prior_coins + value,
        value,
        first_recharge,
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(&response)?.into())
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_normalize_by_trimming_and_uppercasing() {
        assert_eq!(normalize_code("  ab12cd34 \n"), "AB12CD34");
        assert_eq!(normalize_code("AB12CD34"), "AB12CD34");
        assert_eq!(normalize_code("   "), "");
    }

    #[test]
    fn canceled_transactions_are_recognized() {
        let sdk_debug = "ServiceError(ServiceError { source: TransactionCanceledException(\
                         TransactionCanceledException { message: Some(\"Transaction cancelled, \
                         please refer cancellation reasons for specific reasons \
                         [ConditionalCheckFailed, None]\") }) })";
        assert!(is_transaction_canceled(sdk_debug));
        assert!(!is_transaction_canceled("ProvisionedThroughputExceeded"));
    }
}
