//! Types which (de)serialize to/from the backend's JSON API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// The envelope every backend response is wrapped in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiResponse<T> {
    /// Whether the call succeeded at the application level.
    pub success: bool,
    /// Application-level status code.
    pub code: i32,
    /// Human-readable outcome message.
    pub message: String,
    /// The payload, if any.
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Unwraps the envelope into its (optional) payload.
    ///
    /// `success: false` is converted into [`ApiError::Service`] carrying the
    /// backend's message.
    pub fn into_data(self) -> Result<Option<T>, ApiError> {
        if !self.success {
            return Err(ApiError::Service {
                code: self.code,
                message: self.message,
            });
        }
        Ok(self.data)
    }

    /// Unwraps the envelope into a payload that must be present.
    ///
    /// A missing payload on a successful response is an error in its own
    /// right ([`ApiError::MissingData`]).
    pub fn into_required_data(self) -> Result<T, ApiError> {
        let message = self.message.clone();
        self.into_data()?.ok_or(ApiError::MissingData(message))
    }
}

/// The authenticated user, as returned by `get_me` and `update_user`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    /// Backend identifier.
    pub id: u32,
    /// Unique login name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Contact phone number.
    pub phone: String,
    /// Shipping address.
    pub address: String,
    /// Whether the user may access the admin roster.
    pub is_admin: bool,
}

/// A row of the admin user roster.
///
/// Deliberately smaller than [`User`]: the roster does not expose contact
/// details beyond the email.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PartialUser {
    /// Backend identifier.
    pub id: u32,
    /// Unique login name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Whether the user may access the admin roster.
    pub is_admin: bool,
}

/// A product listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Product {
    /// Backend identifier.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Price in minor currency units (see [`format_price`]).
    pub price: i64,
    /// The user offering this product, if the backend resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller: Option<Seller>,
    /// Creation time; listings are ordered newest first.
    pub created_at: DateTime<Utc>,
}

/// Public contact information of a product's seller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Seller {
    /// Backend identifier.
    pub id: u32,
    /// Unique login name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Contact phone number, if the seller published one.
    pub phone: Option<String>,
    /// Pickup address, if the seller published one.
    pub address: Option<String>,
}

/// Payload of the `login` call.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Password, passed through to the backend unmodified.
    pub password: String,
}

impl LoginRequest {
    /// Validates the payload before any call is made.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.username.trim().is_empty() {
            return Err(ApiError::Validation("username must not be empty".into()));
        }
        if self.password.is_empty() {
            return Err(ApiError::Validation("password must not be empty".into()));
        }
        Ok(())
    }
}

/// Payload of the `register` call.
///
/// The confirmation field is checked locally and never sent over the wire.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    /// Desired login name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Desired password.
    pub password: String,
    /// Must match `password`; local check only.
    #[serde(skip_serializing)]
    pub password_confirmation: String,
}

impl RegisterRequest {
    /// Validates the payload before any call is made.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.username.trim().is_empty() {
            return Err(ApiError::Validation("username must not be empty".into()));
        }
        if !is_plausible_email(&self.email) {
            return Err(ApiError::Validation(format!(
                "not a valid email address: {:?}",
                self.email
            )));
        }
        if self.password.len() < 6 {
            return Err(ApiError::Validation(
                "password must be at least 6 characters".into(),
            ));
        }
        if self.password != self.password_confirmation {
            return Err(ApiError::Validation("passwords do not match".into()));
        }
        Ok(())
    }
}

/// Payload of the `update_user` call.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateUserRequest {
    /// Login name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Contact phone number.
    pub phone: String,
    /// Shipping address.
    pub address: String,
}

impl UpdateUserRequest {
    /// Validates the payload before any call is made.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.username.trim().is_empty() {
            return Err(ApiError::Validation("username must not be empty".into()));
        }
        if !is_plausible_email(&self.email) {
            return Err(ApiError::Validation(format!(
                "not a valid email address: {:?}",
                self.email
            )));
        }
        Ok(())
    }
}

/// Payload of the `create_product` and `update_product` calls.
#[derive(Debug, Clone, Serialize)]
pub struct ProductDraft {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Price in minor currency units.
    pub price: i64,
}

impl ProductDraft {
    /// Validates the payload before any call is made.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::Validation("name must not be empty".into()));
        }
        if self.price <= 0 {
            return Err(ApiError::Validation("price must be positive".into()));
        }
        Ok(())
    }
}

/// Formats a minor-unit price for display, e.g. `1999` as `¥19.99`.
///
/// The cache and the wire always carry minor units; only presentation
/// divides by 100.
pub fn format_price(minor: i64) -> String {
    format!("¥{}.{:02}", minor / 100, (minor % 100).abs())
}

/// Parses a user-entered decimal amount into minor units, exactly.
///
/// Accepts at most two fractional digits (`"19"`, `"19.9"`, `"19.99"`).
/// Going through integers rather than floating point keeps repeated
/// read/format cycles idempotent.
pub fn parse_price(input: &str) -> Result<i64, ApiError> {
    let input = input.trim();
    let invalid = || ApiError::Validation(format!("not a valid price: {input:?}"));

    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };
    if whole.is_empty()
        || fraction.len() > 2
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let mut fraction_minor: i64 = if fraction.is_empty() {
        0
    } else {
        fraction.parse().map_err(|_| invalid())?
    };
    if fraction.len() == 1 {
        fraction_minor *= 10;
    }

    whole
        .checked_mul(100)
        .and_then(|minor| minor.checked_add(fraction_minor))
        .ok_or_else(invalid)
}

fn is_plausible_email(input: &str) -> bool {
    match input.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_round_trip() {
        let minor = parse_price("19.99").unwrap();
        assert_eq!(minor, 1999);
        assert_eq!(format_price(minor), "¥19.99");

        // repeated read/format cycles are idempotent
        let displayed = format_price(minor);
        let reparsed = parse_price(displayed.strip_prefix('¥').unwrap()).unwrap();
        assert_eq!(reparsed, minor);
        assert_eq!(format_price(reparsed), displayed);
    }

    #[test]
    fn test_parse_price_shapes() {
        assert_eq!(parse_price("19").unwrap(), 1900);
        assert_eq!(parse_price("19.9").unwrap(), 1990);
        assert_eq!(parse_price(" 0.05 ").unwrap(), 5);
        assert_eq!(parse_price("0").unwrap(), 0);

        for input in ["", ".", "19.999", "19.9.9", "-3", "1,99", "abc", "1e3"] {
            assert!(parse_price(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(5), "¥0.05");
        assert_eq!(format_price(100), "¥1.00");
        assert_eq!(format_price(123456), "¥1234.56");
    }

    #[test]
    fn test_register_validation() {
        let mut request = RegisterRequest {
            username: "ferris".into(),
            email: "ferris@example.com".into(),
            password: "hunter22".into(),
            password_confirmation: "hunter22".into(),
        };
        assert!(request.validate().is_ok());

        request.password_confirmation = "hunter23".into();
        assert!(request.validate().is_err());

        request.password_confirmation = request.password.clone();
        request.email = "not-an-email".into();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_envelope_conversion() {
        let envelope: ApiResponse<User> = serde_json::from_value(serde_json::json!({
            "success": false,
            "code": 500,
            "message": "boom",
            "data": null,
        }))
        .unwrap();
        assert_eq!(
            envelope.into_data().unwrap_err(),
            ApiError::Service {
                code: 500,
                message: "boom".into()
            }
        );

        let envelope: ApiResponse<User> = serde_json::from_value(serde_json::json!({
            "success": true,
            "code": 200,
            "message": "ok",
            "data": null,
        }))
        .unwrap();
        // a null payload is a legitimate success for `get_me`
        assert!(envelope.clone().into_data().unwrap().is_none());
        // but not where a payload is required
        assert_eq!(
            envelope.into_required_data().unwrap_err(),
            ApiError::MissingData("ok".into())
        );
    }
}
