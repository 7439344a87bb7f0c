//! User model and the requests that carry credentials.

use serde::{Deserialize, Serialize};

/// A registered user as stored under `users/{uid}` and embedded in posts and comments.
///
/// Passwords never live here; they only travel inside [`SignUpRequest`] and
/// [`Credentials`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Student identifier
    #[serde(default)]
    pub nim: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone_number: String,
}

impl User {
    /// Build the profile document written at sign-up.
    pub fn profile_document(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "nim": self.nim,
            "email": self.email,
            "phoneNumber": self.phone_number,
        })
    }
}

/// Request body for creating an account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub name: String,
    #[serde(default)]
    pub nim: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone_number: String,
}

/// Request body for signing in.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Request body for a partial profile update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nim: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl UpdateUserRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.nim.is_none() && self.email.is_none() && self.phone_number.is_none()
    }

    /// The fields to merge into the stored profile, keyed by their wire names.
    pub fn changed_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        let pairs = [
            ("name", &self.name),
            ("nim", &self.nim),
            ("email", &self.email),
            ("phoneNumber", &self.phone_number),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                fields.insert(key.to_string(), serde_json::Value::String(value.clone()));
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_profile_without_optional_fields() {
        let user: User =
            serde_json::from_value(serde_json::json!({ "name": "Stef", "email": "s@uc.ac.id" }))
                .unwrap();
        assert_eq!(user.name, "Stef");
        assert!(user.nim.is_empty());
        assert!(user.phone_number.is_empty());
    }

    #[test]
    fn test_changed_fields_only_includes_provided_values() {
        let update = UpdateUserRequest {
            phone_number: Some("0812".to_string()),
            ..Default::default()
        };
        let fields = update.changed_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["phoneNumber"], "0812");
        assert!(UpdateUserRequest::default().is_empty());
    }
}
