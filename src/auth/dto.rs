use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_request_accepts_camel_case() {
        let body: RefreshRequest = serde_json::from_str(r#"{"refreshToken":"abc"}"#).unwrap();
        assert_eq!(body.refresh_token.as_deref(), Some("abc"));
    }

    #[test]
    fn login_request_takes_either_identifier() {
        let by_email: LoginRequest =
            serde_json::from_str(r#"{"email":"a@x.com","password":"secret1"}"#).unwrap();
        assert!(by_email.username.is_none());
        assert_eq!(by_email.email.as_deref(), Some("a@x.com"));

        let body: ChangePasswordRequest =
            serde_json::from_str(r#"{"oldPassword":"a","newPassword":"b"}"#).unwrap();
        assert_eq!(body.old_password, "a");
        assert_eq!(body.new_password, "b");
    }
}
