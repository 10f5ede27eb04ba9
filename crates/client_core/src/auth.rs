use reqwest::{Client, StatusCode};
use shared::{
    domain::Role,
    protocol::{LoginQuery, LoginResponse},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("login request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("login server returned an unexpected response")]
    UnexpectedResponse,
}

/// Client for the voter login backend.
pub struct LoginClient {
    http: Client,
    server_url: String,
}

impl LoginClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn login(&self, voter_id: &str, password: &str) -> Result<Role, LoginError> {
        let res = self
            .http
            .get(format!("{}/login", self.server_url))
            .query(&LoginQuery {
                voter_id: voter_id.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            return Err(LoginError::InvalidCredentials);
        }
        let body: LoginResponse = res.error_for_status()?.json().await?;
        match body {
            LoginResponse {
                success: true,
                role: Some(role),
                ..
            } => Ok(role),
            LoginResponse { success: false, .. } => Err(LoginError::InvalidCredentials),
            _ => Err(LoginError::UnexpectedResponse),
        }
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
