use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use tracing::debug;

use crate::config::Credentials;
use crate::error::{PipelineError, Result};

const USER_AGENT: &str = "uex-openapi/0.1";

/// Authenticated client for the target API. Every request carries the
/// bearer token and, when configured, the user's secret key.
pub struct ApiClient {
    base_uri: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_uri: &str, credentials: &Credentials, proxy: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", credentials.app_token))?);
        if let Some(user_token) = &credentials.user_token {
            headers.insert("secret_key", header_value(user_token)?);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            // The interception proxy re-signs TLS with its own CA.
            .danger_accept_invalid_certs(true);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            base_uri: base_uri.trim_end_matches('/').to_string(),
            client: builder.build()?,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_uri, path)
    }

    /// Issues `method` against `path` (relative to the base URI).
    pub async fn request(&self, method: Method, path: &str) -> Result<String> {
        let url = self.url(path);
        debug!(%method, %url, "request");
        self.send(self.client.request(method, &url), url).await
    }

    /// Always POSTs, with an optional JSON body.
    pub async fn post(&self, path: &str, body: Option<&serde_json::Value>) -> Result<String> {
        let url = self.url(path);
        debug!(%url, "POST");
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request, url).await
    }

    async fn send(&self, request: RequestBuilder, url: String) -> Result<String> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(PipelineError::HttpStatus { url, status, body });
        }
        Ok(body)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        PipelineError::Config("API token contains characters not allowed in a header".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn credentials(user_token: Option<&str>) -> Credentials {
        Credentials {
            app_token: "app-token".to_string(),
            user_token: user_token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn request_sends_both_auth_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/2.0/commodities/")
            .match_header("authorization", "Bearer app-token")
            .match_header("secret_key", "user-token")
            .with_status(200)
            .with_body(r#"{"status":"ok","data":[]}"#)
            .create_async()
            .await;

        let base_uri = format!("{}/2.0", server.url());
        let client = ApiClient::new(&base_uri, &credentials(Some("user-token")), None).unwrap();
        let body = client.request(Method::GET, "/commodities/").await.unwrap();

        assert_eq!(body, r#"{"status":"ok","data":[]}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn secret_key_header_is_omitted_without_user_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/categories/")
            .match_header("secret_key", Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), &credentials(None), None).unwrap();
        client.request(Method::GET, "/categories/").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn post_forces_method_and_sends_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/marketplace_advertise/")
            .match_header("authorization", "Bearer app-token")
            .match_body(Matcher::Json(serde_json::json!({"title": "x"})))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), &credentials(Some("user-token")), None).unwrap();
        client
            .post("/marketplace_advertise/", Some(&serde_json::json!({"title": "x"})))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/user/")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), &credentials(None), None).unwrap();
        let err = client.request(Method::GET, "/user/").await.unwrap_err();

        match err {
            PipelineError::HttpStatus { status, body, .. } => {
                assert_eq!(status.as_u16(), 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_token_is_a_config_error() {
        let bad = Credentials {
            app_token: "line\nbreak".to_string(),
            user_token: None,
        };

        assert!(matches!(
            ApiClient::new("http://localhost", &bad, None),
            Err(PipelineError::Config(_))
        ));
    }
}
