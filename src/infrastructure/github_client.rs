use crate::infrastructure::config::RemoteSettings;
use crate::infrastructure::content_codec::{decode_document, encode_document};
use crate::infrastructure::error::RemoteError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = "lathe-timer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    pub content: String,
    pub revision: String,
}

/// Versioned blob storage: every write names the revision it replaces.
#[async_trait]
pub trait RemoteBlobStore: Send + Sync {
    async fn exists(&self, access_token: &str, path: &str) -> Result<bool, RemoteError>;

    /// Fails with [`RemoteError::NotFound`] when the document is absent.
    async fn read(&self, access_token: &str, path: &str) -> Result<RemoteDocument, RemoteError>;

    /// Writes `content`, replacing `expected_revision`; `None` creates the
    /// document. Returns the new revision.
    async fn write(
        &self,
        access_token: &str,
        path: &str,
        content: &str,
        expected_revision: Option<&str>,
        message: &str,
    ) -> Result<String, RemoteError>;

    async fn test_connection(&self, access_token: &str) -> Result<String, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct GitHubContentsClient {
    client: Client,
    api_base: String,
    owner: String,
    repo: String,
}

impl GitHubContentsClient {
    pub fn new(settings: &RemoteSettings) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: settings.api_base.clone(),
            owner: settings.owner.clone(),
            repo: settings.repo.clone(),
        }
    }

    fn ensure_configured(&self, access_token: &str) -> Result<(), RemoteError> {
        if access_token.trim().is_empty() {
            return Err(RemoteError::NotConfigured("access token is missing".to_string()));
        }
        if self.owner.trim().is_empty() || self.repo.trim().is_empty() {
            return Err(RemoteError::NotConfigured(
                "remote owner and repo must be set".to_string(),
            ));
        }
        Ok(())
    }

    fn repository_endpoint(&self) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.api_base).map_err(|error| {
            RemoteError::NotConfigured(format!("invalid api base url '{}': {error}", self.api_base))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RemoteError::NotConfigured("api base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("repos");
            segments.push(&self.owner);
            segments.push(&self.repo);
        }
        Ok(url)
    }

    fn contents_endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        let mut url = self.repository_endpoint()?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RemoteError::NotConfigured("repository URL cannot be a base".to_string())
            })?;
            segments.push("contents");
            segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        }
        Ok(url)
    }

    fn status_error(status: StatusCode, body: &str) -> RemoteError {
        let message = serde_json::from_str::<ErrorResponse>(body)
            .ok()
            .and_then(|parsed| parsed.message)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| format!("http {}", status.as_u16()));
        match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Conflict(message),
            _ => RemoteError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    async fn get(&self, access_token: &str, url: Url) -> Result<(StatusCode, String), RemoteError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await
            .map_err(|error| RemoteError::Network(format!("request failed: {error}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| RemoteError::Network(format!("failed reading response: {error}")))?;
        Ok((status, body))
    }
}

#[derive(Debug, serde::Deserialize)]
struct ErrorResponse {
    message: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ContentsResponse {
    content: Option<String>,
    sha: String,
}

#[derive(Debug, serde::Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, serde::Deserialize)]
struct PutContentsResponse {
    content: PutContentsEntry,
}

#[derive(Debug, serde::Deserialize)]
struct PutContentsEntry {
    sha: String,
}

#[derive(Debug, serde::Deserialize)]
struct RepositoryResponse {
    full_name: String,
}

#[async_trait]
impl RemoteBlobStore for GitHubContentsClient {
    async fn exists(&self, access_token: &str, path: &str) -> Result<bool, RemoteError> {
        self.ensure_configured(access_token)?;
        let (status, body) = self.get(access_token, self.contents_endpoint(path)?).await?;
        if status.is_success() {
            return Ok(true);
        }
        match Self::status_error(status, &body) {
            RemoteError::NotFound(_) => Ok(false),
            error => Err(error),
        }
    }

    async fn read(&self, access_token: &str, path: &str) -> Result<RemoteDocument, RemoteError> {
        self.ensure_configured(access_token)?;
        let (status, body) = self.get(access_token, self.contents_endpoint(path)?).await?;
        if !status.is_success() {
            return Err(Self::status_error(status, &body));
        }

        let parsed: ContentsResponse = serde_json::from_str(&body)
            .map_err(|error| RemoteError::InvalidPayload(format!("invalid contents payload: {error}")))?;
        let encoded = parsed.content.ok_or_else(|| {
            RemoteError::InvalidPayload(format!("{path} has no inline content"))
        })?;
        Ok(RemoteDocument {
            content: decode_document(&encoded)?,
            revision: parsed.sha,
        })
    }

    async fn write(
        &self,
        access_token: &str,
        path: &str,
        content: &str,
        expected_revision: Option<&str>,
        message: &str,
    ) -> Result<String, RemoteError> {
        self.ensure_configured(access_token)?;
        let request = PutContentsRequest {
            message,
            content: encode_document(content),
            sha: expected_revision,
        };

        let response = self
            .client
            .put(self.contents_endpoint(path)?)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .json(&request)
            .send()
            .await
            .map_err(|error| RemoteError::Network(format!("request failed: {error}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| RemoteError::Network(format!("failed reading response: {error}")))?;
        if !status.is_success() {
            return Err(Self::status_error(status, &body));
        }

        let parsed: PutContentsResponse = serde_json::from_str(&body)
            .map_err(|error| RemoteError::InvalidPayload(format!("invalid write payload: {error}")))?;
        Ok(parsed.content.sha)
    }

    async fn test_connection(&self, access_token: &str) -> Result<String, RemoteError> {
        self.ensure_configured(access_token)?;
        let (status, body) = self.get(access_token, self.repository_endpoint()?).await?;
        if !status.is_success() {
            return Err(Self::status_error(status, &body));
        }
        let parsed: RepositoryResponse = serde_json::from_str(&body)
            .map_err(|error| RemoteError::InvalidPayload(format!("invalid repository payload: {error}")))?;
        Ok(parsed.full_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_base: &str) -> GitHubContentsClient {
        GitHubContentsClient::new(&RemoteSettings {
            api_base: api_base.to_string(),
            owner: "machinist".to_string(),
            repo: "shop data".to_string(),
            data_file_path: "lathe-time-data.json".to_string(),
        })
    }

    #[test]
    fn contents_endpoint_escapes_segments_and_keeps_directories() {
        let url = client("https://api.github.com")
            .contents_endpoint("records/2026/lathe-time-data.json")
            .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/machinist/shop%20data/contents/records/2026/lathe-time-data.json"
        );
    }

    #[test]
    fn enterprise_api_base_keeps_its_prefix() {
        let url = client("https://github.example.com/api/v3/")
            .repository_endpoint()
            .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://github.example.com/api/v3/repos/machinist/shop%20data"
        );
    }

    #[test]
    fn status_codes_map_to_remote_errors() {
        let body = r#"{"message":"sha does not match"}"#;
        assert_eq!(
            GitHubContentsClient::status_error(StatusCode::CONFLICT, body),
            RemoteError::Conflict("sha does not match".to_string())
        );
        assert!(matches!(
            GitHubContentsClient::status_error(StatusCode::NOT_FOUND, ""),
            RemoteError::NotFound(_)
        ));
        assert!(matches!(
            GitHubContentsClient::status_error(StatusCode::FORBIDDEN, ""),
            RemoteError::Unauthorized(_)
        ));
        assert!(matches!(
            GitHubContentsClient::status_error(StatusCode::UNPROCESSABLE_ENTITY, ""),
            RemoteError::Conflict(_)
        ));
        assert_eq!(
            GitHubContentsClient::status_error(StatusCode::BAD_GATEWAY, "oops"),
            RemoteError::Api {
                status: 502,
                message: "http 502".to_string()
            }
        );
    }

    #[tokio::test]
    async fn missing_token_is_reported_before_any_request() {
        let result = client("https://api.github.com").read("  ", "lathe-time-data.json").await;
        assert!(matches!(result, Err(RemoteError::NotConfigured(_))));
    }

    #[test]
    fn put_request_omits_sha_when_creating() {
        let request = PutContentsRequest {
            message: "Create lathe time tracking data file",
            content: encode_document("{}"),
            sha: None,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert!(value.get("sha").is_none());
        assert_eq!(value["content"], "e30=");
    }
}
