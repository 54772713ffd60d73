use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::models::{CreateResponse, SightingPayload};
use async_trait::async_trait;

/// Where finished reports are sent. A transport failure is an `Err`; a refusal is `success: false`.
#[async_trait]
pub trait SightingBackend: Send + Sync {
    async fn create(&self, payload: &SightingPayload) -> Result<CreateResponse>;
}

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ostsee-sightings/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SightingBackend for HttpBackend {
    async fn create(&self, payload: &SightingPayload) -> Result<CreateResponse> {
        let url = format!("{}/api/sightings", self.base_url);
        let res = self.client.post(url).json(payload).send().await?;
        let status = res.status();
        let body = res.bytes().await?;
        let parsed = serde_json::from_slice::<CreateResponse>(&body);
        if status.is_success() {
            return Ok(parsed?);
        }
        log::warn!("Create request answered with {status}");
        Ok(match parsed {
            Ok(parsed) => CreateResponse {
                success: false,
                ..parsed
            },
            Err(_) => CreateResponse {
                success: false,
                id: None,
                message: Some(format!("Server responded with {status}")),
            },
        })
    }
}

/// Writes straight into the local database; used when the tool runs next to the data.
#[derive(Clone)]
pub struct LocalBackend {
    pool: DbPool,
}

impl LocalBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SightingBackend for LocalBackend {
    async fn create(&self, payload: &SightingPayload) -> Result<CreateResponse> {
        let pool = self.pool.clone();
        let payload = payload.clone();
        let inserted = tokio::task::spawn_blocking(move || -> Result<i64> {
            let mut conn = pool.get()?;
            db::insert_sighting(&mut conn, &payload)
        })
        .await
        .map_err(|e| Error::Init(format!("Task join error: {e}")))?;

        Ok(match inserted {
            Ok(id) => CreateResponse {
                success: true,
                id: Some(id),
                message: None,
            },
            Err(err) => {
                log::error!("Could not store sighting: {err}");
                CreateResponse {
                    success: false,
                    id: None,
                    message: Some(err.to_string()),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::validation::sample_draft;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the base URL to reach it.
    async fn canned_server(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    fn payload() -> SightingPayload {
        SightingPayload {
            report: sample_draft().report,
            media: Vec::new(),
        }
    }

    #[tokio::test]
    async fn created_response_carries_the_id() {
        let base = canned_server("201 Created", r#"{"success":true,"id":42}"#).await;
        let res = HttpBackend::new(&base).unwrap().create(&payload()).await.unwrap();
        assert!(res.success);
        assert_eq!(res.id, Some(42));
    }

    #[tokio::test]
    async fn error_status_keeps_the_server_message() {
        let base = canned_server(
            "422 Unprocessable Entity",
            r#"{"success":true,"message":"Latitude outside the Baltic Sea"}"#,
        )
        .await;
        let res = HttpBackend::new(&base).unwrap().create(&payload()).await.unwrap();
        assert!(!res.success);
        assert_eq!(res.id, None);
        assert_eq!(res.message.as_deref(), Some("Latitude outside the Baltic Sea"));
    }

    #[tokio::test]
    async fn error_status_without_json_reports_the_status() {
        let base = canned_server("502 Bad Gateway", "<html>upstream down</html>").await;
        let res = HttpBackend::new(&base).unwrap().create(&payload()).await.unwrap();
        assert!(!res.success);
        assert_eq!(res.message.as_deref(), Some("Server responded with 502 Bad Gateway"));
    }

    #[tokio::test]
    async fn success_status_with_garbage_body_is_an_error() {
        let base = canned_server("200 OK", "not json").await;
        let res = HttpBackend::new(&base).unwrap().create(&payload()).await;
        assert!(matches!(res, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn local_backend_assigns_ids() {
        let (_dir, pool) = test_pool();
        let backend = LocalBackend::new(pool.clone());
        let payload = SightingPayload {
            report: sample_draft().report,
            media: Vec::new(),
        };
        let first = backend.create(&payload).await.unwrap();
        let second = backend.create(&payload).await.unwrap();
        assert!(first.success);
        assert_eq!(second.id, first.id.map(|id| id + 1));

        let conn = pool.get().unwrap();
        let stored = db::get_sighting(&conn, first.id.unwrap()).unwrap().unwrap();
        assert_eq!(stored.report.species.as_deref(), Some("Schweinswal"));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let backend = HttpBackend::new("http://127.0.0.1:9").unwrap();
        let res = backend.create(&SightingPayload::default()).await;
        assert!(matches!(res, Err(Error::Http(_))));
    }
}
