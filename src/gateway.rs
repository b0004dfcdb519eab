use serde::{Deserialize, Serialize};

/// Chapa transaction endpoints used by the lifecycle controller.
const INITIALIZE_PATH: &str = "/v1/transaction/initialize";
const VERIFY_PATH: &str = "/v1/transaction/verify";

#[derive(Clone)]
pub struct ChapaClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Serialize)]
pub struct InitiateRequest {
    pub amount: String,
    pub currency: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub tx_ref: String,
    pub callback_url: String,
    pub return_url: String,
}

#[derive(Debug, Deserialize)]
pub struct InitiateResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<InitiateData>,
}

#[derive(Debug, Deserialize)]
pub struct InitiateData {
    pub checkout_url: String,
}

#[derive(Debug)]
pub struct InitiateSuccess {
    pub checkout_url: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct VerifyResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyData {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Failure of the gateway call itself, as opposed to a successfully
/// reported "transaction failed" business outcome.
#[derive(Debug)]
pub enum GatewayFailure {
    /// The gateway answered with a non-success HTTP status or a body that
    /// does not match the documented shape. Carries the raw body when one
    /// could be read.
    Rejected {
        status: u16,
        body: Option<serde_json::Value>,
    },
    /// The request timed out before the gateway answered.
    Timeout,
    /// The request never reached the gateway (DNS, connect, TLS).
    Transport(String),
}

/// Classification of a parsed verify response. Produced by a pure function
/// so the three-way branch is testable without network access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Completed,
    Failed,
    Pending,
}

pub fn classify_verify(resp: &VerifyResponse) -> VerifyOutcome {
    let tx_status = resp
        .data
        .as_ref()
        .and_then(|d| d.status.as_deref())
        .unwrap_or("");
    if resp.status == "success" && tx_status == "success" {
        VerifyOutcome::Completed
    } else if tx_status == "failed" {
        VerifyOutcome::Failed
    } else {
        VerifyOutcome::Pending
    }
}

fn failure_from_reqwest(e: reqwest::Error) -> GatewayFailure {
    if e.is_timeout() {
        GatewayFailure::Timeout
    } else {
        GatewayFailure::Transport(e.to_string())
    }
}

impl ChapaClient {
    pub fn new(http: reqwest::Client, base_url: &str, secret_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    pub async fn initiate(&self, req: &InitiateRequest) -> Result<InitiateSuccess, GatewayFailure> {
        let url = format!("{}{INITIALIZE_PATH}", self.base_url);
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.secret_key)
            .json(req)
            .send()
            .await
            .map_err(failure_from_reqwest)?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let raw: Option<serde_json::Value> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "chapa initialize rejected");
            return Err(GatewayFailure::Rejected {
                status: status.as_u16(),
                body: raw,
            });
        }

        let parsed: InitiateResponse = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "chapa initialize body unparsable");
                return Err(GatewayFailure::Rejected {
                    status: status.as_u16(),
                    body: raw,
                });
            }
        };
        let checkout_url = match (parsed.status.as_str(), parsed.data) {
            ("success", Some(data)) => data.checkout_url,
            _ => {
                return Err(GatewayFailure::Rejected {
                    status: status.as_u16(),
                    body: raw,
                })
            }
        };

        Ok(InitiateSuccess {
            checkout_url,
            raw: raw.unwrap_or(serde_json::Value::Null),
        })
    }

    pub async fn verify(&self, tx_ref: &str) -> Result<VerifyResponse, GatewayFailure> {
        let url = format!("{}{VERIFY_PATH}/{tx_ref}", self.base_url);
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(failure_from_reqwest)?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "chapa verify rejected");
            return Err(GatewayFailure::Rejected {
                status: status.as_u16(),
                body: serde_json::from_str(&body).ok(),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = %e, "chapa verify body unparsable");
            GatewayFailure::Rejected {
                status: status.as_u16(),
                body: serde_json::from_str(&body).ok(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn verify_resp(overall: &str, tx: Option<&str>) -> VerifyResponse {
        VerifyResponse {
            status: overall.to_string(),
            data: tx.map(|s| VerifyData {
                status: Some(s.to_string()),
                reference: Some("chapa-ref-1".to_string()),
            }),
        }
    }

    #[test]
    fn classify_requires_both_statuses_for_completed() {
        assert_eq!(
            classify_verify(&verify_resp("success", Some("success"))),
            VerifyOutcome::Completed
        );
        // Overall success alone is not enough.
        assert_eq!(
            classify_verify(&verify_resp("success", Some("pending"))),
            VerifyOutcome::Pending
        );
        assert_eq!(
            classify_verify(&verify_resp("failed", Some("success"))),
            VerifyOutcome::Pending
        );
    }

    #[test]
    fn classify_failed_transaction_wins_over_overall_status() {
        assert_eq!(
            classify_verify(&verify_resp("success", Some("failed"))),
            VerifyOutcome::Failed
        );
        assert_eq!(
            classify_verify(&verify_resp("failed", Some("failed"))),
            VerifyOutcome::Failed
        );
    }

    #[test]
    fn classify_missing_or_unknown_data_is_pending() {
        assert_eq!(
            classify_verify(&verify_resp("success", None)),
            VerifyOutcome::Pending
        );
        assert_eq!(
            classify_verify(&verify_resp("success", Some("processing"))),
            VerifyOutcome::Pending
        );
    }

    #[derive(Debug)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
    }

    fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    async fn spawn_mock_chapa_server(
        status_line: &str,
        response_body: &str,
    ) -> (String, oneshot::Receiver<CapturedRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel();
        let status_line = status_line.to_string();
        let response_body = response_body.to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf: Vec<u8> = Vec::new();
            let mut tmp = [0u8; 2048];
            let header_end = loop {
                let n = stream.read(&mut tmp).await.expect("read");
                if n == 0 {
                    break None;
                }
                buf.extend_from_slice(&tmp[..n]);
                if let Some(i) = find_subsequence(&buf, b"\r\n\r\n") {
                    break Some(i);
                }
            };

            let Some(header_end) = header_end else {
                return;
            };

            let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let mut lines = header_text.split("\r\n");
            let request_line = lines.next().unwrap_or_default();
            let mut req_parts = request_line.split_whitespace();
            let method = req_parts.next().unwrap_or_default().to_string();
            let path = req_parts.next().unwrap_or_default().to_string();

            let mut headers: HashMap<String, String> = HashMap::new();
            for line in lines {
                if let Some((k, v)) = line.split_once(':') {
                    headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
                }
            }

            let content_len = headers
                .get("content-length")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);

            let mut body = buf[(header_end + 4)..].to_vec();
            while body.len() < content_len {
                let n = stream.read(&mut tmp).await.expect("read body");
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&tmp[..n]);
            }
            body.truncate(content_len);

            let _ = tx.send(CapturedRequest {
                method,
                path,
                headers,
                body: String::from_utf8_lossy(&body).to_string(),
            });

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                response_body.len(),
                response_body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.flush().await;
        });

        (format!("http://{}", addr), rx)
    }

    fn test_client(base_url: &str) -> ChapaClient {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("http client");
        ChapaClient::new(http, base_url, "CHASECK_TEST-secret")
    }

    #[tokio::test]
    async fn initiate_posts_bearer_auth_and_payload() {
        let (base_url, rx) = spawn_mock_chapa_server(
            "200 OK",
            "{\"status\":\"success\",\"message\":\"Hosted Link\",\"data\":{\"checkout_url\":\"https://checkout.chapa.co/pay/abc\"}}",
        )
        .await;
        let client = test_client(&base_url);

        let out = client
            .initiate(&InitiateRequest {
                amount: "300.00".to_string(),
                currency: "ETB".to_string(),
                email: "guest@example.com".to_string(),
                first_name: "Abel".to_string(),
                last_name: "Tesfaye".to_string(),
                phone_number: Some("0911000000".to_string()),
                tx_ref: "booking_b1_deadbeef".to_string(),
                callback_url: "http://localhost:8080/payments/verify_payment".to_string(),
                return_url: "http://localhost:8080/bookings".to_string(),
            })
            .await
            .expect("initiate");
        assert_eq!(out.checkout_url, "https://checkout.chapa.co/pay/abc");

        let captured = rx.await.expect("captured request");
        assert_eq!(captured.method, "POST");
        assert_eq!(captured.path, "/v1/transaction/initialize");
        assert_eq!(
            captured.headers.get("authorization").map(String::as_str),
            Some("Bearer CHASECK_TEST-secret")
        );

        let body: serde_json::Value = serde_json::from_str(&captured.body).expect("json body");
        assert_eq!(body.get("amount").and_then(|v| v.as_str()), Some("300.00"));
        assert_eq!(body.get("currency").and_then(|v| v.as_str()), Some("ETB"));
        assert_eq!(
            body.get("tx_ref").and_then(|v| v.as_str()),
            Some("booking_b1_deadbeef")
        );
        assert_eq!(
            body.get("callback_url").and_then(|v| v.as_str()),
            Some("http://localhost:8080/payments/verify_payment")
        );
    }

    #[tokio::test]
    async fn initiate_rejection_carries_gateway_body() {
        let (base_url, _rx) = spawn_mock_chapa_server(
            "400 Bad Request",
            "{\"status\":\"failed\",\"message\":\"Invalid currency\"}",
        )
        .await;
        let client = test_client(&base_url);

        let err = client
            .initiate(&InitiateRequest {
                amount: "300.00".to_string(),
                currency: "XXX".to_string(),
                email: "guest@example.com".to_string(),
                first_name: "Abel".to_string(),
                last_name: "Tesfaye".to_string(),
                phone_number: None,
                tx_ref: "booking_b1_deadbeef".to_string(),
                callback_url: "http://localhost:8080/payments/verify_payment".to_string(),
                return_url: "http://localhost:8080/bookings".to_string(),
            })
            .await
            .expect_err("must reject");
        match err {
            GatewayFailure::Rejected { status, body } => {
                assert_eq!(status, 400);
                let body = body.expect("raw body");
                assert_eq!(
                    body.get("message").and_then(|v| v.as_str()),
                    Some("Invalid currency")
                );
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn initiate_success_without_checkout_url_is_rejected() {
        let (base_url, _rx) =
            spawn_mock_chapa_server("200 OK", "{\"status\":\"success\",\"data\":null}").await;
        let client = test_client(&base_url);

        let err = client
            .initiate(&InitiateRequest {
                amount: "100.00".to_string(),
                currency: "ETB".to_string(),
                email: "guest@example.com".to_string(),
                first_name: "Abel".to_string(),
                last_name: "Tesfaye".to_string(),
                phone_number: None,
                tx_ref: "booking_b2_cafebabe".to_string(),
                callback_url: "http://localhost:8080/payments/verify_payment".to_string(),
                return_url: "http://localhost:8080/bookings".to_string(),
            })
            .await
            .expect_err("must reject");
        assert!(matches!(err, GatewayFailure::Rejected { status: 200, .. }));
    }

    #[tokio::test]
    async fn verify_hits_reference_scoped_path() {
        let (base_url, rx) = spawn_mock_chapa_server(
            "200 OK",
            "{\"status\":\"success\",\"data\":{\"status\":\"success\",\"reference\":\"chapa-ref-9\"}}",
        )
        .await;
        let client = test_client(&base_url);

        let resp = client.verify("booking_b1_deadbeef").await.expect("verify");
        assert_eq!(classify_verify(&resp), VerifyOutcome::Completed);
        assert_eq!(
            resp.data.and_then(|d| d.reference).as_deref(),
            Some("chapa-ref-9")
        );

        let captured = rx.await.expect("captured request");
        assert_eq!(captured.method, "GET");
        assert_eq!(captured.path, "/v1/transaction/verify/booking_b1_deadbeef");
        assert_eq!(
            captured.headers.get("authorization").map(String::as_str),
            Some("Bearer CHASECK_TEST-secret")
        );
    }

    #[tokio::test]
    async fn verify_unparsable_body_is_rejected_not_pending() {
        let (base_url, _rx) = spawn_mock_chapa_server("200 OK", "<html>oops</html>").await;
        let client = test_client(&base_url);

        let err = client.verify("booking_b1_deadbeef").await.expect_err("must reject");
        assert!(matches!(err, GatewayFailure::Rejected { status: 200, .. }));
    }
}
