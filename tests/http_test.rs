mod common;

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use bankops::application::{LedgerService, MAX_PAGE_SIZE};
use bankops::http::{serve, AppState};
use common::{test_service, StandardBank};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct TestServer {
    addr: SocketAddr,
    bank: StandardBank,
    ledger: Arc<LedgerService>,
    _temp: TempDir,
}

struct Reply {
    status: u16,
    head: String,
    body: Value,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

impl TestServer {
    async fn start() -> Result<Self> {
        let (service, temp) = test_service().await?;
        let bank = StandardBank::create(&service).await?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = AppState::new(service);
        let ledger = state.ledger.clone();
        tokio::spawn(serve(listener, state, std::future::pending()));

        Ok(Self {
            addr,
            bank,
            ledger,
            _temp: temp,
        })
    }

    async fn send(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<&str>,
    ) -> Result<Reply> {
        let mut stream = tokio::net::TcpStream::connect(self.addr).await?;
        let mut req = format!(
            "{method} {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n",
            self.addr
        );
        for (key, value) in headers {
            req.push_str(&format!("{key}: {value}\r\n"));
        }
        if let Some(body) = body {
            req.push_str("Content-Type: application/json\r\n");
            req.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
        } else {
            req.push_str("\r\n");
        }
        stream.write_all(req.as_bytes()).await?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        let (head, body) = response
            .split_once("\r\n\r\n")
            .context("http response must have separator")?;
        let status = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|s| s.parse::<u16>().ok())
            .context("http status")?;
        let body = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(body)?
        };

        Ok(Reply {
            status,
            head: head.to_string(),
            body,
        })
    }

    async fn get(&self, path: &str) -> Result<Reply> {
        self.send("GET", path, &[], None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Reply> {
        self.send("POST", path, &[], Some(&body.to_string())).await
    }

    async fn open_account(&self, opening: &str) -> Result<String> {
        let reply = self
            .post(
                "/api/accounts",
                json!({
                    "customerId": self.bank.customer.id,
                    "bankId": self.bank.bank.id,
                    "branchId": self.bank.branch.id,
                    "accountType": "savings",
                    "openingBalance": opening,
                }),
            )
            .await?;
        assert_eq!(reply.status, 201, "{}", reply.body);
        Ok(reply.body["id"].as_str().context("account id")?.to_string())
    }
}

#[tokio::test]
async fn test_posting_flow() -> Result<()> {
    let server = TestServer::start().await?;
    let id = server.open_account("1000.00").await?;

    let reply = server
        .post(
            &format!("/api/accounts/{id}/deposit"),
            json!({"amount": "500", "description": "salary"}),
        )
        .await?;
    assert_eq!(reply.status, 201);
    assert_eq!(reply.body["account"]["balanceCents"], 150000);
    assert_eq!(reply.body["replayed"], false);

    // numbers are accepted too
    let reply = server
        .post(&format!("/api/accounts/{id}/withdraw"), json!({"amount": 200}))
        .await?;
    assert_eq!(reply.status, 201);
    assert_eq!(reply.body["transaction"]["balanceCents"], 130000);

    let reply = server.get(&format!("/api/accounts/{id}/balance")).await?;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["balance"], "1300.00");

    let reply = server
        .get(&format!("/api/accounts/{id}/transactions?limit=2"))
        .await?;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["transactions"].as_array().map(Vec::len), Some(2));
    assert!(reply.body["nextAfter"].is_i64());

    Ok(())
}

#[tokio::test]
async fn test_oversized_page_limit_keeps_cursor() -> Result<()> {
    let server = TestServer::start().await?;
    let id = server.open_account("0").await?;
    let account_id: uuid::Uuid = id.parse()?;
    let postings = MAX_PAGE_SIZE as usize + 1;
    for _ in 0..postings {
        server.ledger.deposit(account_id, 1, "", None).await?;
    }

    let reply = server
        .get(&format!("/api/accounts/{id}/transactions?limit=1000"))
        .await?;
    assert_eq!(reply.status, 200);
    assert_eq!(
        reply.body["transactions"].as_array().map(Vec::len),
        Some(MAX_PAGE_SIZE as usize)
    );
    let after = reply.body["nextAfter"].as_i64().context("cursor after a full page")?;

    let reply = server
        .get(&format!("/api/accounts/{id}/transactions?limit=1000&after={after}"))
        .await?;
    assert_eq!(reply.body["transactions"].as_array().map(Vec::len), Some(1));
    assert!(reply.body["nextAfter"].is_null());

    Ok(())
}

#[tokio::test]
async fn test_error_statuses() -> Result<()> {
    let server = TestServer::start().await?;
    let a = server.open_account("3.00").await?;
    let b = server.open_account("0").await?;

    let reply = server
        .post(&format!("/api/accounts/{a}/withdraw"), json!({"amount": "3.01"}))
        .await?;
    assert_eq!(reply.status, 422);
    assert_eq!(reply.body["error"]["kind"], "insufficient_funds");

    let reply = server
        .post(
            "/api/transfers",
            json!({"fromAccountId": a, "toAccountId": a, "amount": "1"}),
        )
        .await?;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["error"]["kind"], "same_account_transfer");

    let reply = server
        .post(&format!("/api/accounts/{a}/deposit"), json!({"amount": "1.005"}))
        .await?;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["error"]["kind"], "validation_failed");

    let reply = server.get("/api/accounts/not-a-uuid").await?;
    assert_eq!(reply.status, 400);

    let reply = server
        .get(&format!("/api/accounts/{}", uuid::Uuid::new_v4()))
        .await?;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body["error"]["kind"], "not_found");

    let reply = server.send("POST", &format!("/api/accounts/{b}/close"), &[], None).await?;
    assert_eq!(reply.status, 200);
    let reply = server
        .post(&format!("/api/accounts/{b}/deposit"), json!({"amount": "1"}))
        .await?;
    assert_eq!(reply.status, 409);
    assert_eq!(reply.body["error"]["kind"], "account_inactive");
    // not a retryable conflict
    assert!(reply.header("retry-after").is_none());

    let reply = server
        .send("POST", &format!("/api/accounts/{a}/deposit"), &[], Some("{not json"))
        .await?;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["error"]["kind"], "validation_failed");

    let reply = server.get("/api/nowhere").await?;
    assert_eq!(reply.status, 404);

    Ok(())
}

#[tokio::test]
async fn test_idempotency_key_header_wins_over_body() -> Result<()> {
    let server = TestServer::start().await?;
    let id = server.open_account("0").await?;
    let path = format!("/api/accounts/{id}/deposit");
    let keyed = |body_key: &str| json!({"amount": "10", "idempotencyKey": body_key}).to_string();

    let reply = server
        .send("POST", &path, &[("Idempotency-Key", "from-header")], Some(&keyed("body-a")))
        .await?;
    assert_eq!(reply.status, 201);
    let reply = server
        .send("POST", &path, &[("Idempotency-Key", "from-header")], Some(&keyed("body-b")))
        .await?;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["replayed"], true);
    assert_eq!(reply.body["account"]["balanceCents"], 1000);

    // body key alone is honoured when no header is sent
    let reply = server.send("POST", &path, &[], Some(&keyed("body-only"))).await?;
    assert_eq!(reply.status, 201);
    let reply = server.send("POST", &path, &[], Some(&keyed("body-only"))).await?;
    assert_eq!(reply.status, 200);

    Ok(())
}

#[tokio::test]
async fn test_request_id_is_echoed_or_generated() -> Result<()> {
    let server = TestServer::start().await?;

    let reply = server
        .send("GET", "/healthz", &[("X-Request-Id", "trace-me")], None)
        .await?;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("x-request-id"), Some("trace-me"));

    let reply = server.get("/healthz").await?;
    let generated = reply.header("x-request-id").context("request id header")?;
    assert!(generated.starts_with("req-"));

    Ok(())
}

#[tokio::test]
async fn test_record_routes() -> Result<()> {
    let server = TestServer::start().await?;

    let reply = server.post("/api/banks", json!({"name": "Coastal"})).await?;
    assert_eq!(reply.status, 201);
    let bank_id = reply.body["id"].as_str().context("bank id")?.to_string();

    let reply = server
        .post("/api/branches", json!({"bankId": bank_id, "name": "Harbour"}))
        .await?;
    assert_eq!(reply.status, 201);
    assert_eq!(reply.body["bankId"], bank_id.as_str());

    let reply = server.post("/api/branches", json!({"name": "No bank"})).await?;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["error"]["kind"], "validation_failed");

    let reply = server
        .send(
            "PUT",
            &format!("/api/banks/{bank_id}"),
            &[],
            Some(&json!({"code": "CST"}).to_string()),
        )
        .await?;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["name"], "Coastal");
    assert_eq!(reply.body["code"], "CST");

    let reply = server
        .send("DELETE", &format!("/api/banks/{bank_id}"), &[], None)
        .await?;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["removedDependents"], 1);

    let reply = server.get(&format!("/api/banks/{bank_id}")).await?;
    assert_eq!(reply.status, 404);

    // fixture bank remains
    let reply = server.get("/api/banks").await?;
    assert_eq!(reply.body.as_array().map(Vec::len), Some(1));

    Ok(())
}

#[tokio::test]
async fn test_verify_and_interest() -> Result<()> {
    let server = TestServer::start().await?;
    server.open_account("100").await?;

    let reply = server.get("/api/ledger/verify").await?;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["issues"].as_array().map(Vec::len), Some(0));

    let reply = server
        .get("/api/calculators/interest?principal=10000&rate=12&period=monthly")
        .await?;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["interest"], "100.00");

    Ok(())
}

#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[tokio::test]
async fn test_request_span_uses_route_template() -> Result<()> {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    // current-thread runtime: the server task logs on this thread too
    let _guard = tracing::subscriber::set_default(subscriber);

    let server = TestServer::start().await?;
    let id = server.open_account("5").await?;
    let reply = server.get(&format!("/api/accounts/{id}/balance")).await?;
    assert_eq!(reply.status, 200);

    let logs = capture.contents();
    assert!(logs.contains("route=/api/accounts/:id/balance"), "{logs}");
    assert!(!logs.contains(&format!("route=/api/accounts/{id}")), "{logs}");

    Ok(())
}
