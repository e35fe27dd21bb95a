//! Test utilities and server harness for sqlgate tests.
//!
//! Provides:
//! - Seeded SQLite database and mapper directory fixtures
//! - In-process router and server setup
//! - Minimal HTTP/1.1 GET helper over a TCP socket

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlgate::config::Config;
use sqlgate::gateway::sqlite::SqliteExecutor;
use sqlgate::gateway::ExecutionGateway;
use sqlgate::mapper::MapperRegistry;
use sqlgate::registry::Registry;
use sqlgate::service::{create_router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;

pub const SEED: &str = r#"
CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);
INSERT INTO users VALUES (1, 'Ada', 'ada@example.com');
INSERT INTO users VALUES (2, 'Grace', NULL);
INSERT INTO users VALUES (3, 'O''Brien', 'ob@example.com');

CREATE TABLE counters (name TEXT, value INTEGER);
INSERT INTO counters VALUES ('big', 9223372036854775807);
INSERT INTO counters VALUES ('small', 42);
"#;

pub const USER_MAPPER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE mapper PUBLIC "-//mybatis.org//DTD Mapper 3.0//EN" "http://mybatis.org/dtd/mybatis-3-mapper.dtd">
<mapper namespace="user">
  <sql id="columns">id, name</sql>
  <select id="byIds">
    SELECT <include refid="columns"/> FROM users
    WHERE id IN
    <foreach collection="ids" item="id" open="(" separator="," close=")">#{id}</foreach>
    ORDER BY id
  </select>
  <select id="search">
    SELECT <include refid="columns"/> FROM users
    <where>
      <if test="name != null">AND name = #{name}</if>
      <if test="withEmail">AND email IS NOT NULL</if>
    </where>
    ORDER BY id
  </select>
</mapper>
"#;

/// Test fixture with a seeded database and a mapper directory.
///
/// Everything is removed when the fixture is dropped.
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub db_path: PathBuf,
    pub mapper_dir: PathBuf,
}

impl TestFixture {
    pub fn new() -> Self {
        sqlgate::observability::tracing::init_test_tracing();

        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let mapper_dir = temp_dir.path().join("mappers");

        std::fs::create_dir_all(&mapper_dir).expect("failed to create mapper dir");
        std::fs::write(mapper_dir.join("user.xml"), USER_MAPPER).expect("failed to write mapper");

        let conn = rusqlite::Connection::open(&db_path).expect("failed to open db");
        conn.execute_batch(SEED).expect("failed to seed db");

        Self {
            temp_dir,
            db_path,
            mapper_dir,
        }
    }

    pub fn executor(&self) -> SqliteExecutor {
        SqliteExecutor::open(&self.db_path, 2).expect("failed to open pool")
    }

    pub fn gateway(&self) -> ExecutionGateway {
        ExecutionGateway::new(Arc::new(self.executor()))
    }

    /// Router over `entries` with this fixture's database and mappers.
    pub fn router(&self, entries: &[&str], screen_injection: bool) -> Router {
        let registry = Registry::load(entries.iter().copied());
        let mappers = MapperRegistry::load_dir(&self.mapper_dir).expect("failed to load mappers");
        let state = AppState {
            mappers: Arc::new(mappers),
            gateway: self.gateway(),
            screen_injection,
        };
        create_router(&registry, state)
    }

    pub fn config(&self, entries: &[&str]) -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            database: self.db_path.clone(),
            max_pool_size: 2,
            mapper_dir: Some(self.mapper_dir.clone()),
            queries: entries.iter().map(|s| s.to_string()).collect(),
            ..Config::default()
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Send `GET uri` through the router and decode the JSON body.
pub async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().expect("no local addr");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sqlgate::server::serve(listener, config, shutdown_rx));
        Self {
            addr,
            shutdown_tx,
            handle,
        }
    }

    /// Raw `GET path`, returning status code and body.
    pub async fn get(&self, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect failed");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write failed");

        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.expect("read failed");

        let status = raw
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("malformed status line");
        let body = raw
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default();
        (status, body)
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(true);
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
