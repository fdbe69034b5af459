mod common;

use std::time::Duration;

use fixd::{HttpMethod, Server};

#[tokio::test]
async fn every_with_a_count_streams_exactly_that_many_chunks() {
    let server = Server::new(0, None);
    server
        .handle(HttpMethod::GET, "/echo/:message", None)
        .with(200, "text/plain", "message: :message")
        .every(Duration::from_millis(80), Some(2));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let resp = common::send_and_collect(
        addr,
        "GET /echo/hello HTTP/1.1\r\nHost: a\r\n\r\n",
        Duration::from_millis(600),
    )
    .await;

    assert_eq!(resp.status, 200);
    assert_eq!(resp.body_str(), "message: hellomessage: hello");

    server.stop().await;
}

#[tokio::test]
async fn after_delay_commits_headers_immediately_and_writes_body_later() {
    let server = Server::new(0, None);
    server
        .handle(HttpMethod::GET, "/slow", None)
        .with(200, "text/plain", "done")
        .after(Duration::from_millis(80));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let resp = common::send_and_collect(
        addr,
        "GET /slow HTTP/1.1\r\nHost: a\r\n\r\n",
        Duration::from_millis(400),
    )
    .await;

    assert_eq!(resp.status, 200);
    assert_eq!(resp.body_str(), "done");

    server.stop().await;
}
