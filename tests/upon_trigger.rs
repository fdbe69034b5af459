mod common;

use std::time::Duration;

use fixd::{HttpMethod, Server};

#[tokio::test]
async fn subscribers_receive_broadcasts_in_order() {
    let server = Server::new(0, None);
    server
        .handle(HttpMethod::GET, "/subscribe", None)
        .upon(HttpMethod::GET, "/broadcast/:message", None)
        .with(200, "text/plain", "message: :message");
    server
        .handle(HttpMethod::GET, "/broadcast/:message", None)
        .with(202, "text/plain", "accepted");
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut sub1 = common::open(addr, "GET /subscribe HTTP/1.1\r\nHost: a\r\n\r\n").await;
    let mut sub2 = common::open(addr, "GET /subscribe HTTP/1.1\r\nHost: a\r\n\r\n").await;
    // give both subscriptions time to register before the first broadcast.
    tokio::time::sleep(Duration::from_millis(50)).await;

    for message in ["hello0", "hello1"] {
        let resp = common::send(
            addr,
            &format!("GET /broadcast/{message} HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n"),
        )
        .await;
        assert_eq!(resp.status, 202);
    }

    let resp1 = common::collect_from(&mut sub1, Duration::from_millis(300)).await;
    let resp2 = common::collect_from(&mut sub2, Duration::from_millis(300)).await;

    assert_eq!(resp1.body_str(), "message: hello0message: hello1");
    assert_eq!(resp2.body_str(), "message: hello0message: hello1");

    server.stop().await;
}

#[tokio::test]
async fn subscription_without_a_trigger_times_out_with_408() {
    let server = Server::new(0, None);
    server
        .handle(HttpMethod::GET, "/subscribe", None)
        .upon(HttpMethod::GET, "/broadcast/:message", None)
        .with(200, "text/plain", "message: :message")
        .with_timeout(Duration::from_millis(100));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let resp = common::send_and_collect(
        addr,
        "GET /subscribe HTTP/1.1\r\nHost: a\r\n\r\n",
        Duration::from_millis(400),
    )
    .await;

    assert_eq!(resp.status, 408);

    server.stop().await;
}
