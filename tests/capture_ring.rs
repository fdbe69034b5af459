mod common;

use fixd::{HttpMethod, Server};

#[tokio::test]
async fn bounded_capture_ring_keeps_only_the_newest_requests() {
    let server = Server::new(0, None);
    server.handle(HttpMethod::GET, "/:n", None).with(200, "text/plain", "ok");
    server.set_max_captured_requests(Some(2));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    for n in 1..=3 {
        let resp = common::send(
            addr,
            &format!("GET /{n} HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n"),
        )
        .await;
        assert_eq!(resp.status, 200);
    }

    let captured = server.captured_requests();
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[0].path, "/2");
    assert_eq!(captured[1].path, "/3");

    server.stop().await;
}

#[tokio::test]
async fn request_line_matches_method_target_and_version() {
    let server = Server::new(0, None);
    server.handle(HttpMethod::GET, "/hi", None).with(200, "text/plain", "ok");
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let _ = common::send(
        addr,
        "GET /hi?x=1 HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n",
    )
    .await;

    let captured = server.request().unwrap();
    assert_eq!(captured.request_line, "GET /hi?x=1 HTTP/1.1");

    server.stop().await;
}
