mod common;

use std::sync::Arc;

use fixd::handler::HttpResponse;
use fixd::session::request_param_hook;
use fixd::{HttpMethod, Server};

#[tokio::test]
async fn invalidated_session_is_no_longer_observed() {
    let server = Server::new(0, None);

    server
        .handle(HttpMethod::GET, "/login", None)
        .with_session_handler(request_param_hook())
        .with(200, "text/plain", "welcome {user}");

    server
        .handle(HttpMethod::GET, "/whoami", None)
        .with(200, "text/plain", "{user}");

    server
        .handle(HttpMethod::GET, "/logout", None)
        .with_custom(Arc::new(|_req, session| {
            Box::pin(async move {
                if let Some(session) = session {
                    session.invalidate();
                }
                HttpResponse::new(200).with_str_body("logged out")
            })
        }));

    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let login_resp = common::send(
        addr,
        "GET /login?user=tim HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(login_resp.status, 200);
    assert_eq!(login_resp.body_str(), "welcome tim");
    let cookie = login_resp
        .header("Set-Cookie")
        .expect("login should set a session cookie")
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let whoami_resp = common::send(
        addr,
        &format!("GET /whoami HTTP/1.1\r\nHost: a\r\nCookie: {cookie}\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert_eq!(whoami_resp.body_str(), "tim");

    let logout_resp = common::send(
        addr,
        &format!("GET /logout HTTP/1.1\r\nHost: a\r\nCookie: {cookie}\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert_eq!(logout_resp.body_str(), "logged out");

    let after_logout = common::send(
        addr,
        &format!("GET /whoami HTTP/1.1\r\nHost: a\r\nCookie: {cookie}\r\nConnection: close\r\n\r\n"),
    )
    .await;
    // no valid session any more: the token is preserved literally rather
    // than silently expanding to empty.
    assert_eq!(after_logout.body_str(), "{user}");

    server.stop().await;
}
