use std::time::Duration;

use fixd::{HttpMethod, Server};

/// Small demonstration of the fixture's programmatic surface: a scripted
/// greeting, a delayed response, and a trigger/subscriber pair.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fixd::init_tracing();

    let server = Server::new(8080, None);

    server
        .handle(HttpMethod::GET, "/hello/:name", None)
        .with(200, "text/plain", "Hello, :name!");

    server
        .handle(HttpMethod::GET, "/slow", None)
        .with(200, "text/plain", "...eventually")
        .after(Duration::from_millis(500));

    server
        .handle(HttpMethod::GET, "/subscribe/:room", None)
        .upon(HttpMethod::POST, "/broadcast/:room", None)
        .with(200, "text/plain", "room :room received: [request.body]");

    server
        .handle(HttpMethod::POST, "/broadcast/:room", None)
        .with(202, "text/plain", "broadcast accepted");

    server.start().await?;

    tokio::signal::ctrl_c().await?;
    server.stop().await;

    Ok(())
}
