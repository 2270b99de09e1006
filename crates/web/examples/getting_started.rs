use std::sync::atomic::{AtomicU64, Ordering};

use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::Deserialize;
use switchyard_web::router::{HttpRules, HttpService};
use switchyard_web::{
    HttpException, HttpRouting, RoutingRequest, RoutingResponse, Server, ServerConfig, filter_fn, handler_fn,
};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Deserialize, Debug)]
struct User {
    name: String,
    zip: String,
}

#[derive(Debug, thiserror::Error)]
#[error("user store is read only")]
struct ReadOnly;

struct Users;

impl HttpService for Users {
    fn routing(&self, rules: &mut HttpRules) {
        // curl -v http://127.0.0.1:8080/users/42
        rules
            .get("/{id}", handler_fn(|req, res| {
                let id: u64 = req
                    .param("id")
                    .unwrap_or_default()
                    .parse()
                    .map_err(|e| HttpException::bad_request("id must be a number").with_source(e))?;
                res.send(format!("user {id}\r\n"))?;
                Ok(())
            }))
            // curl -v -H 'Content-Type: application/json' -d '{"name":"hello","zip":"world"}' http://127.0.0.1:8080/users
            .post("/", handler_fn(|req, res| {
                let is_json = req
                    .headers()
                    .get(CONTENT_TYPE)
                    .is_some_and(|value| value.as_bytes().starts_with(mime::APPLICATION_JSON.as_ref().as_bytes()));
                if !is_json {
                    res.next();
                    return Ok(());
                }
                let user: User = serde_json::from_slice(req.entity())?;
                info!(name = %user.name, zip = %user.zip, "receive user");
                res.status(StatusCode::CREATED)?;
                res.send_empty()?;
                Ok(())
            }))
            .post("/", handler_fn(|_req, _res| Err(ReadOnly.into())));
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    static REQUESTS: AtomicU64 = AtomicU64::new(0);

    let routing = HttpRouting::builder()
        .filter(filter_fn(|req, _res| {
            let n = REQUESTS.fetch_add(1, Ordering::Relaxed);
            info!(n, method = %req.method(), path = req.path(), "request");
            Ok(())
        }))
        // curl -v http://127.0.0.1:8080/
        .get("/", handler_fn(|_req, res| {
            res.reroute("/users/1");
            Ok(())
        }))
        .register("/users", Users)
        .error(|req: &RoutingRequest, res: &mut RoutingResponse, _err: &ReadOnly| {
            res.status(StatusCode::METHOD_NOT_ALLOWED)?;
            res.send(format!("{} is read only\r\n", req.path()))?;
            Ok(())
        })
        .build()
        .unwrap();

    let config = ServerConfig::from_json(r#"{"max_reroutes": 5, "idle_timeout_secs": 60}"#).unwrap();

    Server::builder().address("127.0.0.1:8080").routing(routing).config(config).build().unwrap().start().await;
}
