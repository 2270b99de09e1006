use std::hint::black_box;

use bytes::Bytes;
use criterion::{Criterion, criterion_group, criterion_main};
use http::{HeaderMap, Method, Version};
use switchyard_http::context::ConnectionContext;
use switchyard_web::{HttpRouting, Prologue, RoutingRequest, RoutingResponse, handler_fn};

fn routing() -> HttpRouting {
    let mut builder = HttpRouting::builder();
    for i in 0..32 {
        builder = builder.get(&format!("/static/{i}"), handler_fn(|_req, res| {
            res.send("static")?;
            Ok(())
        }));
    }
    builder
        .get("/users/{id}", handler_fn(|req, res| {
            let id = req.param("id").unwrap_or_default().to_owned();
            res.send(id)?;
            Ok(())
        }))
        .get("/fall", handler_fn(|_req, res| {
            res.next();
            Ok(())
        }))
        .get("/fall", handler_fn(|_req, res| {
            res.reroute("/users/7");
            Ok(())
        }))
        .build()
        .unwrap()
}

fn request(path: &str) -> RoutingRequest {
    RoutingRequest::new(Prologue::new(Method::GET, path, None, Version::HTTP_11), HeaderMap::new(), Bytes::new())
}

fn bench_routing(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let routing = &routing();
    let ctx = &ConnectionContext::new("127.0.0.1:50000".parse().unwrap());

    let mut group = c.benchmark_group("routing");
    for (name, path) in [("first_match", "/static/0"), ("param_after_32", "/users/42"), ("next_and_reroute", "/fall")] {
        group.bench_function(name, |b| {
            b.to_async(&runtime).iter(|| async move {
                let mut req = request(path);
                let mut res = RoutingResponse::new();
                routing.route(ctx, &mut req, &mut res).await;
                black_box(res.is_sent())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_routing);
criterion_main!(benches);
