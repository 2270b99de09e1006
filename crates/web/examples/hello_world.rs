use switchyard_web::{HttpRouting, Server, handler_fn};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// curl -v http://127.0.0.1:3000/
// curl -v --http2-prior-knowledge http://127.0.0.1:3000/
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let routing = HttpRouting::builder()
        .get("/", handler_fn(|_req, res| {
            res.send("hello world")?;
            Ok(())
        }))
        .build()
        .unwrap();

    Server::builder().address("127.0.0.1:3000").routing(routing).build().unwrap().start().await;
}
