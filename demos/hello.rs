use peerwire::{Dispatcher, Invocation, MethodMeta, MethodRegistry, MethodSignature, StreamTransport, Type};
use tokio::{io::BufStream, net::TcpListener};

fn hello() -> MethodSignature {
    MethodSignature::function("Greeter", "hello")
        .positional("name", Type::String)
        .returns(Type::String)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let listener = TcpListener::bind("127.0.0.1:8888").await.unwrap();
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();

        let mut registry = MethodRegistry::new();
        registry.register(hello(), MethodMeta::public(), |inv: Invocation| async move {
            let name: String = inv.value(0)?;
            anyhow::Ok(format!("Hello, {name}!"))
        });
        Dispatcher::builder(StreamTransport::new(BufStream::new(stream)))
            .registry(registry)
            .build()
    });

    let client = Dispatcher::builder(StreamTransport::connect("127.0.0.1:8888").await.unwrap()).build();
    let _server = accept.await.unwrap();

    client.when_ready().await.unwrap();
    let retval: String = client.call(&hello(), vec!["world".into()]).await.unwrap();
    println!("{retval}");
}
