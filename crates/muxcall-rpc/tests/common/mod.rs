#![allow(dead_code)]

use std::marker::PhantomData;
use std::time::Duration;

use muxcall_rpc::{CodecKind, MethodSet, Server, Service, TcpTransport};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blank {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub name: String,
    pub tags: Vec<String>,
    pub score: Option<f64>,
}

impl Record {
    pub fn sample() -> Self {
        Self {
            id: 42,
            name: "muxcall".to_string(),
            tags: vec!["a".into(), "b".into()],
            score: Some(0.5),
        }
    }
}

/// Replies with a copy of its argument.
pub struct Echo<T>(PhantomData<fn() -> T>);

impl<T> Default for Echo<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> Echo<T> {
    fn echo(&self, arg: T, reply: &mut T) -> Result<(), String> {
        *reply = arg;
        Ok(())
    }
}

impl<T> Service for Echo<T>
where
    T: Serialize + DeserializeOwned + Default + Send + 'static,
{
    fn methods(methods: &mut MethodSet<Self>) {
        methods.add("Echo_", Echo::<T>::echo);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Operands {
    pub a: i64,
    pub b: i64,
}

#[derive(Default)]
pub struct Arith;

impl Arith {
    fn add(&self, args: Operands, reply: &mut i64) -> Result<(), String> {
        *reply = args.a + args.b;
        Ok(())
    }

    fn div(&self, args: Operands, reply: &mut i64) -> Result<(), String> {
        if args.b == 0 {
            return Err("divide by zero".to_string());
        }
        *reply = args.a / args.b;
        Ok(())
    }

    fn mul(&self, args: Operands, reply: &mut i64) -> Result<(), String> {
        *reply = args.a * args.b;
        Ok(())
    }

    /// Sleeps for `millis` before echoing it back.
    fn sleep(&self, millis: u64, reply: &mut u64) -> Result<(), String> {
        std::thread::sleep(Duration::from_millis(millis));
        *reply = millis;
        Ok(())
    }
}

impl Service for Arith {
    fn methods(methods: &mut MethodSet<Self>) {
        methods
            .add("Add_", Arith::add)
            .add("Div_", Arith::div)
            .add("Sleep_", Arith::sleep)
            // Missing the suffix, so never callable.
            .add("Mul", Arith::mul);
    }
}

pub fn test_server() -> Server {
    let server = Server::new();
    server.register(Arith).unwrap();
    server
        .register_name("EchoBlank", Echo::<Blank>::default())
        .unwrap();
    server
        .register_name("EchoRecord", Echo::<Record>::default())
        .unwrap();
    server
        .register_name("EchoBytes", Echo::<Vec<u8>>::default())
        .unwrap();
    server
}

/// Bind a loopback listener and serve raw TCP on it in the background.
pub async fn spawn_tcp(server: &Server, kind: CodecKind) -> String {
    let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().to_string();
    let server = server.clone();
    tokio::spawn(async move { server.accept(transport, kind).await });
    addr
}

/// Bind a loopback listener and serve HTTP `CONNECT` on it in the background.
pub async fn spawn_http(server: &Server, kind: CodecKind) -> String {
    let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().to_string();
    let server = server.clone();
    tokio::spawn(async move { server.serve_http(transport, kind).await });
    addr
}
