mod common;

use std::time::Duration;

use common::{spawn_http, spawn_tcp, test_server, Blank, Operands, Record};
use muxcall_rpc::{
    Call, Client, ClientConfig, CodecKind, HttpConfig, RpcError, HEARTBEAT_METHOD, PING, PONG,
};
use tokio::sync::mpsc;

async fn assert_echoes(client: &Client) {
    let blank: Blank = client.call("EchoBlank.Echo_", &Blank {}).await.unwrap();
    assert_eq!(blank, Blank {});

    let record: Record = client
        .call("EchoRecord.Echo_", &Record::sample())
        .await
        .unwrap();
    assert_eq!(record, Record::sample());

    let empty: Vec<u8> = client
        .call("EchoBytes.Echo_", &Vec::<u8>::new())
        .await
        .unwrap();
    assert!(empty.is_empty());

    let large: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
    let echoed: Vec<u8> = client.call("EchoBytes.Echo_", &large).await.unwrap();
    assert_eq!(echoed, large);
}

#[tokio::test]
async fn echo_round_trip_stream_codec() {
    let server = test_server();
    let addr = spawn_tcp(&server, CodecKind::Stream).await;
    let client = Client::dial(&addr, ClientConfig::default().with_codec(CodecKind::Stream))
        .await
        .unwrap();
    assert_echoes(&client).await;
    client.close().await.unwrap();
}

#[tokio::test]
async fn echo_round_trip_framed_codec() {
    let server = test_server();
    let addr = spawn_tcp(&server, CodecKind::Framed).await;
    let client = Client::dial(&addr, ClientConfig::default().with_codec(CodecKind::Framed))
        .await
        .unwrap();
    assert_echoes(&client).await;
    client.close().await.unwrap();
}

#[tokio::test]
async fn echo_round_trip_over_http_connect() {
    let server = test_server();
    for kind in [CodecKind::Stream, CodecKind::Framed] {
        let addr = spawn_http(&server, kind).await;
        let client = Client::dial_http(
            &addr,
            HttpConfig::default(),
            ClientConfig::default().with_codec(kind),
        )
        .await
        .unwrap();
        assert_echoes(&client).await;
        client.close().await.unwrap();
    }
}

#[tokio::test]
async fn http_front_end_rejects_wrong_path() {
    let server = test_server();
    let addr = spawn_http(&server, CodecKind::Framed).await;
    let result = Client::dial_http(
        &addr,
        HttpConfig::default().with_path("/elsewhere"),
        ClientConfig::default(),
    )
    .await;
    assert!(matches!(result, Err(RpcError::Transport(_))));
}

#[tokio::test]
async fn concurrent_calls_complete_out_of_order() {
    let server = test_server();
    let addr = spawn_tcp(&server, CodecKind::Framed).await;
    let client = Client::dial(&addr, ClientConfig::default()).await.unwrap();

    // Earlier calls sleep longer, so responses come back in reverse.
    let (done, mut results) = mpsc::channel::<Call<u64>>(16);
    let mut expected = Vec::new();
    for i in 0..8u64 {
        let millis = (8 - i) * 15;
        let pending = client.go("Arith.Sleep_", &millis, Some(done.clone())).await;
        expected.push((pending.request_id().unwrap(), millis));
    }
    drop(done);

    let mut arrival = Vec::new();
    while let Some(call) = results.recv().await {
        let request_id = call.request_id.unwrap();
        let reply = call.into_result().unwrap();
        let (_, millis) = expected
            .iter()
            .find(|(id, _)| *id == request_id)
            .copied()
            .unwrap();
        assert_eq!(reply, millis, "reply routed to the wrong call");
        arrival.push(request_id);
        if arrival.len() == expected.len() {
            break;
        }
    }
    assert_eq!(arrival.len(), 8);
    assert_ne!(arrival, {
        let mut sorted = arrival.clone();
        sorted.sort();
        sorted
    });
    client.close().await.unwrap();
}

#[tokio::test]
async fn dispatch_errors_are_reported_per_call() {
    let server = test_server();
    let addr = spawn_tcp(&server, CodecKind::Stream).await;
    let client = Client::dial(&addr, ClientConfig::default().with_codec(CodecKind::Stream))
        .await
        .unwrap();

    let ops = Operands { a: 6, b: 0 };
    match client.call::<_, i64>("Arith.Mul", &ops).await {
        Err(RpcError::Failure(msg)) => assert_eq!(msg, "rpc: can't find method Arith.Mul"),
        other => panic!("unexpected result: {other:?}"),
    }
    match client.call::<_, i64>("Nope.Add_", &ops).await {
        Err(RpcError::Failure(msg)) => assert_eq!(msg, "rpc: can't find service Nope"),
        other => panic!("unexpected result: {other:?}"),
    }
    match client.call::<_, i64>("Arith.Add_", "not operands").await {
        Err(RpcError::Failure(msg)) => assert!(msg.starts_with("rpc: decoding argument")),
        other => panic!("unexpected result: {other:?}"),
    }
    match client.call::<_, i64>("Arith.Div_", &ops).await {
        Err(RpcError::Application(msg)) => assert_eq!(msg, "divide by zero"),
        other => panic!("unexpected result: {other:?}"),
    }

    // The connection survives all of the above.
    let sum: i64 = client
        .call("Arith.Add_", &Operands { a: 2, b: 3 })
        .await
        .unwrap();
    assert_eq!(sum, 5);
    client.close().await.unwrap();
}

#[tokio::test]
async fn heartbeat_is_always_registered() {
    let server = test_server();
    let names: Vec<String> = server.services().into_iter().map(|s| s.name).collect();
    assert_eq!(
        names,
        vec!["Arith", "EchoBlank", "EchoBytes", "EchoRecord", "Heartbeat"]
    );

    let addr = spawn_tcp(&server, CodecKind::Framed).await;
    let client = Client::dial(&addr, ClientConfig::default()).await.unwrap();
    let pong: String = client.call(HEARTBEAT_METHOD, PING).await.unwrap();
    assert_eq!(pong, PONG);
    client.close().await.unwrap();

    let heartbeat = server
        .services()
        .into_iter()
        .find(|s| s.name == "Heartbeat")
        .unwrap();
    assert_eq!(heartbeat.methods[0].invocations, 1);
}

#[tokio::test]
async fn full_completion_channel_is_retried_then_discarded() {
    let server = test_server();
    let addr = spawn_tcp(&server, CodecKind::Framed).await;
    let client = Client::dial(&addr, ClientConfig::default()).await.unwrap();

    // Drained inside the retry window: the result arrives.
    let (done, mut results) = mpsc::channel::<Call<i64>>(1);
    done.try_send(Call {
        service_method: "placeholder".into(),
        request_id: None,
        reply: Some(0),
        error: None,
    })
    .unwrap();
    client
        .go("Arith.Add_", &Operands { a: 1, b: 1 }, Some(done.clone()))
        .await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(results.recv().await.unwrap().service_method, "placeholder");
    let delivered = tokio::time::timeout(Duration::from_secs(1), results.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.into_result().unwrap(), 2);
    assert_eq!(client.discarded_replies(), 0);

    // Never drained: the result is dropped and counted.
    done.try_send(Call {
        service_method: "placeholder".into(),
        request_id: None,
        reply: Some(0),
        error: None,
    })
    .unwrap();
    client
        .go("Arith.Add_", &Operands { a: 2, b: 2 }, Some(done.clone()))
        .await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(client.discarded_replies(), 1);
    assert_eq!(results.recv().await.unwrap().service_method, "placeholder");
    assert!(results.try_recv().is_err());

    client.close().await.unwrap();
}

#[tokio::test]
async fn close_completes_in_flight_calls_with_shutdown() {
    let server = test_server();
    let addr = spawn_tcp(&server, CodecKind::Framed).await;
    let client = Client::dial(&addr, ClientConfig::default()).await.unwrap();

    let (done, mut results) = mpsc::channel::<Call<u64>>(8);
    for _ in 0..4 {
        client.go("Arith.Sleep_", &300u64, Some(done.clone())).await;
    }
    drop(done);
    client.close().await.unwrap();

    let mut count = 0;
    while let Some(call) = results.recv().await {
        assert!(matches!(call.error, Some(RpcError::Shutdown)));
        count += 1;
    }
    assert_eq!(count, 4);
    assert!(matches!(client.close().await, Err(RpcError::Shutdown)));
}

#[tokio::test]
async fn server_shutdown_drains_and_disconnects() {
    let server = test_server();
    let addr = spawn_tcp(&server, CodecKind::Framed).await;
    let client = Client::dial(&addr, ClientConfig::default()).await.unwrap();

    let slow = client.go::<_, u64>("Arith.Sleep_", &100u64, None).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    server.shutdown().await;

    // The in-flight call still gets its response before the connection closes.
    assert_eq!(slow.wait().await.unwrap().into_result().unwrap(), 100);
    tokio::time::timeout(Duration::from_secs(2), async {
        while !client.is_shutdown() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let err = client
        .call::<_, i64>("Arith.Add_", &Operands { a: 1, b: 1 })
        .await
        .unwrap_err();
    assert!(err.is_disconnect());
    assert!(server.is_shutdown());
}
