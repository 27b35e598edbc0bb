#![cfg(feature = "transport-mock")]
use synth_pub::transport::mock::MockBroker;
use synth_pub::transport::{ConnectOptions, Engine, TransportBuilder, TransportError};

#[tokio::test]
async fn publish_mock_smoke() {
    let broker = MockBroker::new();
    let t = broker.transport();
    t.health_check().await.expect("health");
    let pubr = t.create_publisher("k1").await.expect("pub");
    pubr.publish(bytes::Bytes::from_static(b"hello")).await.expect("send");
    pubr.shutdown().await.expect("release");
    t.shutdown().await.expect("shutdown");

    let got = broker.take_published();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].topic, "k1");
    assert_eq!(got[0].payload.as_ref(), b"hello");
    assert_eq!(broker.publisher_releases(), 1);
    assert_eq!(broker.transport_releases(), 1);
}

#[tokio::test]
async fn builder_honours_failure_options() {
    let mut opts = ConnectOptions::default();
    opts.params.insert("fail_at".into(), "2".into());
    let t = TransportBuilder::connect(Engine::Mock, opts).await.expect("connect");
    let p = t.create_publisher("k").await.expect("pub");
    p.publish(bytes::Bytes::from_static(b"1")).await.expect("first send");
    let err = p.publish(bytes::Bytes::from_static(b"2")).await.unwrap_err();
    assert!(matches!(err, TransportError::Publish(_)));

    let mut opts = ConnectOptions::default();
    opts.params.insert("unreachable".into(), "true".into());
    let t = TransportBuilder::connect(Engine::Mock, opts).await.expect("connect");
    assert!(matches!(t.health_check().await, Err(TransportError::Connect(_))));

    let mut opts = ConnectOptions::default();
    opts.params.insert("fail_release".into(), "true".into());
    let t = TransportBuilder::connect(Engine::Mock, opts).await.expect("connect");
    let p = t.create_publisher("k").await.expect("pub");
    assert!(matches!(p.shutdown().await, Err(TransportError::Other(_))));
}
