use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use webchannel::mock::{MockBackend, MockReply, Route};
use webchannel::proto::{EventType, GroupId};
use webchannel::{Client, ClientConfig, CookieJar, Error, Session, SessionConfig};

const WORLD_PAGE: &str =
    r#"<html><script>window.WIZ_global_data = {"SMqcke":"xsrf-1","S06Grb":"42","qwAQke":"DynamiteWebUi"};</script></html>"#;

fn frame(payload: &str) -> String {
    format!("{}\n{}", payload.encode_utf16().count(), payload)
}

fn client(mock: &MockBackend) -> Client {
    let session = Session::with_backend(
        SessionConfig::default(),
        CookieJar::from_cookie_header("SID=s1", "google.com"),
        Arc::new(mock.clone()),
    )
    .unwrap();
    Client::new(ClientConfig::default(), Arc::new(session))
}

#[test_timeout::tokio_timeout_test]
async fn connect_streams_typed_events() {
    let mock = MockBackend::new();
    mock.push(Route::PathEndsWith("/mole/world".into()), MockReply::ok().chunk(WORLD_PAGE));
    mock.otherwise(
        Route::Register,
        MockReply::ok().set_cookie("COMPASS=dynamite-ui=abc; Domain=.google.com"),
    );
    let event = r#"[[0,["c","S1","",8,12,30000]],[1,[[[[["AAA"]],null,["user-1"],6,[6,[["m1"],"hi"]],[[18]]]]]],[2,[[["broken"]]]]]"#;
    mock.push(
        Route::Handshake,
        MockReply::ok()
            .header("x-http-initial-response", r#"[[0,["c","S1","",8,12,30000]]]"#)
            .chunk(frame(event))
            .hang(),
    );
    let client = client(&mock);
    let mut events = client.on_stream_event().subscribe();
    let mut connects = client.on_connect().subscribe();
    let cancel = CancellationToken::new();

    let connect = client.connect(&cancel, Duration::from_secs(3600));
    let watcher = async {
        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        connects.recv().await.unwrap();
        cancel.cancel();
        (first, second)
    };
    let (result, (first, second)) = tokio::join!(connect, watcher);
    assert!(matches!(result, Err(Error::Cancelled)));

    assert_eq!(first.event_type, Some(EventType::MessagePosted));
    assert_eq!(first.group_id.as_ref().and_then(GroupId::routing_id), Some("AAA"));
    assert!(first.bodies.is_empty());
    assert_eq!(second.event_type, Some(EventType::TypingStateChanged));
    assert_eq!(second.user_id, first.user_id);
    assert!(events.try_recv().is_err());

    let handshake = &mock.requests_to(&Route::Handshake)[0];
    let req = handshake.param("$req").unwrap();
    let req0: Value = url::form_urlencoded::parse(req.as_bytes())
        .find(|(key, _)| key == "req0_data")
        .map(|(_, value)| serde_json::from_str(&value).unwrap())
        .unwrap();
    assert_eq!(req0, serde_json::json!([]));
    assert_eq!(client.channel().unwrap().snapshot().aid, 2);
    assert_eq!(client.tokens().unwrap().xsrf_token, "xsrf-1");
}

#[test_timeout::tokio_timeout_test]
async fn signed_out_cookies_stop_before_the_channel_opens() {
    let mock = MockBackend::new();
    mock.push(
        Route::PathEndsWith("/mole/world".into()),
        MockReply::ok().chunk(r#"<script>WIZ_global_data = {"qwAQke":"AccountsSignInUi"};</script>"#),
    );
    let client = client(&mock);

    let err = client
        .connect(&CancellationToken::new(), Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LoggedOut(_)));
    assert!(mock.requests_to(&Route::Register).is_empty());
    assert!(client.channel().is_none());
}
