mod cli;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use webchannel::proto::{self, EventBody, GroupId};
use webchannel::{ChannelConfig, Client, ClientConfig, CookieJar, Error, Session, SessionConfig};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialise logging")?;

    let jar = CookieJar::from_cookie_header(&cli.cookie_header()?, &cli.cookie_domain);
    if jar.is_empty() {
        bail!("cookie header holds no cookies");
    }
    let mut session_config = SessionConfig::from_env()?;
    if let Some(proxy) = cli.proxy.clone() {
        session_config = session_config.with_proxy(Some(proxy));
    }
    if let Some(user_agent) = cli.user_agent.clone() {
        session_config = session_config.with_user_agent(user_agent);
    }
    let session = Arc::new(Session::new(session_config, jar).context("failed to build session")?);
    let config = ClientConfig::default()
        .with_channel(ChannelConfig::default().with_max_retries(cli.max_retries));
    let client = Client::new(config, session);

    client.on_stream_event().add_observer(|event| println!("{}", render_event(&event)));
    client
        .on_connect()
        .add_observer(|()| info!(target: "webchannel_tail", "connected"));
    client
        .on_reconnect()
        .add_observer(|()| info!(target: "webchannel_tail", "reconnected"));
    client
        .on_disconnect()
        .add_observer(|()| warn!(target: "webchannel_tail", "disconnected; retrying"));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(target: "webchannel_tail", "interrupt received; shutting down");
                cancel.cancel();
            }
        });
    }

    follow(&client, &cancel, &cli).await
}

/// Keeps a channel open until interrupted or a fatal error.
async fn follow(client: &Client, cancel: &CancellationToken, cli: &Cli) -> Result<()> {
    loop {
        let err = match client.connect(cancel, cli.max_age()).await {
            Ok(()) | Err(Error::Cancelled) => return Ok(()),
            Err(err) => err,
        };
        if err.is_fatal() || cli.once {
            return Err(err).context("event stream stopped");
        }
        let delay = match err {
            Error::ChannelLifetimeExceeded => Duration::ZERO,
            _ => cli.reconnect_delay(),
        };
        warn!(
            target: "webchannel_tail",
            error = %err,
            delay_secs = delay.as_secs(),
            "channel ended; connecting again"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn render_event(event: &proto::Event) -> Value {
    json!({
        "type": event.event_type.map(|kind| format!("{kind:?}")),
        "group": event.group_id.as_ref().and_then(GroupId::routing_id),
        "user": event.user_id.as_ref().and_then(|user| user.id.as_deref()),
        "timestamp_usec": event.timestamp_usec,
        "kind": event.body.as_ref().and_then(EventBody::kind),
        "raw": pblite::to_value(event),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use webchannel::proto::{EventType, UserId};

    #[test_timeout::timeout]
    fn events_render_as_one_json_object() {
        let event = proto::Event {
            group_id: Some(GroupId::dm("dm-9")),
            user_id: Some(UserId {
                id: Some("u1".into()),
                user_type: None,
            }),
            event_type: Some(EventType::MessagePosted),
            body: Some(EventBody {
                event_type: Some(EventType::MessagePosted),
                message_posted: Some(json!([["m1"]])),
                ..Default::default()
            }),
            timestamp_usec: Some(7),
            ..Default::default()
        };
        let rendered = render_event(&event);
        assert_eq!(rendered["type"], "MessagePosted");
        assert_eq!(rendered["group"], "dm-9");
        assert_eq!(rendered["user"], "u1");
        assert_eq!(rendered["kind"], "message_posted");
        assert_eq!(rendered["timestamp_usec"], 7);
        assert_eq!(rendered["raw"][3], 6);
    }
}
