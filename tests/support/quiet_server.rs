// ABOUTME: In-process russh server whose commands stay silent before exiting.
// ABOUTME: Lets transport tests hold a session idle without docker.

use russh::keys::{load_secret_key, ssh_key};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Accepts any key; every exec prints nothing and exits 0 after `silence`.
struct QuietHandler {
    silence: Duration,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl server::Handler for QuietHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        _user: &str,
        _public_key: &ssh_key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        let handle = session.handle();
        let silence = self.silence;
        tokio::spawn(async move {
            tokio::time::sleep(silence).await;
            let _ = handle.exit_status_request(channel, 0).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        });
        Ok(())
    }
}

/// Serve one connection on a loopback port, returning the port.
///
/// The host key is the checked-in test key.
pub async fn spawn(silence: Duration) -> u16 {
    let host_key = load_secret_key(super::fixture_key(), None).unwrap();
    let config = Arc::new(server::Config {
        keys: vec![host_key],
        inactivity_timeout: None,
        ..Default::default()
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let handler = QuietHandler {
            silence,
            channels: HashMap::new(),
        };
        let running = server::run_stream(config, stream, handler).await.unwrap();
        let _ = running.await;
    });

    port
}
