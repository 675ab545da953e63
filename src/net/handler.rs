//! Text-protocol connection handler.
//!
//! One request per connection: read once, answer once, close.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::api::metrics::METRICS;
use crate::config::Limits;
use crate::idgen::{generate_id, IdRendering, IdSource};
use crate::protocol::text::{
    encode_reply, parse_request, TextRequest, CMD_PING, CMD_SFID, ERROR, ERR_NODE_ID,
    ERR_NOT_SUPPORTED, PONG,
};

/// Compute the reply payload for one raw request.
pub fn execute(raw: &[u8], source: &dyn IdSource) -> String {
    let req = match parse_request(raw) {
        Ok(r) => r,
        Err(e) => {
            debug!("unparseable text request: {}", e);
            return ERR_NOT_SUPPORTED.to_string();
        }
    };

    match req.command() {
        CMD_PING => PONG.to_string(),
        CMD_SFID if req.count == 2 => sfid(&req, source),
        _ => ERR_NOT_SUPPORTED.to_string(),
    }
}

fn sfid(req: &TextRequest, source: &dyn IdSource) -> String {
    let Some(arg) = req.arg(0) else {
        return ERR_NOT_SUPPORTED.to_string();
    };
    let Ok(node) = arg.parse::<i64>() else {
        return ERR_NODE_ID.to_string();
    };
    let id = match generate_id(source, node) {
        Ok(id) => id,
        Err(_) => return ERR_NOT_SUPPORTED.to_string(),
    };
    match serde_json::to_string(&IdRendering::from(id)) {
        Ok(json) => json,
        Err(e) => {
            error!("json serialize error: {}", e);
            ERR_NOT_SUPPORTED.to_string()
        }
    }
}

/// Serve one text-protocol connection.
///
/// End-of-stream before any byte, a read error or the read deadline closes
/// the connection without a reply.
pub async fn handle_text<S>(
    mut stream: S,
    peer: SocketAddr,
    source: &dyn IdSource,
    limits: &Limits,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; limits.text_read_buffer];
    let n = if limits.text_read_timeout_ms == 0 {
        stream.read(&mut buf).await?
    } else {
        match timeout(
            Duration::from_millis(limits.text_read_timeout_ms),
            stream.read(&mut buf),
        )
        .await
        {
            Ok(res) => res?,
            Err(_) => {
                METRICS.inc_text_read_timeouts();
                debug!("{}: no request before the read deadline", peer);
                return Ok(());
            }
        }
    };
    if n == 0 {
        debug!("{}: closed before sending a request", peer);
        return Ok(());
    }

    let reply = execute(&buf[..n], source);
    METRICS.inc_text_requests();
    if reply.as_bytes().first() == Some(&ERROR) {
        METRICS.inc_text_errors();
    }
    trace!("{}: replying {}", peer, reply);

    stream.write_all(&encode_reply(&reply)).await?;
    stream.flush().await
}
