//! Demonstration responder - echoes each line to its sender.

use tinylink_services::Network;

const QUIT: &[u8] = b"quit";

pub async fn run(network: Network) {
    loop {
        let (id, line) = network.read_line().await;
        if line.is_empty() {
            continue;
        }
        tracing::debug!(
            connection = %id,
            line = %String::from_utf8_lossy(&line),
            "line received"
        );

        if line.as_ref() == QUIT {
            if let Err(e) = network.close_connection(id).await {
                tracing::debug!(connection = %id, error = %e, "close after quit");
            }
            continue;
        }

        let mut reply = Vec::with_capacity(line.len() + 2);
        reply.extend_from_slice(&line);
        reply.extend_from_slice(b"\r\n");
        if let Err(e) = network.write(id, &reply).await {
            tracing::warn!(connection = %id, error = %e, "reply failed");
        }
    }
}
