//! Console chat client
//!
//! Logs in as the given userid, prints every packet received from the
//! server, and sends each line typed on stdin as a message. Typing the quit
//! sentinel sends QUIT and exits.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::info;

use crate::error::AppError;
use crate::message::{decode_line, write_packet, Packet};

/// Line that ends the session
pub const QUIT_SENTINEL: &str = "!q";

/// Connect to `addr`, log in as `userid`, and chat over stdin/stdout
pub async fn run(addr: &str, userid: &str) -> Result<(), AppError> {
    let stream = TcpStream::connect(addr).await?;
    info!("Chat client has started for {}", userid);

    let (read_half, mut write_half) = stream.into_split();
    write_packet(&mut write_half, &Packet::login(userid)).await?;

    info!("Input chat messages, Enter {} to quit", QUIT_SENTINEL);
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    run_session(
        BufReader::new(read_half),
        write_half,
        stdin,
        &mut stdout,
        userid,
    )
    .await
}

/// Drive an already logged-in session
///
/// Returns `AppError::ServerClosed` if the server hangs up first.
pub async fn run_session<R, W, I, O>(
    server: R,
    mut writer: W,
    input: I,
    output: &mut O,
    userid: &str,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut server_lines = server.lines();
    let mut input_lines = input.lines();

    loop {
        tokio::select! {
            line = server_lines.next_line() => {
                let Some(line) = line? else {
                    return Err(AppError::ServerClosed);
                };
                if let Some(packet) = decode_line(&line)? {
                    render(output, &packet).await?;
                }
            }
            line = input_lines.next_line() => match line? {
                Some(text) if text.trim_end() != QUIT_SENTINEL => {
                    write_packet(&mut writer, &Packet::msg(userid, text)).await?;
                }
                _ => {
                    write_packet(&mut writer, &Packet::quit(userid)).await?;
                    break;
                }
            },
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

async fn render<O>(output: &mut O, packet: &Packet) -> Result<(), AppError>
where
    O: AsyncWrite + Unpin,
{
    let line = format!("{} -> {}\n", packet.userid, packet.data);
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, split};
    use tokio::time::timeout;

    use super::*;
    use crate::message::read_packet;

    #[tokio::test]
    async fn test_lines_become_messages_until_sentinel() {
        let (client, server) = duplex(4096);
        let (client_read, client_write) = split(client);
        let mut server = BufReader::new(server);
        let input = BufReader::new(&b"hello\n!q\nnever sent\n"[..]);
        let mut output = Vec::new();

        run_session(BufReader::new(client_read), client_write, input, &mut output, "alice")
            .await
            .unwrap();

        assert_eq!(
            read_packet(&mut server).await.unwrap(),
            Some(Packet::msg("alice", "hello"))
        );
        assert_eq!(
            read_packet(&mut server).await.unwrap(),
            Some(Packet::quit("alice"))
        );
    }

    #[tokio::test]
    async fn test_received_packets_are_rendered() {
        let (client, mut server) = duplex(4096);
        let (client_read, client_write) = split(client);
        // Keep stdin open so the session only ends on server hang-up
        let (_stdin_tx, stdin_rx) = duplex(64);
        let mut output = Vec::new();

        write_packet(&mut server, &Packet::msg("bob", "hi")).await.unwrap();
        drop(server);

        let result = timeout(
            Duration::from_secs(1),
            run_session(
                BufReader::new(client_read),
                client_write,
                BufReader::new(stdin_rx),
                &mut output,
                "alice",
            ),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(AppError::ServerClosed)));
        assert_eq!(String::from_utf8(output).unwrap(), "bob -> hi\n");
    }
}
