use std::io::{self, BufRead, Write};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crucible::config::ClientConfig;

/// Interactive shell over the line-based request/reply protocol:
/// `host`/`port` flags, a stdin read loop, one line in and one reply
/// line out per round trip.
#[tokio::main]
async fn main() -> io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = ClientConfig::from_args(&args);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let stream = TcpStream::connect(&addr).await?;
    eprintln!("Connected to {addr}");

    let (read_half, mut write_half) = stream.into_split();
    let mut server_reader = BufReader::new(read_half);

    let stdin = io::stdin();
    let mut stdin_lines = stdin.lock();

    loop {
        print!("Crucible> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin_lines.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        write_half.write_all(line.as_bytes()).await?;
        write_half.write_all(b"\n").await?;

        let mut reply = String::new();
        if server_reader.read_line(&mut reply).await? == 0 {
            eprintln!("Connection closed by server");
            break;
        }
        print!("{reply}");

        if line.eq_ignore_ascii_case("EXIT") {
            break;
        }
    }

    Ok(())
}
