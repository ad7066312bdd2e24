use std::{
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use log::{debug, info, warn};

use super::{handle_line, ErrorBody, Response};
use crate::service::SaleService;

/// Longest request line a connection may send, newline included. A longer
/// line is answered with `BadRequest` and the connection is closed.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Accepts connections forever, one thread per connection. Calls on a
/// connection are answered in order; calls across connections are ordered by
/// the service's write lock.
pub fn serve(listener: TcpListener, service: Arc<SaleService>) -> io::Result<()> {
    info!("serving sale calls on {}", listener.local_addr()?);
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };
        let service = Arc::clone(&service);
        thread::spawn(move || {
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into());
            debug!("connection from {peer}");
            if let Err(err) = handle_connection(stream, &service) {
                debug!("connection {peer} closed: {err}");
            }
        });
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, service: &SaleService) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let read = (&mut reader).take(MAX_LINE_BYTES).read_line(&mut line)?;
        if read == 0 {
            return Ok(());
        }
        if read as u64 == MAX_LINE_BYTES && !line.ends_with('\n') {
            let response = Response::Error(ErrorBody::new(
                "BadRequest",
                format!("request line exceeds {MAX_LINE_BYTES} bytes"),
            ));
            write_response(&mut writer, &response)?;
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request line too long"));
        }
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(service, &line);
        write_response(&mut writer, &response)?;
    }
}

fn write_response(writer: &mut impl Write, response: &Response) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, response)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
